//! Sync pipeline orchestration: collect, dedup, expand, detect, fetch, reconcile, persist.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use webrec_adapters::{ApiContext, FixtureWebinarApi, HttpWebinarApi, WebinarApi};
use webrec_core::{Occurrence, OccurrenceStatus, WebinarRecord};
use webrec_storage::{
    HttpFetcher, InMemoryOccurrenceStore, OccurrenceStore, PgOccurrenceStore, SyncHistoryEntry,
    SyncRunStatus,
};

mod accounts;
mod collector;
mod config;
mod dedup;
mod detector;
mod diagnostics;
mod error;
mod expander;
mod fetcher;
mod persistence;
mod quality;
mod reconciler;
mod scheduler;

pub use accounts::{
    load_account_registry, AccountContext, AccountEntry, AccountRegistry, AccountResolver,
    PgAccountResolver, RegistryAccountResolver, StaticAccountResolver,
};
pub use collector::{collect_sources, CollectedRecords};
pub use config::SyncConfig;
pub use dedup::{deduplicate, DedupOutcome};
pub use detector::{
    assess_completion, best_identifier, buffer_minutes, timing_phase, CompletionAssessment,
    CompletionReason, TimingPhase,
};
pub use diagnostics::{
    DiagnosticEvent, Diagnostics, EventOutcome, Stage, DEFAULT_DIAGNOSTICS_CAPACITY,
};
pub use error::{ItemError, SyncError};
pub use expander::{expand_webinar, merge_occurrences, WorkItem, INSTANCE_MATCH_WINDOW_SECS};
pub use fetcher::{fetch_actual_data, plan_strategies, FetchStrategy};
pub use persistence::{persist_occurrence, PersistOutcome};
pub use quality::{assess_quality, QualityReport};
pub use reconciler::{reconcile, ReconcileInput};
pub use scheduler::maybe_build_scheduler;

pub const CRATE_NAME: &str = "webrec-sync";

/// Body of a sync trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub owner_id: String,
    #[serde(default)]
    pub webinar_id: Option<String>,
    #[serde(default)]
    pub webinar_ids: Vec<String>,
}

impl SyncRequest {
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            ..Self::default()
        }
    }

    pub fn with_webinar(mut self, webinar_id: impl Into<String>) -> Self {
        self.webinar_ids.push(webinar_id.into());
        self
    }

    /// Requested webinar ids, blank entries dropped, duplicates removed.
    pub fn filter(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.webinar_id.iter().chain(self.webinar_ids.iter()) {
            let id = id.trim();
            if !id.is_empty() && !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Sync,
    Enrichment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub total_collected: usize,
    pub unique_webinars: usize,
    pub successful_upserts: usize,
    pub errors: usize,
    pub source_breakdown: BTreeMap<String, usize>,
    pub historical_count: usize,
    pub upcoming_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub run_id: Uuid,
    pub kind: RunKind,
    pub status: SyncRunStatus,
    pub owner_id: String,
    pub account_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub webinars: Vec<Occurrence>,
    pub summary: SyncSummary,
    pub item_errors: Vec<ItemError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub batch_size: usize,
    pub history_days: i64,
    pub quality_threshold_pct: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for PipelineOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            history_days: config.history_days,
            quality_threshold_pct: config.quality_threshold_percent,
        }
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Everything a finished run needs to report itself.
struct RunTally {
    run_id: Uuid,
    kind: RunKind,
    account: AccountContext,
    started_at: DateTime<Utc>,
    total_collected: usize,
    unique_webinars: usize,
    source_breakdown: BTreeMap<String, usize>,
    all_sources_failed: bool,
    outcome: PersistOutcome,
}

#[derive(Clone)]
pub struct SyncService {
    api: Arc<dyn WebinarApi>,
    store: Arc<dyn OccurrenceStore>,
    accounts: Arc<dyn AccountResolver>,
    options: PipelineOptions,
    diagnostics: Diagnostics,
    clock: Clock,
}

impl SyncService {
    pub fn new(
        api: Arc<dyn WebinarApi>,
        store: Arc<dyn OccurrenceStore>,
        accounts: Arc<dyn AccountResolver>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            api,
            store,
            accounts,
            options,
            diagnostics: Diagnostics::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Pin the pipeline's notion of "now"; detection is time-dependent.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn store(&self) -> Arc<dyn OccurrenceStore> {
        self.store.clone()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn api_context(&self, account: &AccountContext, now: DateTime<Utc>) -> ApiContext {
        let history_to = now.date_naive();
        ApiContext {
            account_id: account.account_id.clone(),
            platform_user_id: account.platform_user_id.clone(),
            access_token: account.access_token.clone(),
            history_from: history_to - Duration::days(self.options.history_days.max(0)),
            history_to,
        }
    }

    async fn resolve_account(
        &self,
        owner_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<AccountContext, SyncError> {
        match self.accounts.resolve(owner_id).await {
            Ok(account) => Ok(account),
            Err(err) => {
                warn!(owner_id, error = %err, "sync aborted before collection");
                let entry = SyncHistoryEntry {
                    run_id: Uuid::new_v4(),
                    account_id: owner_id.to_string(),
                    status: SyncRunStatus::Failed,
                    items_synced: 0,
                    summary: serde_json::json!({
                        "error": err.kind(),
                        "message": err.to_string(),
                    })
                    .to_string(),
                    started_at,
                    finished_at: self.now(),
                };
                if let Err(store_err) = self.store.record_sync_run(&entry).await {
                    warn!(owner_id, error = %store_err, "could not record failed sync run");
                }
                Err(err)
            }
        }
    }

    /// Run the full pipeline for one owner. Only account-level problems are
    /// returned as errors; everything else lands in the summary.
    pub async fn trigger(&self, request: SyncRequest) -> Result<SyncResponse, SyncError> {
        let started_at = self.now();
        let account = self.resolve_account(&request.owner_id, started_at).await?;
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "sync_run",
            %run_id,
            owner_id = %account.owner_id,
            account_id = %account.account_id
        );
        self.run_sync(run_id, account, request.filter(), started_at)
            .instrument(span)
            .await
    }

    async fn run_sync(
        &self,
        run_id: Uuid,
        account: AccountContext,
        filter: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Result<SyncResponse, SyncError> {
        let ctx = Arc::new(self.api_context(&account, started_at));
        let collected = collect_sources(self.api.as_ref(), &ctx, &self.diagnostics).await;
        let total_collected = collected.records.len();
        let all_sources_failed =
            collected.failed_sources.len() == webrec_core::SourceTag::LISTINGS.len();

        let deduped = deduplicate(collected.records);
        self.diagnostics.record(
            DiagnosticEvent::new(Stage::Dedup, &account.account_id, EventOutcome::Ok).detail(
                format!(
                    "{} unique, {} merged, {} without id",
                    deduped.webinars.len(),
                    deduped.duplicates_merged,
                    deduped.dropped_without_id
                ),
            ),
        );

        let mut outcome = PersistOutcome::default();
        for _ in 0..deduped.dropped_without_id {
            outcome.push_error(ItemError::Validation {
                webinar_id: String::new(),
                message: "webinar record has no id".to_string(),
            });
        }

        let mut webinars = deduped.webinars;
        if !filter.is_empty() {
            webinars = self.apply_filter(&ctx, webinars, &filter, &mut outcome).await;
        }
        let unique_webinars = webinars.len();

        for batch in webinars.chunks(self.options.batch_size.max(1)) {
            let items = self.expand_batch(&ctx, batch, &mut outcome).await;
            let persisted = self.reconcile_batch(&ctx, items, started_at).await;
            outcome.extend(persisted);
        }

        Ok(self
            .finish_run(RunTally {
                run_id,
                kind: RunKind::Sync,
                account,
                started_at,
                total_collected,
                unique_webinars,
                source_breakdown: collected.breakdown,
                all_sources_failed,
                outcome,
            })
            .await)
    }

    /// Keep only requested webinars; ids missing from every listing are looked up directly.
    async fn apply_filter(
        &self,
        ctx: &ApiContext,
        webinars: Vec<WebinarRecord>,
        filter: &[String],
        outcome: &mut PersistOutcome,
    ) -> Vec<WebinarRecord> {
        let mut kept: Vec<WebinarRecord> = webinars
            .into_iter()
            .filter(|w| filter.contains(&w.id))
            .collect();
        for id in filter {
            if kept.iter().any(|w| &w.id == id) {
                continue;
            }
            match self.api.get_webinar(ctx, id).await {
                Ok(mut webinar) => {
                    if webinar.id.trim().is_empty() {
                        webinar.id = id.clone();
                    }
                    kept.push(webinar);
                }
                Err(err) => {
                    self.diagnostics.record(
                        DiagnosticEvent::new(Stage::Collect, id, EventOutcome::Failed)
                            .strategy("detail")
                            .detail(err.to_string()),
                    );
                    outcome.push_error(ItemError::Expansion {
                        webinar_id: id.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
        kept
    }

    async fn expand_batch(
        &self,
        ctx: &Arc<ApiContext>,
        batch: &[WebinarRecord],
        outcome: &mut PersistOutcome,
    ) -> Vec<WorkItem> {
        let mut set = JoinSet::new();
        for webinar in batch.iter().cloned() {
            let api = self.api.clone();
            let ctx = ctx.clone();
            let diagnostics = self.diagnostics.clone();
            set.spawn(async move {
                expand_webinar(api.as_ref(), &ctx, &webinar, &diagnostics).await
            });
        }

        let mut items = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(expanded)) => items.extend(expanded),
                Ok(Err(err)) => outcome.push_error(err),
                Err(join_err) => outcome.push_error(ItemError::Worker {
                    message: join_err.to_string(),
                }),
            }
        }
        items
    }

    /// Detect, fetch, reconcile, and persist every item of one batch concurrently.
    async fn reconcile_batch(
        &self,
        ctx: &Arc<ApiContext>,
        items: Vec<WorkItem>,
        now: DateTime<Utc>,
    ) -> PersistOutcome {
        let mut set = JoinSet::new();
        for item in items {
            let api = self.api.clone();
            let store = self.store.clone();
            let ctx = ctx.clone();
            let diagnostics = self.diagnostics.clone();
            set.spawn(async move {
                process_item(api.as_ref(), store.as_ref(), &ctx, &diagnostics, item, now).await
            });
        }

        let mut outcome = PersistOutcome::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => outcome.push_result(result),
                Err(join_err) => outcome.push_error(ItemError::Worker {
                    message: join_err.to_string(),
                }),
            }
        }
        outcome
    }

    /// Re-run detection and fetching for stored rows that still lack actual timing.
    pub async fn run_enrichment_pass(&self, owner_id: &str) -> Result<SyncResponse, SyncError> {
        let started_at = self.now();
        let account = self.resolve_account(owner_id, started_at).await?;
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "enrichment_run",
            %run_id,
            owner_id = %account.owner_id,
            account_id = %account.account_id
        );

        self.run_enrichment(run_id, account, started_at).instrument(span).await
    }

    async fn run_enrichment(
        &self,
        run_id: Uuid,
        account: AccountContext,
        started_at: DateTime<Utc>,
    ) -> Result<SyncResponse, SyncError> {
        let ctx = Arc::new(self.api_context(&account, started_at));
        let rows = self.store.list_occurrences(&account.account_id).await?;
        let mut groups: Vec<Vec<WorkItem>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for row in rows.iter().filter(|r| needs_enrichment(&r.occurrence, started_at)) {
            let payload = &row.occurrence.raw_payload;
            let item = WorkItem {
                webinar: payload.webinar.clone(),
                occurrence: payload.occurrence.clone(),
            };
            let slot = *index.entry(item.webinar.id.clone()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(item);
        }
        let candidates: usize = groups.iter().map(Vec::len).sum();
        info!(candidates, webinars = groups.len(), "enrichment candidates selected");

        let mut outcome = PersistOutcome::default();
        for batch in groups.chunks(self.options.batch_size.max(1)) {
            let items: Vec<WorkItem> = batch.iter().flatten().cloned().collect();
            outcome.extend(self.reconcile_batch(&ctx, items, started_at).await);
        }

        let unique_webinars = groups.len();
        Ok(self
            .finish_run(RunTally {
                run_id,
                kind: RunKind::Enrichment,
                account,
                started_at,
                total_collected: candidates,
                unique_webinars,
                source_breakdown: BTreeMap::from([("stored".to_string(), candidates)]),
                all_sources_failed: false,
                outcome,
            })
            .await)
    }

    pub async fn quality(&self, owner_id: &str) -> Result<QualityReport, SyncError> {
        let account = self.accounts.resolve(owner_id).await?;
        let rows = self.store.list_occurrences(&account.account_id).await?;
        Ok(assess_quality(
            &account.account_id,
            &rows,
            self.options.quality_threshold_pct,
            self.now(),
        ))
    }

    /// Runs for the owner's account, newest first. Runs that aborted before an
    /// account was resolved are recorded under the owner id and included here.
    pub async fn sync_history(&self, owner_id: &str) -> Result<Vec<SyncHistoryEntry>, SyncError> {
        let mut runs = self.store.list_sync_runs(owner_id).await?;
        match self.accounts.resolve(owner_id).await {
            Ok(account) => {
                if account.account_id != owner_id {
                    runs.extend(self.store.list_sync_runs(&account.account_id).await?);
                }
            }
            Err(SyncError::MissingToken(_) | SyncError::TokenExpired { .. }) => {}
            Err(SyncError::UnknownOwner(_)) if !runs.is_empty() => {}
            Err(err) => return Err(err),
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    async fn finish_run(&self, tally: RunTally) -> SyncResponse {
        let RunTally {
            run_id,
            kind,
            account,
            started_at,
            total_collected,
            unique_webinars,
            source_breakdown,
            all_sources_failed,
            mut outcome,
        } = tally;

        outcome
            .synced_records
            .sort_by(|a, b| {
                (&a.webinar_id, &a.occurrence_id).cmp(&(&b.webinar_id, &b.occurrence_id))
            });
        let historical_count = outcome.synced_records.iter().filter(|o| o.is_historical).count();
        let summary = SyncSummary {
            total_collected,
            unique_webinars,
            successful_upserts: outcome.success_count,
            errors: outcome.error_count,
            source_breakdown,
            historical_count,
            upcoming_count: outcome.synced_records.len() - historical_count,
        };
        let nothing_synced = outcome.success_count == 0;
        let status = if nothing_synced && (all_sources_failed || outcome.error_count > 0) {
            SyncRunStatus::Failed
        } else if outcome.error_count > 0 || all_sources_failed {
            SyncRunStatus::Partial
        } else {
            SyncRunStatus::Completed
        };

        let quality = match self.store.list_occurrences(&account.account_id).await {
            Ok(rows) => Some(assess_quality(
                &account.account_id,
                &rows,
                self.options.quality_threshold_pct,
                self.now(),
            )),
            Err(err) => {
                warn!(error = %err, "quality assessment skipped");
                None
            }
        };
        if let Some(report) = quality.as_ref().filter(|q| q.recommends_enrichment) {
            self.diagnostics.record(
                DiagnosticEvent::new(Stage::Quality, &account.account_id, EventOutcome::Unhelpful)
                    .detail(format!(
                        "actual timing {:.1}% below threshold {:.1}%",
                        report.historical_actual_timing_pct, report.threshold_pct
                    )),
            );
        }

        let finished_at = self.now();
        let entry = SyncHistoryEntry {
            run_id,
            account_id: account.account_id.clone(),
            status,
            items_synced: u32::try_from(outcome.success_count).unwrap_or(u32::MAX),
            summary: serde_json::to_string(&summary).unwrap_or_default(),
            started_at,
            finished_at,
        };
        if let Err(err) = self.store.record_sync_run(&entry).await {
            warn!(error = %err, "could not record sync run");
        }

        info!(
            status = status.as_str(),
            upserts = summary.successful_upserts,
            errors = summary.errors,
            historical = summary.historical_count,
            upcoming = summary.upcoming_count,
            "run finished"
        );

        SyncResponse {
            run_id,
            kind,
            status,
            owner_id: account.owner_id,
            account_id: account.account_id,
            started_at,
            finished_at,
            webinars: outcome.synced_records,
            summary,
            item_errors: outcome.errors,
            quality,
        }
    }
}

async fn process_item(
    api: &dyn WebinarApi,
    store: &dyn OccurrenceStore,
    ctx: &ApiContext,
    diagnostics: &Diagnostics,
    item: WorkItem,
    now: DateTime<Utc>,
) -> Result<Occurrence, ItemError> {
    let event_id = format!("{}/{}", item.webinar.id, item.occurrence.occurrence_id);
    let assessment = assess_completion(&item.webinar, &item.occurrence, now);
    diagnostics.record(
        DiagnosticEvent::new(Stage::Detect, &event_id, EventOutcome::Ok)
            .strategy(assessment.strategy.as_str())
            .detail(assessment.reason.as_str()),
    );

    let capture = if assessment.should_fetch_actual_data {
        Some(
            fetch_actual_data(
                api,
                ctx,
                &item.webinar,
                &item.occurrence,
                &assessment,
                diagnostics,
            )
            .await,
        )
    } else {
        None
    };

    let occurrence = reconcile(ReconcileInput {
        account_id: &ctx.account_id,
        item: &item,
        assessment: Some(&assessment),
        capture,
        now,
    });
    diagnostics.record(
        DiagnosticEvent::new(Stage::Reconcile, &event_id, EventOutcome::Ok)
            .detail(occurrence.data_source.tag()),
    );
    persist_occurrence(store, occurrence, diagnostics).await
}

/// Stored rows worth another fetch: concluded by status or schedule, yet without actual timing.
pub fn needs_enrichment(occurrence: &Occurrence, now: DateTime<Utc>) -> bool {
    if occurrence.has_actual_timing() || occurrence.status == OccurrenceStatus::Aborted {
        return false;
    }
    occurrence.is_historical || occurrence.end_time.is_some_and(|end| end < now)
}

/// Production wiring: HTTP client, Postgres store, and the configured account source.
pub async fn build_service_from_env(config: &SyncConfig) -> Result<SyncService> {
    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let api = Arc::new(HttpWebinarApi::new(http, config.api_base_url.clone()));
    let store = PgOccurrenceStore::connect(&config.database_url)
        .await
        .context("connecting to DATABASE_URL")?;
    store.migrate().await.context("running migrations")?;

    let accounts: Arc<dyn AccountResolver> = match &config.accounts_file {
        Some(path) => Arc::new(RegistryAccountResolver::from_path(path)?),
        None => Arc::new(PgAccountResolver::new(store.clone())),
    };
    Ok(SyncService::new(api, Arc::new(store), accounts, PipelineOptions::from(config)))
}

/// Offline wiring over a captured fixture bundle and an in-memory store.
pub fn build_fixture_service(
    path: &Path,
    owner_id: &str,
    config: &SyncConfig,
) -> Result<SyncService> {
    let api = FixtureWebinarApi::from_path(path)
        .with_context(|| format!("loading fixture {}", path.display()))?;
    let bundle = api.bundle();
    let account = AccountContext {
        owner_id: owner_id.to_string(),
        account_id: bundle.account_id.clone(),
        platform_user_id: bundle.platform_user_id.clone(),
        access_token: "fixture".to_string(),
    };
    Ok(SyncService::new(
        Arc::new(api),
        Arc::new(InMemoryOccurrenceStore::new()),
        Arc::new(StaticAccountResolver::new(account)),
        PipelineOptions::from(config),
    ))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use webrec_core::{DataSource, RawPayload, SourceTag};

    use super::*;

    #[test]
    fn filter_merges_single_and_list_forms() {
        let request = SyncRequest {
            owner_id: "o".into(),
            webinar_id: Some(" 42 ".into()),
            webinar_ids: vec!["42".into(), "".into(), "7".into()],
        };
        assert_eq!(request.filter(), vec!["42", "7"]);
        assert!(SyncRequest::for_owner("o").filter().is_empty());
    }

    #[test]
    fn request_parses_camel_case_body() {
        let request: SyncRequest =
            serde_json::from_str(r#"{"ownerId":"u-1","webinarId":"99"}"#).unwrap();
        assert_eq!(request.owner_id, "u-1");
        assert_eq!(request.filter(), vec!["99"]);
    }

    #[test]
    fn summary_serializes_with_camel_case_keys() {
        let summary = SyncSummary {
            total_collected: 4,
            unique_webinars: 3,
            successful_upserts: 5,
            errors: 0,
            source_breakdown: BTreeMap::from([("upcoming".to_string(), 2)]),
            historical_count: 2,
            upcoming_count: 3,
        };
        let value = serde_json::to_value(&summary).unwrap();
        for key in [
            "totalCollected",
            "uniqueWebinars",
            "successfulUpserts",
            "errors",
            "sourceBreakdown",
            "historicalCount",
            "upcomingCount",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    fn stored(
        is_historical: bool,
        status: OccurrenceStatus,
        end: Option<DateTime<Utc>>,
    ) -> Occurrence {
        let webinar = WebinarRecord::new("1", SourceTag::Account);
        let occurrence = webrec_core::OccurrenceRecord::from_parent(&webinar);
        Occurrence {
            account_id: "a".into(),
            webinar_id: "1".into(),
            occurrence_id: "1".into(),
            webinar_uuid: None,
            topic: "t".into(),
            scheduled_start: None,
            scheduled_duration_minutes: None,
            actual_start: None,
            actual_duration_minutes: None,
            end_time: end,
            status,
            registrants_count: 0,
            participants_count: 0,
            data_source: DataSource::WebinarRecord,
            is_historical,
            raw_payload: RawPayload {
                webinar,
                occurrence,
                detection: None,
                actual: None,
                provenance: webrec_core::MergeProvenance {
                    topic: webrec_core::FieldOrigin::Webinar,
                    scheduled_timing: webrec_core::FieldOrigin::Default,
                    actual_timing: webrec_core::FieldOrigin::Default,
                    end_time: webrec_core::EndTimeSource::Missing,
                    status: webrec_core::FieldOrigin::Default,
                    counts: webrec_core::FieldOrigin::Default,
                },
            },
        }
    }

    #[test]
    fn enrichment_targets_concluded_rows_without_actual_timing() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap();
        assert!(needs_enrichment(&stored(true, OccurrenceStatus::Ended, None), now));
        assert!(needs_enrichment(
            &stored(false, OccurrenceStatus::Waiting, Some(now - Duration::hours(1))),
            now
        ));
        assert!(!needs_enrichment(
            &stored(false, OccurrenceStatus::Waiting, Some(now + Duration::hours(1))),
            now
        ));
        assert!(!needs_enrichment(&stored(true, OccurrenceStatus::Aborted, None), now));

        let mut timed = stored(true, OccurrenceStatus::Ended, None);
        timed.actual_start = Some(now);
        timed.actual_duration_minutes = Some(30);
        assert!(!needs_enrichment(&timed, now));
    }
}
