use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use webrec_adapters::{ApiContext, ApiError, FixtureBundle, FixtureWebinarApi, WebinarApi};
use webrec_core::{
    ActualData, CallOutcome, DataSource, EndTimeSource, Occurrence, OccurrenceRecord,
    OccurrenceStatus, SourceTag, StrategyKind, WebinarRecord,
};
use webrec_storage::{
    InMemoryOccurrenceStore, OccurrenceStore, StoreError, StoredOccurrence, SyncHistoryEntry,
    SyncRunStatus,
};
use webrec_sync::{
    build_fixture_service, AccountContext, AccountResolver, ItemError, PipelineOptions,
    StaticAccountResolver, SyncConfig, SyncError, SyncRequest, SyncService,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).single().unwrap()
}

fn bundle_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sample-account/bundle.json")
}

fn status_error(status: u16, endpoint: &str) -> ApiError {
    ApiError::Status {
        status,
        endpoint: endpoint.to_string(),
    }
}

/// In-process platform double keyed the way the pipeline addresses it.
#[derive(Default)]
struct ScriptedApi {
    listings: HashMap<SourceTag, Result<Vec<WebinarRecord>, u16>>,
    details: HashMap<String, WebinarRecord>,
    instances: HashMap<String, Vec<OccurrenceRecord>>,
    past: Mutex<HashMap<String, Result<ActualData, u16>>>,
    /// Identifiers whose past-occurrence lookup panics the worker.
    panicking: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedApi {
    fn listing(mut self, source: SourceTag, records: Vec<WebinarRecord>) -> Self {
        self.listings.insert(source, Ok(records));
        self
    }

    fn failing_listing(mut self, source: SourceTag, status: u16) -> Self {
        self.listings.insert(source, Err(status));
        self
    }

    fn detail(mut self, record: WebinarRecord) -> Self {
        self.details.insert(record.id.clone(), record);
        self
    }

    fn past(self, identifier: &str, result: Result<ActualData, u16>) -> Self {
        self.set_past(identifier, result);
        self
    }

    fn set_past(&self, identifier: &str, result: Result<ActualData, u16>) {
        self.past.lock().unwrap().insert(identifier.to_string(), result);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl WebinarApi for ScriptedApi {
    async fn list_webinars(
        &self,
        _ctx: &ApiContext,
        source: SourceTag,
    ) -> Result<Vec<WebinarRecord>, ApiError> {
        self.log(format!("list:{source}"));
        match self.listings.get(&source) {
            Some(Ok(records)) => Ok(records.clone()),
            Some(Err(status)) => Err(status_error(*status, source.as_str())),
            None => Ok(Vec::new()),
        }
    }

    async fn get_webinar(
        &self,
        _ctx: &ApiContext,
        webinar_id: &str,
    ) -> Result<WebinarRecord, ApiError> {
        self.log(format!("detail:{webinar_id}"));
        self.details
            .get(webinar_id)
            .cloned()
            .ok_or_else(|| status_error(404, webinar_id))
    }

    async fn list_past_instances(
        &self,
        _ctx: &ApiContext,
        webinar_id: &str,
    ) -> Result<Vec<OccurrenceRecord>, ApiError> {
        self.log(format!("instances:{webinar_id}"));
        self.instances
            .get(webinar_id)
            .cloned()
            .ok_or_else(|| status_error(404, webinar_id))
    }

    async fn get_past_occurrence(
        &self,
        _ctx: &ApiContext,
        identifier: &str,
    ) -> Result<ActualData, ApiError> {
        self.log(format!("past:{identifier}"));
        if self.panicking.contains(identifier) {
            panic!("upstream client blew up on {identifier}");
        }
        match self.past.lock().unwrap().get(identifier) {
            Some(Ok(data)) => Ok(data.clone()),
            Some(Err(status)) => Err(status_error(*status, identifier)),
            None => Err(status_error(404, identifier)),
        }
    }

    async fn get_instance_detail(
        &self,
        _ctx: &ApiContext,
        webinar_id: &str,
        occurrence_id: &str,
    ) -> Result<ActualData, ApiError> {
        self.log(format!("instance:{webinar_id}/{occurrence_id}"));
        Err(status_error(404, occurrence_id))
    }
}

/// Store that rejects upserts for chosen webinars.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryOccurrenceStore,
    failing_webinars: HashSet<String>,
}

#[async_trait]
impl OccurrenceStore for FlakyStore {
    async fn upsert_occurrence(
        &self,
        occurrence: &Occurrence,
    ) -> Result<StoredOccurrence, StoreError> {
        if self.failing_webinars.contains(&occurrence.webinar_id) {
            return Err(StoreError::Corrupt(format!("refusing {}", occurrence.webinar_id)));
        }
        self.inner.upsert_occurrence(occurrence).await
    }

    async fn list_occurrences(
        &self,
        account_id: &str,
    ) -> Result<Vec<StoredOccurrence>, StoreError> {
        self.inner.list_occurrences(account_id).await
    }

    async fn record_sync_run(&self, entry: &SyncHistoryEntry) -> Result<(), StoreError> {
        self.inner.record_sync_run(entry).await
    }

    async fn list_sync_runs(&self, account_id: &str) -> Result<Vec<SyncHistoryEntry>, StoreError> {
        self.inner.list_sync_runs(account_id).await
    }
}

/// Reports an expired token until `renewed` is set.
#[derive(Default)]
struct RenewableResolver {
    renewed: Mutex<bool>,
}

#[async_trait]
impl AccountResolver for RenewableResolver {
    async fn resolve(&self, owner_id: &str) -> Result<AccountContext, SyncError> {
        if owner_id != "owner-1" {
            return Err(SyncError::UnknownOwner(owner_id.to_string()));
        }
        if *self.renewed.lock().unwrap() {
            Ok(account())
        } else {
            Err(SyncError::TokenExpired {
                owner_id: owner_id.to_string(),
                expired_at: now() - Duration::hours(1),
            })
        }
    }
}

fn account() -> AccountContext {
    AccountContext {
        owner_id: "owner-1".into(),
        account_id: "acct-1".into(),
        platform_user_id: "me".into(),
        access_token: "token".into(),
    }
}

fn service(api: Arc<ScriptedApi>, store: Arc<dyn OccurrenceStore>) -> SyncService {
    SyncService::new(
        api,
        store,
        Arc::new(StaticAccountResolver::new(account())),
        PipelineOptions::default(),
    )
    .with_clock(now)
}

fn one_off(id: &str, start: DateTime<Utc>, duration: i64) -> WebinarRecord {
    let mut w = WebinarRecord::new(id, SourceTag::Account);
    w.topic = Some(format!("Webinar {id}"));
    w.webinar_type = Some(5);
    w.start_time = Some(start);
    w.duration_minutes = Some(duration);
    w
}

fn actual(start: DateTime<Utc>, duration: i64) -> ActualData {
    ActualData {
        start_time: Some(start),
        duration_minutes: Some(duration),
        participants_count: Some(10),
        ..ActualData::default()
    }
}

fn comparable(rows: Vec<StoredOccurrence>) -> Vec<Occurrence> {
    let mut rows: Vec<Occurrence> = rows.into_iter().map(|r| r.occurrence).collect();
    rows.sort_by(|a, b| (&a.webinar_id, &a.occurrence_id).cmp(&(&b.webinar_id, &b.occurrence_id)));
    rows
}

#[tokio::test]
async fn fixture_account_syncs_all_occurrences() {
    let service = build_fixture_service(&bundle_path(), "owner-1", &SyncConfig::default())
        .unwrap()
        .with_clock(now);

    let response = service.trigger(SyncRequest::for_owner("owner-1")).await.unwrap();

    assert_eq!(response.status, SyncRunStatus::Completed);
    assert_eq!(response.summary.total_collected, 6);
    assert_eq!(response.summary.unique_webinars, 3);
    assert_eq!(response.summary.successful_upserts, 5);
    assert_eq!(response.summary.errors, 0);
    assert_eq!(response.summary.historical_count, 3);
    assert_eq!(response.summary.upcoming_count, 2);
    assert_eq!(response.summary.source_breakdown.get("account"), Some(&3));

    let by_key: HashMap<(String, String), &Occurrence> = response
        .webinars
        .iter()
        .map(|o| ((o.webinar_id.clone(), o.occurrence_id.clone()), o))
        .collect();

    let roadmap = by_key[&("111".to_string(), "111".to_string())];
    assert_eq!(roadmap.topic, "Product Roadmap");
    assert_eq!(roadmap.status, OccurrenceStatus::Waiting);
    assert_eq!(roadmap.registrants_count, 18);
    assert!(!roadmap.is_historical);
    assert!(roadmap.raw_payload.actual.is_none());

    let matched = by_key[&("222".to_string(), "1767625200000".to_string())];
    assert_eq!(matched.data_source, DataSource::Actual(StrategyKind::OccurrenceUuid));
    assert_eq!(matched.actual_duration_minutes, Some(62));
    assert_eq!(matched.raw_payload.provenance.end_time, EndTimeSource::Observed);
    assert_eq!(matched.status, OccurrenceStatus::Ended);
    assert_eq!(matched.participants_count, 40);

    let unmatched = by_key[&("222".to_string(), "occ-uuid-0==".to_string())];
    assert_eq!(unmatched.data_source, DataSource::Actual(StrategyKind::NumericId));
    let calls = &unmatched.raw_payload.actual.as_ref().unwrap().api_calls_made;
    assert_eq!(calls.len(), 2);
    assert_eq!(
        unmatched.end_time,
        Some(Utc.with_ymd_and_hms(2025, 12, 29, 15, 57, 0).single().unwrap())
    );

    let future = by_key[&("222".to_string(), "1893855600000".to_string())];
    assert_eq!(future.status, OccurrenceStatus::Waiting);
    assert_eq!(future.data_source, DataSource::OccurrenceRecord);

    let retro = by_key[&("333".to_string(), "333".to_string())];
    assert_eq!(retro.participants_count, 120);
    assert_eq!(retro.data_source, DataSource::Actual(StrategyKind::WebinarUuid));

    let quality = response.quality.unwrap();
    assert_eq!(quality.historical_total, 3);
    assert!(!quality.recommends_enrichment);

    let history = service.sync_history("owner-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].items_synced, 5);
}

#[tokio::test]
async fn rerunning_a_sync_leaves_the_store_unchanged() {
    let service = build_fixture_service(&bundle_path(), "owner-1", &SyncConfig::default())
        .unwrap()
        .with_clock(now);
    let store = service.store();

    service.trigger(SyncRequest::for_owner("owner-1")).await.unwrap();
    let first = comparable(store.list_occurrences("acct-sample").await.unwrap());
    service.trigger(SyncRequest::for_owner("owner-1")).await.unwrap();
    let second = comparable(store.list_occurrences("acct-sample").await.unwrap());

    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
}

#[tokio::test]
async fn fallback_stops_at_first_usable_strategy() {
    let start = now() - Duration::days(3);
    let mut series = one_off("500", start, 60);
    series.webinar_type = Some(9);
    series.uuid = Some("series==".into());
    let mut detail = series.clone();
    let mut occ = OccurrenceRecord::new("1700");
    occ.start_time = Some(start);
    occ.duration_minutes = Some(60);
    detail.occurrences = vec![occ];
    let mut instance = OccurrenceRecord::new("inst==");
    instance.uuid = Some("inst==".into());
    instance.start_time = Some(start);

    let mut api = ScriptedApi::default()
        .listing(SourceTag::Account, vec![series])
        .detail(detail)
        .past("inst==", Err(500))
        .past("series==", Err(500))
        .past("500", Ok(actual(start, 45)));
    api.instances.insert("500".into(), vec![instance]);
    let api = Arc::new(api);

    let response = service(api.clone(), Arc::new(InMemoryOccurrenceStore::new()))
        .trigger(SyncRequest::for_owner("owner-1"))
        .await
        .unwrap();

    assert_eq!(response.webinars.len(), 1);
    let occurrence = &response.webinars[0];
    let capture = occurrence.raw_payload.actual.as_ref().unwrap();
    assert!(capture.success);
    assert_eq!(capture.api_calls_made.len(), 3);
    assert_eq!(capture.errors.len(), 2);
    assert_eq!(occurrence.data_source, DataSource::Actual(StrategyKind::NumericId));
    assert_eq!(occurrence.end_time, Some(start + Duration::minutes(45)));
    assert!(!api.calls().iter().any(|c| c.starts_with("instance:")));
}

#[tokio::test]
async fn exhausted_fallback_keeps_scheduled_values() {
    let start = now() - Duration::hours(2);
    let api = Arc::new(
        ScriptedApi::default()
            .listing(SourceTag::Upcoming, vec![one_off("9", start, 60)])
            .past("9", Err(503)),
    );
    let response = service(api, Arc::new(InMemoryOccurrenceStore::new()))
        .trigger(SyncRequest::for_owner("owner-1"))
        .await
        .unwrap();

    assert_eq!(response.status, SyncRunStatus::Completed);
    let occurrence = &response.webinars[0];
    let capture = occurrence.raw_payload.actual.as_ref().unwrap();
    assert!(!capture.success);
    assert_eq!(capture.api_calls_made.len(), 2);
    assert_eq!(occurrence.actual_start, None);
    assert_eq!(occurrence.scheduled_start, Some(start));
    assert_eq!(occurrence.end_time, Some(start + Duration::minutes(60)));
    assert_eq!(occurrence.data_source, DataSource::WebinarRecord);
}

#[tokio::test]
async fn one_failing_item_does_not_sink_its_batch() {
    let start = now() + Duration::days(2);
    let mut webinars: Vec<WebinarRecord> = (1..=7)
        .map(|i| one_off(&format!("w{i}"), start, 30))
        .collect();
    let mut broken_series = one_off("w8", start, 30);
    broken_series.webinar_type = Some(6);
    webinars.push(broken_series);

    let api = Arc::new(ScriptedApi::default().listing(SourceTag::Account, webinars));
    let store = Arc::new(FlakyStore {
        failing_webinars: HashSet::from(["w3".to_string()]),
        ..FlakyStore::default()
    });

    let response = service(api, store.clone())
        .trigger(SyncRequest::for_owner("owner-1"))
        .await
        .unwrap();

    assert_eq!(response.status, SyncRunStatus::Partial);
    assert_eq!(response.summary.successful_upserts, 6);
    assert_eq!(response.summary.errors, 2);
    assert_eq!(store.inner.len().await, 6);
    assert!(response
        .item_errors
        .iter()
        .any(|e| matches!(e, ItemError::Expansion { webinar_id, .. } if webinar_id == "w8")));

    let history = store.list_sync_runs("acct-1").await.unwrap();
    assert_eq!(history[0].status, SyncRunStatus::Partial);
}

#[tokio::test]
async fn failing_listing_is_tolerated_and_sources_merge() {
    let start = now() + Duration::days(1);
    let mut placeholder = one_off("42", start, 60);
    placeholder.topic = Some("Untitled Webinar".into());
    let named = one_off("42", start, 60);

    let api = Arc::new(
        ScriptedApi::default()
            .listing(SourceTag::Upcoming, vec![placeholder])
            .failing_listing(SourceTag::Historical, 500)
            .listing(SourceTag::Account, vec![named]),
    );
    let service = service(api, Arc::new(InMemoryOccurrenceStore::new()));
    let response = service.trigger(SyncRequest::for_owner("owner-1")).await.unwrap();

    assert_eq!(response.status, SyncRunStatus::Completed);
    assert_eq!(response.summary.total_collected, 2);
    assert_eq!(response.summary.unique_webinars, 1);
    assert_eq!(response.summary.source_breakdown.get("historical"), Some(&0));
    assert_eq!(response.webinars[0].topic, "Webinar 42");
    assert_eq!(
        service
            .diagnostics()
            .count(webrec_sync::Stage::Collect, webrec_sync::EventOutcome::Failed),
        1
    );
}

#[tokio::test]
async fn every_listing_failing_marks_the_run_failed() {
    let api = Arc::new(
        ScriptedApi::default()
            .failing_listing(SourceTag::Upcoming, 500)
            .failing_listing(SourceTag::Historical, 500)
            .failing_listing(SourceTag::Account, 500),
    );
    let response = service(api, Arc::new(InMemoryOccurrenceStore::new()))
        .trigger(SyncRequest::for_owner("owner-1"))
        .await
        .unwrap();
    assert_eq!(response.status, SyncRunStatus::Failed);
    assert!(response.webinars.is_empty());
}

#[tokio::test]
async fn webinar_filter_fetches_unlisted_ids_directly() {
    let start = now() + Duration::days(1);
    let api = Arc::new(
        ScriptedApi::default()
            .listing(SourceTag::Account, vec![one_off("1", start, 60), one_off("2", start, 60)])
            .detail(one_off("77", start, 60)),
    );
    let response = service(api.clone(), Arc::new(InMemoryOccurrenceStore::new()))
        .trigger(SyncRequest::for_owner("owner-1").with_webinar("2").with_webinar("77"))
        .await
        .unwrap();

    let ids: Vec<_> = response.webinars.iter().map(|o| o.webinar_id.as_str()).collect();
    assert_eq!(ids, vec!["2", "77"]);
    assert!(api.calls().contains(&"detail:77".to_string()));
}

#[tokio::test]
async fn unknown_owner_is_fatal_and_recorded() {
    let store = Arc::new(InMemoryOccurrenceStore::new());
    let err = service(Arc::new(ScriptedApi::default()), store.clone())
        .trigger(SyncRequest::for_owner("stranger"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownOwner(_)));

    let history = store.list_sync_runs("stranger").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SyncRunStatus::Failed);
}

#[tokio::test]
async fn enrichment_pass_fills_missing_actual_timing() {
    let start = now() - Duration::days(1);
    let api = Arc::new(
        ScriptedApi::default()
            .listing(SourceTag::Historical, vec![one_off("60", start, 60)])
            .past("60", Err(500)),
    );
    let service = service(api.clone(), Arc::new(InMemoryOccurrenceStore::new()));

    let first = service.trigger(SyncRequest::for_owner("owner-1")).await.unwrap();
    assert!(first.webinars[0].is_historical);
    assert!(!first.webinars[0].has_actual_timing());
    assert!(first.quality.as_ref().unwrap().recommends_enrichment);

    api.set_past("60", Ok(actual(start + Duration::minutes(2), 58)));
    let enriched = service.run_enrichment_pass("owner-1").await.unwrap();
    assert_eq!(enriched.summary.successful_upserts, 1);
    assert_eq!(enriched.webinars[0].actual_duration_minutes, Some(58));

    let report = service.quality("owner-1").await.unwrap();
    assert_eq!(report.actual_timing_pct, 100.0);
    assert!(!report.recommends_enrichment);

    let again = service.run_enrichment_pass("owner-1").await.unwrap();
    assert_eq!(again.summary.total_collected, 0);
}

#[tokio::test]
async fn filtered_lookups_keep_a_run_alive_when_listings_fail() {
    let start = now() + Duration::days(1);
    let api = Arc::new(
        ScriptedApi::default()
            .failing_listing(SourceTag::Upcoming, 500)
            .failing_listing(SourceTag::Historical, 500)
            .failing_listing(SourceTag::Account, 500)
            .detail(one_off("77", start, 60)),
    );
    let response = service(api, Arc::new(InMemoryOccurrenceStore::new()))
        .trigger(SyncRequest::for_owner("owner-1").with_webinar("77"))
        .await
        .unwrap();

    assert_eq!(response.summary.successful_upserts, 1);
    assert_eq!(response.status, SyncRunStatus::Partial);
}

#[tokio::test]
async fn panicking_worker_counts_as_one_failed_item() {
    let start = now() - Duration::hours(3);
    let mut api = ScriptedApi::default()
        .listing(SourceTag::Historical, vec![one_off("p1", start, 60), one_off("p2", start, 60)])
        .past("p2", Ok(actual(start, 50)));
    api.panicking.insert("p1".into());
    let store = Arc::new(InMemoryOccurrenceStore::new());

    let response = service(Arc::new(api), store.clone())
        .trigger(SyncRequest::for_owner("owner-1"))
        .await
        .unwrap();

    assert_eq!(response.summary.errors, 1);
    assert_eq!(response.summary.successful_upserts, 1);
    assert_eq!(response.status, SyncRunStatus::Partial);
    assert!(matches!(response.item_errors[0], ItemError::Worker { .. }));
    let rows = store.list_occurrences("acct-1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].occurrence.webinar_id, "p2");
}

#[tokio::test]
async fn scheduled_instance_detail_is_not_stored_as_actual_data() {
    let bundle: FixtureBundle = serde_json::from_value(serde_json::json!({
        "fixture_id": "one-off-without-report",
        "account_id": "acct-1",
        "platform_user_id": "me",
        "captured_at": "2026-02-01T12:00:00Z",
        "responses": {
            "/users/me/webinars": {
                "body": {"webinars": [{
                    "id": 88, "uuid": "one==", "type": 5, "topic": "One-off",
                    "start_time": "2026-02-01T09:00:00Z", "duration": 60
                }]}
            },
            "/webinars/88": {
                "body": {
                    "id": 88, "uuid": "one==", "topic": "One-off",
                    "start_time": "2026-02-01T09:00:00Z", "duration": 60, "status": "waiting"
                }
            }
        }
    }))
    .unwrap();
    let service = SyncService::new(
        Arc::new(FixtureWebinarApi::new(bundle)),
        Arc::new(InMemoryOccurrenceStore::new()),
        Arc::new(StaticAccountResolver::new(account())),
        PipelineOptions::default(),
    )
    .with_clock(now);

    let response = service.trigger(SyncRequest::for_owner("owner-1")).await.unwrap();
    let occurrence = &response.webinars[0];
    let capture = occurrence.raw_payload.actual.as_ref().unwrap();

    assert!(!capture.success);
    assert_eq!(capture.api_calls_made.len(), 3);
    assert_eq!(capture.api_calls_made[2].strategy, StrategyKind::InstanceDetail);
    assert_eq!(capture.api_calls_made[2].outcome, CallOutcome::Unhelpful);
    assert_eq!(occurrence.data_source, DataSource::WebinarRecord);
    assert_eq!(occurrence.actual_start, None);
    assert_eq!(occurrence.actual_duration_minutes, None);
    assert_eq!(occurrence.scheduled_start, Some(now() - Duration::hours(3)));
}

#[tokio::test]
async fn history_includes_runs_that_failed_before_resolution() {
    let resolver = Arc::new(RenewableResolver::default());
    let service = SyncService::new(
        Arc::new(ScriptedApi::default()),
        Arc::new(InMemoryOccurrenceStore::new()),
        resolver.clone(),
        PipelineOptions::default(),
    )
    .with_clock(now);

    let err = service.trigger(SyncRequest::for_owner("owner-1")).await.unwrap_err();
    assert!(matches!(err, SyncError::TokenExpired { .. }));
    let expired = service.sync_history("owner-1").await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].status, SyncRunStatus::Failed);

    *resolver.renewed.lock().unwrap() = true;
    service.trigger(SyncRequest::for_owner("owner-1")).await.unwrap();
    let statuses: HashSet<_> = service
        .sync_history("owner-1")
        .await
        .unwrap()
        .into_iter()
        .map(|run| run.status)
        .collect();
    assert_eq!(statuses, HashSet::from([SyncRunStatus::Failed, SyncRunStatus::Completed]));
}
