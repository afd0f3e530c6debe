use std::collections::BTreeMap;

use futures::future::join_all;
use webrec_adapters::{ApiContext, WebinarApi};
use webrec_core::{SourceTag, WebinarRecord};

use crate::diagnostics::{DiagnosticEvent, Diagnostics, EventOutcome, Stage};

#[derive(Debug, Clone, Default)]
pub struct CollectedRecords {
    /// Listing results concatenated in `SourceTag::LISTINGS` order.
    pub records: Vec<WebinarRecord>,
    pub breakdown: BTreeMap<String, usize>,
    pub failed_sources: Vec<SourceTag>,
}

/// Query every listing surface concurrently. A failing surface contributes
/// nothing and is reported, never propagated.
pub async fn collect_sources(
    api: &dyn WebinarApi,
    ctx: &ApiContext,
    diagnostics: &Diagnostics,
) -> CollectedRecords {
    let calls = SourceTag::LISTINGS
        .into_iter()
        .map(|source| async move { (source, api.list_webinars(ctx, source).await) });
    let results = join_all(calls).await;

    let mut out = CollectedRecords::default();
    for (source, result) in results {
        match result {
            Ok(records) => {
                let outcome = if records.is_empty() {
                    EventOutcome::Empty
                } else {
                    EventOutcome::Ok
                };
                diagnostics.record(
                    DiagnosticEvent::new(Stage::Collect, source.as_str(), outcome)
                        .detail(format!("{} records", records.len())),
                );
                out.breakdown.insert(source.to_string(), records.len());
                out.records.extend(records);
            }
            Err(err) => {
                diagnostics.record(
                    DiagnosticEvent::new(Stage::Collect, source.as_str(), EventOutcome::Failed)
                        .detail(err.to_string()),
                );
                out.breakdown.insert(source.to_string(), 0);
                out.failed_sources.push(source);
            }
        }
    }
    out
}
