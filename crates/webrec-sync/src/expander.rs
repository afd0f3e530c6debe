//! Recurring-series expansion into per-occurrence work items.

use std::collections::HashSet;

use chrono::Duration;
use webrec_adapters::{ApiContext, WebinarApi};
use webrec_core::{OccurrenceRecord, WebinarRecord};

use crate::diagnostics::{DiagnosticEvent, Diagnostics, EventOutcome, Stage};
use crate::ItemError;

/// Past instances closer than this to a scheduled occurrence are the same session.
pub const INSTANCE_MATCH_WINDOW_SECS: i64 = 60;

/// One (webinar, occurrence) pair ready for detection and reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub webinar: WebinarRecord,
    pub occurrence: OccurrenceRecord,
}

pub async fn expand_webinar(
    api: &dyn WebinarApi,
    ctx: &ApiContext,
    webinar: &WebinarRecord,
    diagnostics: &Diagnostics,
) -> Result<Vec<WorkItem>, ItemError> {
    if !webinar.is_recurring() {
        return Ok(vec![WorkItem {
            webinar: webinar.clone(),
            occurrence: OccurrenceRecord::from_parent(webinar),
        }]);
    }

    let (detail, instances) = futures::join!(
        api.get_webinar(ctx, &webinar.id),
        api.list_past_instances(ctx, &webinar.id)
    );

    let mut parent = webinar.clone();
    let mut errors = Vec::new();
    let scheduled = match detail {
        Ok(detail) => {
            fill_from_detail(&mut parent, &detail);
            Some(detail.occurrences)
        }
        Err(err) => {
            diagnostics.record(
                DiagnosticEvent::new(Stage::Expand, &webinar.id, EventOutcome::Failed)
                    .strategy("detail")
                    .detail(err.to_string()),
            );
            errors.push(format!("detail: {err}"));
            None
        }
    };
    let past = match instances {
        Ok(instances) => Some(instances),
        Err(err) => {
            diagnostics.record(
                DiagnosticEvent::new(Stage::Expand, &webinar.id, EventOutcome::Failed)
                    .strategy("past_instances")
                    .detail(err.to_string()),
            );
            errors.push(format!("past instances: {err}"));
            None
        }
    };

    if scheduled.is_none() && past.is_none() {
        return Err(ItemError::Expansion {
            webinar_id: webinar.id.clone(),
            message: errors.join("; "),
        });
    }

    let occurrences = merge_occurrences(scheduled.unwrap_or_default(), past.unwrap_or_default());
    if occurrences.is_empty() {
        diagnostics.record(
            DiagnosticEvent::new(Stage::Expand, &webinar.id, EventOutcome::Empty)
                .detail("no occurrences upstream; treating parent as sole occurrence"),
        );
        return Ok(vec![WorkItem {
            occurrence: OccurrenceRecord::from_parent(&parent),
            webinar: parent,
        }]);
    }

    diagnostics.record(
        DiagnosticEvent::new(Stage::Expand, &webinar.id, EventOutcome::Ok)
            .detail(format!("{} occurrences", occurrences.len())),
    );
    Ok(occurrences
        .into_iter()
        .map(|occurrence| WorkItem {
            webinar: parent.clone(),
            occurrence,
        })
        .collect())
}

/// The detail call can name a series whose listing entry was a placeholder.
fn fill_from_detail(parent: &mut WebinarRecord, detail: &WebinarRecord) {
    if parent.has_placeholder_topic() && !detail.has_placeholder_topic() {
        parent.topic = detail.topic.clone();
    }
    if parent.uuid.is_none() {
        parent.uuid = detail.uuid.clone();
    }
    if parent.duration_minutes.is_none() {
        parent.duration_minutes = detail.duration_minutes;
    }
    if parent.created_at.is_none() {
        parent.created_at = detail.created_at;
    }
}

/// Merge scheduled occurrences with past instances. A past instance that starts
/// within the match window of a scheduled one lends it its uuid; the rest become
/// occurrences of their own, keyed by uuid.
pub fn merge_occurrences(
    scheduled: Vec<OccurrenceRecord>,
    past: Vec<OccurrenceRecord>,
) -> Vec<OccurrenceRecord> {
    let window = Duration::seconds(INSTANCE_MATCH_WINDOW_SECS);
    let mut merged: Vec<OccurrenceRecord> = Vec::with_capacity(scheduled.len() + past.len());
    let mut seen: HashSet<String> = HashSet::new();

    for occurrence in scheduled {
        if occurrence.occurrence_id.trim().is_empty()
            || !seen.insert(occurrence.occurrence_id.clone())
        {
            continue;
        }
        merged.push(occurrence);
    }

    let mut claimed = vec![false; merged.len()];
    for instance in past {
        let matched = instance.start_time.and_then(|start| {
            merged.iter().take(claimed.len()).enumerate().position(|(idx, occ)| {
                !claimed[idx]
                    && occ.uuid.is_none()
                    && occ
                        .start_time
                        .is_some_and(|s| (s - start).num_seconds().abs() <= window.num_seconds())
            })
        });
        match matched {
            Some(idx) => {
                claimed[idx] = true;
                let target = &mut merged[idx];
                target.uuid = instance
                    .uuid
                    .clone()
                    .or_else(|| Some(instance.occurrence_id.clone()));
                if target.participants_count.is_none() {
                    target.participants_count = instance.participants_count;
                }
            }
            None => {
                if instance.occurrence_id.trim().is_empty()
                    || !seen.insert(instance.occurrence_id.clone())
                {
                    continue;
                }
                merged.push(instance);
            }
        }
    }

    merged.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.occurrence_id.cmp(&b.occurrence_id))
    });
    merged
}
