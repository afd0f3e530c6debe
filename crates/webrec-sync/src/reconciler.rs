//! Field-level merge of webinar, occurrence, and fetched actual data.
//!
//! Precedence for every field is actual data, then the occurrence record, then
//! the parent webinar record, then a derived or default value. Each choice is
//! recorded in the stored payload's provenance.

use chrono::{DateTime, Utc};
use webrec_core::{
    add_minutes, is_placeholder_topic, ActualData, ActualDataCapture, DataSource, EndTimeSource,
    FieldOrigin, MergeProvenance, Occurrence, OccurrenceStatus, RawPayload, WebinarRecord,
    PLACEHOLDER_TOPIC,
};

use crate::detector::{timing_phase, CompletionAssessment, TimingPhase};
use crate::expander::WorkItem;

pub struct ReconcileInput<'a> {
    pub account_id: &'a str,
    pub item: &'a WorkItem,
    pub assessment: Option<&'a CompletionAssessment>,
    pub capture: Option<ActualDataCapture>,
    pub now: DateTime<Utc>,
}

fn reconcile_topic(item: &WorkItem, actual: Option<&ActualData>) -> (String, FieldOrigin) {
    let candidates = [
        (actual.and_then(|a| a.topic.as_deref()), FieldOrigin::ActualData),
        (item.occurrence.topic.as_deref(), FieldOrigin::Occurrence),
        (item.webinar.topic.as_deref(), FieldOrigin::Webinar),
    ];
    candidates
        .into_iter()
        .find(|(topic, _)| !is_placeholder_topic(*topic))
        .and_then(|(topic, origin)| topic.map(|t| (t.trim().to_string(), origin)))
        .unwrap_or_else(|| (PLACEHOLDER_TOPIC.to_string(), FieldOrigin::Default))
}

fn actual_duration(actual: &ActualData) -> Option<i64> {
    actual.duration_minutes.or_else(|| match (actual.start_time, actual.end_time) {
        (Some(start), Some(end)) if end >= start => Some((end - start).num_minutes()),
        _ => None,
    })
}

fn reconcile_status(
    item: &WorkItem,
    actual: Option<&ActualData>,
    scheduled_start: Option<DateTime<Utc>>,
    scheduled_duration: Option<i64>,
    now: DateTime<Utc>,
) -> (OccurrenceStatus, FieldOrigin) {
    if let Some(actual) = actual {
        // The completed-occurrence endpoint only answers for sessions that ran.
        let status = actual
            .status
            .as_deref()
            .and_then(OccurrenceStatus::normalize)
            .unwrap_or(OccurrenceStatus::Ended);
        return (status, FieldOrigin::ActualData);
    }
    if let Some(status) = item.occurrence.status.as_deref().and_then(OccurrenceStatus::normalize) {
        return (status, FieldOrigin::Occurrence);
    }
    if let Some(status) = item.webinar.status.as_deref().and_then(OccurrenceStatus::normalize) {
        return (status, FieldOrigin::Webinar);
    }
    match (scheduled_start, scheduled_duration) {
        (Some(start), Some(duration)) => {
            let status = match timing_phase(start, duration, now) {
                TimingPhase::NotStarted => OccurrenceStatus::Waiting,
                TimingPhase::InProgress | TimingPhase::GraceWindow => OccurrenceStatus::Started,
                TimingPhase::Concluded { .. } => OccurrenceStatus::Ended,
            };
            (status, FieldOrigin::Derived)
        }
        _ => (OccurrenceStatus::Unknown, FieldOrigin::Default),
    }
}

/// Largest count across the chain; ties go to the higher-precedence record.
fn max_count(values: [(Option<u32>, FieldOrigin); 3]) -> (u32, Option<FieldOrigin>) {
    let mut best: Option<(u32, FieldOrigin)> = None;
    for (value, origin) in values {
        if let Some(value) = value {
            if best.map_or(true, |(current, _)| value > current) {
                best = Some((value, origin));
            }
        }
    }
    match best {
        Some((value, origin)) => (value, Some(origin)),
        None => (0, None),
    }
}

pub fn reconcile(input: ReconcileInput<'_>) -> Occurrence {
    let ReconcileInput {
        account_id,
        item,
        assessment,
        capture,
        now,
    } = input;
    let webinar: &WebinarRecord = &item.webinar;
    let occurrence = &item.occurrence;
    let usable = capture.as_ref().and_then(|c| c.usable());
    let actual = usable.map(|(data, _)| data);

    let (topic, topic_origin) = reconcile_topic(item, actual);

    let (scheduled_start, scheduled_origin) = match (occurrence.start_time, webinar.start_time) {
        (Some(start), _) => (Some(start), FieldOrigin::Occurrence),
        (None, Some(start)) => (Some(start), FieldOrigin::Webinar),
        (None, None) => (None, FieldOrigin::Default),
    };
    let scheduled_duration = occurrence.duration_minutes.or(webinar.duration_minutes);

    let actual_start = actual.and_then(|a| a.start_time);
    let actual_duration_minutes = actual.and_then(actual_duration);
    let actual_origin = if actual_start.is_some() || actual_duration_minutes.is_some() {
        FieldOrigin::ActualData
    } else {
        FieldOrigin::Default
    };

    let (end_time, end_source) = match actual.and_then(|a| a.end_time) {
        Some(end) => (Some(end), EndTimeSource::Observed),
        None => {
            let start = actual_start.or(scheduled_start);
            let duration = actual_duration_minutes.or(scheduled_duration);
            match (start, duration) {
                (Some(start), Some(duration)) => {
                    (Some(add_minutes(start, duration)), EndTimeSource::Calculated)
                }
                _ => (None, EndTimeSource::Missing),
            }
        }
    };

    let (status, status_origin) =
        reconcile_status(item, actual, scheduled_start, scheduled_duration, now);

    let (registrants_count, registrants_origin) = max_count([
        (actual.and_then(|a| a.registrants_count), FieldOrigin::ActualData),
        (occurrence.registrants_count, FieldOrigin::Occurrence),
        (webinar.registrants_count, FieldOrigin::Webinar),
    ]);
    let (participants_count, participants_origin) = max_count([
        (actual.and_then(|a| a.participants_count), FieldOrigin::ActualData),
        (occurrence.participants_count, FieldOrigin::Occurrence),
        (webinar.participants_count, FieldOrigin::Webinar),
    ]);
    let counts_origin = participants_origin
        .or(registrants_origin)
        .unwrap_or(FieldOrigin::Default);

    let is_historical = actual.is_some() || status.is_terminal();
    let data_source = match usable {
        Some((_, strategy)) => DataSource::Actual(strategy),
        None if occurrence.expanded => DataSource::OccurrenceRecord,
        None => DataSource::WebinarRecord,
    };

    Occurrence {
        account_id: account_id.to_string(),
        webinar_id: webinar.id.clone(),
        occurrence_id: occurrence.occurrence_id.clone(),
        webinar_uuid: webinar.uuid.clone(),
        topic,
        scheduled_start,
        scheduled_duration_minutes: scheduled_duration,
        actual_start,
        actual_duration_minutes,
        end_time,
        status,
        registrants_count,
        participants_count,
        data_source,
        is_historical,
        raw_payload: RawPayload {
            webinar: webinar.clone(),
            occurrence: occurrence.clone(),
            detection: assessment.map(CompletionAssessment::note),
            actual: capture,
            provenance: MergeProvenance {
                topic: topic_origin,
                scheduled_timing: scheduled_origin,
                actual_timing: actual_origin,
                end_time: end_source,
                status: status_origin,
                counts: counts_origin,
            },
        },
    }
}
