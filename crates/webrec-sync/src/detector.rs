//! Time-based completion detection. Pure: callers pass `now`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use webrec_core::{
    add_minutes, Confidence, DetectionNote, OccurrenceRecord, OccurrenceStatus, StrategyKind,
    WebinarRecord,
};

/// Sessions at or under this length get the short buffer.
pub const SHORT_SESSION_MINUTES: i64 = 30;
pub const SHORT_BUFFER_MINUTES: i64 = 15;
pub const LONG_BUFFER_MINUTES: i64 = 30;
/// Minutes past the scheduled end after which a time-based verdict is high confidence.
pub const HIGH_CONFIDENCE_AFTER_MINUTES: i64 = 10;
pub const CREATED_AGE_HOURS: i64 = 48;
pub const STARTED_AGE_HOURS: i64 = 24;

pub fn buffer_minutes(duration_minutes: i64) -> i64 {
    if duration_minutes <= SHORT_SESSION_MINUTES {
        SHORT_BUFFER_MINUTES
    } else {
        LONG_BUFFER_MINUTES
    }
}

/// Where `now` falls relative to a scheduled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingPhase {
    NotStarted,
    InProgress,
    /// Past the scheduled end but inside the overrun buffer.
    GraceWindow,
    Concluded { minutes_past_end: i64 },
}

pub fn timing_phase(
    start: DateTime<Utc>,
    duration_minutes: i64,
    now: DateTime<Utc>,
) -> TimingPhase {
    let end = add_minutes(start, duration_minutes);
    let buffered_end = add_minutes(end, buffer_minutes(duration_minutes));
    if now < start {
        TimingPhase::NotStarted
    } else if now <= end {
        TimingPhase::InProgress
    } else if now < buffered_end {
        TimingPhase::GraceWindow
    } else {
        TimingPhase::Concluded {
            minutes_past_end: (now - end).num_minutes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    ExplicitStatus,
    PastBufferedEnd,
    WithinGraceWindow,
    InProgress,
    NotStarted,
    AgedRecord,
    InsufficientData,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExplicitStatus => "explicit_status",
            Self::PastBufferedEnd => "past_buffered_end",
            Self::WithinGraceWindow => "within_grace_window",
            Self::InProgress => "in_progress",
            Self::NotStarted => "not_started",
            Self::AgedRecord => "aged_record",
            Self::InsufficientData => "insufficient_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionAssessment {
    pub is_completed: bool,
    pub confidence: Confidence,
    pub reason: CompletionReason,
    pub strategy: StrategyKind,
    pub best_identifier: String,
    pub should_fetch_actual_data: bool,
}

impl CompletionAssessment {
    pub fn note(&self) -> DetectionNote {
        DetectionNote {
            is_completed: self.is_completed,
            confidence: self.confidence,
            reason: self.reason.as_str().to_string(),
        }
    }
}

/// Preferred identifier for the completed-occurrence endpoint.
///
/// The occurrence uuid only counts for expanded instances; a one-off webinar's
/// sole occurrence carries its parent's uuid.
pub fn best_identifier(
    webinar: &WebinarRecord,
    occurrence: &OccurrenceRecord,
) -> (StrategyKind, String) {
    let non_blank = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    if occurrence.expanded {
        if let Some(uuid) = non_blank(&occurrence.uuid) {
            return (StrategyKind::OccurrenceUuid, uuid);
        }
    }
    if let Some(uuid) = non_blank(&webinar.uuid) {
        return (StrategyKind::WebinarUuid, uuid);
    }
    (StrategyKind::NumericId, webinar.id.clone())
}

pub fn assess_completion(
    webinar: &WebinarRecord,
    occurrence: &OccurrenceRecord,
    now: DateTime<Utc>,
) -> CompletionAssessment {
    let (strategy, best_identifier) = best_identifier(webinar, occurrence);
    let verdict = |is_completed: bool, confidence: Confidence, reason: CompletionReason| {
        CompletionAssessment {
            is_completed,
            confidence,
            reason,
            strategy,
            best_identifier: best_identifier.clone(),
            should_fetch_actual_data: is_completed,
        }
    };

    let status = occurrence
        .status
        .as_deref()
        .and_then(OccurrenceStatus::normalize)
        .or_else(|| webinar.status.as_deref().and_then(OccurrenceStatus::normalize));
    match status {
        Some(OccurrenceStatus::Ended) => {
            return verdict(true, Confidence::High, CompletionReason::ExplicitStatus);
        }
        Some(OccurrenceStatus::Aborted) => {
            // cancelled sessions have no past-instance record to fetch
            return CompletionAssessment {
                should_fetch_actual_data: false,
                ..verdict(true, Confidence::High, CompletionReason::ExplicitStatus)
            };
        }
        _ => {}
    }

    let start = occurrence.start_time.or(webinar.start_time);
    let duration = occurrence.duration_minutes.or(webinar.duration_minutes);
    if let (Some(start), Some(duration)) = (start, duration) {
        return match timing_phase(start, duration, now) {
            TimingPhase::Concluded { minutes_past_end } => {
                let confidence = if minutes_past_end > HIGH_CONFIDENCE_AFTER_MINUTES {
                    Confidence::High
                } else {
                    Confidence::Medium
                };
                verdict(true, confidence, CompletionReason::PastBufferedEnd)
            }
            TimingPhase::GraceWindow => {
                verdict(false, Confidence::Medium, CompletionReason::WithinGraceWindow)
            }
            TimingPhase::InProgress => {
                verdict(false, Confidence::High, CompletionReason::InProgress)
            }
            TimingPhase::NotStarted => {
                verdict(false, Confidence::High, CompletionReason::NotStarted)
            }
        };
    }

    let created = occurrence.created_at.or(webinar.created_at);
    let aged_by_creation = created.is_some_and(|c| now - c > Duration::hours(CREATED_AGE_HOURS));
    let aged_by_start = start.is_some_and(|s| now - s > Duration::hours(STARTED_AGE_HOURS));
    if aged_by_creation || aged_by_start {
        return verdict(true, Confidence::Medium, CompletionReason::AgedRecord);
    }
    verdict(false, Confidence::Low, CompletionReason::InsufficientData)
}
