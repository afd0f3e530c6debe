//! Core domain model and provenance types for webinar occurrence reconciliation.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "webrec-core";

/// Topic stored when no upstream record carries a usable one.
pub const PLACEHOLDER_TOPIC: &str = "Untitled Webinar";

/// Upstream `type` discriminants that mark a recurring webinar.
pub const RECURRING_WEBINAR_TYPES: [i64; 2] = [6, 9];

/// True when the topic is missing, blank, or the placeholder sentinel.
pub fn is_placeholder_topic(topic: Option<&str>) -> bool {
    match topic.map(str::trim) {
        None | Some("") => true,
        Some(t) => t.eq_ignore_ascii_case(PLACEHOLDER_TOPIC),
    }
}

pub fn add_minutes(start: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    start + Duration::minutes(minutes)
}

/// Upstream listing surface a record was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Upcoming,
    Historical,
    Account,
    Detail,
}

impl SourceTag {
    pub const LISTINGS: [SourceTag; 3] =
        [SourceTag::Upcoming, SourceTag::Historical, SourceTag::Account];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Upcoming => "upcoming",
            SourceTag::Historical => "historical",
            SourceTag::Account => "account",
            SourceTag::Detail => "detail",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical lifecycle of one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    Waiting,
    Started,
    Ended,
    Aborted,
    #[default]
    Unknown,
}

impl OccurrenceStatus {
    /// Map an upstream status string onto the canonical enum.
    ///
    /// Returns `None` for values the platform does not document, so callers can
    /// fall through to the next record in precedence order.
    pub fn normalize(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "waiting" | "scheduled" | "upcoming" => Some(Self::Waiting),
            "started" | "live" | "in_progress" | "in-progress" => Some(Self::Started),
            "ended" | "finished" | "completed" => Some(Self::Ended),
            "aborted" | "cancelled" | "canceled" | "deleted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Parse a value written by this crate, treating anything else as unknown.
    pub fn from_stored(raw: &str) -> Self {
        match raw {
            "unknown" => Self::Unknown,
            other => Self::normalize(other).unwrap_or(Self::Unknown),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Started => "started",
            Self::Ended => "ended",
            Self::Aborted => "aborted",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Aborted)
    }
}

impl fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Identifier family used to address the completed-occurrence endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    OccurrenceUuid,
    WebinarUuid,
    NumericId,
    InstanceDetail,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OccurrenceUuid => "occurrence_uuid",
            Self::WebinarUuid => "webinar_uuid",
            Self::NumericId => "numeric_id",
            Self::InstanceDetail => "instance_detail",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "occurrence_uuid" => Some(Self::OccurrenceUuid),
            "webinar_uuid" => Some(Self::WebinarUuid),
            "numeric_id" => Some(Self::NumericId),
            "instance_detail" => Some(Self::InstanceDetail),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parent webinar record as returned by listing and detail endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebinarRecord {
    pub id: String,
    pub uuid: Option<String>,
    pub topic: Option<String>,
    pub webinar_type: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub registrants_count: Option<u32>,
    pub participants_count: Option<u32>,
    pub source: SourceTag,
    #[serde(default)]
    pub occurrences: Vec<OccurrenceRecord>,
}

impl WebinarRecord {
    pub fn new(id: impl Into<String>, source: SourceTag) -> Self {
        Self {
            id: id.into(),
            uuid: None,
            topic: None,
            webinar_type: None,
            start_time: None,
            duration_minutes: None,
            end_time: None,
            status: None,
            created_at: None,
            registrants_count: None,
            participants_count: None,
            source,
            occurrences: Vec::new(),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.webinar_type
            .is_some_and(|t| RECURRING_WEBINAR_TYPES.contains(&t))
    }

    pub fn has_placeholder_topic(&self) -> bool {
        is_placeholder_topic(self.topic.as_deref())
    }
}

/// One scheduled or past instance of a webinar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    pub occurrence_id: String,
    pub uuid: Option<String>,
    pub topic: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub registrants_count: Option<u32>,
    pub participants_count: Option<u32>,
    /// False when the parent record stands in as its own sole occurrence.
    pub expanded: bool,
}

impl OccurrenceRecord {
    pub fn new(occurrence_id: impl Into<String>) -> Self {
        Self {
            occurrence_id: occurrence_id.into(),
            uuid: None,
            topic: None,
            start_time: None,
            duration_minutes: None,
            status: None,
            created_at: None,
            registrants_count: None,
            participants_count: None,
            expanded: true,
        }
    }

    /// The parent record treated as the single occurrence of a one-off webinar.
    pub fn from_parent(webinar: &WebinarRecord) -> Self {
        Self {
            occurrence_id: webinar.id.clone(),
            uuid: webinar.uuid.clone(),
            topic: webinar.topic.clone(),
            start_time: webinar.start_time,
            duration_minutes: webinar.duration_minutes,
            status: webinar.status.clone(),
            created_at: webinar.created_at,
            registrants_count: webinar.registrants_count,
            participants_count: webinar.participants_count,
            expanded: false,
        }
    }
}

/// Values reported by the platform for a concluded occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ActualData {
    pub uuid: Option<String>,
    pub topic: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub status: Option<String>,
    pub participants_count: Option<u32>,
    pub registrants_count: Option<u32>,
}

impl ActualData {
    /// A payload counts only if it moves at least one timing field.
    pub fn has_timing(&self) -> bool {
        self.start_time.is_some() || self.duration_minutes.is_some() || self.end_time.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Usable,
    Unhelpful,
    Failed,
}

/// One attempted strategy call, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallRecord {
    pub strategy: StrategyKind,
    pub identifier: String,
    pub endpoint: String,
    pub outcome: CallOutcome,
    pub error: Option<String>,
}

/// Result of the actual-data fetch stage for one occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualDataCapture {
    pub success: bool,
    pub strategy: Option<StrategyKind>,
    pub data: Option<ActualData>,
    pub api_calls_made: Vec<ApiCallRecord>,
    pub errors: Vec<String>,
}

impl ActualDataCapture {
    pub fn usable(&self) -> Option<(&ActualData, StrategyKind)> {
        match (self.success, &self.data, self.strategy) {
            (true, Some(data), Some(strategy)) => Some((data, strategy)),
            _ => None,
        }
    }
}

/// Which record in the precedence chain supplied a reconciled field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    ActualData,
    Occurrence,
    Webinar,
    Derived,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndTimeSource {
    Observed,
    Calculated,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeProvenance {
    pub topic: FieldOrigin,
    pub scheduled_timing: FieldOrigin,
    pub actual_timing: FieldOrigin,
    pub end_time: EndTimeSource,
    pub status: FieldOrigin,
    pub counts: FieldOrigin,
}

/// Completion verdict as persisted alongside the merged record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionNote {
    pub is_completed: bool,
    pub confidence: Confidence,
    pub reason: String,
}

/// Everything that went into one reconciled occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub webinar: WebinarRecord,
    pub occurrence: OccurrenceRecord,
    pub detection: Option<DetectionNote>,
    pub actual: Option<ActualDataCapture>,
    pub provenance: MergeProvenance,
}

/// Tag naming the stage that produced the final timing of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DataSource {
    Actual(StrategyKind),
    OccurrenceRecord,
    WebinarRecord,
}

impl DataSource {
    pub fn tag(&self) -> String {
        match self {
            Self::Actual(strategy) => format!("actual:{strategy}"),
            Self::OccurrenceRecord => "occurrence_record".to_string(),
            Self::WebinarRecord => "webinar_record".to_string(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "occurrence_record" => Some(Self::OccurrenceRecord),
            "webinar_record" => Some(Self::WebinarRecord),
            other => other
                .strip_prefix("actual:")
                .and_then(StrategyKind::parse)
                .map(Self::Actual),
        }
    }
}

impl From<DataSource> for String {
    fn from(value: DataSource) -> Self {
        value.tag()
    }
}

impl TryFrom<String> for DataSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown data source tag {value:?}"))
    }
}

/// Canonical persisted occurrence row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub account_id: String,
    pub webinar_id: String,
    pub occurrence_id: String,
    pub webinar_uuid: Option<String>,
    pub topic: String,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_duration_minutes: Option<i64>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_duration_minutes: Option<i64>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: OccurrenceStatus,
    pub registrants_count: u32,
    pub participants_count: u32,
    pub data_source: DataSource,
    pub is_historical: bool,
    pub raw_payload: RawPayload,
}

impl Occurrence {
    pub fn conflict_key(&self) -> (&str, &str, &str) {
        (&self.account_id, &self.webinar_id, &self.occurrence_id)
    }

    pub fn has_actual_timing(&self) -> bool {
        self.actual_start.is_some() && self.actual_duration_minutes.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection_covers_blank_and_sentinel() {
        assert!(is_placeholder_topic(None));
        assert!(is_placeholder_topic(Some("  ")));
        assert!(is_placeholder_topic(Some("untitled webinar")));
        assert!(!is_placeholder_topic(Some("Quarterly Review")));
    }

    #[test]
    fn status_normalization_maps_platform_aliases() {
        assert_eq!(OccurrenceStatus::normalize("scheduled"), Some(OccurrenceStatus::Waiting));
        assert_eq!(OccurrenceStatus::normalize("LIVE"), Some(OccurrenceStatus::Started));
        assert_eq!(OccurrenceStatus::normalize("in_progress"), Some(OccurrenceStatus::Started));
        assert_eq!(OccurrenceStatus::normalize("finished"), Some(OccurrenceStatus::Ended));
        assert_eq!(OccurrenceStatus::normalize("completed"), Some(OccurrenceStatus::Ended));
        assert_eq!(OccurrenceStatus::normalize("cancelled"), Some(OccurrenceStatus::Aborted));
        assert_eq!(OccurrenceStatus::normalize("mystery"), None);
        assert_eq!(OccurrenceStatus::from_stored("mystery"), OccurrenceStatus::Unknown);
    }

    #[test]
    fn recurring_types_are_six_and_nine() {
        let mut webinar = WebinarRecord::new("1", SourceTag::Upcoming);
        assert!(!webinar.is_recurring());
        webinar.webinar_type = Some(9);
        assert!(webinar.is_recurring());
        webinar.webinar_type = Some(5);
        assert!(!webinar.is_recurring());
    }

    #[test]
    fn data_source_tags_parse_back() {
        for source in [
            DataSource::Actual(StrategyKind::OccurrenceUuid),
            DataSource::Actual(StrategyKind::InstanceDetail),
            DataSource::OccurrenceRecord,
            DataSource::WebinarRecord,
        ] {
            assert_eq!(DataSource::parse(&source.tag()), Some(source));
        }
        assert_eq!(DataSource::parse("actual:bogus"), None);
    }
}
