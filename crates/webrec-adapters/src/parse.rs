//! Tolerant decoding of platform JSON into core records.
//!
//! Every field is optional upstream; numeric ids arrive as either numbers or
//! strings depending on the endpoint, so lookups here never fail on shape.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use webrec_core::{ActualData, OccurrenceRecord, OccurrenceStatus, SourceTag, WebinarRecord};

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn json_string(value: &JsonValue, path: &[&str]) -> Option<String> {
    json_str(value, path).map(ToString::to_string)
}

/// Ids are numbers on listing endpoints and strings on some report endpoints.
fn json_id(value: &JsonValue, path: &[&str]) -> Option<String> {
    match json_at(value, path)? {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_count(value: &JsonValue, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .filter_map(|key| json_i64(value, &[key]))
        .next()
        .map(|n| u32::try_from(n.max(0)).unwrap_or(u32::MAX))
}

fn json_datetime(value: &JsonValue, path: &[&str]) -> Option<DateTime<Utc>> {
    parse_timestamp(json_str(value, path)?)
}

/// Accepts RFC 3339 and the zone-less `YYYY-MM-DDTHH:MM:SS` form some reports use.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn json_array<'a>(value: &'a JsonValue, key: &str) -> &'a [JsonValue] {
    value
        .get(key)
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Parse one webinar object; a missing id yields an empty id for later validation.
pub fn parse_webinar(value: &JsonValue, source: SourceTag) -> WebinarRecord {
    let mut record = WebinarRecord::new(json_id(value, &["id"]).unwrap_or_default(), source);
    record.uuid = json_string(value, &["uuid"]);
    record.topic = json_string(value, &["topic"]);
    record.webinar_type = json_i64(value, &["type"]);
    record.start_time = json_datetime(value, &["start_time"]);
    record.duration_minutes = json_i64(value, &["duration"]);
    record.end_time = json_datetime(value, &["end_time"]);
    record.status = json_string(value, &["status"]);
    record.created_at = json_datetime(value, &["created_at"]);
    record.registrants_count = json_count(value, &["registrants_count", "total_registrants"]);
    record.participants_count = json_count(value, &["participants_count", "participants"]);
    record.occurrences = json_array(value, "occurrences")
        .iter()
        .filter_map(parse_detail_occurrence)
        .collect();
    record
}

pub struct ListingPage {
    pub webinars: Vec<WebinarRecord>,
    pub next_page_token: Option<String>,
}

pub fn parse_listing_page(value: &JsonValue, source: SourceTag) -> ListingPage {
    ListingPage {
        webinars: json_array(value, "webinars")
            .iter()
            .map(|w| parse_webinar(w, source))
            .collect(),
        next_page_token: json_string(value, &["next_page_token"]),
    }
}

fn parse_detail_occurrence(value: &JsonValue) -> Option<OccurrenceRecord> {
    let mut occ = OccurrenceRecord::new(json_id(value, &["occurrence_id"])?);
    occ.uuid = json_string(value, &["uuid"]);
    occ.start_time = json_datetime(value, &["start_time"]);
    occ.duration_minutes = json_i64(value, &["duration"]);
    occ.status = json_string(value, &["status"]);
    occ.registrants_count = json_count(value, &["registrants_count"]);
    occ.participants_count = json_count(value, &["participants_count"]);
    Some(occ)
}

/// Past instances carry only a uuid and a start time; the uuid doubles as id.
pub fn parse_past_instances(value: &JsonValue) -> Vec<OccurrenceRecord> {
    json_array(value, "webinars")
        .iter()
        .filter_map(|instance| {
            let uuid = json_string(instance, &["uuid"])?;
            let mut occ = OccurrenceRecord::new(uuid.clone());
            occ.uuid = Some(uuid);
            occ.start_time = json_datetime(instance, &["start_time"]);
            Some(occ)
        })
        .collect()
}

pub fn parse_actual_data(value: &JsonValue) -> ActualData {
    ActualData {
        uuid: json_string(value, &["uuid"]),
        topic: json_string(value, &["topic"]),
        start_time: json_datetime(value, &["start_time"]),
        end_time: json_datetime(value, &["end_time"]),
        duration_minutes: json_i64(value, &["duration"]),
        status: json_string(value, &["status"]),
        participants_count: json_count(value, &["participants_count", "participants"]),
        registrants_count: json_count(value, &["registrants_count", "total_registrants"]),
    }
}

/// Instance detail describes the schedule of the requested occurrence. Its timing
/// only counts as actual once the nested occurrence shows it ran, through an
/// `end_time` or an ended status. Top-level fields are the parent's schedule and
/// are never read as timing.
pub fn parse_instance_detail(value: &JsonValue, occurrence_id: &str) -> ActualData {
    let Some(occ) = json_array(value, "occurrences")
        .iter()
        .find(|occ| json_id(occ, &["occurrence_id"]).as_deref() == Some(occurrence_id))
    else {
        return ActualData::default();
    };

    let data = ActualData {
        uuid: json_string(occ, &["uuid"]).or_else(|| json_string(value, &["uuid"])),
        topic: json_string(value, &["topic"]),
        start_time: json_datetime(occ, &["start_time"]),
        end_time: json_datetime(occ, &["end_time"]),
        duration_minutes: json_i64(occ, &["duration"]),
        status: json_string(occ, &["status"]),
        participants_count: json_count(occ, &["participants_count", "participants"]),
        registrants_count: json_count(occ, &["registrants_count", "total_registrants"]),
    };
    let ran = data.end_time.is_some()
        || data.status.as_deref().and_then(OccurrenceStatus::normalize)
            == Some(OccurrenceStatus::Ended);
    if ran {
        data
    } else {
        ActualData {
            start_time: None,
            end_time: None,
            duration_minutes: None,
            ..data
        }
    }
}
