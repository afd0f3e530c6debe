//! Completeness report over persisted occurrences.

use chrono::{DateTime, Utc};
use serde::Serialize;
use webrec_core::OccurrenceStatus;
use webrec_storage::StoredOccurrence;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub account_id: String,
    pub total: usize,
    pub historical_total: usize,
    pub with_actual_timing: usize,
    pub historical_with_actual_timing: usize,
    pub with_known_status: usize,
    pub with_counts: usize,
    pub with_end_time: usize,
    /// Share of all stored rows with both actual start and actual duration.
    pub actual_timing_pct: f64,
    /// Same measure over historical rows only; drives `recommends_enrichment`.
    pub historical_actual_timing_pct: f64,
    pub known_status_pct: f64,
    pub counts_pct: f64,
    pub end_time_pct: f64,
    pub threshold_pct: f64,
    pub recommends_enrichment: bool,
    pub generated_at: DateTime<Utc>,
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        ((part as f64 / whole as f64) * 1000.0).round() / 10.0
    }
}

/// Upcoming sessions cannot have actual timing yet, so the enrichment
/// recommendation looks at historical rows only.
pub fn assess_quality(
    account_id: &str,
    rows: &[StoredOccurrence],
    threshold_pct: f64,
    generated_at: DateTime<Utc>,
) -> QualityReport {
    let total = rows.len();
    let mut historical_total = 0;
    let mut with_actual_timing = 0;
    let mut historical_with_actual_timing = 0;
    let mut with_known_status = 0;
    let mut with_counts = 0;
    let mut with_end_time = 0;

    for row in rows {
        let occ = &row.occurrence;
        let timed = occ.has_actual_timing();
        if timed {
            with_actual_timing += 1;
        }
        if occ.is_historical {
            historical_total += 1;
            if timed {
                historical_with_actual_timing += 1;
            }
        }
        if occ.status != OccurrenceStatus::Unknown {
            with_known_status += 1;
        }
        if occ.participants_count > 0 || occ.registrants_count > 0 {
            with_counts += 1;
        }
        if occ.end_time.is_some() {
            with_end_time += 1;
        }
    }

    let historical_actual_timing_pct = pct(historical_with_actual_timing, historical_total);
    QualityReport {
        account_id: account_id.to_string(),
        total,
        historical_total,
        with_actual_timing,
        historical_with_actual_timing,
        with_known_status,
        with_counts,
        with_end_time,
        actual_timing_pct: pct(with_actual_timing, total),
        historical_actual_timing_pct,
        known_status_pct: pct(with_known_status, total),
        counts_pct: pct(with_counts, total),
        end_time_pct: pct(with_end_time, total),
        threshold_pct,
        recommends_enrichment: historical_total > 0 && historical_actual_timing_pct < threshold_pct,
        generated_at,
    }
}
