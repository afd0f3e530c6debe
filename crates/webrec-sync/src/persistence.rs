use serde::Serialize;
use webrec_core::Occurrence;
use webrec_storage::{validate_occurrence, OccurrenceStore, StoreError};

use crate::diagnostics::{DiagnosticEvent, Diagnostics, EventOutcome, Stage};
use crate::ItemError;

/// Aggregate result of writing one run's reconciled rows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistOutcome {
    pub success_count: usize,
    pub error_count: usize,
    pub synced_records: Vec<Occurrence>,
    pub errors: Vec<ItemError>,
}

impl PersistOutcome {
    pub fn push_result(&mut self, result: Result<Occurrence, ItemError>) {
        match result {
            Ok(occurrence) => {
                self.success_count += 1;
                self.synced_records.push(occurrence);
            }
            Err(err) => self.push_error(err),
        }
    }

    pub fn push_error(&mut self, err: ItemError) {
        self.error_count += 1;
        self.errors.push(err);
    }

    pub fn extend(&mut self, other: PersistOutcome) {
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.synced_records.extend(other.synced_records);
        self.errors.extend(other.errors);
    }
}

/// Validate and upsert one row. Failures are per-item, never fatal.
pub async fn persist_occurrence(
    store: &dyn OccurrenceStore,
    occurrence: Occurrence,
    diagnostics: &Diagnostics,
) -> Result<Occurrence, ItemError> {
    let event_id = format!("{}/{}", occurrence.webinar_id, occurrence.occurrence_id);
    let result = match validate_occurrence(&occurrence) {
        Ok(()) => store.upsert_occurrence(&occurrence).await.map(|stored| stored.occurrence),
        Err(err) => Err(err),
    };
    match result {
        Ok(stored) => {
            diagnostics.record(DiagnosticEvent::new(Stage::Persist, event_id, EventOutcome::Ok));
            Ok(stored)
        }
        Err(err) => {
            diagnostics.record(
                DiagnosticEvent::new(Stage::Persist, event_id, EventOutcome::Failed)
                    .detail(err.to_string()),
            );
            Err(match err {
                StoreError::Invalid(message) => ItemError::Validation {
                    webinar_id: occurrence.webinar_id,
                    message,
                },
                other => ItemError::Persistence {
                    webinar_id: occurrence.webinar_id,
                    occurrence_id: occurrence.occurrence_id,
                    message: other.to_string(),
                },
            })
        }
    }
}
