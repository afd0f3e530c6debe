//! Persistence seam for reconciled occurrences and the sync-history log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use webrec_core::Occurrence;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("raw payload encoding: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid occurrence: {0}")]
    Invalid(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A row as it sits in the store, with bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOccurrence {
    pub occurrence: Occurrence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Completed,
    Partial,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One append-only sync-history row per pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub run_id: Uuid,
    pub account_id: String,
    pub status: SyncRunStatus,
    pub items_synced: u32,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Rejects rows that would violate the conflict key before they reach the store.
pub fn validate_occurrence(occurrence: &Occurrence) -> Result<(), StoreError> {
    let (account_id, webinar_id, occurrence_id) = occurrence.conflict_key();
    for (name, value) in [
        ("account_id", account_id),
        ("webinar_id", webinar_id),
        ("occurrence_id", occurrence_id),
    ] {
        if value.trim().is_empty() {
            return Err(StoreError::Invalid(format!("{name} is empty")));
        }
    }
    Ok(())
}

#[async_trait]
pub trait OccurrenceStore: Send + Sync {
    /// Insert or overwrite the row keyed by (account, webinar, occurrence).
    async fn upsert_occurrence(
        &self,
        occurrence: &Occurrence,
    ) -> Result<StoredOccurrence, StoreError>;

    async fn list_occurrences(&self, account_id: &str) -> Result<Vec<StoredOccurrence>, StoreError>;

    async fn record_sync_run(&self, entry: &SyncHistoryEntry) -> Result<(), StoreError>;

    async fn list_sync_runs(&self, account_id: &str) -> Result<Vec<SyncHistoryEntry>, StoreError>;
}
