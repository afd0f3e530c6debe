use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use webrec_core::Occurrence;

use crate::store::{
    validate_occurrence, OccurrenceStore, StoreError, StoredOccurrence, SyncHistoryEntry,
};

type ConflictKey = (String, String, String);

/// Process-local store used by fixture runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryOccurrenceStore {
    rows: Mutex<BTreeMap<ConflictKey, StoredOccurrence>>,
    history: Mutex<Vec<SyncHistoryEntry>>,
}

impl InMemoryOccurrenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl OccurrenceStore for InMemoryOccurrenceStore {
    async fn upsert_occurrence(
        &self,
        occurrence: &Occurrence,
    ) -> Result<StoredOccurrence, StoreError> {
        validate_occurrence(occurrence)?;
        let (account_id, webinar_id, occurrence_id) = occurrence.conflict_key();
        let key = (
            account_id.to_string(),
            webinar_id.to_string(),
            occurrence_id.to_string(),
        );
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let created_at = rows.get(&key).map(|row| row.created_at).unwrap_or(now);
        let stored = StoredOccurrence {
            occurrence: occurrence.clone(),
            created_at,
            updated_at: now,
        };
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_occurrences(
        &self,
        account_id: &str,
    ) -> Result<Vec<StoredOccurrence>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|((account, _, _), _)| account == account_id)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn record_sync_run(&self, entry: &SyncHistoryEntry) -> Result<(), StoreError> {
        self.history.lock().await.push(entry.clone());
        Ok(())
    }

    async fn list_sync_runs(&self, account_id: &str) -> Result<Vec<SyncHistoryEntry>, StoreError> {
        let history = self.history.lock().await;
        Ok(history
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .cloned()
            .collect())
    }
}
