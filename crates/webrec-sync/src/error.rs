use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use webrec_storage::StoreError;

/// Failures that abort a whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no platform connection for owner {0}")]
    UnknownOwner(String),
    #[error("no access token stored for owner {0}")]
    MissingToken(String),
    #[error("access token for owner {owner_id} expired at {expired_at}")]
    TokenExpired {
        owner_id: String,
        expired_at: DateTime<Utc>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::UnknownOwner(_) => "unknown_owner",
            SyncError::MissingToken(_) => "missing_token",
            SyncError::TokenExpired { .. } => "token_expired",
            SyncError::Store(_) => "store",
        }
    }
}

/// A single webinar or occurrence that could not be synced; counted, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemError {
    #[error("expanding webinar {webinar_id}: {message}")]
    Expansion { webinar_id: String, message: String },
    #[error("invalid record for webinar {webinar_id:?}: {message}")]
    Validation { webinar_id: String, message: String },
    #[error("persisting {webinar_id}/{occurrence_id}: {message}")]
    Persistence {
        webinar_id: String,
        occurrence_id: String,
        message: String,
    },
    #[error("worker task failed: {message}")]
    Worker { message: String },
}
