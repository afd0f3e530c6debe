//! HTTP fetch utilities and occurrence persistence for webrec.

mod http;
mod memory;
mod postgres;
mod store;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, CallPacer, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RatePacing, RetryDisposition,
};
pub use memory::InMemoryOccurrenceStore;
pub use postgres::{PgOccurrenceStore, PlatformConnection};
pub use store::{
    validate_occurrence, OccurrenceStore, StoreError, StoredOccurrence, SyncHistoryEntry,
    SyncRunStatus,
};

pub const CRATE_NAME: &str = "webrec-storage";
