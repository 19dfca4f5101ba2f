pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{DelegationRecord, YearFilter};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("stored timestamp {0} is not a valid instant")]
    InvalidTimestamp(i64),
    #[error("failed creating store directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Time-indexed delegation persistence.
///
/// Records are keyed by `timestamp`; writing a record whose timestamp is
/// already stored replaces it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts or replaces each record by timestamp. On error, any subset of
    /// the batch may have landed.
    async fn upsert(&self, records: &[DelegationRecord]) -> Result<(), StoreError>;

    /// The record with the greatest timestamp, `None` on an empty store.
    async fn latest(&self) -> Result<Option<DelegationRecord>, StoreError>;

    /// Newest-first page of records. `page` is 1-based.
    async fn query(
        &self,
        page: u64,
        page_size: u64,
        year: YearFilter,
    ) -> Result<Vec<DelegationRecord>, StoreError>;

    async fn count(&self, year: YearFilter) -> Result<u64, StoreError>;
}
