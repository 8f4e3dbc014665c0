use async_trait::async_trait;
use thiserror::Error;

use crate::model::{DepositRecord, DepositStats, SaveOutcome};
use crate::services::connectivity::ConnectionState;

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    /// The backend is unreachable; the gateway reconnects on its own.
    #[error("database unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

/// Idempotent deposit storage keyed by `(transaction_hash, log_index)`.
#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Inserts the record unless its key is already stored. Repeating the
    /// call with the same record is safe and yields `DuplicateIgnored`.
    async fn save_deposit(&self, record: &DepositRecord) -> StorageResult<SaveOutcome>;

    /// Highest block number among stored deposits.
    async fn highest_persisted_height(&self) -> StorageResult<Option<u64>>;

    async fn deposit_stats(&self) -> StorageResult<DepositStats>;

    /// Newest deposits first, ordered by block timestamp.
    async fn recent_deposits(&self, limit: u64) -> StorageResult<Vec<DepositRecord>>;

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
}

/// Checkpoint of the scan cursor.
#[async_trait]
pub trait MonitorStateStore: Send + Sync {
    async fn last_processed_height(&self) -> StorageResult<Option<u64>>;
    async fn upsert_last_processed_height(&self, height: u64) -> StorageResult<()>;
}
