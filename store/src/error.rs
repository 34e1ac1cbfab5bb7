//! Unified error taxonomy for the store and sync engine.

use thiserror::Error;

/// Application error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The storage engine is unreachable or returned corrupt data. Fatal
    /// until the store is reopened.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The storage transaction lost a lock race; the caller may retry.
    #[error("transaction aborted")]
    TransactionAborted,

    /// The remote request failed; retried with backoff per outbox entry.
    #[error("network error: {0}")]
    Network(String),

    /// The remote request timed out; retryable like any network failure.
    #[error("request timed out")]
    Timeout,

    /// An outbox entry spent its retry budget and was dead-lettered.
    #[error("outbox entry {entry_id} exhausted its retry budget after {attempts} attempts")]
    MaxRetriesExceeded { entry_id: String, attempts: u32 },

    /// The sync cycle was cancelled cooperatively; the next trigger resumes.
    #[error("sync cancelled")]
    SyncCancelled,

    /// The merge policy could not settle a divergence; the pair is kept as
    /// a conflict record instead of being dropped.
    #[error("conflict could not be resolved: {0}")]
    ConflictUnresolved(#[from] satchel_engine::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                // SQLITE_BUSY / SQLITE_LOCKED lose a lock race; the caller
                // may retry. Everything else is a storage failure.
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                if matches!(code.as_str(), "5" | "6" | "517") {
                    StoreError::TransactionAborted
                } else {
                    StoreError::StorageUnavailable(e.to_string())
                }
            }
            _ => StoreError::StorageUnavailable(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Network(e.to_string())
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
