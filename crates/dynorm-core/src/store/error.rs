//! Store error types.

use thiserror::Error;

/// Errors reported by a [`DocumentStore`](super::DocumentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected the request because of throughput limits.
    #[error("request throttled during {operation}")]
    Throttled {
        /// Store operation that was throttled.
        operation: &'static str,
    },

    /// A batch request kept returning unprocessed work.
    #[error("{operation} left {remaining} requests unprocessed after retries")]
    Unprocessed {
        /// Store operation.
        operation: &'static str,
        /// Requests still outstanding.
        remaining: usize,
    },

    /// The table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The secondary index does not exist on the table.
    #[error("index {index} not found on table {table}")]
    IndexNotFound {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
    },

    /// A conditional write found its condition false.
    #[error("conditional check failed")]
    ConditionalCheckFailed,

    /// The request was malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Embedded storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Item serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the request may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Throttled { .. })
    }
}
