//! # Domain Errors
//!
//! Error types surfaced by the process store client, its concurrency gate,
//! transaction handles and backend adapters.
//!
//! Driver-level detail is carried in the error for logging; the HTTP layer
//! never echoes it to callers.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A single attempt did not finish within its deadline.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// No pooled session became free within the acquire deadline.
    #[error("session pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    /// A document with this id already exists.
    #[error("duplicate key '{id}' in collection '{collection}'")]
    DuplicateKey { collection: String, id: String },

    /// A document touched by a transaction was changed by another writer
    /// before the transaction committed.
    #[error("write conflict on '{id}' in collection '{collection}'")]
    WriteConflict { collection: String, id: String },

    /// A transaction operation was invoked in the wrong state.
    #[error("transaction in state {found}, expected {expected}")]
    TransactionState {
        expected: &'static str,
        found: &'static str,
    },

    /// The stored or submitted document is not a JSON object.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The client or backend has been shut down.
    #[error("store client closed")]
    Closed,

    /// Any other backend failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether another attempt of the same operation can succeed.
    ///
    /// Conflicts, malformed documents, state violations and a closed client
    /// fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_)
                | StoreError::Timeout(_)
                | StoreError::PoolExhausted(_)
                | StoreError::Backend(_)
        )
    }

    /// Whether the failure reflects store load or reachability rather than
    /// a broken operation.
    pub fn is_overload(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_)
                | StoreError::Timeout(_)
                | StoreError::PoolExhausted(_)
                | StoreError::Closed
        )
    }
}
