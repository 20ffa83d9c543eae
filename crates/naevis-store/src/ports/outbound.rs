//! # Outbound Ports (Driven Ports)
//!
//! What the process store client needs from a backing store.
//!
//! The client depends on exactly six session operations: open a session,
//! run work against it, start a transaction, commit, abort and end. Running
//! work is expressed by the [`Documents`] supertrait on [`Session`]; the
//! transaction handle forwards to it only while its transaction is active.
//!
//! Production deployments plug in a networked document store.
//! Testing and single-node runs use `MemoryStore` (adapters/memory.rs).

use crate::domain::document::Query;
use crate::domain::errors::StoreError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Keyed JSON document access.
#[async_trait]
pub trait Documents: Send + Sync {
    /// Fetch one document by id.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Fetch every document matching the query.
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// Insert a new document. Fails with `DuplicateKey` if the id is taken.
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError>;

    /// Replace an existing document. Returns whether a document matched.
    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<bool, StoreError>;

    /// Delete a document. Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;
}

/// A store-native unit of work.
///
/// Without a started transaction, writes through the session apply
/// immediately. After `start_transaction`, writes are buffered until
/// `commit` applies them atomically or `abort` discards them.
#[async_trait]
pub trait Session: Documents {
    /// Backend-assigned session id, for logs.
    fn id(&self) -> &str;

    async fn start_transaction(&self) -> Result<(), StoreError>;

    /// Apply buffered writes. Fails with `WriteConflict` if a document this
    /// transaction touched was changed by another writer in the meantime.
    async fn commit(&self) -> Result<(), StoreError>;

    async fn abort(&self) -> Result<(), StoreError>;

    /// Return the session to the pool. Must be safe to call more than once.
    async fn end(&self);
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub min: usize,
    pub max: usize,
    pub open: usize,
}

/// The shared connection pool to the backing store.
///
/// Document operations on the backend itself run outside any transaction.
#[async_trait]
pub trait StoreBackend: Documents {
    /// Round-trip connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Check out a session from the pool.
    async fn open_session(&self) -> Result<Box<dyn Session>, StoreError>;

    fn pool_status(&self) -> PoolStatus;

    /// Disconnect. Later calls fail with `StoreError::Closed`.
    async fn shutdown(&self);
}
