//! In-memory backing store.
//!
//! Collections of JSON documents keyed by id behind one `RwLock`. Sessions
//! are checked out of a bounded pool; a session with a started transaction
//! buffers its writes and applies them under a single write lock on commit,
//! so other sessions never observe a partial transaction.
//!
//! Transactions are optimistic. The first time a transaction touches a
//! document it remembers the committed value it saw, and later reads of that
//! document return the remembered value. Commit fails with
//! [`StoreError::WriteConflict`] if any remembered document has changed since,
//! so two scopes that read-modify-write the same document cannot both win.

use crate::domain::document::Query;
use crate::domain::errors::StoreError;
use crate::domain::policy::PoolBounds;
use crate::ports::outbound::{Documents, PoolStatus, Session, StoreBackend};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

type Collection = BTreeMap<String, Value>;

/// Buffered write inside a transaction.
#[derive(Debug, Clone)]
enum Pending {
    Insert(Value),
    Replace(Value),
    Delete,
}

type Key = (String, String);
type WriteSet = BTreeMap<Key, Pending>;

/// Buffered state of one open transaction.
#[derive(Debug, Default)]
struct Txn {
    writes: WriteSet,
    /// Committed value of each touched document at first touch.
    reads: BTreeMap<Key, Option<Value>>,
}

impl Txn {
    fn key(collection: &str, id: &str) -> Key {
        (collection.to_string(), id.to_string())
    }
}

struct MemoryInner {
    collections: RwLock<HashMap<String, Collection>>,
    pool: Arc<Semaphore>,
    bounds: PoolBounds,
    acquire_timeout: Duration,
    open_sessions: AtomicUsize,
    next_session: AtomicU64,
    available: AtomicBool,
    closed: AtomicBool,
}

impl MemoryInner {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        if !self.available.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned()
    }

    fn snapshot(&self, collection: &str) -> Collection {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        let mut guard = self.collections.write();
        let target = guard.entry(collection.to_string()).or_default();
        if target.contains_key(id) {
            return Err(duplicate(collection, id));
        }
        target.insert(id.to_string(), doc);
        Ok(())
    }

    fn replace(&self, collection: &str, id: &str, doc: Value) -> bool {
        let mut guard = self.collections.write();
        match guard.get_mut(collection).and_then(|c| c.get_mut(id)) {
            Some(slot) => {
                *slot = doc;
                true
            }
            None => false,
        }
    }

    fn delete(&self, collection: &str, id: &str) -> bool {
        self.collections
            .write()
            .get_mut(collection)
            .map(|c| c.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Validate then apply a transaction under one lock. Nothing is applied
    /// if an insert collides or a touched document changed since it was
    /// first read.
    fn apply(&self, txn: Txn) -> Result<usize, StoreError> {
        let Txn { writes, reads } = txn;
        if writes.is_empty() {
            return Ok(0);
        }
        let mut guard = self.collections.write();

        for ((collection, id), pending) in &writes {
            if let Pending::Insert(_) = pending {
                if guard.get(collection).is_some_and(|c| c.contains_key(id)) {
                    return Err(duplicate(collection, id));
                }
            }
        }

        for ((collection, id), seen) in &reads {
            let current = guard.get(collection).and_then(|c| c.get(id));
            if current != seen.as_ref() {
                return Err(StoreError::WriteConflict {
                    collection: collection.clone(),
                    id: id.clone(),
                });
            }
        }

        let count = writes.len();
        for ((collection, id), pending) in writes {
            let target = guard.entry(collection).or_default();
            match pending {
                Pending::Insert(doc) => {
                    target.insert(id, doc);
                }
                Pending::Replace(doc) => {
                    if let Some(slot) = target.get_mut(&id) {
                        *slot = doc;
                    }
                }
                Pending::Delete => {
                    target.remove(&id);
                }
            }
        }
        Ok(count)
    }
}

fn duplicate(collection: &str, id: &str) -> StoreError {
    StoreError::DuplicateKey {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn ensure_object(doc: &Value) -> Result<(), StoreError> {
    if doc.is_object() {
        Ok(())
    } else {
        Err(StoreError::InvalidDocument(
            "documents must be JSON objects".into(),
        ))
    }
}

/// In-memory [`StoreBackend`].
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(PoolBounds::default(), Duration::from_secs(5))
    }
}

impl MemoryStore {
    pub fn new(bounds: PoolBounds, acquire_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                collections: RwLock::new(HashMap::new()),
                pool: Arc::new(Semaphore::new(bounds.max)),
                bounds,
                acquire_timeout,
                open_sessions: AtomicUsize::new(0),
                next_session: AtomicU64::new(1),
                available: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate losing (or regaining) connectivity.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Release);
    }

    /// Bulk-load documents, taking each id from `id_field`.
    pub fn import(
        &self,
        collection: &str,
        id_field: &str,
        docs: Vec<Value>,
    ) -> Result<usize, StoreError> {
        let mut loaded = 0;
        for doc in docs {
            ensure_object(&doc)?;
            let id = doc
                .get(id_field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    StoreError::InvalidDocument(format!("missing string field '{id_field}'"))
                })?;
            self.inner.insert(collection, &id, doc)?;
            loaded += 1;
        }
        debug!(collection, loaded, "Imported documents");
        Ok(loaded)
    }

    /// Number of committed documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .collections
            .read()
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl Documents for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.inner.check_online()?;
        Ok(self.inner.get(collection, id))
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.inner.check_online()?;
        Ok(query.apply(self.inner.snapshot(collection).into_values()))
    }

    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        self.inner.check_online()?;
        ensure_object(&doc)?;
        self.inner.insert(collection, id, doc)
    }

    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<bool, StoreError> {
        self.inner.check_online()?;
        ensure_object(&doc)?;
        Ok(self.inner.replace(collection, id, doc))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.inner.check_online()?;
        Ok(self.inner.delete(collection, id))
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.check_online()
    }

    async fn open_session(&self) -> Result<Box<dyn Session>, StoreError> {
        self.inner.check_online()?;

        let acquire = Arc::clone(&self.inner.pool).acquire_owned();
        let permit = match tokio::time::timeout(self.inner.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::Closed),
            Err(_) => return Err(StoreError::PoolExhausted(self.inner.acquire_timeout)),
        };

        self.inner.open_sessions.fetch_add(1, Ordering::AcqRel);
        let n = self.inner.next_session.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemorySession {
            id: format!("mem-{n}"),
            inner: Arc::clone(&self.inner),
            permit: Mutex::new(Some(permit)),
            txn: Mutex::new(None),
        }))
    }

    fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            min: self.inner.bounds.min,
            max: self.inner.bounds.max,
            open: self.inner.open_sessions.load(Ordering::Acquire),
        }
    }

    async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.pool.close();
        debug!("Memory store shut down");
    }
}

/// Pooled session over a [`MemoryStore`].
pub struct MemorySession {
    id: String,
    inner: Arc<MemoryInner>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    txn: Mutex<Option<Txn>>,
}

impl MemorySession {
    fn check_usable(&self) -> Result<(), StoreError> {
        if self.permit.lock().is_none() {
            return Err(StoreError::Closed);
        }
        self.inner.check_online()
    }

    /// The document as this transaction sees it: pending writes over the
    /// value seen at first touch. Records that value if this is the first
    /// touch.
    fn observe(&self, txn: &mut Txn, collection: &str, id: &str) -> Option<Value> {
        let key = Txn::key(collection, id);
        match txn.writes.get(&key) {
            Some(Pending::Insert(doc)) | Some(Pending::Replace(doc)) => return Some(doc.clone()),
            Some(Pending::Delete) => return None,
            None => {}
        }
        txn.reads
            .entry(key)
            .or_insert_with(|| self.inner.get(collection, id))
            .clone()
    }

    fn release(&self) {
        if self.permit.lock().take().is_some() {
            self.inner.open_sessions.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[async_trait]
impl Documents for MemorySession {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.check_usable()?;
        match self.txn.lock().as_mut() {
            Some(txn) => Ok(self.observe(txn, collection, id)),
            None => Ok(self.inner.get(collection, id)),
        }
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.check_usable()?;
        let mut view = self.inner.snapshot(collection);
        let mut txn = self.txn.lock();
        let Some(txn) = txn.as_mut() else {
            return Ok(query.apply(view.into_values()));
        };

        for ((c, id), seen) in txn.reads.iter() {
            if c != collection {
                continue;
            }
            match seen {
                Some(doc) => view.insert(id.clone(), doc.clone()),
                None => view.remove(id),
            };
        }
        // Matched committed documents count as touched.
        for (id, doc) in view.iter() {
            let key = Txn::key(collection, id);
            if query.matches(doc) && !txn.writes.contains_key(&key) {
                txn.reads.entry(key).or_insert_with(|| Some(doc.clone()));
            }
        }
        for ((c, id), pending) in txn.writes.iter() {
            if c != collection {
                continue;
            }
            match pending {
                Pending::Insert(doc) | Pending::Replace(doc) => {
                    view.insert(id.clone(), doc.clone());
                }
                Pending::Delete => {
                    view.remove(id);
                }
            }
        }
        Ok(query.apply(view.into_values()))
    }

    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        self.check_usable()?;
        ensure_object(&doc)?;
        let mut txn = self.txn.lock();
        let Some(txn) = txn.as_mut() else {
            return self.inner.insert(collection, id, doc);
        };

        if self.observe(txn, collection, id).is_some() {
            return Err(duplicate(collection, id));
        }
        let key = Txn::key(collection, id);
        let pending = match txn.writes.get(&key) {
            // Re-creating a document deleted earlier in this transaction.
            Some(Pending::Delete) => Pending::Replace(doc),
            _ => Pending::Insert(doc),
        };
        txn.writes.insert(key, pending);
        Ok(())
    }

    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<bool, StoreError> {
        self.check_usable()?;
        ensure_object(&doc)?;
        let mut txn = self.txn.lock();
        let Some(txn) = txn.as_mut() else {
            return Ok(self.inner.replace(collection, id, doc));
        };

        if self.observe(txn, collection, id).is_none() {
            return Ok(false);
        }
        let key = Txn::key(collection, id);
        let pending = match txn.writes.get(&key) {
            Some(Pending::Insert(_)) => Pending::Insert(doc),
            _ => Pending::Replace(doc),
        };
        txn.writes.insert(key, pending);
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.check_usable()?;
        let mut txn = self.txn.lock();
        let Some(txn) = txn.as_mut() else {
            return Ok(self.inner.delete(collection, id));
        };

        if self.observe(txn, collection, id).is_none() {
            return Ok(false);
        }
        let key = Txn::key(collection, id);
        if let Some(Pending::Insert(_)) = txn.writes.get(&key) {
            txn.writes.remove(&key);
        } else {
            txn.writes.insert(key, Pending::Delete);
        }
        Ok(true)
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_transaction(&self) -> Result<(), StoreError> {
        self.check_usable()?;
        let mut txn = self.txn.lock();
        if txn.is_some() {
            return Err(StoreError::TransactionState {
                expected: "no transaction",
                found: "active",
            });
        }
        *txn = Some(Txn::default());
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let txn = self.txn.lock().take().ok_or(StoreError::TransactionState {
            expected: "active",
            found: "no transaction",
        })?;
        self.check_usable()?;
        let applied = self.inner.apply(txn)?;
        debug!(session = %self.id, applied, "Transaction committed");
        Ok(())
    }

    async fn abort(&self) -> Result<(), StoreError> {
        if let Some(txn) = self.txn.lock().take() {
            debug!(session = %self.id, discarded = txn.writes.len(), "Transaction aborted");
        }
        Ok(())
    }

    async fn end(&self) {
        self.txn.lock().take();
        self.release();
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(PoolBounds::new(1, 2).unwrap(), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_auto_commit_writes_outside_transaction() {
        let store = store();
        store.insert("songs", "s1", json!({"songid": "s1"})).await.unwrap();
        assert!(store.get("songs", "s1").await.unwrap().is_some());
        assert!(store.replace("songs", "s1", json!({"songid": "s1", "plays": 1})).await.unwrap());
        assert!(!store.replace("songs", "nope", json!({})).await.unwrap());
        assert!(store.delete("songs", "s1").await.unwrap());
        assert!(store.is_empty("songs"));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = store();
        store.insert("songs", "s1", json!({})).await.unwrap();
        let err = store.insert("songs", "s1", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn test_non_object_document_rejected() {
        let store = store();
        let err = store.insert("songs", "s1", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_transaction_isolated_until_commit() {
        let store = store();
        let session = store.open_session().await.unwrap();
        session.start_transaction().await.unwrap();
        session.insert("playlists", "pl_1", json!({"name": "a"})).await.unwrap();

        assert!(session.get("playlists", "pl_1").await.unwrap().is_some());
        assert!(store.get("playlists", "pl_1").await.unwrap().is_none());

        session.commit().await.unwrap();
        assert!(store.get("playlists", "pl_1").await.unwrap().is_some());
        session.end().await;
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let store = store();
        store.insert("playlists", "pl_1", json!({"name": "a"})).await.unwrap();

        let session = store.open_session().await.unwrap();
        session.start_transaction().await.unwrap();
        assert!(session.delete("playlists", "pl_1").await.unwrap());
        session.insert("playlists", "pl_2", json!({"name": "b"})).await.unwrap();
        assert_eq!(session.find("playlists", &Query::new()).await.unwrap().len(), 1);
        session.abort().await.unwrap();
        session.end().await;

        assert_eq!(store.len("playlists"), 1);
        assert!(store.get("playlists", "pl_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_commit_conflict_applies_nothing() {
        let store = store();
        let session = store.open_session().await.unwrap();
        session.start_transaction().await.unwrap();
        session.insert("likes", "u1:s1", json!({})).await.unwrap();
        session.insert("likes", "u1:s2", json!({})).await.unwrap();

        store.insert("likes", "u1:s2", json!({})).await.unwrap();

        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert!(store.get("likes", "u1:s1").await.unwrap().is_none());
        session.end().await;
    }

    #[tokio::test]
    async fn test_concurrent_replace_second_commit_conflicts() {
        let store = store();
        store.insert("playlists", "pl_1", json!({"songs": []})).await.unwrap();

        let a = store.open_session().await.unwrap();
        let b = store.open_session().await.unwrap();
        a.start_transaction().await.unwrap();
        b.start_transaction().await.unwrap();

        assert!(a.get("playlists", "pl_1").await.unwrap().is_some());
        assert!(b.get("playlists", "pl_1").await.unwrap().is_some());
        a.replace("playlists", "pl_1", json!({"songs": ["s1"]})).await.unwrap();
        b.replace("playlists", "pl_1", json!({"songs": ["s2"]})).await.unwrap();

        a.commit().await.unwrap();
        let err = b.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict { .. }));
        a.end().await;
        b.end().await;

        let stored = store.get("playlists", "pl_1").await.unwrap().unwrap();
        assert_eq!(stored, json!({"songs": ["s1"]}));
    }

    #[tokio::test]
    async fn test_replace_of_concurrently_deleted_document_conflicts() {
        let store = store();
        store.insert("playlists", "pl_1", json!({"name": "a"})).await.unwrap();

        let session = store.open_session().await.unwrap();
        session.start_transaction().await.unwrap();
        assert!(session.replace("playlists", "pl_1", json!({"name": "b"})).await.unwrap());

        assert!(store.delete("playlists", "pl_1").await.unwrap());

        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict { .. }));
        assert!(store.is_empty("playlists"));
        session.end().await;
    }

    #[tokio::test]
    async fn test_reads_are_repeatable_within_transaction() {
        let store = store();
        store.insert("songs", "s1", json!({"plays": 1})).await.unwrap();

        let session = store.open_session().await.unwrap();
        session.start_transaction().await.unwrap();
        assert_eq!(session.get("songs", "s1").await.unwrap(), Some(json!({"plays": 1})));

        store.replace("songs", "s1", json!({"plays": 2})).await.unwrap();
        assert_eq!(session.get("songs", "s1").await.unwrap(), Some(json!({"plays": 1})));

        // Nothing written, nothing to lose.
        session.commit().await.unwrap();
        session.end().await;
    }

    #[tokio::test]
    async fn test_pool_bound_and_release() {
        let store = store();
        let a = store.open_session().await.unwrap();
        let _b = store.open_session().await.unwrap();
        assert_eq!(store.pool_status().open, 2);

        let err = store.open_session().await.err().unwrap();
        assert!(matches!(err, StoreError::PoolExhausted(_)));

        a.end().await;
        a.end().await;
        assert_eq!(store.pool_status().open, 1);
        assert!(store.open_session().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_session_returns_to_pool() {
        let store = store();
        {
            let _s = store.open_session().await.unwrap();
            assert_eq!(store.pool_status().open, 1);
        }
        assert_eq!(store.pool_status().open, 0);
    }

    #[tokio::test]
    async fn test_offline_store_fails_ping_and_open() {
        let store = store();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.open_session().await.is_err());
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_closes_store() {
        let store = store();
        store.shutdown().await;
        assert_eq!(store.ping().await, Err(StoreError::Closed));
        assert!(matches!(store.open_session().await, Err(StoreError::Closed)));
    }

    #[test]
    fn test_import_requires_id_field() {
        let store = store();
        let loaded = store
            .import("songs", "songid", vec![json!({"songid": "s1"}), json!({"songid": "s2"})])
            .unwrap();
        assert_eq!(loaded, 2);
        assert!(store.import("songs", "songid", vec![json!({"title": "x"})]).is_err());
    }
}
