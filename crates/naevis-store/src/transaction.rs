//! Transaction handle: one store session bound to one request.
//!
//! ```text
//! Opened ──start──> Active ──commit ok──> Committed ──close──> Closed
//!                     │  └───commit err──> Aborted ───close──> Closed
//!                     └──────abort───────> Aborted ───close──> Closed
//! ```
//!
//! One of `Committed` / `Aborted` is recorded before `Closed`. `close` is
//! idempotent and ends the session exactly once; closing an `Active` handle
//! aborts it first. While a scope is open the handle sits in the client's
//! registry so shutdown can find and force-close it.
//!
//! Shutdown may close a handle while its commit or abort is still in flight.
//! The session is ended anyway and `Aborted` is recorded provisionally; when
//! the in-flight call returns, its observed result replaces that outcome.

use crate::domain::document::Query;
use crate::domain::errors::StoreError;
use crate::ports::outbound::{Documents, Session};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

pub(crate) type ScopeRegistry = DashMap<Uuid, TransactionHandle>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Opened,
    Active,
    /// Commit or abort in flight.
    Finishing,
    Committed,
    Aborted,
    Closed,
}

impl TransactionState {
    pub fn name(&self) -> &'static str {
        match self {
            TransactionState::Opened => "opened",
            TransactionState::Active => "active",
            TransactionState::Finishing => "finishing",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
            TransactionState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    Aborted,
}

struct Progress {
    state: TransactionState,
    outcome: Option<TransactionOutcome>,
}

struct HandleInner {
    id: Uuid,
    session: Box<dyn Session>,
    progress: Mutex<Progress>,
    registry: Weak<ScopeRegistry>,
}

/// Shared handle to one request's transaction.
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.inner.id)
            .field("session", &self.inner.session.id())
            .field("state", &self.state())
            .finish()
    }
}

impl TransactionHandle {
    /// Start a transaction on a freshly opened session.
    ///
    /// If the transaction cannot start the session is ended before the error
    /// is returned.
    pub(crate) async fn begin(
        session: Box<dyn Session>,
        registry: &Arc<ScopeRegistry>,
    ) -> Result<Self, StoreError> {
        let handle = Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                session,
                progress: Mutex::new(Progress {
                    state: TransactionState::Opened,
                    outcome: None,
                }),
                registry: Arc::downgrade(registry),
            }),
        };

        if let Err(e) = handle.inner.session.start_transaction().await {
            handle.inner.session.end().await;
            let mut progress = handle.inner.progress.lock();
            progress.outcome = Some(TransactionOutcome::Aborted);
            progress.state = TransactionState::Closed;
            return Err(e);
        }

        handle.inner.progress.lock().state = TransactionState::Active;
        registry.insert(handle.id(), handle.clone());
        debug!(scope = %handle.id(), session = %handle.session_id(), "Transaction scope opened");
        Ok(handle)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn session_id(&self) -> &str {
        self.inner.session.id()
    }

    pub fn state(&self) -> TransactionState {
        self.inner.progress.lock().state
    }

    pub fn outcome(&self) -> Option<TransactionOutcome> {
        self.inner.progress.lock().outcome
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    fn ensure_active(&self) -> Result<(), StoreError> {
        let state = self.state();
        if state == TransactionState::Active {
            Ok(())
        } else {
            Err(StoreError::TransactionState {
                expected: "active",
                found: state.name(),
            })
        }
    }

    /// Move `Active -> Finishing` so only one caller commits or aborts.
    fn claim(&self) -> Result<(), StoreError> {
        let mut progress = self.inner.progress.lock();
        if progress.state != TransactionState::Active {
            return Err(StoreError::TransactionState {
                expected: "active",
                found: progress.state.name(),
            });
        }
        progress.state = TransactionState::Finishing;
        Ok(())
    }

    /// Record what the store reported. Overrides a provisional outcome set
    /// by a forced close that raced this call.
    fn finish(&self, outcome: TransactionOutcome) {
        let mut progress = self.inner.progress.lock();
        if progress.state == TransactionState::Closed && progress.outcome != Some(outcome) {
            warn!(
                scope = %self.inner.id,
                outcome = ?outcome,
                "Scope was force-closed before the store answered"
            );
        }
        progress.outcome = Some(outcome);
        if progress.state == TransactionState::Finishing {
            progress.state = match outcome {
                TransactionOutcome::Committed => TransactionState::Committed,
                TransactionOutcome::Aborted => TransactionState::Aborted,
            };
        }
    }

    /// Commit. On failure the transaction is aborted and the commit error
    /// returned.
    pub async fn commit(&self) -> Result<(), StoreError> {
        self.claim()?;
        match self.inner.session.commit().await {
            Ok(()) => {
                self.finish(TransactionOutcome::Committed);
                debug!(scope = %self.id(), "Transaction committed");
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self.inner.session.abort().await {
                    warn!(scope = %self.id(), error = %abort_err, "Abort after failed commit also failed");
                }
                self.finish(TransactionOutcome::Aborted);
                Err(e)
            }
        }
    }

    /// Abort. The outcome is `Aborted` even if the store reports an error.
    pub async fn abort(&self) -> Result<(), StoreError> {
        self.claim()?;
        let result = self.inner.session.abort().await;
        self.finish(TransactionOutcome::Aborted);
        debug!(scope = %self.id(), ok = result.is_ok(), "Transaction aborted");
        result
    }

    /// End the session. Aborts first if still active.
    pub async fn close(&self) {
        if self.is_active() {
            if let Err(e) = self.abort().await {
                warn!(scope = %self.id(), error = %e, "Abort while closing scope failed");
            }
        }

        let first = {
            let mut progress = self.inner.progress.lock();
            if progress.state == TransactionState::Closed {
                false
            } else {
                if progress.state == TransactionState::Finishing {
                    warn!(scope = %self.inner.id, "Closing scope with commit or abort in flight");
                }
                if progress.outcome.is_none() {
                    progress.outcome = Some(TransactionOutcome::Aborted);
                }
                progress.state = TransactionState::Closed;
                true
            }
        };
        if !first {
            return;
        }

        self.inner.session.end().await;
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(&self.inner.id);
        }
        debug!(scope = %self.id(), outcome = ?self.outcome(), "Transaction scope closed");
    }
}

#[async_trait]
impl Documents for TransactionHandle {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.ensure_active()?;
        self.inner.session.get(collection, id).await
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.ensure_active()?;
        self.inner.session.find(collection, query).await
    }

    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        self.ensure_active()?;
        self.inner.session.insert(collection, id, doc).await
    }

    async fn replace(&self, collection: &str, id: &str, doc: Value) -> Result<bool, StoreError> {
        self.ensure_active()?;
        self.inner.session.replace(collection, id, doc).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.ensure_active()?;
        self.inner.session.delete(collection, id).await
    }
}
