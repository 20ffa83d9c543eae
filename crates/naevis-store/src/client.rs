//! Process store client.
//!
//! Owns the one shared backend pool for the whole process. Created once at
//! startup by [`ProcessStoreClient::connect`], which refuses to return until a
//! bounded health probe succeeds, and torn down once by
//! [`ProcessStoreClient::close`].
//!
//! Store access outside a transaction scope goes through [`guarded`], which
//! applies the concurrency gate and retry policy. Retries assume the
//! operation is idempotent; non-idempotent writes use [`guarded_once`].
//!
//! [`guarded`]: ProcessStoreClient::guarded
//! [`guarded_once`]: ProcessStoreClient::guarded_once

use crate::domain::document::Query;
use crate::domain::errors::StoreError;
use crate::domain::policy::RetryPolicy;
use crate::gate::{ConcurrencyGate, GateStats, DEFAULT_GATE_CAPACITY};
use crate::ports::outbound::{Documents, PoolStatus, StoreBackend};
use crate::transaction::{ScopeRegistry, TransactionHandle};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Client construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub gate_capacity: usize,
    pub retry: RetryPolicy,
    /// Deadline for the startup connectivity probe.
    pub connect_timeout: Duration,
    /// Deadline for the liveness probe.
    pub probe_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            gate_capacity: DEFAULT_GATE_CAPACITY,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Utilization snapshot for logs and the store health endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreStats {
    pub gate: GateStats,
    pub pool: PoolStatus,
    pub open_scopes: usize,
}

pub struct ProcessStoreClient {
    backend: Arc<dyn StoreBackend>,
    gate: ConcurrencyGate,
    retry: RetryPolicy,
    probe_timeout: Duration,
    scopes: Arc<ScopeRegistry>,
    closing: AtomicBool,
}

impl ProcessStoreClient {
    /// Probe the backend and build the client.
    ///
    /// A failed or timed-out probe is a startup precondition failure; callers
    /// should abort the process rather than retry.
    pub async fn connect(
        backend: Arc<dyn StoreBackend>,
        options: ClientOptions,
    ) -> Result<Self, StoreError> {
        match timeout(options.connect_timeout, backend.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Store connectivity check failed");
                return Err(e);
            }
            Err(_) => {
                error!(
                    timeout_ms = options.connect_timeout.as_millis() as u64,
                    "Store connectivity check timed out"
                );
                return Err(StoreError::Timeout(options.connect_timeout));
            }
        }

        let pool = backend.pool_status();
        info!(
            pool_min = pool.min,
            pool_max = pool.max,
            gate_capacity = options.gate_capacity,
            max_attempts = options.retry.max_attempts,
            "Connected to store"
        );

        Ok(Self {
            backend,
            gate: ConcurrencyGate::new(options.gate_capacity),
            retry: options.retry,
            probe_timeout: options.probe_timeout,
            scopes: Arc::new(ScopeRegistry::new()),
            closing: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closing.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run an idempotent operation under the gate with retries.
    pub async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.ensure_open()?;
        self.gate.run(&self.retry, op).await
    }

    /// Run an operation under the gate with a single attempt.
    pub async fn guarded_once<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.ensure_open()?;
        self.gate.run(&self.retry.single_attempt(), op).await
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let backend = &self.backend;
        self.guarded(move || backend.get(collection, id)).await
    }

    pub async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        let backend = &self.backend;
        self.guarded(move || backend.find(collection, query)).await
    }

    /// Inserts are not retried: a timed-out attempt may still have landed.
    pub async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        let backend = &self.backend;
        self.guarded_once(move || backend.insert(collection, id, doc.clone()))
            .await
    }

    pub async fn replace(
        &self,
        collection: &str,
        id: &str,
        doc: Value,
    ) -> Result<bool, StoreError> {
        let backend = &self.backend;
        self.guarded(move || backend.replace(collection, id, doc.clone()))
            .await
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let backend = &self.backend;
        self.guarded(move || backend.delete(collection, id)).await
    }

    /// Liveness probe with the short deadline. Bypasses the gate.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        match timeout(self.probe_timeout, self.backend.ping()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.probe_timeout)),
        }
    }

    /// Open a session and start a transaction on it.
    ///
    /// Opening is bounded by the per-attempt timeout and never retried.
    pub async fn begin_transaction(&self) -> Result<TransactionHandle, StoreError> {
        self.ensure_open()?;
        let deadline = self.retry.per_attempt_timeout;
        let session = match timeout(deadline, self.backend.open_session()).await {
            Ok(result) => result?,
            Err(_) => return Err(StoreError::Timeout(deadline)),
        };
        TransactionHandle::begin(session, &self.scopes).await
    }

    pub fn open_scopes(&self) -> usize {
        self.scopes.len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            gate: self.gate.stats(),
            pool: self.backend.pool_status(),
            open_scopes: self.scopes.len(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Log utilization every `interval` until `shutdown` flips to true.
    pub fn spawn_stats_reporter(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = client.stats();
                        info!(
                            gate_in_use = stats.gate.in_use,
                            gate_capacity = stats.gate.capacity,
                            gate_peak = stats.gate.peak,
                            operations = stats.gate.operations,
                            retries = stats.gate.retries,
                            failures = stats.gate.failures,
                            pool_open = stats.pool.open,
                            pool_max = stats.pool.max,
                            open_scopes = stats.open_scopes,
                            "Store utilization"
                        );
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Stop admitting work, force-close any transaction scope still open,
    /// then disconnect the backend. Safe to call more than once.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        let stragglers: Vec<TransactionHandle> =
            self.scopes.iter().map(|entry| entry.value().clone()).collect();
        for handle in stragglers {
            error!(
                scope = %handle.id(),
                session = %handle.session_id(),
                state = handle.state().name(),
                "Transaction scope still open at shutdown, forcing abort"
            );
            handle.close().await;
        }

        self.gate.close();
        self.backend.shutdown().await;
        if self.gate.in_use() > 0 {
            warn!(in_use = self.gate.in_use(), "Store closed with guarded operations in flight");
        }
        info!("Store client closed");
    }
}
