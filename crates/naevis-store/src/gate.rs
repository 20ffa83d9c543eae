//! Concurrency gate and retry wrapper.
//!
//! A counting semaphore with capacity `C` caps how many store operations run
//! at once. [`ConcurrencyGate::run`] holds one permit for a whole attempt
//! sequence: every attempt runs under the per-attempt timeout, and a failed
//! attempt waits out the backoff before the next. The permit is an RAII guard,
//! so it is released on success, on failure and when the caller is cancelled.
//!
//! Waiters are not prioritised; whichever waiter the semaphore wakes next
//! proceeds.

use crate::domain::errors::StoreError;
use crate::domain::policy::RetryPolicy;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

pub const DEFAULT_GATE_CAPACITY: usize = 100;

#[derive(Default)]
struct GateCounters {
    in_use: AtomicUsize,
    peak: AtomicUsize,
    operations: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time gate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub capacity: usize,
    pub in_use: usize,
    pub peak: usize,
    pub operations: u64,
    pub retries: u64,
    pub failures: u64,
}

/// One held slot. Dropping it frees the slot.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<GateCounters>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.counters.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Process-wide admission control for store operations.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<GateCounters>,
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_GATE_CAPACITY)
    }
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(GateCounters::default()),
        }
    }

    /// Wait for a free slot. Fails only once the gate is closed.
    pub async fn acquire(&self) -> Result<GatePermit, StoreError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Closed)?;
        Ok(self.track(permit))
    }

    /// Take a free slot without waiting.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.track(permit))
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> GatePermit {
        let now = self.counters.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(now, Ordering::AcqRel);
        GatePermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Run `op` under one permit with the policy's timeout and retries.
    ///
    /// Returns the first success, or the last error once attempts run out.
    /// Errors that cannot change on retry end the sequence immediately.
    pub async fn run<T, F, Fut>(&self, policy: &RetryPolicy, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let _permit = self.acquire().await?;
        self.counters.operations.fetch_add(1, Ordering::Relaxed);

        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match timeout(policy.per_attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(policy.per_attempt_timeout)),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Store operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = policy.backoff.as_millis() as u64,
                        error = %e,
                        "Store operation failed, retrying"
                    );
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    sleep(policy.backoff).await;
                }
                Err(e) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    error!(attempts = attempt, error = %e, "Store operation failed");
                    return Err(e);
                }
            }
        }
    }

    /// Stop admitting. Current holders finish; waiters get `Closed`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.counters.in_use.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.capacity,
            in_use: self.in_use(),
            peak: self.counters.peak.load(Ordering::Acquire),
            operations: self.counters.operations.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}
