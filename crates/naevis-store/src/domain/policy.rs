//! Retry and pool policies.
//!
//! Both are plain values handed to the client at construction so tests can
//! inject small capacities and short timeouts.

use crate::domain::errors::StoreError;
use std::time::Duration;

/// Fixed-delay bounded retry applied to one guarded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1).
    pub max_attempts: u32,
    /// Deadline for each individual attempt.
    pub per_attempt_timeout: Duration,
    /// Pause between a failed attempt and the next one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            per_attempt_timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, per_attempt_timeout: Duration, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            per_attempt_timeout,
            backoff,
        }
    }

    /// Same deadline, exactly one attempt.
    pub fn single_attempt(&self) -> Self {
        Self {
            max_attempts: 1,
            ..*self
        }
    }

    /// Upper bound on the wall time one guarded call can take once it holds
    /// a permit.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        self.per_attempt_timeout * attempts + self.backoff * (attempts - 1)
    }
}

/// Session pool bounds `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBounds {
    pub min: usize,
    pub max: usize,
}

impl Default for PoolBounds {
    fn default() -> Self {
        Self { min: 10, max: 100 }
    }
}

impl PoolBounds {
    pub fn new(min: usize, max: usize) -> Result<Self, StoreError> {
        if max == 0 {
            return Err(StoreError::Backend("pool max must be at least 1".into()));
        }
        if min > max {
            return Err(StoreError::Backend(format!(
                "pool min ({min}) exceeds max ({max})"
            )));
        }
        Ok(Self { min, max })
    }
}
