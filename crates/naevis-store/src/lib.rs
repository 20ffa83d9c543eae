//! # Naevis Store
//!
//! The process-wide store client behind the naevis request pipeline.
//!
//! ## Architecture
//!
//! ```text
//!   request path ──guarded()──> ConcurrencyGate ──(timeout, retry)──┐
//!                                                                    ▼
//!   TransactionScope ──begin_transaction()──> TransactionHandle ──> StoreBackend
//!                                                 (session)         (pool [min,max])
//! ```
//!
//! - [`ProcessStoreClient`]: one per process; owns the backend pool, the
//!   gate and the registry of open transaction scopes.
//! - [`ConcurrencyGate`]: caps simultaneous guarded operations at `C`.
//! - [`TransactionHandle`]: one session and transaction bound to one request.
//! - [`StoreBackend`] / [`Session`]: the contract a backing store implements;
//!   [`MemoryStore`] is the in-process adapter.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod client;
pub mod domain;
pub mod gate;
pub mod ports;
pub mod transaction;

pub use adapters::memory::MemoryStore;
pub use client::{ClientOptions, ProcessStoreClient, StoreStats};
pub use domain::{collections, PoolBounds, Query, RetryPolicy, StoreError};
pub use gate::{ConcurrencyGate, GatePermit, GateStats};
pub use ports::outbound::{Documents, PoolStatus, Session, StoreBackend};
pub use transaction::{TransactionHandle, TransactionOutcome, TransactionState};
