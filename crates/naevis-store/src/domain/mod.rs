//! Store domain: errors, query model, retry and pool policies.

pub mod document;
pub mod errors;
pub mod policy;

pub use document::{collections, Query};
pub use errors::StoreError;
pub use policy::{PoolBounds, RetryPolicy};
