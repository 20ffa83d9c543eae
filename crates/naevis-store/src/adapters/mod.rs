//! Backing store adapters.
//!
//! Production: a networked document store implementing `StoreBackend`.
//! Testing and single-node runs: [`MemoryStore`].

pub mod memory;

pub use memory::{MemorySession, MemoryStore};
