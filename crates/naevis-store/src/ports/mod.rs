//! Ports: the contract the process store client consumes from a backing
//! store.

pub mod outbound;

pub use outbound::{Documents, PoolStatus, Session, StoreBackend};
