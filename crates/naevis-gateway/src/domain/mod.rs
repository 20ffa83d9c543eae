//! Domain types for the gateway: configuration, errors, the per-request
//! scope and the musicon documents.

pub mod config;
pub mod error;
pub mod identity;
pub mod types;

pub use config::{ConfigError, NaevisConfig};
pub use error::{ApiError, ApiResult, GatewayError};
pub use identity::{Caller, Identity, RequestScope, Transaction};
pub use types::*;
