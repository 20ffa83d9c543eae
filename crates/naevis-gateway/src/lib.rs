// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! naevis gateway - HTTP request pipeline for the musicon API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         NAEVIS GATEWAY                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   /health, /health/store          (no decorators)                │
//! │                                                                  │
//! │   /api/v1/musicon/*                                              │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │ Edge:  Cors → Tracing → SecurityHeaders → Timeout          │  │
//! │  └─────────────────────────────┬──────────────────────────────┘  │
//! │  ┌─────────────────────────────┴──────────────────────────────┐  │
//! │  │ Route: RateLimit → Auth → RequireRoles → Transaction       │  │
//! │  └─────────────────────────────┬──────────────────────────────┘  │
//! │                          Route handler                           │
//! │                                │                                 │
//! │  ┌─────────────────────────────┴──────────────────────────────┐  │
//! │  │ ProcessStoreClient: ConcurrencyGate + retry + sessions     │  │
//! │  └─────────────────────────────┬──────────────────────────────┘  │
//! └────────────────────────────────┼─────────────────────────────────┘
//!                                  │
//!                           Document store
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use naevis_gateway::{NaevisConfig, NaevisService};
//!
//! let service = NaevisService::connect(config, backend).await?;
//! let listener = tokio::net::TcpListener::bind(service.config().http_addr()).await?;
//! service.start(listener, shutdown_signal()).await?;
//! ```
//!
//! # Guarantees
//!
//! - Decorators run in declaration order on the way in and reverse order on
//!   the way out
//! - A handler behind the required resolver always sees an identity
//! - Every transaction scope ends its session exactly once
//! - Only responses below 400 commit

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod service;

// Re-exports for public API
pub use domain::config::NaevisConfig;
pub use domain::error::{ApiError, ApiResult, GatewayError};
pub use domain::identity::{Caller, Identity, RequestScope, Transaction};
pub use domain::types::*;
pub use handlers::AppState;
pub use middleware::{compose, endpoint, Decorator, Handler, MiddlewareStack, TokenVerifier};
pub use router::{build_router, API_PREFIX};
pub use service::NaevisService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
