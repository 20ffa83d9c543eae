//! Middleware for the naevis request pipeline.
//!
//! Edge order (outermost first): Cors → Tracing → SecurityHeaders → Timeout.
//! Route chains: RateLimit → Auth (required or optional) → RequireRoles →
//! Transaction → handler. Every layer here is adapted into a [`Decorator`]
//! and chained with [`compose`].

pub mod auth;
pub mod compose;
pub mod cors;
pub mod rate_limit;
pub mod roles;
pub mod security_headers;
pub mod timeout;
pub mod tracing;
pub mod transaction;

pub use auth::{AuthError, AuthLayer, AuthMode, Claims, TokenVerifier};
pub use compose::{compose, endpoint, Decorator, Handler};
pub use cors::create_cors_layer;
pub use rate_limit::{RateLimitLayer, RateLimitState};
pub use roles::RequireRolesLayer;
pub use security_headers::SecurityHeadersLayer;
pub use timeout::TimeoutLayer;
pub use tracing::TracingLayer;
pub use transaction::TransactionLayer;

use crate::domain::config::NaevisConfig;
use naevis_store::ProcessStoreClient;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Decorators built once from configuration and shared by every route.
#[derive(Clone)]
pub struct MiddlewareStack {
    rate_limit: RateLimitLayer,
    verifier: Arc<TokenVerifier>,
    transaction: TransactionLayer,
    cors: CorsLayer,
    tracing: TracingLayer,
    security_headers: SecurityHeadersLayer,
    timeout: TimeoutLayer,
    security_headers_enabled: bool,
}

impl MiddlewareStack {
    pub fn from_config(config: &NaevisConfig, store: Arc<ProcessStoreClient>) -> Self {
        Self {
            rate_limit: RateLimitLayer::new(config.rate_limit.clone()),
            verifier: Arc::new(TokenVerifier::new(&config.auth)),
            transaction: TransactionLayer::new(store),
            cors: create_cors_layer(&config.cors),
            tracing: TracingLayer::new(),
            security_headers: SecurityHeadersLayer::new(&config.security_headers),
            timeout: TimeoutLayer::new(config.http.request_timeout),
            security_headers_enabled: config.security_headers.enabled,
        }
    }

    /// Rate limiter. All routes share one set of buckets.
    pub fn limit(&self) -> Decorator {
        Decorator::from_layer("rate_limit", self.rate_limit.clone())
    }

    pub fn require_auth(&self) -> Decorator {
        Decorator::from_layer("require_auth", AuthLayer::required(Arc::clone(&self.verifier)))
    }

    pub fn optional_auth(&self) -> Decorator {
        Decorator::from_layer("optional_auth", AuthLayer::optional(Arc::clone(&self.verifier)))
    }

    /// Role gate. Only meaningful after [`Self::require_auth`] or
    /// [`Self::optional_auth`].
    pub fn require_roles(&self, roles: &[&str]) -> Decorator {
        Decorator::from_layer("require_roles", RequireRolesLayer::new(roles.iter().copied()))
    }

    pub fn transaction(&self) -> Decorator {
        Decorator::from_layer("transaction", self.transaction.clone())
    }

    /// Decorators around the whole API, outermost first.
    pub fn edge(&self) -> Vec<Decorator> {
        let mut chain = vec![
            Decorator::from_layer("cors", self.cors.clone()),
            Decorator::from_layer("tracing", self.tracing.clone()),
        ];
        if self.security_headers_enabled {
            chain.push(Decorator::from_layer(
                "security_headers",
                self.security_headers.clone(),
            ));
        }
        chain.push(Decorator::from_layer("timeout", self.timeout.clone()));
        chain
    }

    /// Shared rate limit state, for the cleanup task
    pub fn rate_limit_state(&self) -> Arc<RateLimitState> {
        self.rate_limit.state()
    }

    pub fn verifier(&self) -> Arc<TokenVerifier> {
        Arc::clone(&self.verifier)
    }
}
