//! Per-request scope: the resolved identity and the active transaction.
//!
//! A [`RequestScope`] lives in the request's extensions, keyed by type, so
//! decorators and handlers reach it without string keys. Each request gets
//! its own; nothing here is shared across requests.

use crate::domain::error::ApiError;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, Request},
};
use naevis_store::TransactionHandle;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, warn};

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether any held role appears in `allowed`.
    pub fn has_any_role(&self, allowed: &[String]) -> bool {
        self.roles.iter().any(|r| allowed.contains(r))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    identity: Option<Arc<Identity>>,
    transaction: Option<TransactionHandle>,
}

impl RequestScope {
    pub fn identity(&self) -> Option<&Arc<Identity>> {
        self.identity.as_ref()
    }

    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.transaction.as_ref()
    }

    /// Current scope of a request (empty if nothing attached yet).
    pub fn of<B>(req: &Request<B>) -> RequestScope {
        req.extensions()
            .get::<RequestScope>()
            .cloned()
            .unwrap_or_default()
    }

    /// Attach an identity. An identity already attached is kept.
    pub fn attach_identity<B>(req: &mut Request<B>, identity: Identity) -> bool {
        Self::update(req, |scope| {
            if scope.identity.is_some() {
                warn!("Identity already attached to request scope, keeping the first");
                return false;
            }
            scope.identity = Some(Arc::new(identity));
            true
        })
    }

    pub fn attach_transaction<B>(req: &mut Request<B>, handle: TransactionHandle) {
        Self::update(req, |scope| scope.transaction = Some(handle));
    }

    fn update<B, R>(req: &mut Request<B>, f: impl FnOnce(&mut RequestScope) -> R) -> R {
        let mut scope = req
            .extensions_mut()
            .remove::<RequestScope>()
            .unwrap_or_default();
        let result = f(&mut scope);
        req.extensions_mut().insert(scope);
        result
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestScope
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestScope>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Extractor for handlers that need a caller, including on routes where
/// authentication is optional. Answers 401 when no identity is attached.
#[derive(Debug, Clone)]
pub struct Caller(pub Arc<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestScope>()
            .and_then(|scope| scope.identity.clone())
            .map(Caller)
            .ok_or_else(ApiError::unauthorized)
    }
}

/// Extractor for the active transaction. Only valid behind the transaction
/// scope decorator.
#[derive(Debug, Clone)]
pub struct Transaction(pub TransactionHandle);

#[async_trait]
impl<S> FromRequestParts<S> for Transaction
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts
            .extensions
            .get::<RequestScope>()
            .and_then(|scope| scope.transaction.clone())
        {
            Some(handle) => Ok(Transaction(handle)),
            None => {
                error!(path = %parts.uri.path(), "Handler requires a transaction scope but none is open");
                Err(ApiError::internal())
            }
        }
    }
}
