//! Authorization gate.
//!
//! A set-intersection check over the identity attached by the resolver.
//! Performs no verification of its own, so it must sit after [`AuthLayer`]
//! in a chain.
//!
//! [`AuthLayer`]: super::auth::AuthLayer

use crate::domain::error::ApiError;
use crate::domain::identity::RequestScope;
use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::warn;

/// Role gate layer
#[derive(Clone)]
pub struct RequireRolesLayer {
    allowed: Arc<[String]>,
}

impl RequireRolesLayer {
    pub fn new<I, R>(allowed: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S> Layer<S> for RequireRolesLayer {
    type Service = RequireRolesService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireRolesService {
            inner,
            allowed: Arc::clone(&self.allowed),
        }
    }
}

/// Role gate service
#[derive(Clone)]
pub struct RequireRolesService<S> {
    inner: S,
    allowed: Arc<[String]>,
}

impl<S> Service<Request<Body>> for RequireRolesService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let allowed = Arc::clone(&self.allowed);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let scope = RequestScope::of(&req);
            let permitted = scope
                .identity()
                .is_some_and(|identity| identity.has_any_role(&allowed));

            if !permitted {
                warn!(
                    user_id = scope.identity().map(|i| i.user_id.as_str()).unwrap_or("-"),
                    path = %req.uri().path(),
                    required = ?allowed,
                    "Role check failed"
                );
                return Ok(ApiError::forbidden("Forbidden").into_response());
            }
            inner.call(req).await
        })
    }
}
