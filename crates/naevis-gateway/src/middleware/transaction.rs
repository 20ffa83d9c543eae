//! Transaction scope.
//!
//! Opens a store session and transaction before the handler runs and binds
//! it to the request scope. The handler's response status decides the
//! outcome: below 400 commits, anything else aborts. A failed commit turns
//! the response into a 500 whatever the handler wrote. The session is
//! closed exactly once on every path, including a handler panic and a
//! caller that drops the request mid-flight.

use crate::domain::error::ApiError;
use crate::domain::identity::RequestScope;
use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use naevis_store::{ProcessStoreClient, TransactionHandle};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::{debug, error, warn};

/// Transaction scope layer
#[derive(Clone)]
pub struct TransactionLayer {
    store: Arc<ProcessStoreClient>,
}

impl TransactionLayer {
    pub fn new(store: Arc<ProcessStoreClient>) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for TransactionLayer {
    type Service = TransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TransactionService {
            inner,
            store: Arc::clone(&self.store),
        }
    }
}

/// Transaction scope service
#[derive(Clone)]
pub struct TransactionService<S> {
    inner: S,
    store: Arc<ProcessStoreClient>,
}

impl<S> Service<Request<Body>> for TransactionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let store = Arc::clone(&self.store);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let handle = match store.begin_transaction().await {
                Ok(handle) => handle,
                Err(e) => return Ok(ApiError::from_store(&e, "begin transaction").into_response()),
            };
            let mut guard = ScopeGuard::new(handle.clone());
            RequestScope::attach_transaction(&mut req, handle.clone());

            let outcome = AssertUnwindSafe(inner.call(req)).catch_unwind().await;

            let result = match outcome {
                Err(_) => {
                    error!(scope = %handle.id(), "Handler panicked inside transaction scope");
                    Ok(ApiError::internal().into_response())
                }
                Ok(Err(e)) => Err(e),
                Ok(Ok(response)) if response.status().as_u16() >= 400 => {
                    if let Err(e) = handle.abort().await {
                        warn!(scope = %handle.id(), error = %e, "Abort failed");
                    }
                    Ok(response)
                }
                Ok(Ok(response)) => match handle.commit().await {
                    Ok(()) => Ok(response),
                    Err(e) => {
                        error!(
                            scope = %handle.id(),
                            status = response.status().as_u16(),
                            error = %e,
                            "Commit failed, replacing handler response"
                        );
                        Ok(ApiError::internal().into_response())
                    }
                },
            };

            // close() aborts whatever is still active (panic or inner error).
            handle.close().await;
            guard.disarm();
            debug!(scope = %handle.id(), outcome = ?handle.outcome(), "Transaction scope finished");
            result
        })
    }
}

/// Closes the scope if the request future is dropped before it finishes.
struct ScopeGuard {
    handle: Option<TransactionHandle>,
}

impl ScopeGuard {
    fn new(handle: TransactionHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(scope = %handle.id(), "Request dropped with transaction scope open, aborting");
                runtime.spawn(async move { handle.close().await });
            }
            Err(_) => {
                error!(scope = %handle.id(), "Transaction scope dropped outside a runtime");
            }
        }
    }
}
