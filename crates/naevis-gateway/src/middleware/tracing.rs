//! Request logging.
//!
//! One `http_request` span per request carrying method, path and peer
//! address; completion is logged inside it with status and latency.

use super::rate_limit::client_ip;
use axum::{body::Body, http::Request, response::Response};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{info, info_span, warn, Instrument};

/// Tracing layer that creates spans for each request
#[derive(Clone, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

/// Tracing service
#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        let span = info_span!(
            "http_request",
            method = %req.method(),
            path = %req.uri().path(),
            remote_addr = %client_ip(&req),
        );

        Box::pin(
            async move {
                let started = Instant::now();
                let result = inner.call(req).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                match &result {
                    Ok(response) if response.status().is_server_error() => {
                        warn!(status = response.status().as_u16(), elapsed_ms, "Request failed");
                    }
                    Ok(response) => {
                        info!(status = response.status().as_u16(), elapsed_ms, "Request completed");
                    }
                    Err(_) => warn!(elapsed_ms, "Request errored"),
                }
                result
            }
            .instrument(span),
        )
    }
}
