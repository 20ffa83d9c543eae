//! Security response headers.
//!
//! Applied to every API response, including errors produced by inner
//! decorators. HSTS is only sent when the edge reports TLS through
//! `X-Forwarded-Proto`.

use crate::domain::config::SecurityHeadersConfig;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request},
    response::Response,
};
use std::sync::Arc;
use tower::{Layer, Service};
use tracing::warn;

/// Precomputed header set
struct HeaderSet {
    fixed: Vec<(HeaderName, HeaderValue)>,
    hsts: Option<HeaderValue>,
}

impl HeaderSet {
    fn from_config(config: &SecurityHeadersConfig) -> Self {
        let mut fixed = vec![
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (
                HeaderName::from_static("cross-origin-opener-policy"),
                HeaderValue::from_static("same-origin"),
            ),
            (
                HeaderName::from_static("cross-origin-resource-policy"),
                HeaderValue::from_static("same-site"),
            ),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store, no-cache, must-revalidate"),
            ),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
            (header::EXPIRES, HeaderValue::from_static("0")),
        ];

        let configured = [
            (header::CONTENT_SECURITY_POLICY, &config.content_security_policy),
            (header::REFERRER_POLICY, &config.referrer_policy),
            (
                HeaderName::from_static("permissions-policy"),
                &config.permissions_policy,
            ),
        ];
        for (name, value) in configured {
            if value.is_empty() {
                continue;
            }
            match HeaderValue::from_str(value) {
                Ok(v) => fixed.push((name, v)),
                Err(_) => warn!(header = %name, "Ignoring invalid security header value"),
            }
        }

        let hsts = (config.hsts_max_age > 0).then(|| {
            HeaderValue::from_str(&format!(
                "max-age={}; includeSubDomains; preload",
                config.hsts_max_age
            ))
            .ok()
        });

        Self {
            fixed,
            hsts: hsts.flatten(),
        }
    }

    fn apply(&self, headers: &mut HeaderMap, over_tls: bool) {
        for (name, value) in &self.fixed {
            headers.insert(name.clone(), value.clone());
        }
        if over_tls {
            if let Some(hsts) = &self.hsts {
                headers.insert(header::STRICT_TRANSPORT_SECURITY, hsts.clone());
            }
        }
    }
}

/// Security headers layer
#[derive(Clone)]
pub struct SecurityHeadersLayer {
    headers: Arc<HeaderSet>,
}

impl SecurityHeadersLayer {
    pub fn new(config: &SecurityHeadersConfig) -> Self {
        Self {
            headers: Arc::new(HeaderSet::from_config(config)),
        }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            headers: Arc::clone(&self.headers),
        }
    }
}

/// Security headers service
#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    headers: Arc<HeaderSet>,
}

impl<S> Service<Request<Body>> for SecurityHeadersService<S>
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
        let headers = Arc::clone(&self.headers);
        let over_tls = req
            .headers()
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            headers.apply(response.headers_mut(), over_tls);
            Ok(response)
        })
    }
}
