//! Gateway error types.
//!
//! Every error response uses the JSON envelope
//! `{"success": false, "data": null, "message": ...}`. Messages are generic;
//! store and token details go to the log only.

use crate::domain::config::ConfigError;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use naevis_store::StoreError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Error returned to HTTP callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status
    pub status: StatusCode,
    /// Caller-facing message
    pub message: String,
    /// Seconds until a rate-limited caller may retry
    pub retry_after: Option<u64>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    data: Option<()>,
    message: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Missing, malformed or rejected credential
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    /// Authenticated but not permitted
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body exceeds {limit} bytes"),
        )
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    pub fn unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable")
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            format!("Request exceeded {}s timeout", limit.as_secs()),
        )
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        let secs = retry_after.as_millis().div_ceil(1000).max(1) as u64;
        Self {
            retry_after: Some(secs),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
        }
    }

    /// Map a store failure to a generic response, logging the cause.
    pub fn from_store(err: &StoreError, context: &str) -> Self {
        match err {
            StoreError::DuplicateKey { .. } => {
                warn!(error = %err, context, "Store conflict");
                Self::conflict("Resource already exists")
            }
            StoreError::WriteConflict { .. } => {
                warn!(error = %err, context, "Concurrent write");
                Self::conflict("Resource was modified concurrently, retry the request")
            }
            e if e.is_overload() => {
                error!(error = %err, context, "Store unavailable");
                Self::unavailable()
            }
            _ => {
                error!(error = %err, context, "Store operation failed");
                Self::internal()
            }
        }
    }

    /// JSON body shared by every error response
    pub fn body(&self) -> Vec<u8> {
        let envelope = ErrorEnvelope {
            success: false,
            data: None,
            message: &self.message,
        };
        serde_json::to_vec(&envelope).unwrap_or_default()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::from_store(&err, "store")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body()));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if self.status == StatusCode::UNAUTHORIZED {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        if let Some(secs) = self.retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Process-level gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("drain deadline of {0:?} exceeded, in-flight requests were cut off")]
    ShutdownTimeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_error_envelope_shape() {
        let response = ApiError::not_found("Playlist not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
        assert_eq!(json["message"], "Playlist not found");
    }

    #[test]
    fn test_unauthorized_sets_challenge() {
        let response = ApiError::unauthorized().into_response();
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn test_rate_limited_rounds_retry_after_up() {
        let err = ApiError::rate_limited(Duration::from_millis(1500));
        assert_eq!(err.retry_after, Some(2));
        let response = err.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn test_store_errors_are_generic() {
        let err = ApiError::from(StoreError::Backend("connection reset by 10.0.0.7".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("10.0.0.7"));

        let err = ApiError::from(StoreError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(StoreError::DuplicateKey {
            collection: "likes".into(),
            id: "u:s".into(),
        });
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err = ApiError::from(StoreError::WriteConflict {
            collection: "playlists".into(),
            id: "pl_1".into(),
        });
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert!(!err.message.contains("pl_1"));
    }
}
