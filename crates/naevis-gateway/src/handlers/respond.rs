//! Response envelope and JSON body extraction.

use super::AppState;
use crate::domain::error::{ApiError, ApiResult};
use async_trait::async_trait;
use axum::{
    body::to_bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use naevis_store::StoreError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use tracing::{debug, error};

/// Success envelope: `{"success": true, "data": ..., "message": ...}`
#[derive(Debug)]
pub struct Reply<T> {
    status: StatusCode,
    data: T,
    message: Cow<'static, str>,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    success: bool,
    data: &'a T,
    message: &'a str,
}

impl<T> Reply<T> {
    pub fn ok(data: T, message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_status(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_status(StatusCode::CREATED, data, message)
    }

    pub fn with_status(status: StatusCode, data: T, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            data,
            message: message.into(),
        }
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        let envelope = Envelope {
            success: true,
            data: &self.data,
            message: &self.message,
        };
        (self.status, Json(envelope)).into_response()
    }
}

/// JSON request body bounded by [`AppState::max_body_bytes`]. Unknown fields
/// are rejected by the target types.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T> FromRequest<AppState> for JsonBody<T>
where
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let limit = state.max_body_bytes;
        let bytes = to_bytes(req.into_body(), limit).await.map_err(|e| {
            debug!(error = %e, limit, "Request body rejected");
            ApiError::payload_too_large(limit)
        })?;
        serde_json::from_slice(&bytes).map(JsonBody).map_err(|e| {
            debug!(error = %e, "Invalid JSON body");
            ApiError::bad_request("Invalid JSON input")
        })
    }
}

/// Attach a log context to store failures.
pub trait StoreResultExt<T> {
    fn or_api(self, context: &'static str) -> ApiResult<T>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn or_api(self, context: &'static str) -> ApiResult<T> {
        self.map_err(|e| ApiError::from_store(&e, context))
    }
}

/// Decode stored documents, failing the request on a malformed one.
pub fn decode_all<T: DeserializeOwned>(docs: Vec<Value>, context: &'static str) -> ApiResult<Vec<T>> {
    docs.into_iter()
        .map(|doc| decode(doc, context))
        .collect()
}

pub fn decode<T: DeserializeOwned>(doc: Value, context: &'static str) -> ApiResult<T> {
    serde_json::from_value(doc).map_err(|e| {
        error!(error = %e, context, "Stored document does not decode");
        ApiError::internal()
    })
}

pub fn encode<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        error!(error = %e, "Document does not encode");
        ApiError::internal()
    })
}
