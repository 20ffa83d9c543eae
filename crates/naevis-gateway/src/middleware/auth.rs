//! Identity resolver.
//!
//! Reads `Authorization: Bearer <token>`, verifies the HS256 signature and
//! expiry, and attaches an [`Identity`] to the request scope. The required
//! variant answers 401 on any failure without calling downstream; the
//! optional variant continues anonymously.

use crate::domain::config::AuthConfig;
use crate::domain::error::ApiError;
use crate::domain::identity::{Identity, RequestScope};
use axum::{
    body::Body,
    http::{header, HeaderValue, Request},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::debug;

const BEARER: &str = "Bearer ";

/// Token payload shared with the token issuer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(
        rename = "role",
        alias = "roles",
        default,
        deserialize_with = "one_or_many"
    )]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

/// Accept a role claim as a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Roles {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Roles::deserialize(deserializer)? {
        Roles::One(role) => vec![role],
        Roles::Many(roles) => roles,
    })
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,
    #[error("authorization header is not a bearer credential")]
    Malformed,
    #[error("token rejected: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token carries no user id")]
    NoSubject,
}

/// Verifies and issues bearer tokens with the process-wide secret.
pub struct TokenVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_secs;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }

    /// Resolve an identity from the raw `Authorization` header.
    pub fn verify(&self, header: Option<&HeaderValue>) -> Result<Identity, AuthError> {
        let raw = header.ok_or(AuthError::Missing)?;
        let raw = raw.to_str().map_err(|_| AuthError::Malformed)?;
        if raw.len() <= BEARER.len() || !raw.starts_with(BEARER) {
            return Err(AuthError::Malformed);
        }
        let token = &raw[BEARER.len()..];
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        if data.claims.user_id.is_empty() {
            return Err(AuthError::NoSubject);
        }
        Ok(Identity::new(data.claims.user_id, data.claims.roles))
    }

    /// Sign a token for `user_id` valid for `ttl`. Used by tooling and tests.
    pub fn issue(&self, user_id: &str, roles: &[&str], ttl: Duration) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = Claims {
            user_id: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            username: None,
            exp: now + ttl.as_secs(),
            iat: now,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }
}

/// Whether a missing or bad credential stops the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Required,
    Optional,
}

/// Identity resolver layer
#[derive(Clone)]
pub struct AuthLayer {
    verifier: Arc<TokenVerifier>,
    mode: AuthMode,
}

impl AuthLayer {
    pub fn new(verifier: Arc<TokenVerifier>, mode: AuthMode) -> Self {
        Self { verifier, mode }
    }

    pub fn required(verifier: Arc<TokenVerifier>) -> Self {
        Self::new(verifier, AuthMode::Required)
    }

    pub fn optional(verifier: Arc<TokenVerifier>) -> Self {
        Self::new(verifier, AuthMode::Optional)
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            verifier: Arc::clone(&self.verifier),
            mode: self.mode,
        }
    }
}

/// Identity resolver service
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    verifier: Arc<TokenVerifier>,
    mode: AuthMode,
}

impl<S> Service<Request<Body>> for AuthService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let verifier = Arc::clone(&self.verifier);
        let mode = self.mode;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match verifier.verify(req.headers().get(header::AUTHORIZATION)) {
                Ok(identity) => {
                    debug!(user_id = %identity.user_id, "Request authenticated");
                    RequestScope::attach_identity(&mut req, identity);
                }
                Err(e) if mode == AuthMode::Required => {
                    debug!(error = %e, path = %req.uri().path(), "Rejecting unauthenticated request");
                    return Ok(ApiError::unauthorized().into_response());
                }
                Err(e) => {
                    debug!(error = %e, "Continuing without identity");
                }
            }
            inner.call(req).await
        })
    }
}
