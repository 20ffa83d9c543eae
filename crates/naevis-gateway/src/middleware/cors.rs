//! CORS for API routes.
//!
//! Wrapper around tower-http CORS built from [`CorsConfig`].

use crate::domain::config::CorsConfig;
use axum::http::{HeaderName, HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

/// Create the CORS layer. tower-http panics on credentials combined with a
/// wildcard, so that combination drops credentials here.
pub fn create_cors_layer(config: &CorsConfig) -> CorsLayer {
    if !config.enabled {
        return CorsLayer::new();
    }

    let wildcard_origin = config.allowed_origins.iter().any(|o| o == "*");
    let wildcard_headers = config.allowed_headers.iter().any(|h| h == "*");

    let mut cors = CorsLayer::new();

    cors = if wildcard_origin {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(AllowOrigin::list(origins))
    };

    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    cors = cors.allow_methods(methods);

    cors = if wildcard_headers {
        cors.allow_headers(Any)
    } else {
        cors.allow_headers(parse_headers(&config.allowed_headers))
    };

    if !config.expose_headers.is_empty() {
        cors = cors.expose_headers(parse_headers(&config.expose_headers));
    }

    cors = cors.max_age(Duration::from_secs(config.max_age));

    if config.allow_credentials {
        if wildcard_origin || wildcard_headers {
            warn!("CORS credentials cannot be combined with wildcards, credentials disabled");
        } else {
            cors = cors.allow_credentials(true);
        }
    }

    cors
}

fn parse_headers(names: &[String]) -> Vec<HeaderName> {
    names.iter().filter_map(|h| h.parse().ok()).collect()
}
