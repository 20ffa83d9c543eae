//! Route table.
//!
//! Health endpoints are answered before any decorator runs. Everything else
//! passes the edge decorators (CORS, tracing, security headers, timeout)
//! and then the per-route chain declared next to each path below.

use crate::handlers::{albums, likes, playlists, songs, AppState};
use crate::middleware::{compose, endpoint, Decorator, Handler, MiddlewareStack};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete_service, get, get_service, patch_service, post_service},
    Json, Router,
};
use serde_json::json;
use tower::util::BoxCloneService;
use tracing::warn;

/// Mount point of the musicon API
pub const API_PREFIX: &str = "/api/v1/musicon";

const CURATOR_ROLES: &[&str] = &["admin", "artist"];

/// Builds per-route chains against one shared stack.
struct Chains<'a> {
    stack: &'a MiddlewareStack,
    state: AppState,
}

impl Chains<'_> {
    fn wrap<H, T>(&self, decorators: &[Decorator], handler: H) -> Handler
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        compose(decorators, endpoint(handler, self.state.clone()))
    }

    /// limit → optional auth
    fn public<H, T>(&self, handler: H) -> Handler
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.wrap(&[self.stack.limit(), self.stack.optional_auth()], handler)
    }

    /// limit → required auth → transaction
    fn write<H, T>(&self, handler: H) -> Handler
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.wrap(
            &[
                self.stack.limit(),
                self.stack.require_auth(),
                self.stack.transaction(),
            ],
            handler,
        )
    }

    /// limit → required auth → roles → transaction
    fn write_as<H, T>(&self, roles: &[&str], handler: H) -> Handler
    where
        H: axum::handler::Handler<T, AppState>,
        T: 'static,
    {
        self.wrap(
            &[
                self.stack.limit(),
                self.stack.require_auth(),
                self.stack.require_roles(roles),
                self.stack.transaction(),
            ],
            handler,
        )
    }
}

fn api_routes(chains: &Chains<'_>) -> Router {
    Router::new()
        // User
        .route(
            "/user/playlists",
            get_service(chains.public(playlists::user_playlists)),
        )
        .route("/user/liked", get_service(chains.public(likes::user_likes)))
        .route(
            "/user/liked/:songid",
            post_service(chains.write(likes::like_song)),
        )
        // Playlists
        .route(
            "/playlists",
            post_service(chains.write(playlists::create_playlist)),
        )
        .route(
            "/playlists/:playlistid",
            patch_service(chains.write(playlists::update_playlist))
                .delete_service(chains.write(playlists::delete_playlist)),
        )
        .route(
            "/playlists/:playlistid/songs",
            get_service(chains.public(playlists::playlist_songs))
                .post_service(chains.write(playlists::add_song)),
        )
        .route(
            "/playlists/:playlistid/songs/:songid",
            delete_service(chains.write(playlists::remove_song)),
        )
        // Albums
        .route(
            "/albums",
            get_service(chains.public(albums::list_albums))
                .post_service(chains.write_as(CURATOR_ROLES, albums::create_album)),
        )
        .route(
            "/albums/:albumid/songs",
            get_service(chains.public(albums::album_songs)),
        )
        .route(
            "/artists/:artistid/songs",
            get_service(chains.public(songs::artist_songs)),
        )
        // Discovery
        .route(
            "/recommended",
            get_service(chains.public(songs::recommended_songs)),
        )
        .route(
            "/recommended/albums",
            get_service(chains.public(albums::recommended_albums)),
        )
        .route(
            "/recommendations",
            get_service(chains.public(songs::recommendations)),
        )
}

/// Build the complete application router.
pub fn build_router(stack: &MiddlewareStack, state: AppState) -> Router {
    let chains = Chains {
        stack,
        state: state.clone(),
    };
    let api = Router::new().nest(API_PREFIX, api_routes(&chains));
    let edge = compose(&stack.edge(), BoxCloneService::new(api));

    Router::new()
        .route("/health", get(health))
        .route("/health/store", get(store_health))
        .with_state(state)
        .fallback_service(edge)
}

/// Process liveness. Never touches the store.
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

/// Store liveness with the short probe deadline.
async fn store_health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({ "status": "healthy", "store": "reachable" })).into_response(),
        Err(e) => {
            warn!(error = %e, "Store health probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "store": "unreachable" })),
            )
                .into_response()
        }
    }
}
