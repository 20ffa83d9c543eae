//! Musicon route handlers.
//!
//! Reads go through the store client's guarded helpers. Writes run inside
//! the transaction scope and use the request's [`Transaction`] handle, so
//! their outcome follows the response status.
//!
//! [`Transaction`]: crate::domain::identity::Transaction

pub mod albums;
pub mod likes;
pub mod playlists;
pub mod respond;
pub mod songs;

use naevis_store::ProcessStoreClient;
use std::sync::Arc;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ProcessStoreClient>,
    /// Largest accepted JSON body
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(store: Arc<ProcessStoreClient>, max_body_bytes: usize) -> Self {
        Self {
            store,
            max_body_bytes,
        }
    }
}
