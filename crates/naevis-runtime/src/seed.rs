//! Seed data for the in-memory backend.

use naevis_store::{collections, MemoryStore, StoreError};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Collections that can be seeded, with the field holding each document id.
const ID_FIELDS: &[(&str, &str)] = &[
    (collections::SONGS, "songid"),
    (collections::ALBUMS, "albumid"),
    (collections::PLAYLISTS, "playlistid"),
];

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("seed file {path} is not an object of document arrays: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("seeding {collection}: {source}")]
    Import {
        collection: String,
        #[source]
        source: StoreError,
    },
}

/// Load `{"songs": [...], "albums": [...], ...}` into `store`.
///
/// Returns the number of documents loaded. Unknown collections are skipped.
pub fn seed_from_file(store: &MemoryStore, path: &Path) -> Result<usize, SeedError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let data: HashMap<String, Vec<Value>> =
        serde_json::from_str(&raw).map_err(|source| SeedError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    seed(store, data)
}

pub fn seed(store: &MemoryStore, data: HashMap<String, Vec<Value>>) -> Result<usize, SeedError> {
    let mut total = 0;
    for (collection, docs) in data {
        let Some((_, id_field)) = ID_FIELDS.iter().find(|(name, _)| *name == collection) else {
            warn!(collection = %collection, "Skipping unknown seed collection");
            continue;
        };
        let loaded = store
            .import(&collection, id_field, docs)
            .map_err(|source| SeedError::Import {
                collection: collection.clone(),
                source,
            })?;
        info!(collection = %collection, loaded, "Seeded collection");
        total += loaded;
    }
    Ok(total)
}
