//! Environment configuration.
//!
//! Starts from [`NaevisConfig::default`], applies the JSON file named by
//! `NAEVIS_CONFIG` when present, then the individual variables. A variable
//! that does not parse is reported and skipped; the file must be valid.

use naevis_gateway::NaevisConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Load configuration from the process environment.
pub fn load_config() -> Result<NaevisConfig, EnvError> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Load configuration through `lookup`, which maps a variable name to its
/// value.
pub fn load_config_from<F>(lookup: F) -> Result<NaevisConfig, EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match lookup("NAEVIS_CONFIG") {
        Some(path) => read_file(PathBuf::from(path))?,
        None => NaevisConfig::default(),
    };

    if let Some(port) = lookup("PORT") {
        match port.trim().trim_start_matches(':').parse::<u16>() {
            Ok(p) => config.http.port = p,
            Err(_) => warn!(value = %port, "Ignoring unparseable PORT"),
        }
    }

    if let Some(origins) = lookup("ALLOWED_ORIGINS") {
        let origins: Vec<String> = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() {
            warn!("ALLOWED_ORIGINS is set but lists no origins, keeping defaults");
        } else {
            config.cors.allowed_origins = origins;
        }
    }

    if let Some(secret) = lookup("JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }

    if let Some(min) = parsed(&lookup, "NAEVIS_MIN_POOL") {
        config.store.min_pool = min;
    }
    if let Some(max) = parsed(&lookup, "NAEVIS_MAX_POOL") {
        config.store.max_pool = max;
    }
    if let Some(capacity) = parsed(&lookup, "NAEVIS_GATE_CAPACITY") {
        config.store.gate_capacity = capacity;
    }
    if let Some(secs) = parsed::<u64, _>(&lookup, "NAEVIS_DRAIN_SECS") {
        config.shutdown.drain_deadline = Duration::from_secs(secs);
    }

    Ok(config)
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

fn read_file(path: PathBuf) -> Result<NaevisConfig, EnvError> {
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(source) => return Err(EnvError::Read { path, source }),
    };
    match serde_json::from_str(&raw) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded config file");
            Ok(config)
        }
        Err(source) => Err(EnvError::Parse { path, source }),
    }
}
