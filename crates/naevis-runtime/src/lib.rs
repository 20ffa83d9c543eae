//! # naevis runtime
//!
//! Process wiring for the naevis backend.
//!
//! ## Startup Sequence
//!
//! 1. Install the tracing subscriber
//! 2. Load configuration (file, then environment overrides)
//! 3. Create the backing store and load seed data
//! 4. Connect the process store client (fails fast if the probe fails)
//! 5. Bind the listener and serve until Ctrl-C or SIGTERM
//! 6. Drain, close the store client, exit

pub mod env;
pub mod seed;

pub use env::{load_config, load_config_from, EnvError};
pub use seed::{seed_from_file, SeedError};

use anyhow::{anyhow, Context, Result};
use naevis_gateway::NaevisService;
use naevis_store::MemoryStore;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "naevis=info,tower_http=info";

/// Install the global subscriber. `NAEVIS_LOG_FORMAT=json` selects JSON lines.
pub fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let json = std::env::var("NAEVIS_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

/// Run the backend until a shutdown signal arrives.
pub async fn run() -> Result<()> {
    let config = load_config().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    let store = MemoryStore::new(
        config.store.pool_bounds()?,
        config.store.pool_acquire_timeout,
    );
    if let Ok(path) = std::env::var("NAEVIS_SEED_FILE") {
        let loaded = seed_from_file(&store, Path::new(&path))?;
        info!(path = %path, loaded, "Seed data loaded");
    }

    let service = NaevisService::connect(config, Arc::new(store))
        .await
        .context("connecting to the store")?;

    let addr = service.config().http_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, version = naevis_gateway::VERSION, "naevis is listening");

    service.start(listener, shutdown_signal()).await?;
    Ok(())
}
