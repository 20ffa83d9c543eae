//! Gateway service - process lifecycle.
//!
//! Owns the store client and the middleware stack, serves the router until
//! the shutdown future resolves, drains in-flight requests up to the drain
//! deadline and tears the store client down exactly once.

use crate::domain::config::NaevisConfig;
use crate::domain::error::GatewayError;
use crate::handlers::AppState;
use crate::middleware::{rate_limit, MiddlewareStack, TokenVerifier};
use crate::router::build_router;
use axum::Router;
use naevis_store::{ProcessStoreClient, StoreBackend};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info};

/// Naevis gateway service state
pub struct NaevisService {
    config: NaevisConfig,
    store: Arc<ProcessStoreClient>,
    stack: MiddlewareStack,
    state: AppState,
}

impl NaevisService {
    /// Create the service around an already connected store client
    pub fn new(config: NaevisConfig, store: Arc<ProcessStoreClient>) -> Result<Self, GatewayError> {
        config.validate()?;

        let stack = MiddlewareStack::from_config(&config, Arc::clone(&store));
        let state = AppState::new(Arc::clone(&store), config.http.max_body_bytes);

        Ok(Self {
            config,
            store,
            stack,
            state,
        })
    }

    /// Connect the store client and create the service.
    ///
    /// Fails when the backend does not answer the startup probe in time.
    pub async fn connect(
        config: NaevisConfig,
        backend: Arc<dyn StoreBackend>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        let store = ProcessStoreClient::connect(backend, config.store.client_options()).await?;
        Self::new(config, Arc::new(store))
    }

    pub fn router(&self) -> Router {
        build_router(&self.stack, self.state.clone())
    }

    pub fn store(&self) -> Arc<ProcessStoreClient> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &NaevisConfig {
        &self.config
    }

    pub fn verifier(&self) -> Arc<TokenVerifier> {
        self.stack.verifier()
    }

    /// Serve on `listener` until `shutdown` resolves, then drain.
    ///
    /// Requests still running when the drain deadline passes are cut off and
    /// the call returns [`GatewayError::ShutdownTimeout`]. The store client is
    /// closed on every exit path.
    pub async fn start<F>(self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        let drain_deadline = self.config.shutdown.drain_deadline;
        info!(addr = %addr, "Starting naevis gateway");

        let (stop_tx, stop_rx) = watch::channel(false);

        // Background tasks
        let reporter = self
            .store
            .spawn_stats_reporter(self.config.store.stats_interval, stop_rx.clone());
        let cleanup = tokio::spawn(rate_limit::cleanup_task(
            self.stack.rate_limit_state(),
            self.config.rate_limit.cleanup_interval,
            self.config.rate_limit.bucket_ttl,
            stop_rx.clone(),
        ));

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let mut drain_rx = stop_rx;
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = drain_rx.wait_for(|stop| *stop).await;
                })
                .await
        });

        info!(addr = %addr, "Naevis gateway started");

        let result = tokio::select! {
            joined = &mut server => {
                error!("HTTP server exited without a shutdown request");
                flatten(joined)
            }
            () = shutdown => {
                info!(deadline_ms = drain_deadline.as_millis() as u64, "Shutdown requested, draining in-flight requests");
                let _ = stop_tx.send(true);
                match tokio::time::timeout(drain_deadline, &mut server).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => {
                        error!(
                            deadline_ms = drain_deadline.as_millis() as u64,
                            "fatal: drain deadline exceeded, aborting in-flight requests"
                        );
                        server.abort();
                        Err(GatewayError::ShutdownTimeout(drain_deadline))
                    }
                }
            }
        };

        let _ = stop_tx.send(true);
        self.store.close().await;
        let _ = tokio::join!(reporter, cleanup);

        match &result {
            Ok(()) => info!("Naevis gateway stopped"),
            Err(e) => error!(error = %e, "Naevis gateway stopped with error"),
        }
        result
    }
}

fn flatten(joined: Result<io::Result<()>, JoinError>) -> Result<(), GatewayError> {
    match joined {
        Ok(served) => Ok(served?),
        Err(e) => Err(GatewayError::Serve(io::Error::other(e))),
    }
}
