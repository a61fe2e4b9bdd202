//! HTTP server for the admission decision service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::{admit, health, stats, AppState};
use crate::error::{Result, TurnstileError};
use crate::ratelimit::PolicyRegistry;

/// HTTP server exposing admission checks and stats.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The policy table served
    registry: Arc<PolicyRegistry>,
}

impl HttpServer {
    /// Create a new server over `registry`.
    pub fn new(addr: SocketAddr, registry: Arc<PolicyRegistry>) -> Self {
        Self { addr, registry }
    }

    /// Build the service router.
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.registry))
    }

    /// Run the server until `signal` resolves.
    ///
    /// The window sweeper runs for the lifetime of the server.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let sweeper = self.registry.spawn_sweeper();

        info!(
            addr = %local_addr,
            sweep_interval_ms = self.registry.sweep_interval().as_millis() as u64,
            "Starting HTTP server for admission checks"
        );

        let served = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        });

        sweeper.shutdown().await;
        served
    }
}

/// Routes of the decision service.
pub fn router(registry: Arc<PolicyRegistry>) -> Router {
    Router::new()
        .route("/v1/admit/:policy", get(admit).post(admit))
        .route("/v1/stats", get(stats))
        .route("/healthz", get(health))
        .with_state(AppState::new(registry))
}
