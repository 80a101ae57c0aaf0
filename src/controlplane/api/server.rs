//! API Server
//!
//! Serves the REST surface until shutdown. Cancelling the server's token also
//! cancels the context of every in-flight request.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::rest::RestRouter;
use crate::controlplane::controller::Controller;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 50049)),
        }
    }
}

impl ApiServerConfig {
    /// Parse a `host:port` endpoint
    pub fn from_endpoint(endpoint: &str) -> Result<Self> {
        let rest_addr = endpoint.parse().map_err(|e| {
            Error::Configuration(format!("api_endpoint '{}' is not host:port: {}", endpoint, e))
        })?;
        Ok(Self { rest_addr })
    }
}

// =============================================================================
// API Server
// =============================================================================

pub struct ApiServer {
    config: ApiServerConfig,
    controller: Arc<Controller>,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, controller: Arc<Controller>) -> Self {
        Self {
            config,
            controller,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled on shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) -> Result<()> {
        let app = RestRouter::new(self.controller.clone(), self.shutdown.clone()).build();

        let listener = tokio::net::TcpListener::bind(self.config.rest_addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
        info!("REST API listening on {}", self.config.rest_addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
