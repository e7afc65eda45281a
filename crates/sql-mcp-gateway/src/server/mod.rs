//! MCP server implementation.
//!
//! Provides both HTTP (SSE behind OAuth) and stdio transports over one
//! [`dispatch::Dispatcher`].

pub mod dispatch;
pub mod rpc;
pub mod session;
pub mod stdio;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use crate::clock::{SharedClock, SystemClock};
use crate::config::{Config, defaults};
use crate::executor::SharedBackend;
use crate::storage::SharedStorage;
use transport::HttpState;

/// MCP gateway server.
pub struct McpServer {
    config: Config,
    state: Arc<HttpState>,
}

impl McpServer {
    /// Create a new MCP server.
    #[must_use]
    pub fn new(config: Config, backend: SharedBackend, storage: SharedStorage) -> Self {
        Self::with_clock(config, backend, storage, Arc::new(SystemClock))
    }

    /// Create a server whose expiry decisions use `clock`.
    #[must_use]
    pub fn with_clock(
        config: Config,
        backend: SharedBackend,
        storage: SharedStorage,
        clock: SharedClock,
    ) -> Self {
        let state = Arc::new(HttpState::with_clock(&config, backend, storage, clock));
        Self { config, state }
    }

    /// Run the server in stdio mode.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure.
    pub async fn run_stdio(self) -> anyhow::Result<()> {
        tracing::info!("Starting MCP server in stdio mode");
        tracing::info!("Registered {} tools", self.state.dispatcher.tool_count());

        stdio::run_stdio(Arc::clone(&self.state.dispatcher)).await
    }

    /// Run the server in HTTP mode.
    ///
    /// # Errors
    ///
    /// Returns error on server failure.
    pub async fn run_http(self, port: u16) -> anyhow::Result<()> {
        tracing::info!("Starting MCP server in HTTP mode on port {}", port);
        tracing::info!(
            issuer = %self.config.base_url(),
            read_only = self.config.read_only,
            tools = self.state.dispatcher.tool_count(),
            "Gateway configured"
        );
        if self.config.auth.allow_unauthenticated_sse || self.config.auth.allow_unauthenticated_tools {
            tracing::warn!(overrides = ?self.config.auth, "Authentication overrides are enabled");
        }

        let cleanup = Arc::clone(&self.state.oauth).start_cleanup_task(defaults::CLEANUP_INTERVAL);
        let router = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        cleanup.abort();
        tracing::info!("HTTP server shut down");
        Ok(())
    }

    /// The HTTP router, for embedding or tests.
    #[must_use]
    pub fn router(&self) -> Router {
        transport::create_router(Arc::clone(&self.state))
    }

    /// List all available tools.
    #[must_use]
    pub fn list_tools(&self) -> Vec<(&str, &str)> {
        self.state.dispatcher.tools().map(|t| (t.name(), t.description())).collect()
    }

    /// Shared handler state.
    #[must_use]
    pub fn state(&self) -> &Arc<HttpState> {
        &self.state
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer").field("state", &self.state).finish_non_exhaustive()
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
    tracing::info!("Received shutdown signal");
}
