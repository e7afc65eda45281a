//! SQL MCP Gateway
//!
//! A Model Context Protocol (MCP) server that exposes a SQL backend to LLM
//! clients over a Server-Sent-Events transport, protected by an embedded
//! OAuth 2.0 authorization server.
//!
//! # Features
//!
//! - **OAuth 2.0**: dynamic client registration, authorization-code grant,
//!   bearer token validation, optional PKCE
//! - **SSE transport**: JSON-RPC requests demultiplexed over one stream,
//!   tool calls run concurrently and are cancelled on disconnect
//! - **Read-only policy**: statements are classified statically with `sqlparser`
//!   before they reach the database
//! - **Lossless results**: numeric and temporal values are rendered as text
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sql_mcp_gateway::config::Config;
//! use sql_mcp_gateway::executor::PgBackend;
//! use sql_mcp_gateway::server::McpServer;
//! use sql_mcp_gateway::storage::MemoryStorage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::new("postgres://localhost/app", "https://mcp.example.com");
//!     let backend = PgBackend::connect_lazy(&config)?;
//!     let storage = Arc::new(MemoryStorage::new(&config));
//!
//!     McpServer::new(config, Arc::new(backend), storage).run_http(8000).await
//! }
//! ```

pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod formatters;
pub mod models;
pub mod oauth;
pub mod server;
pub mod storage;
pub mod tools;

pub use config::Config;
pub use error::{BackendError, ExecutorError, OAuthError, StorageError, ToolError};
pub use oauth::OAuthService;
pub use storage::{MemoryStorage, Storage};
