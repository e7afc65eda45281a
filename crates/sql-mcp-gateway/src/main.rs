//! SQL MCP Gateway - Entry Point
//!
//! Provides HTTP (SSE behind OAuth) and stdio transports.

use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, builder::BoolishValueParser};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sql_mcp_gateway::{
    config::{AuthOverrides, Config, defaults},
    executor::PgBackend,
    server::McpServer,
    storage::MemoryStorage,
};

#[derive(Parser, Debug)]
#[command(name = "sql-mcp-gateway")]
#[command(about = "MCP gateway exposing a SQL database to LLM clients")]
#[command(version)]
struct Cli {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Transport mode: http or stdio
    #[arg(long, default_value = "http")]
    transport: Transport,

    /// HTTP server port (only used with --transport http)
    #[arg(long, default_value_t = defaults::PORT, env = "PORT")]
    port: u16,

    /// Public origin of the gateway (e.g., https://mcp.example.com)
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:8000")]
    public_base_url: String,

    /// Issuer path used when the proxy sends no forwarded prefix
    #[arg(long, env = "BASE_PATH", default_value = "")]
    base_path: String,

    /// Proxy header carrying the public path prefix
    #[arg(long, env = "FORWARDED_PATH_HEADER", default_value = defaults::FORWARDED_PATH_HEADER)]
    forwarded_path_header: String,

    /// Hosts allowed in redirect URIs (comma separated, `*.example.com` wildcards)
    #[arg(long, env = "ALLOWED_REDIRECT_HOSTS", value_delimiter = ',', default_value = "localhost")]
    allowed_redirect_hosts: Vec<String>,

    /// Reject statements that modify data or schema
    #[arg(long, env = "READ_ONLY", default_value_t = true, action = ArgAction::Set,
          value_parser = BoolishValueParser::new())]
    read_only: bool,

    /// Test only: open SSE streams without a bearer token
    #[arg(long, env = "ALLOW_UNAUTHENTICATED_SSE", default_value_t = false, action = ArgAction::Set,
          value_parser = BoolishValueParser::new())]
    allow_unauthenticated_sse: bool,

    /// Test only: allow tools/call without a validated identity
    #[arg(long, env = "ALLOW_UNAUTHENTICATED_TOOLS", default_value_t = false, action = ArgAction::Set,
          value_parser = BoolishValueParser::new())]
    allow_unauthenticated_tools: bool,

    /// Rows returned by get_table_sample when no limit is given
    #[arg(long, env = "DEFAULT_SAMPLE_ROWS", default_value_t = defaults::DEFAULT_SAMPLE_ROWS)]
    default_sample_rows: u32,

    /// Upper bound for get_table_sample
    #[arg(long, env = "MAX_SAMPLE_ROWS", default_value_t = defaults::MAX_SAMPLE_ROWS)]
    max_sample_rows: u32,

    /// Upper bound for execute_sql results
    #[arg(long, env = "MAX_RESULT_ROWS", default_value_t = defaults::MAX_RESULT_ROWS)]
    max_result_rows: u32,

    /// Per-statement timeout in seconds
    #[arg(long, env = "QUERY_TIMEOUT_SECS", default_value_t = defaults::QUERY_TIMEOUT.as_secs())]
    query_timeout_secs: u64,

    /// Authorization code lifetime in seconds
    #[arg(long, env = "AUTH_CODE_TTL_SECS", default_value_t = defaults::AUTH_CODE_TTL.as_secs())]
    auth_code_ttl_secs: u64,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL_SECS", default_value_t = defaults::ACCESS_TOKEN_TTL.as_secs())]
    access_token_ttl_secs: u64,

    /// Search result lifetime in seconds
    #[arg(long, env = "SEARCH_RESULT_TTL_SECS", default_value_t = defaults::SEARCH_RESULT_TTL.as_secs())]
    search_result_ttl_secs: u64,

    /// Maximum pooled database connections
    #[arg(long, env = "POOL_MAX_CONNECTIONS", default_value_t = defaults::POOL_MAX_CONNECTIONS)]
    pool_max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[arg(long, env = "POOL_ACQUIRE_TIMEOUT_SECS", default_value_t = defaults::POOL_ACQUIRE_TIMEOUT.as_secs())]
    pool_acquire_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Transport {
    /// HTTP with Server-Sent Events behind OAuth
    #[default]
    Http,
    /// Standard input/output for a trusted local client
    Stdio,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.database_url, self.public_base_url);
        config.fallback_base_path = self.base_path;
        config.forwarded_path_header = self.forwarded_path_header.to_ascii_lowercase();
        config.allowed_redirect_hosts = self
            .allowed_redirect_hosts
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        config.read_only = self.read_only;
        config.auth = AuthOverrides {
            allow_unauthenticated_sse: self.allow_unauthenticated_sse,
            allow_unauthenticated_tools: self.allow_unauthenticated_tools,
        };
        config.auth_code_ttl = Duration::from_secs(self.auth_code_ttl_secs);
        config.access_token_ttl = Duration::from_secs(self.access_token_ttl_secs);
        config.search_result_ttl = Duration::from_secs(self.search_result_ttl_secs);
        config.limits.default_sample_rows = self.default_sample_rows;
        config.limits.max_sample_rows = self.max_sample_rows;
        config.limits.max_result_rows = self.max_result_rows;
        config.limits.query_timeout = Duration::from_secs(self.query_timeout_secs);
        config.pool_max_connections = self.pool_max_connections;
        config.pool_acquire_timeout = Duration::from_secs(self.pool_acquire_timeout_secs);
        config
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    // Stdout carries the protocol in stdio mode, so logs go to stderr.
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    let transport = cli.transport;
    let port = cli.port;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?transport,
        "Starting SQL MCP gateway"
    );

    let config = cli.into_config();
    config.validate()?;

    let backend = PgBackend::connect_lazy(&config)?;
    let storage = Arc::new(MemoryStorage::new(&config));
    let server = McpServer::new(config, Arc::new(backend), storage);

    match transport {
        Transport::Stdio => {
            tracing::info!("Running in stdio mode");
            server.run_stdio().await?;
        }
        Transport::Http => {
            tracing::info!(port, "Running in HTTP mode");
            server.run_http(port).await?;
        }
    }

    Ok(())
}
