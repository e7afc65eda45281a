//! Configuration for the SQL MCP gateway.

use std::time::Duration;

/// Default values.
pub mod defaults {
    use std::time::Duration;

    /// HTTP port.
    pub const PORT: u16 = 8000;

    /// Authorization code lifetime (10 minutes).
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(600);

    /// Access token lifetime (1 hour).
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);

    /// Search result entry lifetime (10 minutes).
    pub const SEARCH_RESULT_TTL: Duration = Duration::from_secs(600);

    /// Maximum cached search entries.
    pub const SEARCH_CACHE_MAX_ENTRIES: u64 = 10_000;

    /// Rows returned by a sample when the caller does not ask for a count.
    pub const DEFAULT_SAMPLE_ROWS: u32 = 5;

    /// Hard cap for sampling operations.
    pub const MAX_SAMPLE_ROWS: u32 = 100;

    /// Hard cap for `execute_sql` result sets.
    pub const MAX_RESULT_ROWS: u32 = 1000;

    /// Per-statement timeout.
    pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Pause before the single retry of a transient backend failure.
    pub const RETRY_DELAY: Duration = Duration::from_millis(200);

    /// Maximum pooled database connections.
    pub const POOL_MAX_CONNECTIONS: u32 = 10;

    /// How long to wait for a pooled connection.
    pub const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Schema used for unqualified table names.
    pub const DEFAULT_SCHEMA: &str = "public";

    /// Header a trusted reverse proxy sets to the public path prefix.
    pub const FORWARDED_PATH_HEADER: &str = "x-forwarded-prefix";

    /// SSE keep-alive interval.
    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

    /// Interval of the expired-state sweep.
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
}

/// Test-mode overrides that relax authentication.
///
/// Both default to `false`; they exist for local, non-proxied testing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthOverrides {
    /// Open `POST /sse` streams without a bearer token.
    pub allow_unauthenticated_sse: bool,

    /// Allow `tools/call` from a session that has no validated identity.
    pub allow_unauthenticated_tools: bool,
}

/// Limits applied by the query executor.
#[derive(Debug, Clone)]
pub struct ExecutorLimits {
    pub default_sample_rows: u32,
    pub max_sample_rows: u32,
    pub max_result_rows: u32,
    pub query_timeout: Duration,
    pub retry_delay: Duration,
    pub default_schema: String,
}

impl Default for ExecutorLimits {
    fn default() -> Self {
        Self {
            default_sample_rows: defaults::DEFAULT_SAMPLE_ROWS,
            max_sample_rows: defaults::MAX_SAMPLE_ROWS,
            max_result_rows: defaults::MAX_RESULT_ROWS,
            query_timeout: defaults::QUERY_TIMEOUT,
            retry_delay: defaults::RETRY_DELAY,
            default_schema: defaults::DEFAULT_SCHEMA.to_string(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string.
    pub database_url: String,

    /// Public scheme + host the gateway is reachable at (no path).
    pub public_base_url: String,

    /// Path prefix used for the issuer when no forwarded prefix is present.
    pub fallback_base_path: String,

    /// Name of the trusted header carrying the forwarded path prefix.
    pub forwarded_path_header: String,

    /// Hosts allowed in registered redirect URIs (`*.example.com` wildcards allowed).
    pub allowed_redirect_hosts: Vec<String>,

    /// Reject mutating SQL.
    pub read_only: bool,

    /// Authentication test overrides.
    pub auth: AuthOverrides,

    /// Authorization code lifetime.
    pub auth_code_ttl: Duration,

    /// Access token lifetime.
    pub access_token_ttl: Duration,

    /// Search result lifetime.
    pub search_result_ttl: Duration,

    /// Maximum cached search entries.
    pub search_cache_max_entries: u64,

    /// Executor row caps and timeouts.
    pub limits: ExecutorLimits,

    /// Maximum pooled connections.
    pub pool_max_connections: u32,

    /// Pool acquire timeout.
    pub pool_acquire_timeout: Duration,
}

impl Config {
    /// Create a configuration with defaults for everything but the endpoints.
    ///
    /// Read-only mode is on by default.
    #[must_use]
    pub fn new(database_url: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            public_base_url: public_base_url.into(),
            fallback_base_path: String::new(),
            forwarded_path_header: defaults::FORWARDED_PATH_HEADER.to_string(),
            allowed_redirect_hosts: Vec::new(),
            read_only: true,
            auth: AuthOverrides::default(),
            auth_code_ttl: defaults::AUTH_CODE_TTL,
            access_token_ttl: defaults::ACCESS_TOKEN_TTL,
            search_result_ttl: defaults::SEARCH_RESULT_TTL,
            search_cache_max_entries: defaults::SEARCH_CACHE_MAX_ENTRIES,
            limits: ExecutorLimits::default(),
            pool_max_connections: defaults::POOL_MAX_CONNECTIONS,
            pool_acquire_timeout: defaults::POOL_ACQUIRE_TIMEOUT,
        }
    }

    /// Create a test configuration: example.com redirects, no retry delay.
    #[must_use]
    pub fn for_testing() -> Self {
        let mut config = Self::new("postgres://unused.localhost/test", "https://gateway.test");
        config.allowed_redirect_hosts = vec!["example.com".to_string(), "localhost".to_string()];
        config.limits.retry_delay = Duration::ZERO; // No delay in tests
        config.limits.query_timeout = Duration::from_secs(5);
        config
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let base = url::Url::parse(&self.public_base_url)
            .map_err(|e| anyhow::anyhow!("PUBLIC_BASE_URL '{}' is invalid: {e}", self.public_base_url))?;
        anyhow::ensure!(
            matches!(base.scheme(), "http" | "https"),
            "PUBLIC_BASE_URL must use http or https"
        );
        anyhow::ensure!(
            self.fallback_base_path.is_empty() || self.fallback_base_path.starts_with('/'),
            "BASE_PATH must be empty or start with '/'"
        );
        anyhow::ensure!(
            axum::http::HeaderName::from_bytes(self.forwarded_path_header.as_bytes()).is_ok(),
            "FORWARDED_PATH_HEADER '{}' is not a valid header name",
            self.forwarded_path_header
        );
        anyhow::ensure!(
            !self.allowed_redirect_hosts.is_empty(),
            "ALLOWED_REDIRECT_HOSTS must name at least one host"
        );
        anyhow::ensure!(!self.auth_code_ttl.is_zero(), "auth code TTL must be positive");
        anyhow::ensure!(!self.access_token_ttl.is_zero(), "access token TTL must be positive");
        anyhow::ensure!(!self.search_result_ttl.is_zero(), "search result TTL must be positive");
        anyhow::ensure!(self.limits.max_sample_rows > 0, "max sample rows must be positive");
        anyhow::ensure!(self.limits.max_result_rows > 0, "max result rows must be positive");
        anyhow::ensure!(!self.limits.query_timeout.is_zero(), "query timeout must be positive");
        anyhow::ensure!(self.pool_max_connections > 0, "pool must allow at least one connection");
        Ok(())
    }

    /// Public base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }
}
