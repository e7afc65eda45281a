//! Error types for the SQL MCP gateway.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Each layer has its own enum; lower layers convert upward into [`ToolError`]
//! (in-band JSON-RPC errors) or [`OAuthError`] (HTTP error responses).

use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// JSON-RPC error codes used on the wire.
pub mod rpc_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Backend or tool execution failure.
    pub const TOOL_ERROR: i32 = -32000;
    pub const UNAUTHORIZED: i32 = -32001;
    pub const PERMISSION_DENIED: i32 = -32003;
    pub const NOT_FOUND: i32 = -32004;
}

/// Errors from the storage port.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backing store could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A record with the same key already exists.
    #[error("{kind} '{key}' already exists")]
    Conflict {
        /// Record kind (client, code, token, entry)
        kind: &'static str,
        /// Conflicting key
        key: String,
    },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from the OAuth authorization service.
///
/// Every variant except [`OAuthError::Unauthorized`] and
/// [`OAuthError::Storage`] is a 400 with an RFC 6749 error body.
#[derive(thiserror::Error, Debug)]
pub enum OAuthError {
    /// Registration metadata rejected.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending registration field
        field: &'static str,
        /// Human-readable reason
        message: String,
    },

    #[error("invalid client: {0}")]
    InvalidClient(String),

    #[error("invalid redirect_uri: {0}")]
    InvalidRedirect(String),

    #[error("unsupported response_type: {0}")]
    UnsupportedResponseType(String),

    #[error("unsupported grant_type: {0}")]
    UnsupportedGrantType(String),

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// Missing or malformed request parameter.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, unknown or expired bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl OAuthError {
    /// Create a registration validation error.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    /// The OAuth `error` code for the response body.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { field: "redirect_uris", .. } => "invalid_redirect_uri",
            Self::Validation { .. } => "invalid_client_metadata",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidRedirect(_) | Self::InvalidRequest(_) => "invalid_request",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::Unauthorized(_) => "invalid_token",
            Self::Storage(_) => "server_error",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn description(&self) -> String {
        match self {
            Self::Validation { message, .. } => message.clone(),
            Self::InvalidClient(m)
            | Self::InvalidRedirect(m)
            | Self::UnsupportedResponseType(m)
            | Self::UnsupportedGrantType(m)
            | Self::InvalidGrant(m)
            | Self::InvalidRequest(m)
            | Self::Unauthorized(m) => m.clone(),
            // Storage details stay in the logs.
            Self::Storage(_) => "temporary server error".to_string(),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if let Self::Storage(ref e) = self {
            tracing::error!(error = %e, "OAuth storage failure");
        }

        let status = self.status();
        let mut response = (
            status,
            Json(serde_json::json!({
                "error": self.error_code(),
                "error_description": self.description(),
            })),
        )
            .into_response();

        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if status == StatusCode::UNAUTHORIZED {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Result type alias for OAuth operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

/// Errors from the SQL backend.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// No pooled connection became available in time.
    #[error("connection pool exhausted, retry later")]
    PoolExhausted,

    /// Network or protocol failure talking to the database.
    #[error("database connection error: {0}")]
    Connection(String),

    /// Statement exceeded the configured timeout.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// The database rejected the statement.
    #[error("query failed: {message}")]
    Query {
        /// Database error message
        message: String,
        /// Five-character SQLSTATE, if reported
        sqlstate: Option<String>,
    },

    /// A returned value could not be decoded.
    #[error("failed to decode column: {0}")]
    Decode(String),
}

impl BackendError {
    /// Returns true if a single retry may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted | Self::Connection(_) => true,
            // serialization_failure, deadlock_detected
            Self::Query { sqlstate: Some(code), .. } => code == "40001" || code == "40P01",
            _ => false,
        }
    }

    /// Create a query error without a SQLSTATE.
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query { message: message.into(), sqlstate: None }
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::PoolExhausted,
            sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed => Self::Connection(err.to_string()),
            sqlx::Error::Database(db) => Self::Query {
                message: db.message().to_string(),
                sqlstate: db.code().map(|c| c.into_owned()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Decode(err.to_string())
            }
            other => Self::query(other.to_string()),
        }
    }
}

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors from the query executor (policy layer above the backend).
#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Mutating statement rejected under read-only mode.
    #[error("{statement} statements are not allowed in read-only mode")]
    ReadOnlyViolation {
        /// Leading keyword of the rejected statement
        statement: String,
    },

    /// Statement text could not be accepted (empty, multiple statements, ...).
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// Identifier does not follow the accepted table-name grammar.
    #[error("invalid table name '{0}'")]
    InvalidIdentifier(String),

    /// Table does not exist or is not visible.
    #[error("table '{0}' not found")]
    UnknownTable(String),
}

/// Result type alias for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors from MCP tool execution.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Input validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// Statement rejected by the read-only policy
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Referenced object does not exist or has expired
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not authenticated for this call
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend failure after retries
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal tool logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// JSON-RPC error code for this failure.
    #[must_use]
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::Serialization(_) => rpc_codes::INVALID_PARAMS,
            Self::Permission(_) => rpc_codes::PERMISSION_DENIED,
            Self::NotFound(_) => rpc_codes::NOT_FOUND,
            Self::Unauthorized(_) => rpc_codes::UNAUTHORIZED,
            Self::Backend(_) => rpc_codes::TOOL_ERROR,
            Self::Storage(_) | Self::Internal(_) => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Short machine-readable kind, sent as JSON-RPC error data.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::Serialization(_) => "validation_error",
            Self::Permission(_) => "permission_error",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Backend(_) => "backend_error",
            Self::Storage(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Returns true if the caller may retry the same call.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retryable() || matches!(e, BackendError::Timeout(_)),
            Self::Storage(StorageError::Unavailable(_)) => true,
            _ => false,
        }
    }

    /// Convert to a user-friendly error message for MCP response.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Validation { field, message } => {
                format!("Invalid input for '{field}': {message}")
            }
            Self::Backend(BackendError::PoolExhausted) => {
                "The database is busy. Please retry in a moment.".to_string()
            }
            Self::Storage(_) | Self::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<ExecutorError> for ToolError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Backend(e) => Self::Backend(e),
            e @ ExecutorError::ReadOnlyViolation { .. } => Self::Permission(e.to_string()),
            ExecutorError::InvalidStatement(message) => Self::validation("sql", message),
            e @ ExecutorError::InvalidIdentifier(_) => Self::validation("table", e.to_string()),
            e @ ExecutorError::UnknownTable(_) => Self::NotFound(e.to_string()),
        }
    }
}

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;
