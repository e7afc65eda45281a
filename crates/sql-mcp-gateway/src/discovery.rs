//! OAuth discovery metadata.
//!
//! - RFC 8414: Authorization Server Metadata (also served as `openid-configuration`)
//! - RFC 9728: Protected Resource Metadata
//!
//! The issuer is `public_base_url` plus a path prefix. The prefix comes from
//! the configured forwarded-path header when present; the static fallback is
//! used only when the header is absent or not a plain absolute path. Whatever
//! sits in front of the gateway must strip client-supplied copies of that header.

use std::sync::{Arc, LazyLock};

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderName},
    response::IntoResponse,
};
use regex::Regex;
use serde_json::{Value, json};

use crate::config::{Config, defaults};
use crate::oauth::DEFAULT_SCOPE;
use crate::server::transport::HttpState;

static PATH_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(/[A-Za-z0-9._~-]+)*/?$").expect("valid path prefix regex pattern")
});

/// Issuer derivation and metadata documents.
#[derive(Debug, Clone)]
pub struct Discovery {
    base_url: String,
    fallback_path: String,
    header: HeaderName,
}

impl Discovery {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let header = HeaderName::from_bytes(config.forwarded_path_header.as_bytes())
            .unwrap_or_else(|_| {
                tracing::warn!(
                    header = %config.forwarded_path_header,
                    "Invalid forwarded path header name, using default"
                );
                HeaderName::from_static(defaults::FORWARDED_PATH_HEADER)
            });

        Self {
            base_url: config.base_url().to_string(),
            fallback_path: normalize_prefix(&config.fallback_base_path).unwrap_or_default(),
            header,
        }
    }

    /// Issuer URL for a forwarded path value (`None` when the header is absent).
    #[must_use]
    pub fn issuer_for(&self, forwarded_path: Option<&str>) -> String {
        let prefix = match forwarded_path {
            None => self.fallback_path.as_str(),
            Some(raw) => match normalize_prefix(raw) {
                Some(prefix) => return format!("{}{prefix}", self.base_url),
                None => {
                    tracing::warn!(value = %raw, "Ignoring malformed forwarded path prefix");
                    self.fallback_path.as_str()
                }
            },
        };
        format!("{}{prefix}", self.base_url)
    }

    /// Issuer URL for a request.
    #[must_use]
    pub fn issuer(&self, headers: &HeaderMap) -> String {
        let forwarded = headers.get(&self.header).map(|v| v.to_str().unwrap_or("\u{FFFD}"));
        self.issuer_for(forwarded)
    }

    /// Authorization server metadata for a forwarded path value.
    #[must_use]
    pub fn metadata(&self, forwarded_path: Option<&str>) -> Value {
        authorization_server_metadata(&self.issuer_for(forwarded_path))
    }

    /// URL of the protected resource metadata, for `WWW-Authenticate`.
    #[must_use]
    pub fn resource_metadata_url(&self, headers: &HeaderMap) -> String {
        format!("{}/.well-known/oauth-protected-resource", self.issuer(headers))
    }
}

/// Validate and normalize a path prefix: `/a/b/` becomes `/a/b`, `/` becomes empty.
fn normalize_prefix(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return Some(String::new());
    }
    if !PATH_PREFIX.is_match(raw) || raw.split('/').any(|seg| seg == "." || seg == "..") {
        return None;
    }
    Some(raw.trim_end_matches('/').to_string())
}

fn authorization_server_metadata(issuer: &str) -> Value {
    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "registration_endpoint": format!("{issuer}/register"),
        "scopes_supported": [DEFAULT_SCOPE],
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "token_endpoint_auth_methods_supported": ["client_secret_post", "client_secret_basic"],
        "code_challenge_methods_supported": ["S256"]
    })
}

fn protected_resource_metadata(issuer: &str) -> Value {
    json!({
        "resource": format!("{issuer}/sse"),
        "authorization_servers": [issuer],
        "bearer_methods_supported": ["header"],
        "scopes_supported": [DEFAULT_SCOPE]
    })
}

/// `GET /.well-known/oauth-authorization-server` and `/.well-known/openid-configuration`
pub async fn handle_auth_server_metadata(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    Json(authorization_server_metadata(&state.discovery.issuer(&headers)))
}

/// `GET /.well-known/oauth-protected-resource`
pub async fn handle_protected_resource(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    Json(protected_resource_metadata(&state.discovery.issuer(&headers)))
}
