//! Records persisted through the storage port.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock;

/// A dynamically registered OAuth client.
#[derive(Clone)]
pub struct Client {
    pub client_id: String,
    /// SHA-256 digest of the client secret (base64url, unpadded).
    pub client_secret_hash: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Exact-match lookup of a registered redirect URI.
    #[must_use]
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("name", &self.name)
            .field("redirect_uris", &self.redirect_uris)
            .finish()
    }
}

/// An authorization code issued by `authorize`.
#[derive(Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    /// PKCE S256 challenge, when the client sent one.
    pub code_challenge: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl AuthorizationCode {
    /// Expired at or after `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("expires_at", &self.expires_at)
            .field("consumed", &self.consumed)
            .finish()
    }
}

/// Outcome of the atomic code redemption.
#[derive(Debug, Clone)]
pub enum CodeRedemption {
    /// The code was valid and is now consumed.
    Redeemed(AuthorizationCode),
    Unknown,
    AlreadyConsumed,
    Expired,
    /// The code belongs to another client; it was left untouched.
    ClientMismatch,
}

/// A bearer access token.
#[derive(Clone)]
pub struct Token {
    pub access_token: String,
    pub client_id: String,
    pub scope: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Value of `token_type` in token responses.
    pub const TOKEN_TYPE: &'static str = "Bearer";

    /// Valid strictly before `expires_at`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whole seconds of validity left at `now`.
    #[must_use]
    pub fn expires_in(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at - now).num_seconds()).unwrap_or(0)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A cached `search` result, resolvable by `fetch` until it expires.
#[derive(Debug, Clone)]
pub struct SearchResultEntry {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl SearchResultEntry {
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        clock::after(self.created_at, self.ttl)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Counts of records removed by a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub auth_codes: usize,
    pub tokens: usize,
    pub search_entries: usize,
}

impl PurgeStats {
    #[must_use]
    pub fn total(&self) -> usize {
        self.auth_codes + self.tokens + self.search_entries
    }
}
