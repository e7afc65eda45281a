//! OAuth authorization service: registration, code issuance, token exchange
//! and bearer validation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::redirect::{self, RedirectPolicy};
use super::secrets;
use crate::clock::{self, SharedClock, SystemClock};
use crate::config::Config;
use crate::error::{OAuthError, OAuthResult, StorageResult};
use crate::storage::{
    AuthorizationCode, Client, CodeRedemption, PurgeStats, SharedStorage, Token,
};

/// Scope granted when the client does not ask for one.
pub const DEFAULT_SCOPE: &str = "sql";

const MAX_CLIENT_NAME_LEN: usize = 200;

/// Registration response returned once; the only place the plaintext secret appears.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredClient {
    pub client_id: String,
    pub client_secret: String,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub client_id_issued_at: i64,
}

/// Parameters of `GET /authorize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Parameters of `POST /token`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
}

/// Successful token exchange.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub scope: String,
}

/// Who a validated bearer token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
}

/// The embedded authorization server.
#[derive(Clone)]
pub struct OAuthService {
    storage: SharedStorage,
    clock: SharedClock,
    redirects: RedirectPolicy,
    auth_code_ttl: Duration,
    access_token_ttl: Duration,
}

impl OAuthService {
    /// Create a service on the wall clock.
    #[must_use]
    pub fn new(config: &Config, storage: SharedStorage) -> Self {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    /// Create a service on an explicit clock.
    #[must_use]
    pub fn with_clock(config: &Config, storage: SharedStorage, clock: SharedClock) -> Self {
        Self {
            storage,
            clock,
            redirects: RedirectPolicy::from_hosts(&config.allowed_redirect_hosts),
            auth_code_ttl: config.auth_code_ttl,
            access_token_ttl: config.access_token_ttl,
        }
    }

    /// The clock all expiry decisions use.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// The storage backing this service.
    #[must_use]
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Register a client (RFC 7591).
    ///
    /// # Errors
    ///
    /// Returns a validation error if `redirect_uris` is empty or any URI is
    /// malformed or outside the allowlist; nothing is persisted in that case.
    pub async fn register(
        &self,
        client_name: Option<String>,
        redirect_uris: Vec<String>,
    ) -> OAuthResult<RegisteredClient> {
        if redirect_uris.is_empty() {
            return Err(OAuthError::validation(
                "redirect_uris",
                "at least one redirect URI is required",
            ));
        }
        for uri in &redirect_uris {
            self.redirects.validate(uri)?;
        }

        let name = client_name.map(|n| n.trim().to_string()).unwrap_or_default();
        if name.len() > MAX_CLIENT_NAME_LEN {
            return Err(OAuthError::validation(
                "client_name",
                format!("must be at most {MAX_CLIENT_NAME_LEN} bytes"),
            ));
        }

        let now = self.clock.now();
        let client_id = uuid::Uuid::new_v4().simple().to_string();
        let client_secret = secrets::generate_token();

        self.storage
            .insert_client(Client {
                client_id: client_id.clone(),
                client_secret_hash: secrets::hash_secret(&client_secret),
                name: name.clone(),
                redirect_uris: redirect_uris.clone(),
                created_at: now,
            })
            .await?;

        tracing::info!(client_id = %client_id, redirect_uris = redirect_uris.len(), "Registered OAuth client");

        Ok(RegisteredClient {
            client_id,
            client_secret,
            client_name: name,
            redirect_uris,
            client_id_issued_at: now.timestamp(),
        })
    }

    /// Issue an authorization code and return the redirect location.
    ///
    /// Approval is automatic once the client and redirect check out.
    ///
    /// # Errors
    ///
    /// `InvalidClient` for an unknown client, `InvalidRedirect` for a URI that
    /// is not registered or no longer allowlisted, `UnsupportedResponseType`
    /// unless `response_type=code`, `InvalidRequest` for bad PKCE parameters.
    pub async fn authorize(&self, request: &AuthorizeRequest) -> OAuthResult<String> {
        let client_id = required(request.client_id.as_deref(), "client_id", OAuthError::InvalidClient)?;
        let Some(client) = self.storage.client(client_id).await? else {
            return Err(OAuthError::InvalidClient(format!("unknown client_id '{client_id}'")));
        };

        let redirect_uri = required(request.redirect_uri.as_deref(), "redirect_uri", OAuthError::InvalidRedirect)?;
        if !client.has_redirect_uri(redirect_uri) {
            return Err(OAuthError::InvalidRedirect(
                "redirect_uri is not registered for this client".to_string(),
            ));
        }
        if !self.redirects.is_allowed(redirect_uri) {
            return Err(OAuthError::InvalidRedirect(
                "redirect_uri host is no longer allowed".to_string(),
            ));
        }

        match request.response_type.as_deref() {
            Some("code") => {}
            Some(other) => return Err(OAuthError::UnsupportedResponseType(other.to_string())),
            None => return Err(OAuthError::UnsupportedResponseType("missing".to_string())),
        }

        let code_challenge = match request.code_challenge.as_deref() {
            None => None,
            Some(challenge) => {
                if request.code_challenge_method.as_deref() != Some("S256") {
                    return Err(OAuthError::InvalidRequest(
                        "code_challenge_method must be 'S256'".to_string(),
                    ));
                }
                if !secrets::is_valid_challenge(challenge) {
                    return Err(OAuthError::InvalidRequest("malformed code_challenge".to_string()));
                }
                Some(challenge.to_string())
            }
        };

        let now = self.clock.now();
        let code = secrets::generate_token();
        let location = redirect::with_code(redirect_uri, &code, request.state.as_deref())?;

        self.storage
            .insert_auth_code(AuthorizationCode {
                code,
                client_id: client.client_id.clone(),
                redirect_uri: redirect_uri.to_string(),
                scope: request.scope.clone().unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
                code_challenge,
                issued_at: now,
                expires_at: clock::after(now, self.auth_code_ttl),
                consumed: false,
            })
            .await?;

        tracing::info!(client_id = %client.client_id, "Issued authorization code");
        Ok(location)
    }

    /// Exchange an authorization code for an access token.
    ///
    /// Client credentials are checked before the code is touched, so a wrong
    /// secret does not burn the code.
    ///
    /// # Errors
    ///
    /// `UnsupportedGrantType` unless `grant_type=authorization_code`;
    /// `InvalidGrant` for missing, unknown, expired, consumed or foreign codes, bad
    /// client credentials, a redirect URI mismatch or a failed PKCE check.
    pub async fn exchange(&self, request: &TokenRequest) -> OAuthResult<IssuedToken> {
        match request.grant_type.as_deref() {
            Some("authorization_code") => {}
            Some(other) => return Err(OAuthError::UnsupportedGrantType(other.to_string())),
            None => return Err(OAuthError::UnsupportedGrantType("missing".to_string())),
        }
        let code = required(request.code.as_deref(), "code", OAuthError::InvalidGrant)?;
        let client_id = required(request.client_id.as_deref(), "client_id", OAuthError::InvalidGrant)?;
        let client_secret =
            required(request.client_secret.as_deref(), "client_secret", OAuthError::InvalidGrant)?;

        let authenticated = match self.storage.client(client_id).await? {
            Some(client) => secrets::verify_secret(client_secret, &client.client_secret_hash),
            None => false,
        };
        if !authenticated {
            tracing::warn!(client_id = %client_id, "Token exchange with bad client credentials");
            return Err(OAuthError::InvalidGrant("client authentication failed".to_string()));
        }

        let now = self.clock.now();
        let record = match self.storage.consume_auth_code(code, client_id, now).await? {
            CodeRedemption::Redeemed(record) => record,
            CodeRedemption::Unknown | CodeRedemption::ClientMismatch => {
                return Err(OAuthError::InvalidGrant("unknown authorization code".to_string()));
            }
            CodeRedemption::AlreadyConsumed => {
                tracing::warn!(client_id = %client_id, "Authorization code replayed");
                return Err(OAuthError::InvalidGrant(
                    "authorization code already used".to_string(),
                ));
            }
            CodeRedemption::Expired => {
                return Err(OAuthError::InvalidGrant("authorization code expired".to_string()));
            }
        };

        if let Some(ref redirect_uri) = request.redirect_uri {
            if *redirect_uri != record.redirect_uri {
                return Err(OAuthError::InvalidGrant("redirect_uri mismatch".to_string()));
            }
        }

        if let Some(ref challenge) = record.code_challenge {
            let Some(ref verifier) = request.code_verifier else {
                return Err(OAuthError::InvalidGrant("missing code_verifier".to_string()));
            };
            if !secrets::verify_s256(verifier, challenge) {
                return Err(OAuthError::InvalidGrant("PKCE verification failed".to_string()));
            }
        }

        let token = Token {
            access_token: secrets::generate_token(),
            client_id: record.client_id,
            scope: record.scope,
            issued_at: now,
            expires_at: clock::after(now, self.access_token_ttl),
        };
        let issued = IssuedToken {
            access_token: token.access_token.clone(),
            token_type: Token::TOKEN_TYPE,
            expires_in: token.expires_in(now),
            scope: token.scope.clone(),
        };
        let client_id = token.client_id.clone();
        self.storage.insert_token(token).await?;

        tracing::info!(client_id = %client_id, "Issued access token");
        Ok(issued)
    }

    /// Resolve a bearer token to its identity.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the token is unknown or `now >= expires_at`.
    pub async fn validate(&self, bearer: &str) -> OAuthResult<Identity> {
        let Some(token) = self.storage.token(bearer).await? else {
            return Err(OAuthError::Unauthorized("unknown access token".to_string()));
        };
        if !token.is_valid_at(self.clock.now()) {
            return Err(OAuthError::Unauthorized("access token expired".to_string()));
        }
        Ok(Identity { client_id: token.client_id, scope: token.scope, expires_at: token.expires_at })
    }

    /// Remove expired codes, tokens and search entries.
    ///
    /// # Errors
    ///
    /// Returns the storage failure, if any.
    pub async fn purge_expired(&self) -> StorageResult<PurgeStats> {
        self.storage.purge_expired(self.clock.now()).await
    }

    /// Start the background sweep of expired state.
    pub fn start_cleanup_task(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match self.purge_expired().await {
                    Ok(stats) if stats.total() > 0 => {
                        tracing::debug!(
                            auth_codes = stats.auth_codes,
                            tokens = stats.tokens,
                            search_entries = stats.search_entries,
                            "Purged expired state"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Expired-state purge failed"),
                }
            }
        })
    }
}

impl std::fmt::Debug for OAuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthService")
            .field("redirects", &self.redirects)
            .field("auth_code_ttl", &self.auth_code_ttl)
            .field("access_token_ttl", &self.access_token_ttl)
            .finish_non_exhaustive()
    }
}

/// A non-empty parameter, or `missing` as the error of the failing step.
fn required<'a>(
    value: Option<&'a str>,
    field: &str,
    missing: fn(String) -> OAuthError,
) -> OAuthResult<&'a str> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(missing(format!("missing {field}"))),
    }
}
