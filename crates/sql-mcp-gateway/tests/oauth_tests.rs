//! Tests for the OAuth service: registration, code issuance, exchange and
//! token validation on a manual clock.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};

use sql_mcp_gateway::clock::ManualClock;
use sql_mcp_gateway::config::Config;
use sql_mcp_gateway::error::OAuthError;
use sql_mcp_gateway::oauth::{AuthorizeRequest, OAuthService, TokenRequest};
use sql_mcp_gateway::storage::{MemoryStorage, Storage};

const REDIRECT_URI: &str = "https://example.com/callback";

struct Fixture {
    service: Arc<OAuthService>,
    storage: Arc<MemoryStorage>,
    clock: Arc<ManualClock>,
}

fn fixture() -> Fixture {
    let config = Config::for_testing();
    let storage = Arc::new(MemoryStorage::new(&config));
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
    let service = Arc::new(OAuthService::with_clock(&config, storage.clone(), clock.clone()));
    Fixture { service, storage, clock }
}

fn authorize_request(client_id: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        client_id: Some(client_id.to_string()),
        redirect_uri: Some(REDIRECT_URI.to_string()),
        response_type: Some("code".to_string()),
        state: Some("abc".to_string()),
        ..AuthorizeRequest::default()
    }
}

fn token_request(client_id: &str, secret: &str, code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: Some("authorization_code".to_string()),
        code: Some(code.to_string()),
        client_id: Some(client_id.to_string()),
        client_secret: Some(secret.to_string()),
        ..TokenRequest::default()
    }
}

fn code_from_location(location: &str) -> String {
    let url = url::Url::parse(location).unwrap();
    url.query_pairs().find(|(k, _)| k == "code").map(|(_, v)| v.into_owned()).unwrap()
}

impl Fixture {
    async fn client(&self) -> (String, String) {
        let client = self
            .service
            .register(Some("Test".into()), vec![REDIRECT_URI.to_string()])
            .await
            .unwrap();
        (client.client_id, client.client_secret)
    }

    async fn code(&self, client_id: &str) -> String {
        let location = self.service.authorize(&authorize_request(client_id)).await.unwrap();
        code_from_location(&location)
    }
}

// ─── Registration ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_persists_hashed_secret() {
    let f = fixture();
    let (client_id, secret) = f.client().await;

    let stored = f.storage.client(&client_id).await.unwrap().unwrap();
    assert_eq!(stored.redirect_uris, vec![REDIRECT_URI.to_string()]);
    assert_ne!(stored.client_secret_hash, secret);
}

#[tokio::test]
async fn test_register_rejects_disallowed_host() {
    let f = fixture();
    let err = f
        .service
        .register(None, vec![REDIRECT_URI.into(), "https://evil.test/cb".into()])
        .await
        .unwrap_err();

    assert!(matches!(err, OAuthError::Validation { field: "redirect_uris", .. }));
    assert_eq!(err.error_code(), "invalid_redirect_uri");
}

#[tokio::test]
async fn test_register_requires_redirect_uri() {
    let f = fixture();
    let err = f.service.register(Some("x".into()), Vec::new()).await.unwrap_err();
    assert!(matches!(err, OAuthError::Validation { .. }));
}

// ─── Authorization ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_authorize_echoes_state() {
    let f = fixture();
    let (client_id, _) = f.client().await;

    let location = f.service.authorize(&authorize_request(&client_id)).await.unwrap();
    assert!(location.starts_with(REDIRECT_URI));
    assert!(location.contains("state=abc"));
    assert!(!code_from_location(&location).is_empty());
}

#[tokio::test]
async fn test_authorize_unknown_client() {
    let f = fixture();
    let err = f.service.authorize(&authorize_request("nope")).await.unwrap_err();
    assert!(matches!(err, OAuthError::InvalidClient(_)));
}

#[tokio::test]
async fn test_authorize_unregistered_redirect() {
    let f = fixture();
    let (client_id, _) = f.client().await;

    let mut request = authorize_request(&client_id);
    request.redirect_uri = Some("https://example.com/other".into());
    let err = f.service.authorize(&request).await.unwrap_err();
    assert!(matches!(err, OAuthError::InvalidRedirect(_)));
}

#[tokio::test]
async fn test_authorize_requires_code_response_type() {
    let f = fixture();
    let (client_id, _) = f.client().await;

    let mut request = authorize_request(&client_id);
    request.response_type = Some("token".into());
    let err = f.service.authorize(&request).await.unwrap_err();
    assert_eq!(err.error_code(), "unsupported_response_type");

    request.response_type = None;
    let err = f.service.authorize(&request).await.unwrap_err();
    assert_eq!(err.error_code(), "unsupported_response_type");
}

#[tokio::test]
async fn test_authorize_missing_client_id_is_invalid_client() {
    let f = fixture();

    let mut request = authorize_request("ignored");
    request.client_id = None;
    let err = f.service.authorize(&request).await.unwrap_err();
    assert!(matches!(err, OAuthError::InvalidClient(_)));
}

// ─── Token Exchange ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_exchange_issues_bearer_token() {
    let f = fixture();
    let (client_id, secret) = f.client().await;
    let code = f.code(&client_id).await;

    let issued = f.service.exchange(&token_request(&client_id, &secret, &code)).await.unwrap();
    assert_eq!(issued.token_type, "Bearer");
    assert_eq!(issued.expires_in, 3600);

    let identity = f.service.validate(&issued.access_token).await.unwrap();
    assert_eq!(identity.client_id, client_id);
}

#[tokio::test]
async fn test_code_is_single_use() {
    let f = fixture();
    let (client_id, secret) = f.client().await;
    let code = f.code(&client_id).await;
    let request = token_request(&client_id, &secret, &code);

    f.service.exchange(&request).await.unwrap();
    let err = f.service.exchange(&request).await.unwrap_err();
    assert!(matches!(err, OAuthError::InvalidGrant(_)));
}

#[tokio::test]
async fn test_concurrent_exchanges_issue_one_token() {
    let f = fixture();
    let (client_id, secret) = f.client().await;
    let code = f.code(&client_id).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = Arc::clone(&f.service);
            let request = token_request(&client_id, &secret, &code);
            tokio::spawn(async move { service.exchange(&request).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(matches!(e, OAuthError::InvalidGrant(_))),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_wrong_secret_does_not_burn_code() {
    let f = fixture();
    let (client_id, secret) = f.client().await;
    let code = f.code(&client_id).await;

    let err = f.service.exchange(&token_request(&client_id, "wrong", &code)).await.unwrap_err();
    assert!(matches!(err, OAuthError::InvalidGrant(_)));

    f.service.exchange(&token_request(&client_id, &secret, &code)).await.unwrap();
}

#[tokio::test]
async fn test_code_from_other_client_rejected() {
    let f = fixture();
    let (client_a, _) = f.client().await;
    let (client_b, secret_b) = f.client().await;
    let code = f.code(&client_a).await;

    let err = f.service.exchange(&token_request(&client_b, &secret_b, &code)).await.unwrap_err();
    assert!(matches!(err, OAuthError::InvalidGrant(_)));
}

#[tokio::test]
async fn test_expired_code_rejected() {
    let f = fixture();
    let (client_id, secret) = f.client().await;
    let code = f.code(&client_id).await;

    f.clock.advance(Duration::from_secs(600));
    let err = f.service.exchange(&token_request(&client_id, &secret, &code)).await.unwrap_err();
    assert!(err.to_string().contains("expired"));
}

#[tokio::test]
async fn test_redirect_uri_must_match_when_sent() {
    let f = fixture();
    let (client_id, secret) = f.client().await;
    let code = f.code(&client_id).await;

    let mut request = token_request(&client_id, &secret, &code);
    request.redirect_uri = Some("https://example.com/elsewhere".into());
    let err = f.service.exchange(&request).await.unwrap_err();
    assert!(err.to_string().contains("redirect_uri"));
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let f = fixture();
    let mut request = token_request("c", "s", "x");
    request.grant_type = Some("client_credentials".into());
    let err = f.service.exchange(&request).await.unwrap_err();
    assert_eq!(err.error_code(), "unsupported_grant_type");
}

// ─── PKCE ────────────────────────────────────────────────────────────────────

fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[tokio::test]
async fn test_pkce_verifier_checked() {
    let f = fixture();
    let (client_id, secret) = f.client().await;
    let verifier = "a".repeat(43);

    let mut request = authorize_request(&client_id);
    request.code_challenge = Some(s256(&verifier));
    request.code_challenge_method = Some("S256".into());

    let code = code_from_location(&f.service.authorize(&request).await.unwrap());
    let mut exchange = token_request(&client_id, &secret, &code);
    exchange.code_verifier = Some("b".repeat(43));
    let err = f.service.exchange(&exchange).await.unwrap_err();
    assert!(err.to_string().contains("PKCE"));

    let code = code_from_location(&f.service.authorize(&request).await.unwrap());
    let mut exchange = token_request(&client_id, &secret, &code);
    exchange.code_verifier = Some(verifier);
    f.service.exchange(&exchange).await.unwrap();
}

#[tokio::test]
async fn test_pkce_plain_method_rejected() {
    let f = fixture();
    let (client_id, _) = f.client().await;

    let mut request = authorize_request(&client_id);
    request.code_challenge = Some(s256("verifier"));
    request.code_challenge_method = Some("plain".into());
    let err = f.service.authorize(&request).await.unwrap_err();
    assert!(matches!(err, OAuthError::InvalidRequest(_)));
}

// ─── Validation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_token_expires_exactly_at_ttl() {
    let f = fixture();
    let (client_id, secret) = f.client().await;
    let code = f.code(&client_id).await;
    let token =
        f.service.exchange(&token_request(&client_id, &secret, &code)).await.unwrap().access_token;

    f.clock.advance(Duration::from_secs(3599));
    assert!(f.service.validate(&token).await.is_ok());

    f.clock.advance(Duration::from_secs(1));
    let err = f.service.validate(&token).await.unwrap_err();
    assert!(matches!(err, OAuthError::Unauthorized(_)));
}

#[tokio::test]
async fn test_unknown_token_rejected() {
    let f = fixture();
    assert!(matches!(
        f.service.validate("not-a-token").await.unwrap_err(),
        OAuthError::Unauthorized(_)
    ));
}

#[tokio::test]
async fn test_purge_drops_expired_tokens() {
    let f = fixture();
    let (client_id, secret) = f.client().await;
    let code = f.code(&client_id).await;
    let token =
        f.service.exchange(&token_request(&client_id, &secret, &code)).await.unwrap().access_token;

    f.clock.advance(Duration::from_secs(7200));
    let stats = f.service.purge_expired().await.unwrap();
    assert_eq!(stats.tokens, 1);
    assert!(f.storage.token(&token).await.unwrap().is_none());
}
