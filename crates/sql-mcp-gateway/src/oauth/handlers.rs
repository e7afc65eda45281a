//! OAuth 2.0 endpoint handlers.
//!
//! Implements:
//! - RFC 7591: Dynamic Client Registration
//! - RFC 6749: Authorization Code Grant (`client_secret_post` and `client_secret_basic`)
//! - RFC 7636: PKCE (S256, optional)

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};
use serde::Deserialize;

use super::service::{AuthorizeRequest, IssuedToken, TokenRequest};
use crate::error::{OAuthError, OAuthResult};
use crate::server::transport::HttpState;

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// `POST /register`
pub async fn handle_register(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> OAuthResult<Response> {
    let Json(req) = payload.map_err(|e| OAuthError::validation("client_metadata", e.body_text()))?;

    let client = state.oauth.register(req.client_name, req.redirect_uris).await.inspect_err(|e| {
        tracing::info!(error = %e, "Client registration rejected");
    })?;

    let mut response = (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "client_id": client.client_id,
            "client_secret": client.client_secret,
            "client_id_issued_at": client.client_id_issued_at,
            "client_secret_expires_at": 0,
            "client_name": client.client_name,
            "redirect_uris": client.redirect_uris,
            "grant_types": ["authorization_code"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "client_secret_post"
        })),
    )
        .into_response();
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `GET /authorize`
///
/// Auto-approves a request from a registered client and redirects back with
/// `code` and `state`.
pub async fn handle_authorize(
    State(state): State<Arc<HttpState>>,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> OAuthResult<Response> {
    let Query(query) = query.map_err(|e| OAuthError::InvalidRequest(e.body_text()))?;

    let location = state.oauth.authorize(&query).await.inspect_err(|e| {
        tracing::info!(error = %e, client_id = ?query.client_id, "Authorization rejected");
    })?;

    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

/// `POST /token`
///
/// Accepts a JSON or form-encoded body. Client credentials may come from the
/// body or from HTTP Basic authentication.
pub async fn handle_token(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> OAuthResult<Response> {
    let mut request = parse_token_request(&headers, &body)?;
    merge_basic_credentials(&headers, &mut request)?;

    let issued = state.oauth.exchange(&request).await.inspect_err(|e| {
        tracing::info!(error = %e, client_id = ?request.client_id, "Token exchange rejected");
    })?;

    Ok(token_success(&issued))
}

fn parse_token_request(headers: &HeaderMap, body: &[u8]) -> OAuthResult<TokenRequest> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
        serde_json::from_slice(body)
            .map_err(|e| OAuthError::InvalidRequest(format!("malformed JSON body: {e}")))
    } else {
        serde_urlencoded::from_bytes(body)
            .map_err(|e| OAuthError::InvalidRequest(format!("malformed form body: {e}")))
    }
}

fn merge_basic_credentials(headers: &HeaderMap, request: &mut TokenRequest) -> OAuthResult<()> {
    let Some(Authorization(basic)) = headers.typed_get::<Authorization<Basic>>() else {
        return Ok(());
    };

    if request.client_id.as_deref().is_some_and(|id| id != basic.username()) {
        return Err(OAuthError::InvalidRequest(
            "client_id in body does not match HTTP Basic credentials".to_string(),
        ));
    }
    request.client_id = Some(basic.username().to_string());
    request.client_secret = Some(basic.password().to_string());
    Ok(())
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(issued: &IssuedToken) -> Response {
    let mut response = Json(issued).into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
