//! HTTP transport: OAuth endpoints, discovery and the SSE JSON-RPC channel.
//!
//! `POST /sse` carries one JSON-RPC message or batch per request and answers
//! on the response stream:
//! - the bearer token is checked before the stream opens (401 otherwise)
//! - tool calls run concurrently on a per-stream `JoinSet`; frames are sent
//!   in completion order and the stream ends once every request is answered
//! - dropping the stream (client disconnect) aborts its running calls
//! - a call that fails or panics is answered with an error frame and the
//!   stream keeps serving the remaining requests
//! - the token is re-validated before every `tools/call`; a failure sends a
//!   final -32001 frame and closes the stream

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use futures::stream::Stream;
use serde_json::{Value, json};
use tokio::task::{self, JoinSet};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::dispatch::{Action, Credentials, Dispatcher, SERVER_NAME, tool_error_response};
use super::rpc::{self, Incoming, JsonRpcResponse};
use super::session::{SessionManager, StreamGuard};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{AuthOverrides, Config, defaults};
use crate::discovery::{self, Discovery};
use crate::error::{ToolError, rpc_codes};
use crate::executor::{QueryExecutor, SharedBackend};
use crate::oauth::{OAuthService, handlers};
use crate::storage::SharedStorage;
use crate::tools::{self, ToolContext};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Shared state for HTTP handlers.
pub struct HttpState {
    pub oauth: Arc<OAuthService>,
    pub discovery: Discovery,
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionManager>,
    pub auth: AuthOverrides,
    /// Interval between SSE keep-alive comments.
    pub keepalive: Duration,
}

impl HttpState {
    /// Wire up services against the system clock.
    #[must_use]
    pub fn new(config: &Config, backend: SharedBackend, storage: SharedStorage) -> Self {
        Self::with_clock(config, backend, storage, Arc::new(SystemClock))
    }

    /// Wire up services against an explicit clock.
    #[must_use]
    pub fn with_clock(
        config: &Config,
        backend: SharedBackend,
        storage: SharedStorage,
        clock: SharedClock,
    ) -> Self {
        let oauth = Arc::new(OAuthService::with_clock(
            config,
            Arc::clone(&storage),
            Arc::clone(&clock),
        ));
        let executor = QueryExecutor::new(backend, config.limits.clone(), config.read_only);
        let ctx = ToolContext::new(executor, storage, clock, config.search_result_ttl);
        let dispatcher = Arc::new(Dispatcher::new(
            tools::register_all_tools(&config.limits),
            ctx,
            Arc::clone(&oauth),
            config.auth,
        ));

        Self {
            oauth,
            discovery: Discovery::new(config),
            dispatcher,
            sessions: Arc::new(SessionManager::new()),
            auth: config.auth,
            keepalive: defaults::KEEPALIVE_INTERVAL,
        }
    }
}

impl std::fmt::Debug for HttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpState")
            .field("discovery", &self.discovery)
            .field("dispatcher", &self.dispatcher)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Discovery (RFC 8414, RFC 9728)
        .route(
            "/.well-known/oauth-authorization-server",
            get(discovery::handle_auth_server_metadata),
        )
        .route(
            "/.well-known/openid-configuration",
            get(discovery::handle_auth_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(discovery::handle_protected_resource),
        )
        .route(
            "/.well-known/oauth-protected-resource/sse",
            get(discovery::handle_protected_resource),
        )
        // OAuth 2.0
        .route("/register", post(handlers::handle_register))
        .route("/authorize", get(handlers::handle_authorize))
        .route("/token", post(handlers::handle_token))
        // MCP over SSE
        .route(
            "/sse",
            get(handle_sse_probe)
                .head(handle_sse_probe)
                .options(handle_sse_probe)
                .post(handle_sse_post),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<Arc<HttpState>>) -> Response {
    let sessions = state.sessions.active_streams();

    match state.dispatcher.context().executor.ping().await {
        Ok(()) => Json(json!({
            "status": "ready",
            "service": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "backend": "ok",
            "sessions": sessions,
            "tools": state.dispatcher.tool_count()
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "service": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "backend": ToolError::from(e).to_user_message(),
                    "sessions": sessions
                })),
            )
                .into_response()
        }
    }
}

fn sse_headers() -> [(HeaderName, HeaderValue); 3] {
    [
        (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
    ]
}

/// `HEAD|GET|OPTIONS /sse`: connectivity probe, no body and no token required.
async fn handle_sse_probe() -> impl IntoResponse {
    (StatusCode::OK, sse_headers())
}

/// `POST /sse`
async fn handle_sse_post(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let credentials = match stream_credentials(&state, &headers).await {
        Ok(credentials) => credentials,
        Err(reason) => return unauthorized(&state, &headers, reason),
    };

    let messages = match rpc::parse_envelope(&body) {
        Ok(envelope) => envelope.messages,
        Err(response) => {
            tracing::debug!("Rejected unparseable JSON-RPC body");
            vec![Incoming::Invalid(response)]
        }
    };

    let guard = state.sessions.open(credentials);
    tracing::info!(
        session_id = %guard.session().id,
        messages = messages.len(),
        "Opened SSE response stream"
    );

    let keepalive = KeepAlive::new().interval(state.keepalive).text("ping");
    let stream = response_stream(state, guard, messages);

    (sse_headers(), Sse::new(stream).keep_alive(keepalive)).into_response()
}

/// Resolve the caller of a new stream.
async fn stream_credentials(
    state: &HttpState,
    headers: &HeaderMap,
) -> Result<Credentials, &'static str> {
    match headers.typed_get::<Authorization<Bearer>>() {
        Some(Authorization(bearer)) => {
            let token = bearer.token().to_string();
            match state.oauth.validate(&token).await {
                Ok(identity) => {
                    tracing::debug!(client_id = %identity.client_id, "Bearer token accepted");
                    Ok(Credentials::Bearer(token))
                }
                Err(e) => {
                    tracing::info!(error = %e, "Rejected bearer token");
                    Err("the access token is invalid or expired")
                }
            }
        }
        None if state.auth.allow_unauthenticated_sse => Ok(Credentials::Anonymous),
        None => Err("a bearer token is required"),
    }
}

fn unauthorized(state: &HttpState, headers: &HeaderMap, reason: &'static str) -> Response {
    let metadata_url = state.discovery.resource_metadata_url(headers);
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "invalid_token",
            "error_description": reason
        })),
    )
        .into_response();

    match HeaderValue::from_str(&format!(r#"Bearer resource_metadata="{metadata_url}""#)) {
        Ok(challenge) => {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, challenge);
        }
        Err(_) => {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
    }
    response
}

/// Answer every message of one POST, tool calls concurrently.
fn response_stream(
    state: Arc<HttpState>,
    mut guard: StreamGuard,
    messages: Vec<Incoming>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let session_id = guard.session().id.clone();
        let mut tasks: JoinSet<JsonRpcResponse> = JoinSet::new();
        let mut running: HashMap<task::Id, (String, u64, Value)> = HashMap::new();

        for message in messages {
            let request = match message {
                Incoming::Request(request) => request,
                Incoming::Invalid(response) => {
                    yield Ok(frame(&response));
                    continue;
                }
            };

            match state.dispatcher.plan(request) {
                Action::Reply(Some(response)) => {
                    yield Ok(frame(&response));
                }
                Action::Reply(None) => {}
                Action::Cancel(id) => {
                    let found = guard.session().cancel(&rpc::id_key(&id));
                    tracing::info!(session_id = %session_id, request_id = %id, found, "Request cancelled");
                }
                Action::CallTool { id, name, arguments } => {
                    if let Err(e) = state.dispatcher.authenticate(guard.session().credentials()).await {
                        tracing::warn!(session_id = %session_id, error = %e, "Session no longer authorized, closing stream");
                        yield Ok(frame(&tool_error_response(Some(id), &e)));
                        return;
                    }

                    // Id-less calls cannot be cancelled or collide; give each its own slot.
                    let key = if id.is_null() {
                        format!("null:{}", uuid::Uuid::new_v4().simple())
                    } else {
                        rpc::id_key(&id)
                    };
                    let Some(ticket) = guard.reserve(&key) else {
                        let response = JsonRpcResponse::error(
                            Some(id),
                            rpc_codes::INVALID_REQUEST,
                            "Invalid Request: a request with this id is already in flight",
                        );
                        yield Ok(frame(&response));
                        continue;
                    };

                    let dispatcher = Arc::clone(&state.dispatcher);
                    let request_id = id.clone();
                    let handle = tasks.spawn(async move {
                        dispatcher.call_tool(request_id, &name, arguments).await
                    });
                    running.insert(handle.id(), (key.clone(), ticket, id));
                    guard.session().attach(&key, ticket, handle);
                }
            }
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let task_id = match &joined {
                Ok((task_id, _)) => *task_id,
                Err(e) => e.id(),
            };
            let Some((key, ticket, id)) = running.remove(&task_id) else {
                continue;
            };
            guard.finish(&key, ticket);

            match joined {
                Ok((_, response)) => yield Ok(frame(&response)),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::error!(session_id = %session_id, request_id = %id, error = %e, "Tool task failed");
                    let response = JsonRpcResponse::error(
                        Some(id),
                        rpc_codes::INTERNAL_ERROR,
                        "Internal error: the tool call failed unexpectedly",
                    );
                    yield Ok(frame(&response));
                }
            }
        }

        tracing::debug!(session_id = %session_id, "All requests answered, closing stream");
    }
}

/// One `event: message` frame.
fn frame(response: &JsonRpcResponse) -> Event {
    Event::default().event("message").json_data(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize response frame");
        Event::default().event("message").data(format!(
            r#"{{"jsonrpc":"2.0","error":{{"code":{},"message":"Internal error"}},"id":null}}"#,
            rpc_codes::INTERNAL_ERROR
        ))
    })
}
