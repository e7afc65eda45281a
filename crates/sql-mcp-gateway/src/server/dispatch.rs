//! Method routing shared by the SSE and stdio transports.

use std::sync::Arc;

use serde_json::{Value, json};

use super::rpc::{JsonRpcRequest, JsonRpcResponse, McpToolInfo};
use crate::config::AuthOverrides;
use crate::error::{ToolError, ToolResult, rpc_codes};
use crate::oauth::{Identity, OAuthService};
use crate::tools::{McpTool, ToolContext};

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Server name reported by `initialize`.
pub const SERVER_NAME: &str = "sql-mcp-gateway";

/// How the caller of a session authenticated.
#[derive(Clone)]
pub enum Credentials {
    /// Bearer token, re-validated before every tool call.
    Bearer(String),
    /// Local stdio peer.
    Trusted,
    /// No token, admitted by the `allow_unauthenticated_sse` override.
    Anonymous,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer([redacted])"),
            Self::Trusted => f.write_str("Trusted"),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// What the transport must do with a request.
#[derive(Debug)]
pub enum Action {
    /// Answer now; `None` for notifications.
    Reply(Option<JsonRpcResponse>),
    /// Run a tool, possibly for a long time. `id` is `null` for id-less calls.
    CallTool { id: Value, name: String, arguments: Value },
    /// Abort the in-flight request with this id.
    Cancel(Value),
}

/// Routes JSON-RPC methods to tools.
pub struct Dispatcher {
    tools: Vec<Box<dyn McpTool>>,
    ctx: ToolContext,
    oauth: Arc<OAuthService>,
    auth: AuthOverrides,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        tools: Vec<Box<dyn McpTool>>,
        ctx: ToolContext,
        oauth: Arc<OAuthService>,
        auth: AuthOverrides,
    ) -> Self {
        Self { tools, ctx, oauth, auth }
    }

    #[must_use]
    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Registered tools in listing order.
    pub fn tools(&self) -> impl Iterator<Item = &dyn McpTool> {
        self.tools.iter().map(|t| t.as_ref())
    }

    /// Get tool by name.
    #[must_use]
    pub fn get_tool(&self, name: &str) -> Option<&dyn McpTool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    /// Decide how to handle a request.
    #[must_use]
    pub fn plan(&self, req: JsonRpcRequest) -> Action {
        let is_notification = req.is_notification();
        tracing::debug!(method = %req.method, notification = is_notification, "Handling request");

        let response = match req.method.as_str() {
            "initialize" => JsonRpcResponse::success(req.id, handle_initialize(&req.params)),
            "notifications/initialized" | "initialized" => return Action::Reply(None),
            "notifications/cancelled" => {
                return match req.params.get("requestId") {
                    Some(id) if !id.is_null() => Action::Cancel(id.clone()),
                    _ => Action::Reply(None),
                };
            }
            "ping" => JsonRpcResponse::success(req.id, json!({})),
            "tools/list" => self.handle_tools_list(req.id),
            "tools/call" => {
                let id = req.id.unwrap_or(Value::Null);
                let Some(name) = req.params.get("name").and_then(Value::as_str) else {
                    return Action::Reply(Some(JsonRpcResponse::error(
                        Some(id),
                        rpc_codes::INVALID_PARAMS,
                        "Missing 'name' parameter",
                    )));
                };
                if self.get_tool(name).is_none() {
                    return Action::Reply(Some(JsonRpcResponse::error(
                        Some(id),
                        rpc_codes::INVALID_PARAMS,
                        format!("Tool not found: {name}"),
                    )));
                }
                let arguments = match req.params.get("arguments") {
                    None | Some(Value::Null) => json!({}),
                    Some(args) => args.clone(),
                };
                return Action::CallTool { id, name: name.to_string(), arguments };
            }
            _ => JsonRpcResponse::error(
                req.id,
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", req.method),
            ),
        };

        if is_notification {
            Action::Reply(None)
        } else {
            Action::Reply(Some(response))
        }
    }

    /// Check that `credentials` may call tools right now.
    ///
    /// # Errors
    ///
    /// `ToolError::Unauthorized` when the token is missing, unknown or expired.
    pub async fn authenticate(&self, credentials: &Credentials) -> ToolResult<Option<Identity>> {
        match credentials {
            Credentials::Bearer(token) => self
                .oauth
                .validate(token)
                .await
                .map(Some)
                .map_err(|e| ToolError::Unauthorized(e.to_string())),
            Credentials::Trusted => Ok(None),
            Credentials::Anonymous if self.auth.allow_unauthenticated_tools => Ok(None),
            Credentials::Anonymous => {
                Err(ToolError::Unauthorized("tools/call requires a bearer token".to_string()))
            }
        }
    }

    /// Execute a tool and build its response.
    pub async fn call_tool(&self, id: Value, name: &str, arguments: Value) -> JsonRpcResponse {
        let Some(tool) = self.get_tool(name) else {
            return JsonRpcResponse::error(
                Some(id),
                rpc_codes::INVALID_PARAMS,
                format!("Tool not found: {name}"),
            );
        };

        tracing::info!(tool = %name, "Executing tool");

        match tool.execute(&self.ctx, arguments).await {
            Ok(result) => JsonRpcResponse::success(
                Some(id),
                json!({
                    "content": [{
                        "type": "text",
                        "text": result
                    }]
                }),
            ),
            Err(e) => {
                if matches!(e, ToolError::Backend(_) | ToolError::Storage(_) | ToolError::Internal(_)) {
                    tracing::error!(tool = %name, error = %e, "Tool execution failed");
                } else {
                    tracing::info!(tool = %name, kind = e.kind(), "Tool call rejected");
                }
                tool_error_response(Some(id), &e)
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        let tool_list: Vec<McpToolInfo> = self
            .tools
            .iter()
            .map(|t| McpToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();

        JsonRpcResponse::success(id, json!({ "tools": tool_list }))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.tools.len())
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// JSON-RPC error for a failed tool call, with `data.kind` and `data.retryable`.
#[must_use]
pub fn tool_error_response(id: Option<Value>, err: &ToolError) -> JsonRpcResponse {
    JsonRpcResponse::error(id, err.rpc_code(), err.to_user_message())
        .with_data(json!({ "kind": err.kind(), "retryable": err.is_retryable() }))
}

fn handle_initialize(params: &Value) -> Value {
    let requested = params.get("protocolVersion").and_then(Value::as_str);
    let protocol_version = requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v))
        .unwrap_or(&SUPPORTED_PROTOCOL_VERSIONS[0]);

    tracing::info!(requested = ?requested, negotiated = %protocol_version, "MCP initialize");

    json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}
