//! JSON-RPC 2.0 message types and envelope parsing.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::rpc_codes;

const NOTIFICATION_PREFIX: &str = "notifications/";

/// JSON-RPC 2.0 request.
///
/// `jsonrpc` may be omitted. A message without an id is a notification only
/// when its method is in the `notifications/` namespace; any other id-less
/// request is answered with `"id": null`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.starts_with(NOTIFICATION_PREFIX)
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// `null` when the request id could not be determined.
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// JSON-RPC version constant.
    pub const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(Self::VERSION), result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
            id,
        }
    }

    /// Attach structured `data` to an error response.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.data = Some(data);
        }
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// MCP tool info for tools/list response.
#[derive(Debug, Serialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// One element of a request body.
#[derive(Debug, Clone)]
pub enum Incoming {
    Request(JsonRpcRequest),
    /// Structurally invalid; the error response to send back.
    Invalid(JsonRpcResponse),
}

/// A parsed request body.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub messages: Vec<Incoming>,
    /// Body was a JSON array.
    pub batch: bool,
}

/// Parse a body into a single message or a batch.
///
/// # Errors
///
/// Returns the error response to send when the body is not JSON (-32700) or
/// is an empty batch (-32600).
pub fn parse_envelope(body: &[u8]) -> Result<Envelope, JsonRpcResponse> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        JsonRpcResponse::error(None, rpc_codes::PARSE_ERROR, format!("Parse error: {e}"))
    })?;

    match value {
        Value::Array(items) if items.is_empty() => Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid Request: empty batch",
        )),
        Value::Array(items) => {
            Ok(Envelope { messages: items.into_iter().map(parse_message).collect(), batch: true })
        }
        single => Ok(Envelope { messages: vec![parse_message(single)], batch: false }),
    }
}

/// Validate one message.
#[must_use]
pub fn parse_message(value: Value) -> Incoming {
    let id = value.get("id").filter(|id| is_valid_id(id)).cloned();
    let invalid = |reason: &str| {
        Incoming::Invalid(JsonRpcResponse::error(
            id.clone(),
            rpc_codes::INVALID_REQUEST,
            format!("Invalid Request: {reason}"),
        ))
    };

    let Some(object) = value.as_object() else {
        return invalid("message must be an object");
    };
    if object.get("jsonrpc").is_some_and(|v| v.as_str() != Some(JsonRpcResponse::VERSION)) {
        return invalid("jsonrpc must be \"2.0\"");
    }
    if !object.get("method").is_some_and(Value::is_string) {
        return invalid("method must be a string");
    }
    if object.get("id").is_some_and(|id| !is_valid_id(id)) {
        return invalid("id must be a string, number or null");
    }
    if object.get("params").is_some_and(|p| !(p.is_object() || p.is_array() || p.is_null())) {
        return invalid("params must be an object or array");
    }

    match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(request) => Incoming::Request(request),
        Err(e) => invalid(&e.to_string()),
    }
}

fn is_valid_id(id: &Value) -> bool {
    id.is_string() || id.is_number() || id.is_null()
}

/// Stable map key for a request id (`"7"` and `7` stay distinct).
#[must_use]
pub fn id_key(id: &Value) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_error() {
        let err = parse_envelope(b"{not json").unwrap_err();
        assert_eq!(err.error.unwrap().code, rpc_codes::PARSE_ERROR);
        assert_eq!(serde_json::to_value(&JsonRpcResponse::error(None, 1, "x")).unwrap()["id"], Value::Null);
    }

    #[test]
    fn test_single_and_batch() {
        let env = parse_envelope(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(!env.batch);
        assert!(matches!(&env.messages[0], Incoming::Request(r) if r.method == "ping"));

        let env = parse_envelope(
            br#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"},5]"#,
        )
        .unwrap();
        assert!(env.batch);
        assert_eq!(env.messages.len(), 3);
        assert!(matches!(&env.messages[1], Incoming::Request(r) if r.is_notification()));
        assert!(matches!(&env.messages[2], Incoming::Invalid(_)));
    }

    #[test]
    fn test_empty_batch_invalid() {
        let err = parse_envelope(b"[]").unwrap_err();
        assert_eq!(err.error.unwrap().code, rpc_codes::INVALID_REQUEST);
    }

    #[test]
    fn test_invalid_messages_keep_usable_id() {
        let Incoming::Invalid(resp) = parse_message(json!({"jsonrpc": "1.0", "id": 9, "method": "x"})) else {
            panic!("expected invalid");
        };
        assert_eq!(resp.id, Some(json!(9)));
        assert_eq!(resp.error.unwrap().code, rpc_codes::INVALID_REQUEST);

        for bad in [
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "id": {"a": 1}, "method": "x"}),
            json!({"jsonrpc": "2.0", "id": 1, "method": "x", "params": 3}),
        ] {
            assert!(matches!(parse_message(bad), Incoming::Invalid(_)));
        }
    }

    #[test]
    fn test_jsonrpc_member_is_optional() {
        let Incoming::Request(req) = parse_message(json!({"method": "tools/list"})) else {
            panic!("expected request");
        };
        assert!(req.jsonrpc.is_none());
        assert!(!req.is_notification());

        let Incoming::Request(req) = parse_message(json!({"method": "notifications/initialized"})) else {
            panic!("expected request");
        };
        assert!(req.is_notification());

        assert!(matches!(
            parse_message(json!({"jsonrpc": 2, "method": "ping"})),
            Incoming::Invalid(_)
        ));
    }

    #[test]
    fn test_with_data_only_on_errors() {
        let ok = JsonRpcResponse::success(Some(json!(1)), json!({})).with_data(json!({"x": 1}));
        assert!(ok.error.is_none());
        let err = JsonRpcResponse::error(Some(json!(1)), -1, "bad").with_data(json!({"x": 1}));
        assert_eq!(err.error.unwrap().data, Some(json!({"x": 1})));
    }

    #[test]
    fn test_id_key_distinguishes_types() {
        assert_ne!(id_key(&json!(7)), id_key(&json!("7")));
    }
}
