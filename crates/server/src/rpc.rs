//! JSON-RPC 2.0 types for the tool protocol.
//!
//! Each message is a single line of JSON (newline-delimited). Ids are
//! strings or integers and are echoed back verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

// Standard JSON-RPC error codes, plus the application-level timeout.
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const TIMEOUT: i64 = 408;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests and responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An incoming request or notification (no `id` ⇒ notification).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: truncate_message(message.into()),
                data: None,
            }),
        }
    }
}

/// Error messages never leak stack traces or full payloads.
fn truncate_message(message: String) -> String {
    const MAX: usize = 300;
    if message.chars().count() <= MAX {
        return message;
    }
    let cut: String = message.chars().take(MAX).collect();
    format!("{cut}…")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The result of `initialize`.
pub fn initialize_result() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {},
            "prompts": {},
            "resources": {}
        },
        "serverInfo": {
            "name": "sage-memory",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// One content item of a tool response.
pub fn text_content(text: impl Into<String>) -> Value {
    serde_json::json!({"type": "text", "text": text.into()})
}

/// The full `tools/call` result payload.
pub fn tool_result(text: impl Into<String>, is_error: bool) -> Value {
    let mut result = serde_json::json!({"content": [text_content(text)]});
    if is_error {
        result["isError"] = Value::from(true);
    }
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_with_string_id_parses() {
        let raw = r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.id, Some(Value::from("abc")));
        assert!(!req.is_notification());
    }

    #[test]
    fn request_without_id_is_notification() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn response_echoes_id_verbatim() {
        let resp = JsonRpcResponse::success(Value::from(7), Value::Null);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"id\":7"));

        let resp = JsonRpcResponse::success(Value::from("x-1"), Value::Null);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"id\":\"x-1\""));
    }

    #[test]
    fn error_response_shape() {
        let resp = JsonRpcResponse::error(Value::from(1), METHOD_NOT_FOUND, "no such method");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn long_error_messages_are_truncated() {
        let long = "x".repeat(1000);
        let resp = JsonRpcResponse::error(Value::Null, INTERNAL_ERROR, long);
        assert!(resp.error.unwrap().message.chars().count() <= 301);
    }

    #[test]
    fn initialize_advertises_tools() {
        let result = initialize_result();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[test]
    fn tool_result_marks_errors() {
        let ok = tool_result("done", false);
        assert!(ok.get("isError").is_none());
        let err = tool_result("failed", true);
        assert_eq!(err["isError"], Value::from(true));
        assert_eq!(err["content"][0]["type"], "text");
    }
}
