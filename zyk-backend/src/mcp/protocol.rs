//! Line-delimited JSON-RPC 2.0 envelopes spoken with tool workers.

use serde::Serialize;
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-06-18";
pub const CLIENT_NAME: &str = "zyk-ai-agent";
pub const CLIENT_VERSION: &str = "0.1";

/// Request or notification (a notification has no id)
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn request(id: u64, method: &'a str, params: Value) -> Self {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method,
            params,
        }
    }

    pub fn notification(method: &'a str, params: Value) -> Self {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params,
        }
    }
}

pub fn initialize_request(id: u64) -> JsonRpcRequest<'static> {
    JsonRpcRequest::request(
        id,
        "initialize",
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION},
        }),
    )
}

pub fn initialized_notification() -> JsonRpcRequest<'static> {
    JsonRpcRequest::notification("notifications/initialized", json!({}))
}

pub fn tool_call_request(id: u64, name: &str, arguments: Value) -> JsonRpcRequest<'static> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    JsonRpcRequest::request(
        id,
        "tools/call",
        json!({"name": name, "arguments": arguments}),
    )
}

/// The three handshake documents, newline terminated, written in one flush.
pub fn encode_handshake(
    init_id: u64,
    call_id: u64,
    name: &str,
    arguments: Value,
) -> Result<String, serde_json::Error> {
    let mut buffer = String::new();
    for document in [
        serde_json::to_string(&initialize_request(init_id))?,
        serde_json::to_string(&initialized_notification())?,
        serde_json::to_string(&tool_call_request(call_id, name, arguments))?,
    ] {
        buffer.push_str(&document);
        buffer.push('\n');
    }
    Ok(buffer)
}

/// Correlation id of a response document, if it carries an integer id
pub fn response_id(document: &Value) -> Option<u64> {
    document.get("id").and_then(Value::as_u64)
}
