//! JSON-RPC 2.0 framing for the actor link: one JSON object per line.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tickterm_common::error_codes;
use tickterm_daemon::ToolOutcome;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    jsonrpc: String,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.as_ref()?.get(key)?.as_bool()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    jsonrpc: String,
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcServerError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcServerError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn tool_outcome(id: u64, outcome: &ToolOutcome) -> Self {
        Self::success(
            id,
            json!({ "text": outcome.text, "is_error": outcome.is_error }),
        )
    }

    pub fn error(id: Option<u64>, code: i32, message: &str) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    pub fn error_with_data(id: Option<u64>, code: i32, message: &str, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcServerError {
                code,
                message: message.to_string(),
                data,
            }),
        }
    }
}

/// A message the harness sends without expecting a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcNotification {
    jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl RpcNotification {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }

    pub fn prompt(text: &str) -> Self {
        Self::new("prompt", json!({ "text": text }))
    }
}

/// Parses one line from the actor. Failures come back as the error response
/// to send in its place.
#[allow(clippy::result_large_err)]
pub fn parse_line(line: &str) -> Result<RpcRequest, RpcResponse> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        RpcResponse::error(None, error_codes::PARSE_ERROR, &format!("Parse error: {e}"))
    })?;
    let id = value.get("id").and_then(Value::as_u64);
    let request: RpcRequest = serde_json::from_value(value).map_err(|e| {
        RpcResponse::error(id, error_codes::INVALID_REQUEST, &format!("Invalid request: {e}"))
    })?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(RpcResponse::error(
            id,
            error_codes::INVALID_REQUEST,
            "Invalid request: jsonrpc must be \"2.0\"",
        ));
    }
    Ok(request)
}
