// crates/warden-server/src/mcp/jsonrpc.rs
// JSON-RPC 2.0 framing for the MCP transport

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::WardenError;

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// Application codes (-32000..-32099)
pub const RATE_LIMITED: i64 = -32001;
pub const DEPENDENCY_UNAVAILABLE: i64 = -32002;
pub const UNAUTHORIZED: i64 = -32003;
pub const PRECONDITION_FAILED: i64 = -32004;

/// A parsed JSON-RPC request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Parse and validate one message. The error carries the code the
    /// caller should put on the wire.
    pub fn parse(raw: Value) -> Result<Self, (i64, String)> {
        let request: JsonRpcRequest = serde_json::from_value(raw)
            .map_err(|e| (INVALID_REQUEST, format!("malformed request: {e}")))?;
        if request.jsonrpc != "2.0" {
            return Err((
                INVALID_REQUEST,
                format!("unsupported jsonrpc version {:?}", request.jsonrpc),
            ));
        }
        if request.method.is_empty() {
            return Err((INVALID_REQUEST, "missing method".into()));
        }
        Ok(request)
    }

    /// Notifications (no `id`) never get a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A successful response, echoing the request id.
pub fn response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// An error response.
pub fn error_response(id: Value, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

/// Map a [`WardenError`] onto the wire, using its stable code and
/// user-safe message.
pub fn error_for(id: Value, err: &WardenError) -> Value {
    let data = match err {
        WardenError::RateLimited { retry_after_secs } => {
            Some(json!({ "retry_after_secs": retry_after_secs }))
        }
        WardenError::DependencyUnavailable { dependency } => {
            Some(json!({ "dependency": dependency }))
        }
        _ => None,
    };
    error_response(id, err.jsonrpc_code(), &err.user_message(), data)
}

/// A server-initiated notification frame.
pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}
