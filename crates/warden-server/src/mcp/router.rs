// crates/warden-server/src/mcp/router.rs
// JSON-RPC method dispatch for one session

use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Value, json};

use super::{jsonrpc, resources, tools};
use crate::auth::LimitClass;
use crate::error::WardenError;
use crate::observability::metrics;
use crate::session::{InboundMessage, RequestMeta, Session};
use crate::web::state::AppState;

/// Protocol revision implemented by this transport (HTTP+SSE framing).
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Handle one inbound message. Returns the response to enqueue, or `None`
/// for notifications.
pub async fn handle(
    state: &AppState,
    session: &Arc<Session>,
    message: InboundMessage,
) -> Option<Value> {
    let InboundMessage { payload, meta } = message;
    let request = match jsonrpc::JsonRpcRequest::parse(payload) {
        Ok(request) => request,
        Err((code, why)) => {
            return Some(jsonrpc::error_response(Value::Null, code, &why, None));
        }
    };

    if request.is_notification() {
        // notifications/initialized and friends: accept silently.
        tracing::debug!(method = %request.method, "notification received");
        return None;
    }
    let id = request.id.clone().unwrap_or(Value::Null);

    // Panics inside a handler are recovered: the session survives, the
    // caller gets an internal error.
    let handled = std::panic::AssertUnwindSafe(dispatch(state, session, &request, &meta))
        .catch_unwind()
        .await;
    match handled {
        Ok(response) => Some(response),
        Err(_) => {
            metrics::record_panic("mcp_dispatch");
            tracing::error!(method = %request.method, "handler panicked");
            Some(jsonrpc::error_response(
                id,
                jsonrpc::INTERNAL_ERROR,
                "internal error",
                None,
            ))
        }
    }
}

async fn dispatch(
    state: &AppState,
    session: &Arc<Session>,
    request: &jsonrpc::JsonRpcRequest,
    meta: &RequestMeta,
) -> Value {
    let id = request.id.clone().unwrap_or(Value::Null);
    let started = std::time::Instant::now();

    let result = match request.method.as_str() {
        "initialize" => Ok(initialize_result(state)),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": tools::definitions() })),
        "tools/call" => call_tool(state, session, request, meta).await,
        "resources/list" => Ok(resources::list()),
        "resources/read" => {
            let uri = request.params.get("uri").and_then(Value::as_str);
            match uri {
                Some(uri) => resources::read(state, session, uri).await,
                None => Err(WardenError::InvalidInput("missing params.uri".into())),
            }
        }
        other => {
            return jsonrpc::error_response(
                id,
                jsonrpc::METHOD_NOT_FOUND,
                &format!("method not found: {other}"),
                None,
            );
        }
    };

    if request.method == "tools/call" {
        let tool = request
            .params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        metrics::record_tool_call(tool, result.is_ok(), started.elapsed().as_secs_f64());
        if let Ok(value) = &result
            && let Some(valid) = value.pointer("/structuredContent/valid").and_then(Value::as_bool)
        {
            metrics::record_validation(tool, valid);
        }
    }

    match result {
        Ok(result) => jsonrpc::response(id, result),
        Err(e) => {
            if e.kind() == "internal" {
                tracing::error!(method = %request.method, "handler error: {}", e);
            }
            jsonrpc::error_for(id, &e)
        }
    }
}

fn initialize_result(state: &AppState) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "subscribe": false, "listChanged": false },
        },
        "serverInfo": {
            "name": "warden",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": format!(
            "Warden validates agent actions against per-project guardrails. \
             Start with guardrail_init_session, then validate bash commands, \
             file edits and git operations before performing them. \
             Session TTL is {:?}.",
            state.config.session_ttl
        ),
    })
}

async fn call_tool(
    state: &AppState,
    session: &Arc<Session>,
    request: &jsonrpc::JsonRpcRequest,
    meta: &RequestMeta,
) -> Result<Value, WardenError> {
    // Per-session budget, on top of the per-key budget the HTTP layer
    // already enforced.
    let decision = state.limiter.check(LimitClass::Session, &session.id).await;
    if !decision.allowed {
        return Err(WardenError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let name = request
        .params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| WardenError::InvalidInput("missing params.name".into()))?;
    let arguments = request
        .params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    tools::call(state, session, meta, name, arguments).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_is_sse_revision() {
        assert_eq!(PROTOCOL_VERSION, "2024-11-05");
    }
}
