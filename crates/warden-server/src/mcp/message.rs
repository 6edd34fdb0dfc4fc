// crates/warden-server/src/mcp/message.rs
// POST /mcp/v1/message - accepts one JSON-RPC message for a session.
// Always 202 on acceptance; the response arrives on the SSE stream.

use axum::Extension;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::Value;

use super::jsonrpc;
use crate::auth::Principal;
use crate::error::WardenError;
use crate::session::{InboundMessage, RequestMeta};
use crate::web::middleware::RequestIds;
use crate::web::state::AppState;
use crate::web::{self};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub session_id: String,
}

pub async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    Extension(principal): Extension<Principal>,
    Extension(ids): Extension<RequestIds>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if state.shutdown.is_cancelled() {
        return web::error_response(&WardenError::DependencyUnavailable {
            dependency: "server shutting down",
        });
    }

    let Some(session) = state.sessions.get(&query.session_id) else {
        return web::error_response(&WardenError::NotFound(format!(
            "no session {:?}",
            query.session_id
        )));
    };
    session.touch();

    let meta = RequestMeta {
        request_id: ids.request_id.clone(),
        correlation_id: ids.correlation_id.clone(),
        client_ip: client_ip(&headers),
        actor: principal.actor.clone(),
    };

    let payload: Value = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            // The stream exists, so even a parse error is delivered there,
            // with a null id per JSON-RPC 2.0.
            let error = jsonrpc::error_response(
                Value::Null,
                jsonrpc::PARSE_ERROR,
                &format!("parse error: {e}"),
                None,
            );
            let _ = session.outbound.push_response(error);
            return StatusCode::ACCEPTED.into_response();
        }
    };

    match session.inbound.try_send(InboundMessage { payload, meta }) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
            web::error_response(&WardenError::DependencyUnavailable {
                dependency: "session dispatch queue",
            })
        }
        Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
            web::error_response(&WardenError::NotFound(format!(
                "session {:?} is closed",
                query.session_id
            )))
        }
    }
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
