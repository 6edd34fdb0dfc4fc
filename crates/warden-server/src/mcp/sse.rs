// crates/warden-server/src/mcp/sse.rs
// GET /mcp/v1/sse - the long-lived stream carrying JSON-RPC responses.
//
// One writer per session: this stream is the only thing that touches the
// response body, fed by the session's bounded outbound queue. Request
// handlers never write to the body directly.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Extension;
use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;

use super::router;
use crate::auth::Principal;
use crate::observability::metrics;
use crate::session::{InboundMessage, OutboundFrame, PushError, Session};
use crate::web;
use crate::web::state::AppState;

/// Tears the session down when the stream is dropped: client disconnect,
/// write error, or normal end all converge here.
struct SessionGuard {
    state: AppState,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let session_id = std::mem::take(&mut self.session_id);
        tokio::spawn(async move {
            state
                .sessions
                .teardown(&session_id, &state.stores, &state.cache)
                .await;
        });
    }
}

pub async fn sse_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Response {
    if state.shutdown.is_cancelled() || !state.sessions.is_accepting() {
        return web::error_response(&crate::error::WardenError::DependencyUnavailable {
            dependency: "server shutting down",
        });
    }

    let (session, inbound_rx) = match state.sessions.create(&principal.actor) {
        Ok(created) => created,
        Err(e) => return web::error_response(&e),
    };
    tracing::info!(session_id = %session.id, actor = %principal.actor, "SSE session opened");
    spawn_dispatcher(state.clone(), session.clone(), inbound_rx);

    let endpoint = state.message_endpoint(&session.id);
    let heartbeat = state.config.heartbeat_interval;
    let shutdown = state.shutdown.clone();
    let session_cancel = session.cancel.clone();
    let outbound = session.outbound.clone();
    let guard = SessionGuard {
        state: state.clone(),
        session_id: session.id.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;

        // Bootstrap: where to POST, then an immediate ping so proxies see
        // traffic before the first real message.
        yield Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint));
        yield Ok(Event::default().event("ping").data("{}"));

        let start = tokio::time::Instant::now() + heartbeat;
        let mut ticker = tokio::time::interval_at(start, heartbeat);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    yield Ok(Event::default().event("shutdown").data("{}"));
                    break;
                }
                _ = session_cancel.cancelled() => break,
                frame = outbound.pop() => match frame {
                    Some(frame) => {
                        let payload = match &frame {
                            OutboundFrame::Response(v) | OutboundFrame::Notification(v) => v,
                        };
                        match serde_json::to_string(payload) {
                            Ok(data) => yield Ok(Event::default().event("message").data(data)),
                            Err(e) => tracing::error!("unserializable frame: {}", e),
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    yield Ok(Event::default().event("ping").data("{}"));
                }
            }
        }
    };

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", header::HeaderValue::from_static("no"));
    response
}

/// The session's single dispatcher: consumes accepted messages in arrival
/// order, runs the router, enqueues responses. Sequential consumption is
/// what guarantees per-session response ordering.
pub fn spawn_dispatcher(
    state: AppState,
    session: Arc<Session>,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => break,
                message = inbound_rx.recv() => {
                    let Some(message) = message else { break };
                    let Some(response) = router::handle(&state, &session, message).await else {
                        continue;
                    };
                    match session.outbound.push_response(response) {
                        Ok(()) => {}
                        Err(PushError::Full) => {
                            // A queue full of undroppable responses means the
                            // client stopped reading; close the session.
                            metrics::record_sse_dropped();
                            tracing::warn!(
                                session_id = %session.id,
                                "outbound queue full of responses; closing session"
                            );
                            state
                                .sessions
                                .teardown(&session.id, &state.stores, &state.cache)
                                .await;
                            break;
                        }
                        Err(PushError::Closed) => break,
                    }
                }
            }
        }
    });
}
