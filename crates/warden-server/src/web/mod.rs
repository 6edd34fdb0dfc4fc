// crates/warden-server/src/web/mod.rs
// HTTP assembly: the MCP router and the management router. Middleware
// order matters: request-id/correlation-id, panic recovery, metrics,
// access log, security headers, auth, rate limit, body limit, timeout,
// handler.

pub mod health;
pub mod middleware;
pub mod state;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

use crate::error::WardenError;
use crate::mcp;
use crate::observability::metrics;

/// Maximum accepted request body (file edits can be large, but bounded).
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Uniform HTTP error shape: `{error, code}` plus `Retry-After` where it
/// applies.
pub fn error_response(err: &WardenError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({ "error": err.user_message(), "code": err.kind() });
    let mut response = (status, axum::Json(body)).into_response();
    if let WardenError::RateLimited { retry_after_secs } = err
        && let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string())
    {
        response.headers_mut().insert("retry-after", value);
    }
    response
}

/// Router served on `mcp_port`: the SSE stream and the message endpoint.
pub fn mcp_router(state: AppState) -> Router {
    // The SSE route is exempt from the request timeout (it is long-lived
    // by design); the message endpoint gets the full chain.
    let message = Router::new()
        .route("/mcp/v1/message", post(mcp::message_handler))
        .route_layer(TimeoutLayer::new(state.config.request_timeout));

    Router::new()
        .route("/mcp/v1/sse", get(mcp::sse_handler))
        .merge(message)
        .fallback(middleware::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_context))
                .layer(CatchPanicLayer::custom(middleware::panic_response))
                .layer(axum::middleware::from_fn(middleware::http_metrics))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::security_headers))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::auth,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::rate_limit,
                ))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

/// Router served on `web_port`: health, metrics, version. CORS is open:
/// everything here is read-only and consumed by browser dashboards.
pub fn web_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/version", get(health::version))
        .fallback(middleware::not_found)
        .layer(cors)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_context))
                .layer(CatchPanicLayer::custom(middleware::panic_response))
                .layer(axum::middleware::from_fn(middleware::http_metrics))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::security_headers))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::auth,
                ))
                .layer(TimeoutLayer::new(state.config.request_timeout)),
        )
        .with_state(state)
}
