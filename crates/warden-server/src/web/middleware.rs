// crates/warden-server/src/web/middleware.rs
// Request middleware: ids, panic recovery, metrics, security headers,
// auth, rate limiting. Assembly order lives in web::mcp_router/web_router.

use std::any::Any;

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use super::state::AppState;
use crate::auth::{LimitClass, PrincipalClass};
use crate::error::WardenError;
use crate::observability::metrics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Request-scoped identifiers, generated or propagated, echoed on the
/// response and carried into audit events.
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub correlation_id: String,
}

/// Paths that skip authentication.
fn is_public(path: &str) -> bool {
    path.starts_with("/health/") || path == "/metrics" || path == "/version"
}

/// request-id + correlation-id assignment and echo.
pub async fn request_context(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let correlation_id = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ids = RequestIds {
        request_id: request_id.clone(),
        correlation_id: correlation_id.clone(),
    };
    req.extensions_mut().insert(ids);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

/// HTTP RED metrics, labeled by the matched route (not the raw path, so
/// cardinality stays bounded).
pub async fn http_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let timer = metrics::RequestTimer::new(&method, &path);
    let response = next.run(req).await;
    timer.finish(response.status().as_u16());
    response
}

/// Security headers on every response.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    response
}

/// Bearer authentication. Public paths pass through without a principal.
pub async fn auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if is_public(req.uri().path()) {
        return next.run(req).await;
    }

    let credential = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(credential) = credential else {
        return super::error_response(&WardenError::Unauthorized(
            "missing Authorization: Bearer header".into(),
        ));
    };

    match state.auth.verify_bearer(credential) {
        Ok(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(e) => super::error_response(&e),
    }
}

/// Per-key rate limiting, keyed by the authenticated actor hash.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(principal) = req.extensions().get::<crate::auth::Principal>().cloned() else {
        // Public path: no principal, no budget.
        return next.run(req).await;
    };

    let class = match principal.class {
        PrincipalClass::Mcp => LimitClass::Mcp,
        PrincipalClass::Ide => LimitClass::Ide,
    };
    let decision = state.limiter.check(class, &principal.actor).await;
    if !decision.allowed {
        return super::error_response(&WardenError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }
    next.run(req).await
}

/// Panic recovery: JSON 500, `warden_panics_total`, process survives.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    metrics::record_panic("http_handler");
    tracing::error!("handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(json!({ "error": "internal error", "code": "internal" })),
    )
        .into_response()
}

/// 404 fallback in the same error shape as everything else.
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({ "error": "not found", "code": "not_found" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        assert!(is_public("/health/live"));
        assert!(is_public("/health/ready"));
        assert!(is_public("/metrics"));
        assert!(is_public("/version"));
        assert!(!is_public("/mcp/v1/sse"));
        assert!(!is_public("/mcp/v1/message"));
    }
}
