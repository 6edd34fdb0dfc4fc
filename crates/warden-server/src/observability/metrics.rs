// crates/warden-server/src/observability/metrics.rs
// Prometheus metrics for the Warden server

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global Prometheus handle for metrics rendering
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Active SSE session counter
static ACTIVE_SESSIONS: AtomicU64 = AtomicU64::new(0);

/// Initialize the Prometheus metrics exporter. Call once at startup,
/// before any recording; later calls are no-ops (tests share a process).
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
            info!("Prometheus metrics initialized");
        }
        Err(e) => {
            // A second recorder in the same process (tests) is fine.
            tracing::debug!("Prometheus recorder not installed: {}", e);
        }
    }
}

/// GET /metrics - Prometheus exposition endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Record an HTTP request (RED)
pub fn record_http_request(method: &str, path: &str, status: u16, duration_seconds: f64) {
    counter!(
        "warden_http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("warden_http_request_duration_seconds", "path" => path.to_string())
        .record(duration_seconds);
}

/// Record a tool invocation (RED)
pub fn record_tool_call(tool_name: &str, success: bool, duration_seconds: f64) {
    let status = if success { "success" } else { "error" };
    counter!("warden_tool_calls_total", "tool" => tool_name.to_string(), "status" => status)
        .increment(1);
    histogram!("warden_tool_call_duration_seconds", "tool" => tool_name.to_string())
        .record(duration_seconds);
}

/// Record a validation verdict
pub fn record_validation(tool_name: &str, valid: bool) {
    let verdict = if valid { "allow" } else { "deny" };
    counter!("warden_validations_total", "tool" => tool_name.to_string(), "verdict" => verdict)
        .increment(1);
}

/// Record cache hit/miss
pub fn record_cache_result(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("warden_cache_total", "result" => result).increment(1);
}

/// Record a swallowed cache error
pub fn record_cache_error() {
    counter!("warden_cache_errors_total").increment(1);
}

/// Update a named breaker's state gauge (0=closed, 1=open, 2=half-open)
pub fn set_breaker_state(dependency: &str, state: u8) {
    gauge!("warden_circuitbreaker_state", "dependency" => dependency.to_string())
        .set(state as f64);
}

/// Record a rate-limit rejection
pub fn record_rate_limit_hit(class: &str) {
    counter!("warden_ratelimit_hits_total", "class" => class.to_string()).increment(1);
}

/// Record a fail-open rate-limit decision (Redis unavailable)
pub fn record_ratelimit_degraded() {
    counter!("warden_ratelimit_degraded_total").increment(1);
}

/// Record a pattern evaluation aborted by the per-input deadline
pub fn record_rule_engine_timeout(rule_id: &str) {
    counter!("warden_rule_engine_timeouts_total", "rule" => rule_id.to_string()).increment(1);
}

/// Track SSE session open/close
pub fn session_opened() {
    let count = ACTIVE_SESSIONS.fetch_add(1, Ordering::SeqCst) + 1;
    gauge!("warden_active_sessions").set(count as f64);
}

pub fn session_closed() {
    let count = ACTIVE_SESSIONS.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    gauge!("warden_active_sessions").set(count as f64);
}

/// Record a notification dropped from a full SSE queue
pub fn record_sse_dropped() {
    counter!("warden_sse_dropped_total").increment(1);
}

/// Record audit pipeline activity
pub fn record_audit_emitted() {
    counter!("warden_audit_events_total").increment(1);
}

pub fn record_audit_dropped() {
    counter!("warden_audit_dropped_total").increment(1);
}

/// Record a recovered panic, labeled by where it happened
pub fn record_panic(site: &str) {
    counter!("warden_panics_total", "site" => site.to_string()).increment(1);
}

/// Record a health check probe
pub fn record_health_check(component: &str, healthy: bool, duration_seconds: f64) {
    gauge!("warden_component_healthy", "component" => component.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
    histogram!("warden_health_check_duration_seconds", "component" => component.to_string())
        .record(duration_seconds);
}

/// Helper for timing request handlers
pub struct RequestTimer {
    start: Instant,
    method: String,
    path: String,
}

impl RequestTimer {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    pub fn finish(self, status: u16) {
        record_http_request(
            &self.method,
            &self.path,
            status,
            self.start.elapsed().as_secs_f64(),
        );
    }
}
