// crates/warden-server/src/web/health.rs
// Liveness, readiness, and build info

use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use super::state::AppState;
use crate::db;
use crate::observability::metrics;
use crate::resilience::BreakerState;

/// Budget for each readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// GET /health/live - process is up, no dependency checks.
pub async fn live() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug)]
struct Component {
    name: &'static str,
    healthy: bool,
    detail: String,
}

impl Component {
    fn json(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "status": if self.healthy { "healthy" } else { "unhealthy" },
            "detail": self.detail,
        })
    }
}

/// GET /health/ready - checks database and cache, with a component
/// breakdown. Any unhealthy component means 503.
pub async fn ready(State(state): State<AppState>) -> Response {
    let database = check_database(&state).await;
    let cache = check_cache(&state).await;

    let components = [database, cache];
    let all_healthy = components.iter().all(|c| c.healthy);
    let body = json!({
        "status": if all_healthy { "ready" } else { "unavailable" },
        "components": components.iter().map(Component::json).collect::<Vec<_>>(),
    });

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn check_database(state: &AppState) -> Component {
    let started = Instant::now();
    let component = match (&state.db_pool, state.resilience.db.state()) {
        (_, BreakerState::Open) => Component {
            name: "database",
            healthy: false,
            detail: "circuit open".into(),
        },
        (None, _) => Component {
            name: "database",
            healthy: true,
            detail: "ephemeral (in-memory stores)".into(),
        },
        (Some(pool), _) => match tokio::time::timeout(PROBE_TIMEOUT, db::ping(pool)).await {
            Ok(Ok(())) => Component {
                name: "database",
                healthy: true,
                detail: "ok".into(),
            },
            Ok(Err(e)) => Component {
                name: "database",
                healthy: false,
                detail: e.user_message(),
            },
            Err(_) => Component {
                name: "database",
                healthy: false,
                detail: format!("ping exceeded {PROBE_TIMEOUT:?}"),
            },
        },
    };
    metrics::record_health_check(
        component.name,
        component.healthy,
        started.elapsed().as_secs_f64(),
    );
    component
}

async fn check_cache(state: &AppState) -> Component {
    let started = Instant::now();
    let component = if !state.cache.is_enabled() {
        Component {
            name: "cache",
            healthy: true,
            detail: "disabled".into(),
        }
    } else if state.resilience.redis.state() == BreakerState::Open {
        Component {
            name: "cache",
            healthy: false,
            detail: "circuit open".into(),
        }
    } else {
        // Round-trip a probe key; CacheHandle swallows errors into None.
        let probe_key = "health:probe";
        state
            .cache
            .set(probe_key, "ok", Duration::from_secs(10))
            .await;
        match state.cache.get(probe_key).await.as_deref() {
            Some("ok") => Component {
                name: "cache",
                healthy: true,
                detail: "ok".into(),
            },
            _ => Component {
                name: "cache",
                healthy: false,
                detail: "probe round-trip failed".into(),
            },
        }
    };
    metrics::record_health_check(
        component.name,
        component.healthy,
        started.elapsed().as_secs_f64(),
    );
    component
}

/// GET /version - build info.
pub async fn version(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "name": "warden",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("WARDEN_BUILD_SHA").unwrap_or("unknown"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
