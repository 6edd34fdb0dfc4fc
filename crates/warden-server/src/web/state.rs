// crates/warden-server/src/web/state.rs
// Shared application state, constructed once at startup and passed
// explicitly - no globals.

use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::auth::{Authenticator, RateLimiter};
use crate::cache::CacheHandle;
use crate::config::Config;
use crate::engine::ValidationEngine;
use crate::observability::AuditHandle;
use crate::resilience::Resilience;
use crate::rules::RuleCatalog;
use crate::session::SessionManager;
use crate::stores::Stores;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub engine: Arc<ValidationEngine>,
    pub catalog: Arc<RuleCatalog>,
    pub sessions: Arc<SessionManager>,
    pub auth: Arc<Authenticator>,
    pub limiter: Arc<RateLimiter>,
    pub audit: AuditHandle,
    pub resilience: Resilience,
    pub cache: CacheHandle,
    /// Cancelled when graceful shutdown begins.
    pub shutdown: CancellationToken,
    /// Present when backed by PostgreSQL; `None` in ephemeral mode.
    pub db_pool: Option<PgPool>,
    pub started_at: Instant,
}

impl AppState {
    /// Absolute URL of the message endpoint for a session, advertised in
    /// the SSE `endpoint` event.
    pub fn message_endpoint(&self, session_id: &str) -> String {
        format!(
            "{}/mcp/v1/message?session_id={}",
            self.config.mcp_public_url.trim_end_matches('/'),
            session_id
        )
    }
}
