// crates/warden-server/src/auth/rate_limit.rs
// Per-key budgets over Redis INCR+EXPIRE. Fails open, observably, when
// Redis is unreachable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use crate::config::RateLimitConfig;
use crate::error::Result;
use crate::observability::metrics;
use crate::resilience::Resilience;

/// Which budget applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    Mcp,
    Ide,
    Session,
}

impl LimitClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Mcp => "mcp",
            LimitClass::Ide => "ide",
            LimitClass::Session => "session",
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the window resets (for `Retry-After`).
    pub retry_after_secs: u64,
    /// True when Redis was unavailable and the check failed open.
    pub degraded: bool,
}

/// Counter backend: one atomic increment returning the post-increment
/// count and the window's remaining TTL.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<(u64, u64)>;
}

pub struct RedisCounter {
    conn: ConnectionManager,
}

impl RedisCounter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CounterBackend for RedisCounter {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<(u64, u64)> {
        let mut conn = self.conn.clone();
        // INCR, set the expiry on first touch, read remaining TTL - one
        // round trip via pipeline.
        let (count, ttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window.as_secs().max(1))
            .arg("NX")
            .ignore()
            .cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok((count, ttl.max(0) as u64))
    }
}

/// In-process counter for tests and Redis-less deployments.
#[derive(Default)]
pub struct MemoryCounter {
    windows: std::sync::Mutex<std::collections::HashMap<String, (u64, std::time::Instant)>>,
}

#[async_trait]
impl CounterBackend for MemoryCounter {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<(u64, u64)> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let now = std::time::Instant::now();
        let entry = windows.entry(key.to_string()).or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok((entry.0, entry.1.saturating_duration_since(now).as_secs()))
    }
}

/// Token-bucket-style limiter: fixed windows with a burst allowance
/// (`burst_factor` × budget), the documented sliding-window approximation.
pub struct RateLimiter {
    backend: Arc<dyn CounterBackend>,
    resilience: Resilience,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(
        backend: Arc<dyn CounterBackend>,
        resilience: Resilience,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            backend,
            resilience,
            config,
        }
    }

    fn budget(&self, class: LimitClass) -> u64 {
        let base = match class {
            LimitClass::Mcp => self.config.mcp,
            LimitClass::Ide => self.config.ide,
            LimitClass::Session => self.config.session,
        } as f64;
        (base * self.config.burst_factor.max(1.0)).ceil() as u64
    }

    /// Check and consume one token for `key` under the class budget.
    pub async fn check(&self, class: LimitClass, key: &str) -> RateDecision {
        let window_key = format!("ratelimit:{}:{}", class.as_str(), key);
        let window = self.config.window;
        let backend = self.backend.clone();
        let cancel = CancellationToken::new();

        let outcome = self
            .resilience
            .redis
            .read(&cancel, || {
                let backend = backend.clone();
                let key = window_key.clone();
                async move { backend.incr_window(&key, window).await }
            })
            .await;

        match outcome {
            Ok((count, ttl)) => {
                let allowed = count <= self.budget(class);
                if !allowed {
                    metrics::record_rate_limit_hit(class.as_str());
                }
                RateDecision {
                    allowed,
                    retry_after_secs: if allowed { 0 } else { ttl.max(1) },
                    degraded: false,
                }
            }
            Err(e) => {
                // Redis down or breaker open: fail open but make the
                // degradation observable.
                metrics::record_ratelimit_degraded();
                tracing::warn!(class = class.as_str(), "rate limiting degraded: {}", e);
                RateDecision {
                    allowed: true,
                    retry_after_secs: 0,
                    degraded: true,
                }
            }
        }
    }
}
