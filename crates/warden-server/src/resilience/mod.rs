// crates/warden-server/src/resilience/mod.rs
// Circuit breaker + retry wrappers around external dependencies

pub mod breaker;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use breaker::{BreakerState, CircuitBreaker};
pub use retry::RetryPolicy;

use crate::config::{BreakerConfig, Config};
use crate::error::{Result, WardenError};

/// Breaker + retry + per-call deadline for one named dependency.
///
/// Reads retry inside the breaker (the breaker admits once and judges the
/// overall outcome); writes run a single attempt. Every attempt is bounded
/// by `call_timeout`, which sits below the tool-handler and HTTP deadlines
/// in the timeout hierarchy.
pub struct DependencyGuard {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl DependencyGuard {
    pub fn new(name: &'static str, config: &BreakerConfig, call_timeout: Duration) -> Self {
        Self {
            breaker: CircuitBreaker::new(name, config),
            retry: RetryPolicy::default(),
            call_timeout,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn name(&self) -> &'static str {
        self.breaker.name()
    }

    async fn attempt<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(WardenError::Timeout(format!(
                "{} call exceeded {:?}",
                self.breaker.name(),
                self.call_timeout
            ))),
        }
    }

    /// Idempotent read: retried with backoff inside one breaker admission.
    pub async fn read<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.breaker.try_acquire()?;
        let result = self.retry.run(cancel, || self.attempt(op())).await;
        self.judge(permit, result)
    }

    /// Write: single attempt, never retried automatically.
    pub async fn write<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.breaker.try_acquire()?;
        let result = self.attempt(fut).await;
        self.judge(permit, result)
    }

    fn judge<T>(&self, permit: breaker::Permit, result: Result<T>) -> Result<T> {
        let dependency_ok = match &result {
            Ok(_) => true,
            // Logical errors (not found, invalid input) mean the
            // dependency answered; they must not trip the breaker.
            Err(e) => !e.is_dependency_failure(),
        };
        self.breaker.record(permit, dependency_ok);
        result
    }
}

/// The fabric handed to everything that touches PostgreSQL or Redis.
#[derive(Clone)]
pub struct Resilience {
    pub db: Arc<DependencyGuard>,
    pub redis: Arc<DependencyGuard>,
}

impl Resilience {
    pub fn new(config: &Config) -> Self {
        Self {
            db: Arc::new(DependencyGuard::new(
                "database",
                &config.breaker,
                config.request_timeout,
            )),
            redis: Arc::new(DependencyGuard::new(
                "redis",
                &config.breaker,
                // Redis calls are small; a stuck connection should fail
                // well before the request deadline.
                Duration::from_secs(2),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn guard(threshold: u32) -> DependencyGuard {
        DependencyGuard::new(
            "database",
            &BreakerConfig {
                trip_threshold: threshold,
                open_duration: Duration::from_millis(50),
                half_open_probes: 1,
            },
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_read_retries_then_succeeds() {
        let g = guard(5);
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = g
            .read(&cancel, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(WardenError::Timeout("flap".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(g.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_failed_reads() {
        let g = guard(2);
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let _: Result<()> = g
                .read(&cancel, || async { Err(WardenError::Timeout("down".into())) })
                .await;
        }
        assert_eq!(g.state(), BreakerState::Open);

        let err = g
            .read(&cancel, || async { Ok(1) })
            .await
            .expect_err("open breaker rejects");
        assert_eq!(err.kind(), "dependency_unavailable");
    }

    #[tokio::test]
    async fn test_logical_error_does_not_trip() {
        let g = guard(1);
        let cancel = CancellationToken::new();
        let _: Result<()> = g
            .read(&cancel, || async { Err(WardenError::NotFound("row".into())) })
            .await;
        assert_eq!(g.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_write_not_retried() {
        let g = guard(10);
        let calls = AtomicU32::new(0);

        let _: Result<()> = g
            .write(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(WardenError::Timeout("down".into()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_timeout_maps_to_timeout_error() {
        let g = DependencyGuard::new(
            "database",
            &BreakerConfig::default(),
            Duration::from_millis(10),
        );
        let err = g
            .write(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .expect_err("times out");
        assert_eq!(err.kind(), "timeout");
    }
}
