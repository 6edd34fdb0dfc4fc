// crates/warden-server/src/resilience/breaker.rs
// Circuit breaker: closed -> open -> half-open -> closed

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::config::BreakerConfig;
use crate::error::{Result, WardenError};
use crate::observability::metrics;

/// Cap on the exponential open duration.
const MAX_OPEN: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

/// A permit to attempt one call. `probe` marks the single half-open probe.
pub struct Permit {
    pub(crate) probe: bool,
}

/// Named circuit breaker guarding one external dependency.
///
/// State transitions are atomic; the half-open probe is admitted through a
/// compare-and-swap so exactly one caller probes at a time.
pub struct CircuitBreaker {
    name: &'static str,
    trip_threshold: u32,
    base_open: Duration,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Epoch millis when an open breaker admits its next probe.
    open_until_ms: AtomicU64,
    /// Consecutive opens; drives the exponential open duration.
    open_streak: AtomicU32,
    probe_inflight: AtomicBool,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: &BreakerConfig) -> Self {
        let breaker = Self {
            name,
            trip_threshold: config.trip_threshold.max(1),
            base_open: config.open_duration,
            state: AtomicU8::new(BreakerState::Closed.as_u8()),
            consecutive_failures: AtomicU32::new(0),
            open_until_ms: AtomicU64::new(0),
            open_streak: AtomicU32::new(0),
            probe_inflight: AtomicBool::new(false),
        };
        metrics::set_breaker_state(name, BreakerState::Closed.as_u8());
        breaker
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Try to admit a call. Returns `dependency_unavailable` while open.
    pub fn try_acquire(&self) -> Result<Permit> {
        match self.state() {
            BreakerState::Closed => Ok(Permit { probe: false }),
            BreakerState::Open => {
                if now_ms() < self.open_until_ms.load(Ordering::Acquire) {
                    return Err(WardenError::DependencyUnavailable {
                        dependency: self.name,
                    });
                }
                // Timer elapsed: move to half-open and race for the probe.
                self.transition(BreakerState::HalfOpen);
                self.admit_probe()
            }
            BreakerState::HalfOpen => self.admit_probe(),
        }
    }

    fn admit_probe(&self) -> Result<Permit> {
        if self
            .probe_inflight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Ok(Permit { probe: true })
        } else {
            Err(WardenError::DependencyUnavailable {
                dependency: self.name,
            })
        }
    }

    /// Record the outcome of an admitted call.
    pub fn record(&self, permit: Permit, outcome_ok: bool) {
        if permit.probe {
            self.probe_inflight.store(false, Ordering::Release);
        }
        if outcome_ok {
            self.on_success()
        } else {
            self.on_failure()
        }
    }

    fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        let prev = self.state();
        if prev != BreakerState::Closed {
            self.open_streak.store(0, Ordering::Release);
            self.transition(BreakerState::Closed);
            tracing::info!(breaker = self.name, "circuit closed");
        }
    }

    fn on_failure(&self) {
        match self.state() {
            BreakerState::HalfOpen => {
                // Failed probe re-opens and extends the timer.
                self.open();
            }
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.trip_threshold {
                    self.open();
                }
            }
            BreakerState::Open => {}
        }
    }

    fn open(&self) {
        let streak = self.open_streak.fetch_add(1, Ordering::AcqRel);
        let backoff = self
            .base_open
            .saturating_mul(1u32 << streak.min(10))
            .min(MAX_OPEN);
        // Jitter up to 25% keeps clustered probes apart.
        let jitter_ms = rand::rng().random_range(0..=backoff.as_millis() as u64 / 4);
        let open_for = backoff + Duration::from_millis(jitter_ms);

        self.open_until_ms
            .store(now_ms() + open_for.as_millis() as u64, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.transition(BreakerState::Open);
        tracing::warn!(
            breaker = self.name,
            open_for_ms = open_for.as_millis() as u64,
            "circuit opened"
        );
    }

    fn transition(&self, to: BreakerState) {
        self.state.store(to.as_u8(), Ordering::Release);
        metrics::set_breaker_state(self.name, to.as_u8());
    }
}
