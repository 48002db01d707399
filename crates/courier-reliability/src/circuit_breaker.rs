//! Circuit breaker guarding outbound transport calls.
//!
//! ```text
//!            failure_threshold consecutive failures
//!   CLOSED ─────────────────────────────────────────► OPEN
//!     ▲                                                │
//!     │ success_threshold                reset_timeout │
//!     │ consecutive successes                 elapsed  ▼
//!     └──────────────────────────────────────────── HALF-OPEN
//!                  any failure reopens ──────────────► OPEN
//! ```
//!
//! While open, [`CircuitBreaker::allow`] returns `false` without touching the
//! transport. Half-open admits at most `half_open_max_calls` concurrent trials.
//! State transitions happen under one mutex; lifetime counters are atomics.

use courier_core::{CircuitState, PubSubError, PubSubResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker
    pub enabled: bool,
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing
    pub success_threshold: u32,
    /// Time spent open before a trial is allowed
    #[serde(with = "crate::duration")]
    pub reset_timeout: Duration,
    /// Concurrent half-open trials; defaults to `success_threshold`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_open_max_calls: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> PubSubResult<()> {
        if self.failure_threshold == 0 {
            return Err(PubSubError::Config(
                "circuit_breaker.failure_threshold must be greater than 0".into(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(PubSubError::Config(
                "circuit_breaker.success_threshold must be greater than 0".into(),
            ));
        }
        if self.half_open_max_calls == Some(0) {
            return Err(PubSubError::Config(
                "circuit_breaker.half_open_max_calls must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    fn max_trials(&self) -> u32 {
        self.half_open_max_calls.unwrap_or(self.success_threshold)
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_inflight: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_inflight: 0,
            opened_at: None,
            last_failure_time: None,
        }
    }
}

/// Point-in-time circuit breaker statistics
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    /// Time since the last recorded failure
    #[serde(skip)]
    pub since_last_failure: Option<Duration>,
}

/// Circuit breaker owned by one driver instance
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a circuit breaker; `name` identifies the guarded driver
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit or reject one outbound call
    pub fn allow(&self) -> bool {
        self.try_allow().is_ok()
    }

    /// Like [`allow`](Self::allow), failing with `PubSubError::CircuitOpen`
    pub fn check(&self) -> PubSubResult<()> {
        self.try_allow()
            .map_err(|retry_after| PubSubError::CircuitOpen {
                driver: self.name.clone(),
                retry_after,
            })
    }

    fn try_allow(&self) -> Result<(), Duration> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut inner = self.lock();
        let verdict = match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    info!(
                        driver = %self.name,
                        "Circuit breaker transitioning to half-open"
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_inflight = 1;
                    Ok(())
                } else {
                    let remaining = self.config.reset_timeout - elapsed;
                    debug!(
                        driver = %self.name,
                        remaining_ms = remaining.as_millis() as u64,
                        "Circuit breaker is open, rejecting call"
                    );
                    Err(remaining)
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_inflight < self.config.max_trials() {
                    inner.half_open_inflight += 1;
                    Ok(())
                } else {
                    Err(Duration::ZERO)
                }
            }
        };
        drop(inner);

        match verdict {
            Ok(()) => self.total_calls.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.total_rejections.fetch_add(1, Ordering::Relaxed),
        };
        verdict
    }

    /// Record a successful call
    pub fn on_success(&self) {
        if !self.config.enabled {
            return;
        }

        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    info!(
                        driver = %self.name,
                        successes = inner.half_open_successes,
                        "Circuit breaker closing after successful trials"
                    );
                    let last_failure_time = inner.last_failure_time;
                    *inner = Inner {
                        last_failure_time,
                        ..Inner::new()
                    };
                }
            }
            // A call admitted before the circuit reopened
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        if !self.config.enabled {
            return;
        }

        let mut inner = self.lock();
        let now = Instant::now();
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        driver = %self.name,
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                        "Circuit breaker opening due to failures"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    driver = %self.name,
                    "Circuit breaker trial failed, reopening"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.half_open_successes = 0;
                inner.half_open_inflight = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Give back an admitted call that never reached the transport
    pub fn on_abandoned(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
        }
    }

    /// Current state; an expired open circuit still reports `Open` until the next call
    pub fn state(&self) -> CircuitState {
        if !self.config.enabled {
            return CircuitState::Closed;
        }
        self.lock().state
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.lock();
        CircuitStats {
            state: if self.config.enabled {
                inner.state
            } else {
                CircuitState::Closed
            },
            consecutive_failures: inner.consecutive_failures,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            since_last_failure: inner.last_failure_time.map(|t| t.elapsed()),
        }
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        *self.lock() = Inner::new();
        info!(driver = %self.name, "Circuit breaker manually reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, successes: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: failures,
                success_threshold: successes,
                reset_timeout: timeout,
                ..CircuitBreakerConfig::default()
            },
        )
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = breaker(3, 1, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let cb = breaker(3, 1, Duration::from_secs(30));
        for _ in 0..2 {
            cb.on_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());

        let err = cb.check().unwrap_err();
        assert_eq!(err.code(), "PUBSUB_CIRCUIT_OPEN");
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 1, Duration::from_secs(30));
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let cb = breaker(1, 2, Duration::from_millis(20));
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.allow());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, 2, Duration::from_millis(20));
        cb.on_failure();
        std::thread::sleep(Duration::from_millis(40));

        assert!(cb.allow());
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn test_half_open_bounds_concurrent_trials() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 3,
                reset_timeout: Duration::from_millis(10),
                half_open_max_calls: Some(1),
                ..CircuitBreakerConfig::default()
            },
        );
        cb.on_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(cb.allow());
        assert!(!cb.allow());
        cb.on_success();
        assert!(cb.allow());
        cb.on_abandoned();
        assert!(cb.allow());
    }

    #[test]
    fn test_disabled_always_allows() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                enabled: false,
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
        );
        cb.on_failure();
        cb.on_failure();
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stats_and_reset() {
        let cb = breaker(2, 1, Duration::from_secs(30));
        assert!(cb.allow());
        cb.on_failure();
        assert!(cb.allow());
        cb.on_failure();
        assert!(!cb.allow());

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.total_failures, 2);
        assert_eq!(stats.total_rejections, 1);
        assert!(stats.since_last_failure.is_some());

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let cfg = CircuitBreakerConfig {
            failure_threshold: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
