//! # Rate Limiting
//!
//! Per-driver limits on outbound publishes. Three strategies are available:
//!
//! - [`RateLimitStrategy::SlidingWindow`] keeps the timestamps of accepted
//!   operations in the trailing window. Exact, memory grows with the limit.
//! - [`RateLimitStrategy::FixedWindow`] keeps one counter reset at window
//!   boundaries. O(1) memory, but up to twice the limit can pass around a
//!   boundary.
//! - [`RateLimitStrategy::TokenBucket`] uses GCRA from `governor`, spreading
//!   the allowance evenly with a burst equal to the limit.
//!
//! A rejection is always an error carrying `retry_after`, never a silent drop.

use courier_core::{PubSubError, PubSubResult};
use governor::{
    Quota, RateLimiter as GovernorLimiter,
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// GCRA limiter shared by all callers of one driver
type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    #[default]
    SlidingWindow,
    FixedWindow,
    TokenBucket,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Accepted operations per window
    pub max_requests_per_window: u32,
    /// Window length
    #[serde(with = "crate::duration")]
    pub window: Duration,
    pub strategy: RateLimitStrategy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests_per_window: 1000,
            window: Duration::from_secs(1),
            strategy: RateLimitStrategy::SlidingWindow,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> PubSubResult<()> {
        if self.max_requests_per_window == 0 {
            return Err(PubSubError::Config(
                "rate_limit.max_requests_per_window must be greater than 0".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(PubSubError::Config(
                "rate_limit.window must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct FixedWindow {
    started: Instant,
    count: u32,
}

enum LimiterState {
    Sliding(Mutex<VecDeque<Instant>>),
    Fixed(Mutex<FixedWindow>),
    Bucket(DirectLimiter),
}

/// Rate limiter statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Rate limiter owned by one driver instance
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    strategy: RateLimitStrategy,
    state: LimiterState,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RateLimiter {
    /// Create a rate limiter from configuration
    ///
    /// # Errors
    ///
    /// Returns `PubSubError::Config` for a zero limit or zero window
    pub fn new(config: &RateLimitConfig) -> PubSubResult<Self> {
        config.validate()?;
        let limit = config.max_requests_per_window;
        let window = config.window;

        let state = match config.strategy {
            RateLimitStrategy::SlidingWindow => {
                LimiterState::Sliding(Mutex::new(VecDeque::with_capacity(limit.min(1024) as usize)))
            }
            RateLimitStrategy::FixedWindow => LimiterState::Fixed(Mutex::new(FixedWindow {
                started: Instant::now(),
                count: 0,
            })),
            RateLimitStrategy::TokenBucket => {
                let burst = NonZeroU32::new(limit).ok_or_else(|| {
                    PubSubError::Config("rate limit must be non-zero".into())
                })?;
                let period = (window / limit).max(Duration::from_nanos(1));
                let quota = Quota::with_period(period)
                    .ok_or_else(|| PubSubError::Config("rate limit period is zero".into()))?
                    .allow_burst(burst);
                LimiterState::Bucket(GovernorLimiter::direct(quota))
            }
        };

        Ok(Self {
            limit,
            window,
            strategy: config.strategy,
            state,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    pub fn strategy(&self) -> RateLimitStrategy {
        self.strategy
    }

    /// Try to take one slot; `Err` carries the time until a slot frees
    fn acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        match &self.state {
            LimiterState::Sliding(entries) => {
                let mut entries = lock(entries);
                while entries
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.window)
                {
                    entries.pop_front();
                }
                if entries.len() < self.limit as usize {
                    entries.push_back(now);
                    Ok(())
                } else {
                    let oldest = entries.front().copied().unwrap_or(now);
                    Err(self.window.saturating_sub(now.duration_since(oldest)))
                }
            }
            LimiterState::Fixed(window) => {
                let mut window = lock(window);
                if now.duration_since(window.started) >= self.window {
                    window.started = now;
                    window.count = 0;
                }
                if window.count < self.limit {
                    window.count += 1;
                    Ok(())
                } else {
                    Err(self
                        .window
                        .saturating_sub(now.duration_since(window.started)))
                }
            }
            LimiterState::Bucket(limiter) => limiter
                .check()
                .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now())),
        }
    }

    /// Try to take one slot for `topic`
    pub fn try_acquire(&self, topic: &str) -> bool {
        self.check(topic).is_ok()
    }

    /// Take one slot for `topic` or fail with `PubSubError::RateLimitExceeded`
    pub fn check(&self, topic: &str) -> PubSubResult<()> {
        match self.acquire() {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(retry_after) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(PubSubError::RateLimitExceeded {
                    topic: topic.to_string(),
                    retry_after,
                })
            }
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config(strategy: RateLimitStrategy, limit: u32, window: Duration) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            max_requests_per_window: limit,
            window,
            strategy,
        }
    }

    #[rstest]
    #[case(RateLimitStrategy::SlidingWindow)]
    #[case(RateLimitStrategy::FixedWindow)]
    #[case(RateLimitStrategy::TokenBucket)]
    fn test_limit_is_exact_within_window(#[case] strategy: RateLimitStrategy) {
        let limiter = RateLimiter::new(&config(strategy, 5, Duration::from_secs(60))).unwrap();

        for _ in 0..5 {
            assert!(limiter.try_acquire("orders"));
        }
        let err = limiter.check("orders").unwrap_err();
        assert_eq!(err.code(), "PUBSUB_RATE_LIMIT_EXCEEDED");
        match err {
            PubSubError::RateLimitExceeded { topic, retry_after } => {
                assert_eq!(topic, "orders");
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let stats = limiter.stats();
        assert_eq!(stats.accepted, 5);
        assert_eq!(stats.rejected, 1);
    }

    #[rstest]
    #[case(RateLimitStrategy::SlidingWindow)]
    #[case(RateLimitStrategy::FixedWindow)]
    fn test_window_expiry_frees_slots(#[case] strategy: RateLimitStrategy) {
        let limiter = RateLimiter::new(&config(strategy, 2, Duration::from_millis(50))).unwrap();
        assert!(limiter.try_acquire("t"));
        assert!(limiter.try_acquire("t"));
        assert!(!limiter.try_acquire("t"));

        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.try_acquire("t"));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = RateLimiter::new(&config(
            RateLimitStrategy::SlidingWindow,
            0,
            Duration::from_secs(1),
        ))
        .err()
        .unwrap();
        assert_eq!(err.code(), "PUBSUB_CONFIG_ERROR");
    }

    #[test]
    fn test_strategy_from_config_text() {
        let cfg: RateLimitConfig = toml::from_str(
            "enabled = true\nmax_requests_per_window = 10\nwindow = \"1m\"\nstrategy = \"fixed_window\"",
        )
        .unwrap();
        assert_eq!(cfg.strategy, RateLimitStrategy::FixedWindow);
        assert_eq!(cfg.window, Duration::from_secs(60));
    }
}
