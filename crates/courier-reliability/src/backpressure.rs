//! Backpressure gate bounding in-flight publishes
//!
//! A counting semaphore of `max_inflight` permits. [`BackpressureGate::acquire`]
//! polls for a free permit every `poll_interval` until one frees or
//! `wait_timeout` elapses. The returned [`BackpressurePermit`] releases its
//! slot exactly once when dropped, on every path.

use courier_core::{LoadSignal, PubSubError, PubSubResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Backpressure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Enable the gate
    pub enabled: bool,
    /// Ceiling on concurrent in-flight publishes
    pub max_inflight: usize,
    /// How often a waiting publish re-checks for capacity
    #[serde(with = "crate::duration")]
    pub poll_interval: Duration,
    /// Longest a publish waits; `None` waits indefinitely, zero fails fast
    #[serde(
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub wait_timeout: Option<Duration>,
    /// Utilisation ratio at which the load signal turns to warning
    pub warning_ratio: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_inflight: 1000,
            poll_interval: Duration::from_millis(10),
            wait_timeout: Some(Duration::from_secs(5)),
            warning_ratio: 0.8,
        }
    }
}

impl BackpressureConfig {
    pub fn validate(&self) -> PubSubResult<()> {
        if self.max_inflight == 0 {
            return Err(PubSubError::Config(
                "backpressure.max_inflight must be greater than 0".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PubSubError::Config(
                "backpressure.poll_interval must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.warning_ratio) {
            return Err(PubSubError::Config(
                "backpressure.warning_ratio must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Backpressure statistics
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BackpressureStats {
    /// Current in-flight count
    pub inflight: usize,
    pub max_inflight: usize,
    /// Highest in-flight count observed
    pub peak_inflight: usize,
    /// Publishes that had to wait for a slot
    pub waits: u64,
    /// Publishes that gave up waiting
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    peak: AtomicUsize,
    waits: AtomicU64,
    timeouts: AtomicU64,
}

/// Shared bounded in-flight counter
#[derive(Debug, Clone)]
pub struct BackpressureGate {
    config: Arc<BackpressureConfig>,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

/// Slot held for the duration of one publish
#[must_use = "the slot is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct BackpressurePermit {
    _permit: OwnedSemaphorePermit,
}

impl BackpressureGate {
    pub fn new(config: BackpressureConfig) -> PubSubResult<Self> {
        config.validate()?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_inflight)),
            config: Arc::new(config),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn max_inflight(&self) -> usize {
        self.config.max_inflight
    }

    /// Number of permits currently held
    pub fn inflight(&self) -> usize {
        self.config
            .max_inflight
            .saturating_sub(self.semaphore.available_permits())
    }

    fn try_take(&self) -> Option<BackpressurePermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        self.counters
            .peak
            .fetch_max(self.inflight(), Ordering::Relaxed);
        Some(BackpressurePermit { _permit: permit })
    }

    /// Wait for a slot
    ///
    /// # Errors
    ///
    /// Returns `PubSubError::BackpressureTimeout` when no slot frees within
    /// `wait_timeout`
    pub async fn acquire(&self) -> PubSubResult<BackpressurePermit> {
        if let Some(permit) = self.try_take() {
            return Ok(permit);
        }

        self.counters.waits.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        debug!(
            inflight = self.inflight(),
            max_inflight = self.config.max_inflight,
            "Backpressure: waiting for capacity"
        );

        loop {
            if let Some(limit) = self.config.wait_timeout {
                if start.elapsed() >= limit {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    let inflight = self.inflight();
                    warn!(
                        inflight,
                        max_inflight = self.config.max_inflight,
                        waited_ms = start.elapsed().as_millis() as u64,
                        "Backpressure timeout"
                    );
                    return Err(PubSubError::BackpressureTimeout {
                        waited: start.elapsed(),
                        inflight,
                        max_inflight: self.config.max_inflight,
                    });
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;

            if let Some(permit) = self.try_take() {
                return Ok(permit);
            }
        }
    }

    /// Load signal derived from utilisation
    pub fn signal(&self) -> LoadSignal {
        let inflight = self.inflight();
        if inflight >= self.config.max_inflight {
            LoadSignal::Critical
        } else if inflight as f64 >= self.config.max_inflight as f64 * self.config.warning_ratio {
            LoadSignal::Warning
        } else {
            LoadSignal::Normal
        }
    }

    pub fn stats(&self) -> BackpressureStats {
        BackpressureStats {
            inflight: self.inflight(),
            max_inflight: self.config.max_inflight,
            peak_inflight: self.counters.peak.load(Ordering::Relaxed),
            waits: self.counters.waits.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(max: usize, wait: Option<Duration>) -> BackpressureGate {
        BackpressureGate::new(BackpressureConfig {
            enabled: true,
            max_inflight: max,
            poll_interval: Duration::from_millis(5),
            wait_timeout: wait,
            warning_ratio: 0.5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_permits_are_released_on_drop() {
        let gate = gate(2, Some(Duration::ZERO));
        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        assert_eq!(gate.inflight(), 2);
        assert_eq!(gate.signal(), LoadSignal::Critical);

        drop(a);
        assert_eq!(gate.inflight(), 1);
        assert_eq!(gate.signal(), LoadSignal::Warning);
        drop(b);
        assert_eq!(gate.inflight(), 0);
        assert_eq!(gate.signal(), LoadSignal::Normal);
    }

    #[tokio::test]
    async fn test_zero_wait_fails_fast() {
        let gate = gate(1, Some(Duration::ZERO));
        let _held = gate.acquire().await.unwrap();

        let err = gate.acquire().await.unwrap_err();
        match err {
            PubSubError::BackpressureTimeout {
                inflight,
                max_inflight,
                ..
            } => {
                assert_eq!(inflight, 1);
                assert_eq!(max_inflight, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(gate.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_waiter_proceeds_once_slot_frees() {
        let gate = gate(1, Some(Duration::from_secs(2)));
        let held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();

        let stats = gate.stats();
        assert_eq!(stats.waits, 1);
        assert_eq!(stats.peak_inflight, 1);
        assert_eq!(stats.inflight, 0);
    }

    #[tokio::test]
    async fn test_timeout_after_wait() {
        let gate = gate(1, Some(Duration::from_millis(30)));
        let _held = gate.acquire().await.unwrap();

        let start = Instant::now();
        assert!(gate.acquire().await.is_err());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(gate.inflight(), 1);
    }

    #[test]
    fn test_invalid_config() {
        assert!(
            BackpressureGate::new(BackpressureConfig {
                max_inflight: 0,
                ..BackpressureConfig::default()
            })
            .is_err()
        );
    }
}
