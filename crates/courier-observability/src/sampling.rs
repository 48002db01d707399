//! Deterministic log sampling for success-path events.
//!
//! A rate of `0.25` logs one event in four. Warnings and errors must not go
//! through the sampler.

use std::sync::atomic::{AtomicU64, Ordering};

/// 1-in-N sampler
#[derive(Debug)]
pub struct LogSampler {
    /// Log every N-th event; 0 disables logging
    every: u64,
    counter: AtomicU64,
}

impl LogSampler {
    /// Create a sampler for `rate` in `0.0..=1.0`; out-of-range values are clamped
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        let every = if rate == 0.0 {
            0
        } else {
            (1.0 / rate).round().max(1.0) as u64
        };
        Self {
            every,
            counter: AtomicU64::new(0),
        }
    }

    /// Sampler that logs every event
    pub fn always() -> Self {
        Self::new(1.0)
    }

    /// Whether the current event should be logged
    pub fn should_log(&self) -> bool {
        match self.every {
            0 => false,
            1 => true,
            n => self.counter.fetch_add(1, Ordering::Relaxed) % n == 0,
        }
    }

    /// Effective 1-in-N interval
    pub fn interval(&self) -> u64 {
        self.every
    }
}

impl Default for LogSampler {
    fn default() -> Self {
        Self::always()
    }
}
