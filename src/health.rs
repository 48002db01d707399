//! Health reporting for a running service

use crate::config::HealthConfig;
use courier_core::PubSubDriver;
use courier_observability::HealthSnapshot;
use std::time::{Duration, Instant};

/// Computes a fresh [`HealthSnapshot`] from driver diagnostics on every call
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    started: Instant,
    degraded_window: Duration,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            started: Instant::now(),
            degraded_window: config.degraded_window,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self, driver: &dyn PubSubDriver) -> HealthSnapshot {
        HealthSnapshot::evaluate(driver.diagnostics(), self.uptime(), self.degraded_window)
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(&HealthConfig::default())
    }
}
