//! Health snapshot types
//!
//! Snapshots are derived on every read from live driver diagnostics and are
//! never cached.

use chrono::{DateTime, Utc};
use courier_core::{CircuitState, DriverDiagnostics, ErrorRecord, LoadSignal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Connected and operating normally
    Healthy,
    /// Connected but impaired
    Degraded,
    /// Not connected
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unhealthy => "UNHEALTHY",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time health of one pub/sub service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub driver: String,
    pub connected: bool,
    pub subscriptions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
    /// Time since the service was created
    #[serde(serialize_with = "serialize_secs")]
    pub uptime: Duration,
    /// Why the status is not healthy
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    pub details: DriverDiagnostics,
    pub checked_at: DateTime<Utc>,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl HealthSnapshot {
    /// Derive a snapshot from diagnostics
    ///
    /// - `UNHEALTHY` when disconnected
    /// - `DEGRADED` when the circuit is not closed, load is critical, or an
    ///   error was captured within `degraded_window`
    /// - `HEALTHY` otherwise
    pub fn evaluate(details: DriverDiagnostics, uptime: Duration, degraded_window: Duration) -> Self {
        let now = Utc::now();
        let mut reasons = Vec::new();

        let status = if !details.connected {
            reasons.push("driver is not connected".to_string());
            HealthStatus::Unhealthy
        } else {
            if let Some(state) = details.circuit_state
                && state != CircuitState::Closed
            {
                reasons.push(format!("circuit breaker is {}", state));
            }
            if details.load == Some(LoadSignal::Critical) {
                reasons.push(format!(
                    "backpressure critical ({}/{} in flight)",
                    details.inflight, details.max_inflight
                ));
            }
            if let Some(err) = &details.last_error {
                let age = now.signed_duration_since(err.occurred_at);
                if age.to_std().map(|age| age < degraded_window).unwrap_or(true) {
                    reasons.push(format!("recent error: {}", err.code));
                }
            }

            if reasons.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            }
        };

        Self {
            status,
            driver: details.driver.clone(),
            connected: details.connected,
            subscriptions: details.subscriptions,
            last_error: details.last_error.clone(),
            uptime,
            reasons,
            details,
            checked_at: now,
        }
    }
}
