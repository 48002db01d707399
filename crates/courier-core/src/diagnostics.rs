//! Point-in-time driver diagnostics used for health reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PubSubError;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Requests are rejected immediately
    Open,
    /// Limited trial requests are allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Load signal derived from backpressure utilisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSignal {
    /// Normal operation - no backpressure
    Normal,
    /// Approaching the in-flight ceiling
    Warning,
    /// At the ceiling; new publishes wait
    Critical,
}

/// The most recent error captured by a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Capture an error now
    pub fn capture(error: &PubSubError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            topic: error.topic().map(str::to_string),
            occurred_at: Utc::now(),
        }
    }
}

/// Snapshot of driver state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverDiagnostics {
    pub driver: String,
    pub connected: bool,
    /// Number of subscribed topics
    pub subscriptions: usize,
    /// Number of registered handlers across all topics
    pub handlers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_state: Option<CircuitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadSignal>,
    pub inflight: usize,
    pub max_inflight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
    pub connected_since: Option<DateTime<Utc>>,
}

impl DriverDiagnostics {
    /// Minimal diagnostics for drivers without a reliability shell
    pub fn basic(driver: impl Into<String>, connected: bool, subscriptions: usize) -> Self {
        Self {
            driver: driver.into(),
            connected,
            subscriptions,
            handlers: subscriptions,
            circuit_state: None,
            load: None,
            inflight: 0,
            max_inflight: 0,
            last_error: None,
            connected_since: None,
        }
    }
}
