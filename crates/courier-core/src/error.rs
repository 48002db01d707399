//! Error types for pub/sub operations
//!
//! Every variant exposes a machine-readable [`PubSubError::code`], a human
//! message through `Display`, and a [`PubSubError::metadata`] bag with the
//! context needed to reconstruct the failure without reading logs.

use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

use crate::message::MessageMap;

/// Result type for pub/sub operations
pub type PubSubResult<T> = Result<T, PubSubError>;

/// Errors that can occur during pub/sub operations
#[derive(Error, Debug)]
pub enum PubSubError {
    /// Driver cannot reach its transport
    #[error("Connection failed for driver '{driver}': {message}")]
    Connection { driver: String, message: String },

    /// Message rejected before reaching the transport
    #[error("Validation failed for topic '{topic}': {reason}")]
    Validation { topic: String, reason: String },

    /// Transport rejected or timed out a publish after retries
    #[error("Publish to '{topic}' failed after {attempts} attempt(s): {cause}")]
    PublishFailed {
        topic: String,
        #[source]
        cause: Box<PubSubError>,
        attempts: u32,
        correlation_id: Option<String>,
        payload: Option<Value>,
    },

    /// Subscription registration failed
    #[error("Subscription to '{topic}' failed: {reason}")]
    Subscription { topic: String, reason: String },

    /// Unknown driver type in configuration
    #[error("Driver '{driver}' not found (available: {})", .available.join(", "))]
    DriverNotFound {
        driver: String,
        available: Vec<String>,
    },

    /// Rate limiter rejected the operation
    #[error("Rate limit exceeded for topic '{topic}': retry after {retry_after:?}")]
    RateLimitExceeded { topic: String, retry_after: Duration },

    /// Circuit breaker is open
    #[error("Circuit open for driver '{driver}': retry after {retry_after:?}")]
    CircuitOpen { driver: String, retry_after: Duration },

    /// No backpressure slot became available in time
    #[error("Backpressure timeout after {waited:?} ({inflight}/{max_inflight} in flight)")]
    BackpressureTimeout {
        waited: Duration,
        inflight: usize,
        max_inflight: usize,
    },

    /// A subscriber handler failed
    #[error("Handler for topic '{topic}' failed: {message}")]
    Handler { topic: String, message: String },

    /// Payload could not be serialized or deserialized
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Operation the driver cannot perform
    #[error("Driver '{driver}' does not support {operation}")]
    Unsupported { driver: String, operation: String },

    /// Operation attempted while disconnected
    #[error("Driver '{driver}' is not connected")]
    NotConnected { driver: String },

    /// Backend-specific error (Redis, Kafka, …)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Too many subscriber registrations failed at startup
    #[error(
        "Startup registration failed: {failed}/{total} subscriptions failed (max failure rate {max_failure_rate})"
    )]
    StartupRegistration {
        failed: usize,
        total: usize,
        max_failure_rate: f64,
    },
}

impl PubSubError {
    /// Create a connection error
    pub fn connection(driver: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            driver: driver.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation error for an oversized message
    pub fn message_too_large(topic: impl Into<String>, size: usize, limit: usize) -> Self {
        Self::validation(
            topic,
            format!("message too large: {} bytes (limit: {} bytes)", size, limit),
        )
    }

    /// Create a subscription error
    pub fn subscription(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Subscription {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a backend error
    pub fn backend(message: impl std::fmt::Display) -> Self {
        Self::Backend(message.to_string())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(driver: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            driver: driver.into(),
            operation: operation.into(),
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "PUBSUB_CONNECTION_ERROR",
            Self::Validation { .. } => "PUBSUB_VALIDATION_ERROR",
            Self::PublishFailed { .. } => "PUBSUB_PUBLISH_FAILED",
            Self::Subscription { .. } => "PUBSUB_SUBSCRIPTION_ERROR",
            Self::DriverNotFound { .. } => "PUBSUB_DRIVER_NOT_FOUND",
            Self::RateLimitExceeded { .. } => "PUBSUB_RATE_LIMIT_EXCEEDED",
            Self::CircuitOpen { .. } => "PUBSUB_CIRCUIT_OPEN",
            Self::BackpressureTimeout { .. } => "PUBSUB_BACKPRESSURE_TIMEOUT",
            Self::Handler { .. } => "PUBSUB_HANDLER_ERROR",
            Self::Serialization(_) => "PUBSUB_SERIALIZATION_ERROR",
            Self::Config(_) => "PUBSUB_CONFIG_ERROR",
            Self::Unsupported { .. } => "PUBSUB_UNSUPPORTED",
            Self::NotConnected { .. } => "PUBSUB_NOT_CONNECTED",
            Self::Backend(_) => "PUBSUB_BACKEND_ERROR",
            Self::StartupRegistration { .. } => "PUBSUB_STARTUP_REGISTRATION_FAILED",
        }
    }

    /// Topic the error relates to, if any
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Validation { topic, .. }
            | Self::PublishFailed { topic, .. }
            | Self::Subscription { topic, .. }
            | Self::RateLimitExceeded { topic, .. }
            | Self::Handler { topic, .. } => Some(topic),
            _ => None,
        }
    }

    /// The innermost error for wrapped publish failures
    pub fn root_cause(&self) -> &PubSubError {
        match self {
            Self::PublishFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Context bag describing the failure
    pub fn metadata(&self) -> MessageMap {
        let mut meta = MessageMap::new();
        meta.insert("code".into(), json!(self.code()));

        match self {
            Self::Connection { driver, .. }
            | Self::NotConnected { driver }
            | Self::CircuitOpen { driver, .. }
            | Self::Unsupported { driver, .. } => {
                meta.insert("driver".into(), json!(driver));
            }
            Self::DriverNotFound { driver, available } => {
                meta.insert("driver".into(), json!(driver));
                meta.insert("available".into(), json!(available));
            }
            Self::PublishFailed {
                cause,
                attempts,
                correlation_id,
                payload,
                ..
            } => {
                meta.insert("attempts".into(), json!(attempts));
                meta.insert("cause".into(), json!(cause.to_string()));
                meta.insert("causeCode".into(), json!(cause.code()));
                if let Some(id) = correlation_id {
                    meta.insert("correlationId".into(), json!(id));
                }
                if let Some(payload) = payload {
                    meta.insert("payload".into(), payload.clone());
                }
            }
            Self::BackpressureTimeout {
                waited,
                inflight,
                max_inflight,
            } => {
                meta.insert("waitedMs".into(), json!(waited.as_millis() as u64));
                meta.insert("inflight".into(), json!(inflight));
                meta.insert("maxInflight".into(), json!(max_inflight));
            }
            Self::StartupRegistration {
                failed,
                total,
                max_failure_rate,
            } => {
                meta.insert("failed".into(), json!(failed));
                meta.insert("total".into(), json!(total));
                meta.insert("maxFailureRate".into(), json!(max_failure_rate));
            }
            _ => {}
        }

        if let Self::RateLimitExceeded { retry_after, .. } | Self::CircuitOpen { retry_after, .. } =
            self
        {
            meta.insert("retryAfterMs".into(), json!(retry_after.as_millis() as u64));
        }

        if let Some(topic) = self.topic() {
            meta.insert("topic".into(), json!(topic));
        }

        meta
    }
}
