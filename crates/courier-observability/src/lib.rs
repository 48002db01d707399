//! Courier Observability
//!
//! Metrics sinks with cardinality caps, deterministic log sampling, tracing
//! subscriber setup and health snapshots for pub/sub services.

pub mod health;
pub mod metrics;
pub mod sampling;
pub mod trace;

pub use health::{HealthSnapshot, HealthStatus};
pub use metrics::{
    FailureStage, InMemoryMetrics, LatencyStats, MetricsSink, NoopMetrics, PubSubMetrics,
    RejectionReason, SharedMetrics,
};
#[cfg(feature = "prometheus")]
pub use metrics::{MetricsError, PrometheusMetrics};
pub use sampling::LogSampler;
pub use trace::{LogFormat, LoggingConfig, init_tracing};

/// Standard latency buckets in seconds
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.01,  // 10ms
    0.025, // 25ms
    0.05,  // 50ms
    0.1,   // 100ms
    0.25,  // 250ms
    0.5,   // 500ms
    1.0,   // 1s
    2.5,   // 2.5s
    5.0,   // 5s
    10.0,  // 10s
];

/// Observability framework errors
#[derive(thiserror::Error, Debug)]
pub enum ObservabilityError {
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),

    #[cfg(feature = "prometheus")]
    #[error("Metrics error: {0}")]
    Metrics(#[from] metrics::MetricsError),
}
