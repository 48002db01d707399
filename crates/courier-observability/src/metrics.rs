//! Metrics sinks for publish/subscribe operations
//!
//! The driver shell reports every outcome to a [`MetricsSink`]. Three sinks
//! ship with the crate: [`NoopMetrics`] (default), [`InMemoryMetrics`] for
//! tests and embedded dashboards, and `PrometheusMetrics` behind the
//! `prometheus` feature. Topic-labelled series are capped to keep
//! cardinality bounded; overflow topics are folded into [`OTHER_TOPIC`].

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Label used for topics beyond the cardinality cap
pub const OTHER_TOPIC: &str = "_other";

/// Why an outbound publish was rejected before reaching the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Validation,
    RateLimit,
    CircuitOpen,
    Backpressure,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Validation => "validation",
            RejectionReason::RateLimit => "rate_limit",
            RejectionReason::CircuitOpen => "circuit_open",
            RejectionReason::Backpressure => "backpressure",
        }
    }
}

/// Pipeline stage a dead letter came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Publish,
    Handler,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Publish => "publish",
            FailureStage::Handler => "handler",
        }
    }
}

/// Receives metrics from the driver shell
///
/// Implementations must be cheap and non-blocking; they run on the publish
/// and delivery paths.
pub trait MetricsSink: Send + Sync {
    /// A publish reached the transport
    fn record_publish(&self, topic: &str, latency: Duration);

    /// A publish failed after retries
    fn record_publish_failure(&self, topic: &str, code: &str);

    /// A handler processed a delivered message
    fn record_receive(&self, topic: &str, latency: Duration);

    /// A handler returned an error
    fn record_handler_failure(&self, topic: &str);

    /// A message was routed to the dead-letter topic
    fn record_dead_letter(&self, topic: &str, stage: FailureStage);

    /// A publish was rejected by one of the gates
    fn record_rejection(&self, topic: &str, reason: RejectionReason);
}

/// Shared, type-erased metrics sink
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_publish(&self, _topic: &str, _latency: Duration) {}
    fn record_publish_failure(&self, _topic: &str, _code: &str) {}
    fn record_receive(&self, _topic: &str, _latency: Duration) {}
    fn record_handler_failure(&self, _topic: &str) {}
    fn record_dead_letter(&self, _topic: &str, _stage: FailureStage) {}
    fn record_rejection(&self, _topic: &str, _reason: RejectionReason) {}
}

/// Latency statistics in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencyStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let at = |q: f64| {
            let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
            sorted[idx] as f64
        };

        Self {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            max: at(1.0),
        }
    }
}

/// Snapshot of [`InMemoryMetrics`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct PubSubMetrics {
    pub messages_published_total: u64,
    pub publish_failures_total: u64,
    pub messages_received_total: u64,
    pub handler_failures_total: u64,
    pub dead_letters_total: u64,
    /// Rejections by reason
    pub rejections: HashMap<RejectionReason, u64>,
    /// Publishes per topic (limited cardinality)
    pub published_by_topic: HashMap<String, u64>,
    pub publish_latency_ms: LatencyStats,
    pub receive_latency_ms: LatencyStats,
}

#[derive(Debug, Default)]
struct State {
    metrics: PubSubMetrics,
    publish_samples: Vec<u64>,
    receive_samples: Vec<u64>,
}

/// Metrics kept in process memory
#[derive(Debug, Clone)]
pub struct InMemoryMetrics {
    state: Arc<Mutex<State>>,
    /// Maximum number of topics to track (cardinality limit)
    max_topics: usize,
    /// Maximum latency samples to keep
    max_samples: usize,
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new(20, 1000)
    }
}

fn push_sample(samples: &mut Vec<u64>, value: u64, max: usize) {
    samples.push(value);
    if samples.len() > max {
        let drain = samples.len() - max;
        samples.drain(0..drain);
    }
}

impl InMemoryMetrics {
    pub fn new(max_topics: usize, max_samples: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            max_topics,
            max_samples,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current metrics with latency percentiles computed from recent samples
    pub fn snapshot(&self) -> PubSubMetrics {
        let state = self.lock();
        let mut metrics = state.metrics.clone();
        metrics.publish_latency_ms = LatencyStats::from_samples(&state.publish_samples);
        metrics.receive_latency_ms = LatencyStats::from_samples(&state.receive_samples);
        metrics
    }

    pub fn reset(&self) {
        *self.lock() = State::default();
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_publish(&self, topic: &str, latency: Duration) {
        let mut state = self.lock();
        let metrics = &mut state.metrics;
        metrics.messages_published_total = metrics.messages_published_total.saturating_add(1);

        let key = if metrics.published_by_topic.contains_key(topic)
            || metrics.published_by_topic.len() < self.max_topics
        {
            topic
        } else {
            OTHER_TOPIC
        };
        let count = metrics.published_by_topic.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);

        push_sample(
            &mut state.publish_samples,
            latency.as_millis() as u64,
            self.max_samples,
        );
    }

    fn record_publish_failure(&self, _topic: &str, _code: &str) {
        let mut state = self.lock();
        state.metrics.publish_failures_total = state.metrics.publish_failures_total.saturating_add(1);
    }

    fn record_receive(&self, _topic: &str, latency: Duration) {
        let mut state = self.lock();
        state.metrics.messages_received_total =
            state.metrics.messages_received_total.saturating_add(1);
        push_sample(
            &mut state.receive_samples,
            latency.as_millis() as u64,
            self.max_samples,
        );
    }

    fn record_handler_failure(&self, _topic: &str) {
        let mut state = self.lock();
        state.metrics.handler_failures_total = state.metrics.handler_failures_total.saturating_add(1);
    }

    fn record_dead_letter(&self, _topic: &str, _stage: FailureStage) {
        let mut state = self.lock();
        state.metrics.dead_letters_total = state.metrics.dead_letters_total.saturating_add(1);
    }

    fn record_rejection(&self, _topic: &str, reason: RejectionReason) {
        let mut state = self.lock();
        let count = state.metrics.rejections.entry(reason).or_insert(0);
        *count = count.saturating_add(1);
    }
}

#[cfg(feature = "prometheus")]
pub use self::prometheus_sink::{MetricsError, PrometheusMetrics};

#[cfg(feature = "prometheus")]
mod prometheus_sink {
    use super::{FailureStage, MetricsSink, OTHER_TOPIC, RejectionReason};
    use crate::LATENCY_BUCKETS;
    use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
    use std::collections::HashSet;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;
    use thiserror::Error;

    /// Prometheus registration or encoding failure
    #[derive(Error, Debug)]
    pub enum MetricsError {
        #[error("Prometheus error: {0}")]
        Prometheus(#[from] prometheus::Error),
    }

    /// Prometheus-backed sink with its own registry
    ///
    /// Series (with `{namespace}` defaulting to `courier`):
    /// - `{namespace}_messages_published_total{topic}`
    /// - `{namespace}_publish_failures_total{topic, code}`
    /// - `{namespace}_publish_duration_seconds{topic}`
    /// - `{namespace}_messages_received_total{topic}`
    /// - `{namespace}_handler_failures_total{topic}`
    /// - `{namespace}_dead_letters_total{stage}`
    /// - `{namespace}_rejections_total{reason}`
    pub struct PrometheusMetrics {
        registry: Registry,
        published: CounterVec,
        publish_failures: CounterVec,
        publish_duration: HistogramVec,
        received: CounterVec,
        handler_failures: CounterVec,
        dead_letters: CounterVec,
        rejections: CounterVec,
        topics: Mutex<HashSet<String>>,
        max_topics: usize,
    }

    impl PrometheusMetrics {
        pub fn new(namespace: &str, max_topics: usize) -> Result<Self, MetricsError> {
            let registry = Registry::new();

            let published = CounterVec::new(
                Opts::new(
                    format!("{}_messages_published_total", namespace),
                    "Total messages published by topic",
                ),
                &["topic"],
            )?;
            let publish_failures = CounterVec::new(
                Opts::new(
                    format!("{}_publish_failures_total", namespace),
                    "Total publishes that failed after retries by topic and error code",
                ),
                &["topic", "code"],
            )?;
            let publish_duration = HistogramVec::new(
                HistogramOpts::new(
                    format!("{}_publish_duration_seconds", namespace),
                    "Publish duration in seconds by topic",
                )
                .buckets(LATENCY_BUCKETS.to_vec()),
                &["topic"],
            )?;
            let received = CounterVec::new(
                Opts::new(
                    format!("{}_messages_received_total", namespace),
                    "Total messages handled by topic",
                ),
                &["topic"],
            )?;
            let handler_failures = CounterVec::new(
                Opts::new(
                    format!("{}_handler_failures_total", namespace),
                    "Total handler failures by topic",
                ),
                &["topic"],
            )?;
            let dead_letters = CounterVec::new(
                Opts::new(
                    format!("{}_dead_letters_total", namespace),
                    "Total messages routed to the dead-letter topic by stage",
                ),
                &["stage"],
            )?;
            let rejections = CounterVec::new(
                Opts::new(
                    format!("{}_rejections_total", namespace),
                    "Total publishes rejected before the transport by reason",
                ),
                &["reason"],
            )?;

            registry.register(Box::new(published.clone()))?;
            registry.register(Box::new(publish_failures.clone()))?;
            registry.register(Box::new(publish_duration.clone()))?;
            registry.register(Box::new(received.clone()))?;
            registry.register(Box::new(handler_failures.clone()))?;
            registry.register(Box::new(dead_letters.clone()))?;
            registry.register(Box::new(rejections.clone()))?;

            Ok(Self {
                registry,
                published,
                publish_failures,
                publish_duration,
                received,
                handler_failures,
                dead_letters,
                rejections,
                topics: Mutex::new(HashSet::new()),
                max_topics,
            })
        }

        /// Registry holding every series of this sink
        pub fn registry(&self) -> &Registry {
            &self.registry
        }

        /// Text exposition format of all series
        pub fn gather_text(&self) -> Result<String, MetricsError> {
            Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
        }

        fn topic_label(&self, topic: &str) -> String {
            let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            if topics.contains(topic) {
                return topic.to_string();
            }
            if topics.len() < self.max_topics {
                topics.insert(topic.to_string());
                return topic.to_string();
            }
            OTHER_TOPIC.to_string()
        }
    }

    impl MetricsSink for PrometheusMetrics {
        fn record_publish(&self, topic: &str, latency: Duration) {
            let label = self.topic_label(topic);
            self.published.with_label_values(&[label.as_str()]).inc();
            self.publish_duration
                .with_label_values(&[label.as_str()])
                .observe(latency.as_secs_f64());
        }

        fn record_publish_failure(&self, topic: &str, code: &str) {
            let label = self.topic_label(topic);
            self.publish_failures
                .with_label_values(&[label.as_str(), code])
                .inc();
        }

        fn record_receive(&self, topic: &str, _latency: Duration) {
            let label = self.topic_label(topic);
            self.received.with_label_values(&[label.as_str()]).inc();
        }

        fn record_handler_failure(&self, topic: &str) {
            let label = self.topic_label(topic);
            self.handler_failures
                .with_label_values(&[label.as_str()])
                .inc();
        }

        fn record_dead_letter(&self, _topic: &str, stage: FailureStage) {
            self.dead_letters.with_label_values(&[stage.as_str()]).inc();
        }

        fn record_rejection(&self, _topic: &str, reason: RejectionReason) {
            self.rejections.with_label_values(&[reason.as_str()]).inc();
        }
    }
}
