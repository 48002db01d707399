//! Reliability shell shared by every transport
//!
//! [`BaseDriver`] turns a [`Transport`] into a full [`PubSubDriver`].
//!
//! Publishing runs each call through the same chain:
//!
//! 1. validation
//! 2. namespace
//! 3. rate limiter
//! 4. circuit breaker
//! 5. backpressure permit
//! 6. envelope (id, timestamp, correlation id, metadata, attributes)
//! 7. `publish_internal` under the retry policy
//!
//! On success the circuit records a success and the publish metrics are
//! emitted. On terminal failure the circuit records a failure, the message is
//! optionally routed to the dead-letter topic and `PublishFailed` is returned.
//! The backpressure permit is released on every path.
//!
//! Subscribing enforces `max_handlers_per_topic` and wraps handlers with
//! decoding, metrics, dead-letter routing and the handler error policy.
//! Inbound delivery is never gated by the circuit breaker or rate limiter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    DriverDiagnostics, ErrorRecord, LoadSignal, Message, MessageId, Namespace, PubSubDriver,
    PubSubError, PubSubResult, PublishOptions, SharedHandler, SubscribeOptions, SubscriptionId,
    UnsubscribeOptions, namespaced, validate_topic,
};
use courier_observability::{
    FailureStage, LogSampler, MetricsSink, NoopMetrics, RejectionReason, SharedMetrics,
};
use courier_reliability::{
    BackpressureConfig, BackpressureGate, BackpressureStats, CircuitBreaker, CircuitBreakerConfig,
    CircuitStats, MaxSizeValidator, MessageValidator, NoopValidator, RateLimitConfig, RateLimiter,
    RetryConfig, RetryError, RetryPolicy, SharedValidator, ValidatorChain,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dlq::DeadLetter;
use crate::transport::{Delivery, Inbound, Transport};

/// Behaviour of the reliability shell
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Prefix applied to every topic, including the dead-letter topic
    pub namespace: Option<Namespace>,
    /// Generate a correlation id when the caller did not supply one
    pub enable_correlation_id: bool,
    /// Topic receiving permanently failed messages
    pub dead_letter_queue: Option<String>,
    /// Propagate handler failures to the transport instead of logging them
    pub throw_on_handler_error: bool,
    pub max_handlers_per_topic: usize,
    /// Serialized payload limit in bytes
    pub max_message_size: Option<usize>,
    /// Attach the offending payload to `PublishFailed`
    pub include_payload_in_errors: bool,
    /// Fraction of success-path debug logs to emit
    pub log_sampling_rate: f64,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub backpressure: BackpressureConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            enable_correlation_id: true,
            dead_letter_queue: None,
            throw_on_handler_error: false,
            max_handlers_per_topic: 100,
            max_message_size: None,
            include_payload_in_errors: false,
            log_sampling_rate: 1.0,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            backpressure: BackpressureConfig::default(),
        }
    }
}

/// Pluggable parts of the shell
#[derive(Clone, Default)]
pub struct ShellPlugins {
    /// Runs after the `max_message_size` check
    pub validator: Option<SharedValidator>,
    pub metrics: Option<SharedMetrics>,
}

struct Registration {
    id: SubscriptionId,
    handler: SharedHandler,
}

struct TopicEntry {
    handlers: Vec<Registration>,
    options: SubscribeOptions,
}

struct Shell<T> {
    transport: T,
    config: ShellConfig,
    validator: SharedValidator,
    metrics: SharedMetrics,
    rate_limiter: Option<RateLimiter>,
    circuit: CircuitBreaker,
    backpressure: Option<BackpressureGate>,
    retry: RetryPolicy,
    sampler: LogSampler,
    dead_letter_topic: Option<String>,
    topics: RwLock<BTreeMap<String, TopicEntry>>,
    /// Serializes connect, disconnect and registration changes
    registration: tokio::sync::Mutex<()>,
    last_error: Mutex<Option<ErrorRecord>>,
    connected_since: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> Shell<T> {
    fn name(&self) -> &str {
        self.transport.name()
    }

    fn physical(&self, topic: &str) -> String {
        namespaced(self.config.namespace.as_ref(), topic)
    }

    fn capture(&self, error: &PubSubError) {
        *lock(&self.last_error) = Some(ErrorRecord::capture(error));
    }

    fn topics_read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, TopicEntry>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn topics_write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, TopicEntry>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn envelope(&self, topic: &str, data: Value, options: &PublishOptions) -> Message {
        let mut message = Message::new(topic, data);
        for (key, value) in &options.metadata {
            message = message.with_metadata(key.clone(), value.clone());
        }
        for (key, value) in &options.attributes {
            message = message.with_attribute(key.clone(), value.clone());
        }
        if let Some(id) = &options.correlation_id {
            message = message.with_correlation_id(id.clone());
        } else if self.config.enable_correlation_id && message.correlation_id().is_none() {
            message = message.with_correlation_id(Uuid::new_v4().to_string());
        }
        message
    }

    /// Delivery callback for the subscription registered under `key`
    fn delivery_for(self: &Arc<Self>, key: &str) -> Delivery {
        let shell: Weak<Self> = Arc::downgrade(self);
        let key = key.to_string();
        Delivery::new(move |inbound| {
            let shell = shell.clone();
            let key = key.clone();
            async move {
                match shell.upgrade() {
                    Some(shell) => shell.dispatch(&key, inbound).await,
                    None => Ok(()),
                }
            }
        })
    }

    async fn dispatch(&self, key: &str, inbound: Inbound) -> PubSubResult<()> {
        let message = match inbound {
            Inbound::Envelope(message) => message,
            Inbound::Raw { topic, payload } => match Message::from_wire(&topic, &payload) {
                Ok(message) => message,
                Err(err) => {
                    warn!(
                        driver = %self.name(),
                        topic = %topic,
                        error = %err,
                        "Dropping undecodable message"
                    );
                    self.metrics.record_handler_failure(&topic);
                    self.capture(&err);
                    return if self.config.throw_on_handler_error {
                        Err(err)
                    } else {
                        Ok(())
                    };
                }
            },
        };

        let handlers: Vec<SharedHandler> = self
            .topics_read()
            .get(key)
            .map(|entry| {
                entry
                    .handlers
                    .iter()
                    .map(|r| Arc::clone(&r.handler))
                    .collect()
            })
            .unwrap_or_default();

        let mut first_failure = None;
        for handler in handlers {
            let start = Instant::now();
            match handler.handle(message.clone()).await {
                Ok(()) => {
                    self.metrics.record_receive(&message.topic, start.elapsed());
                    if self.sampler.should_log() {
                        debug!(
                            driver = %self.name(),
                            topic = %message.topic,
                            message_id = %message.id,
                            correlation_id = ?message.correlation_id(),
                            "Message handled"
                        );
                    }
                }
                Err(err) => {
                    let failure = PubSubError::Handler {
                        topic: message.topic.clone(),
                        message: err.to_string(),
                    };
                    self.metrics.record_handler_failure(&message.topic);
                    error!(
                        driver = %self.name(),
                        topic = %message.topic,
                        message_id = %message.id,
                        correlation_id = ?message.correlation_id(),
                        error = %err,
                        "Handler failed"
                    );
                    self.capture(&failure);
                    self.dead_letter(&message, &failure, FailureStage::Handler, 1)
                        .await;
                    first_failure.get_or_insert(failure);
                }
            }
        }

        match first_failure {
            Some(failure) if self.config.throw_on_handler_error => Err(failure),
            _ => Ok(()),
        }
    }

    /// Route `message` to the dead-letter topic; failures are only logged
    async fn dead_letter(
        &self,
        message: &Message,
        failure: &PubSubError,
        stage: FailureStage,
        attempts: u32,
    ) {
        let Some(dlq) = self.dead_letter_topic.as_deref() else {
            return;
        };
        if message.topic == dlq {
            warn!(
                driver = %self.name(),
                message_id = %message.id,
                "Message already on the dead-letter topic, not re-routing"
            );
            return;
        }

        let letter = DeadLetter::new(message, failure, stage, attempts)
            .logical(self.config.namespace.as_ref());
        let envelope = match letter.into_message(dlq) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = %err, "Failed to build dead-letter envelope");
                return;
            }
        };

        match self
            .transport
            .publish_internal(dlq, &envelope, &PublishOptions::default())
            .await
        {
            Ok(()) => {
                self.metrics.record_dead_letter(&message.topic, stage);
                warn!(
                    driver = %self.name(),
                    topic = %message.topic,
                    dead_letter_topic = dlq,
                    message_id = %message.id,
                    stage = stage.as_str(),
                    "Routed message to dead-letter topic"
                );
            }
            Err(err) => {
                error!(
                    driver = %self.name(),
                    topic = %message.topic,
                    dead_letter_topic = dlq,
                    message_id = %message.id,
                    error = %err,
                    "Failed to route message to dead-letter topic"
                );
            }
        }
    }
}

/// A [`Transport`] wrapped in the reliability shell
pub struct BaseDriver<T: Transport> {
    shell: Arc<Shell<T>>,
}

impl<T: Transport> BaseDriver<T> {
    /// Wrap `transport`
    ///
    /// # Errors
    ///
    /// Returns `PubSubError::Config` when a reliability section is invalid
    pub fn new(transport: T, config: ShellConfig, plugins: ShellPlugins) -> PubSubResult<Self> {
        config.retry.validate()?;
        config.circuit_breaker.validate()?;
        if config.max_handlers_per_topic == 0 {
            return Err(PubSubError::Config(
                "max_handlers_per_topic must be greater than 0".into(),
            ));
        }

        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| RateLimiter::new(&config.rate_limit))
            .transpose()?;
        let backpressure = config
            .backpressure
            .enabled
            .then(|| BackpressureGate::new(config.backpressure.clone()))
            .transpose()?;

        let mut chain = ValidatorChain::new();
        if let Some(limit) = config.max_message_size {
            chain.push(Arc::new(MaxSizeValidator::new(limit)));
        }
        if let Some(validator) = plugins.validator {
            chain.push(validator);
        }
        let validator: SharedValidator = if chain.is_empty() {
            Arc::new(NoopValidator)
        } else {
            Arc::new(chain)
        };

        let dead_letter_topic = config
            .dead_letter_queue
            .as_deref()
            .map(|q| namespaced(config.namespace.as_ref(), q));

        let shell = Shell {
            circuit: CircuitBreaker::new(transport.name(), config.circuit_breaker.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            sampler: LogSampler::new(config.log_sampling_rate),
            metrics: plugins
                .metrics
                .unwrap_or_else(|| Arc::new(NoopMetrics) as SharedMetrics),
            transport,
            validator,
            rate_limiter,
            backpressure,
            dead_letter_topic,
            topics: RwLock::new(BTreeMap::new()),
            registration: tokio::sync::Mutex::new(()),
            last_error: Mutex::new(None),
            connected_since: Mutex::new(None),
            config,
        };

        Ok(Self {
            shell: Arc::new(shell),
        })
    }

    /// The wrapped transport
    pub fn transport(&self) -> &T {
        &self.shell.transport
    }

    pub fn config(&self) -> &ShellConfig {
        &self.shell.config
    }

    /// Physical dead-letter topic, if configured
    pub fn dead_letter_topic(&self) -> Option<&str> {
        self.shell.dead_letter_topic.as_deref()
    }

    pub fn circuit_stats(&self) -> CircuitStats {
        self.shell.circuit.stats()
    }

    pub fn backpressure_stats(&self) -> Option<BackpressureStats> {
        self.shell.backpressure.as_ref().map(BackpressureGate::stats)
    }

    /// Most recent error seen by this driver
    pub fn last_error(&self) -> Option<ErrorRecord> {
        lock(&self.shell.last_error).clone()
    }

    async fn activate(&self, topic: &str, options: &SubscribeOptions) -> PubSubResult<()> {
        let delivery = Shell::delivery_for(&self.shell, topic);
        self.shell
            .transport
            .subscribe_internal(topic, delivery, options)
            .await
            .map_err(|err| {
                self.shell.capture(&err);
                match err {
                    PubSubError::Subscription { .. } => err,
                    other => PubSubError::subscription(topic, other.to_string()),
                }
            })
    }
}

#[async_trait]
impl<T: Transport> PubSubDriver for BaseDriver<T> {
    fn name(&self) -> &str {
        self.shell.name()
    }

    async fn connect(&self) -> PubSubResult<()> {
        let _guard = self.shell.registration.lock().await;
        if self.shell.transport.is_connected() {
            warn!(driver = %self.name(), "connect() called on a connected driver, ignoring");
            return Ok(());
        }

        self.shell
            .transport
            .connect()
            .await
            .inspect_err(|err| self.shell.capture(err))?;
        *lock(&self.shell.connected_since) = Some(Utc::now());

        let pending: Vec<(String, SubscribeOptions)> = self
            .shell
            .topics_read()
            .iter()
            .map(|(topic, entry)| (topic.clone(), entry.options.clone()))
            .collect();
        for (topic, options) in &pending {
            if let Err(err) = self.activate(topic, options).await {
                error!(
                    driver = %self.name(),
                    topic = %topic,
                    error = %err,
                    "Failed to restore subscription"
                );
            }
        }

        info!(
            driver = %self.name(),
            subscriptions = pending.len(),
            "Driver connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> PubSubResult<()> {
        let _guard = self.shell.registration.lock().await;
        if !self.shell.transport.is_connected() {
            warn!(driver = %self.name(), "disconnect() called on a disconnected driver, ignoring");
            return Ok(());
        }

        self.shell
            .transport
            .disconnect()
            .await
            .inspect_err(|err| self.shell.capture(err))?;
        *lock(&self.shell.connected_since) = None;

        info!(driver = %self.name(), "Driver disconnected");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        data: Value,
        options: PublishOptions,
    ) -> PubSubResult<MessageId> {
        let shell = &*self.shell;

        if let Err(err) = validate_topic(topic).and_then(|()| shell.validator.validate(topic, &data))
        {
            shell
                .metrics
                .record_rejection(topic, RejectionReason::Validation);
            debug!(driver = %shell.name(), topic, error = %err, "Publish rejected by validation");
            return Err(err);
        }

        let topic = shell.physical(topic);

        if !shell.transport.is_connected() {
            return Err(PubSubError::NotConnected {
                driver: shell.name().to_string(),
            });
        }

        if let Some(limiter) = &shell.rate_limiter {
            limiter.check(&topic).inspect_err(|_| {
                shell
                    .metrics
                    .record_rejection(&topic, RejectionReason::RateLimit)
            })?;
        }

        shell.circuit.check().inspect_err(|_| {
            shell
                .metrics
                .record_rejection(&topic, RejectionReason::CircuitOpen)
        })?;

        let permit = match &shell.backpressure {
            Some(gate) => match gate.acquire().await {
                Ok(permit) => Some(permit),
                Err(err) => {
                    shell.circuit.on_abandoned();
                    shell
                        .metrics
                        .record_rejection(&topic, RejectionReason::Backpressure);
                    return Err(err);
                }
            },
            None => None,
        };

        let message = shell.envelope(&topic, data, &options);
        let start = Instant::now();

        let result = {
            let transport = &shell.transport;
            let (topic, message, options) = (topic.as_str(), &message, &options);
            shell
                .retry
                .run(move |_| transport.publish_internal(topic, message, options))
                .await
        };
        drop(permit);

        match result {
            Ok(()) => {
                shell.circuit.on_success();
                shell.metrics.record_publish(&topic, start.elapsed());
                if shell.sampler.should_log() {
                    debug!(
                        driver = %shell.name(),
                        topic = %topic,
                        message_id = %message.id,
                        correlation_id = ?message.correlation_id(),
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Message published"
                    );
                }
                Ok(message.id)
            }
            Err(RetryError {
                last_error,
                attempts,
            }) => {
                shell.circuit.on_failure();
                shell
                    .metrics
                    .record_publish_failure(&topic, last_error.code());
                error!(
                    driver = %shell.name(),
                    topic = %topic,
                    message_id = %message.id,
                    correlation_id = ?message.correlation_id(),
                    attempts,
                    error = %last_error,
                    "Publish failed"
                );

                shell
                    .dead_letter(&message, &last_error, FailureStage::Publish, attempts)
                    .await;

                let failure = PubSubError::PublishFailed {
                    topic,
                    correlation_id: message.correlation_id().map(str::to_string),
                    payload: shell
                        .config
                        .include_payload_in_errors
                        .then(|| message.data.clone()),
                    cause: Box::new(last_error),
                    attempts,
                };
                shell.capture(&failure);
                Err(failure)
            }
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> PubSubResult<SubscriptionId> {
        validate_topic(topic).map_err(|err| PubSubError::subscription(topic, err.to_string()))?;
        let topic = self.shell.physical(topic);
        let max = self.shell.config.max_handlers_per_topic;

        let _guard = self.shell.registration.lock().await;
        let registered = self
            .shell
            .topics_read()
            .get(&topic)
            .map_or(0, |entry| entry.handlers.len());

        if registered >= max {
            warn!(
                driver = %self.name(),
                topic = %topic,
                max_handlers_per_topic = max,
                "Handler limit reached"
            );
            return Err(PubSubError::subscription(
                &topic,
                format!("maximum handlers per topic ({}) reached", max),
            ));
        }

        if registered == 0 && self.shell.transport.is_connected() {
            self.activate(&topic, &options).await?;
        }

        let id = SubscriptionId::new();
        self.shell
            .topics_write()
            .entry(topic.clone())
            .or_insert_with(|| TopicEntry {
                handlers: Vec::new(),
                options: options.clone(),
            })
            .handlers
            .push(Registration { id, handler });

        debug!(
            driver = %self.name(),
            topic = %topic,
            subscription_id = %id,
            handlers = registered + 1,
            pattern = options.pattern,
            "Handler registered"
        );
        Ok(id)
    }

    async fn unsubscribe(&self, topic: &str, options: UnsubscribeOptions) -> PubSubResult<()> {
        let topic = self.shell.physical(topic);
        let _guard = self.shell.registration.lock().await;

        let Some(entry) = self.shell.topics_write().remove(&topic) else {
            debug!(driver = %self.name(), topic = %topic, "No active subscription, ignoring");
            return Ok(());
        };

        if self.shell.transport.is_connected() {
            let options = UnsubscribeOptions {
                pattern: options.pattern || entry.options.pattern,
            };
            self.shell
                .transport
                .unsubscribe_internal(&topic, &options)
                .await
                .inspect_err(|err| self.shell.capture(err))?;
        }

        info!(
            driver = %self.name(),
            topic = %topic,
            handlers = entry.handlers.len(),
            "Unsubscribed"
        );
        Ok(())
    }

    async fn unsubscribe_handler(&self, id: SubscriptionId) -> PubSubResult<()> {
        let _guard = self.shell.registration.lock().await;

        let emptied = {
            let mut topics = self.shell.topics_write();
            let Some((topic, entry)) = topics
                .iter_mut()
                .find(|(_, entry)| entry.handlers.iter().any(|r| r.id == id))
            else {
                debug!(driver = %self.name(), subscription_id = %id, "Unknown subscription, ignoring");
                return Ok(());
            };
            entry.handlers.retain(|r| r.id != id);
            let topic = topic.clone();
            if entry.handlers.is_empty() {
                topics.remove(&topic).map(|entry| (topic, entry))
            } else {
                None
            }
        };

        if let Some((topic, entry)) = emptied
            && self.shell.transport.is_connected()
        {
            self.shell
                .transport
                .unsubscribe_internal(&topic, &UnsubscribeOptions::from(&entry.options))
                .await
                .inspect_err(|err| self.shell.capture(err))?;
            debug!(driver = %self.name(), topic = %topic, "Last handler removed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shell.transport.is_connected()
    }

    fn subscribed_topics(&self) -> Vec<String> {
        self.shell.topics_read().keys().cloned().collect()
    }

    fn diagnostics(&self) -> DriverDiagnostics {
        let (subscriptions, handlers) = {
            let topics = self.shell.topics_read();
            (
                topics.len(),
                topics.values().map(|e| e.handlers.len()).sum(),
            )
        };
        let (load, inflight, max_inflight) = match &self.shell.backpressure {
            Some(gate) => (gate.signal(), gate.inflight(), gate.max_inflight()),
            None => (LoadSignal::Normal, 0, 0),
        };

        DriverDiagnostics {
            driver: self.name().to_string(),
            connected: self.is_connected(),
            subscriptions,
            handlers,
            circuit_state: Some(self.shell.circuit.state()),
            load: Some(load),
            inflight,
            max_inflight,
            last_error: self.last_error(),
            connected_since: *lock(&self.shell.connected_since),
        }
    }
}
