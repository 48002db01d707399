//! Kafka transport
//!
//! One idempotent `FutureProducer` publishes; one `StreamConsumer` bound to
//! `group_id` consumes every subscribed topic. Offsets are committed after
//! dispatch. A delivery that resolves to an error (handler failures
//! configured to propagate) is not committed itself, but commits are
//! cumulative per partition: the next successful record on the same
//! partition commits past it. Such a message is only redelivered if the
//! consumer restarts or rebalances before that happens, so failed messages
//! should be recovered from the dead-letter topic, not from Kafka.
//!
//! Kafka has no per-topic unsubscribe on a live consumer. Removing a topic
//! drops it from the dispatch table at once, so in-flight messages for it are
//! filtered, and then re-subscribes the consumer with the reduced topic set,
//! which triggers a group rebalance. Removing the last topic unsubscribes the
//! consumer entirely.

use async_trait::async_trait;
use courier_core::{
    Message, PubSubError, PubSubResult, PublishOptions, SubscribeOptions, UnsubscribeOptions,
};
use futures::StreamExt;
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message as KafkaMessage, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::shell::{BaseDriver, ShellConfig, ShellPlugins};
use crate::transport::{Delivery, Inbound, Transport};

const DRIVER: &str = "kafka";

/// Kafka transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Bootstrap servers (comma-separated)
    pub brokers: String,
    pub client_id: String,
    /// Consumer group shared by every instance of the service
    pub group_id: String,
    /// `auto.offset.reset` for new groups
    pub auto_offset_reset: String,
    /// Producer delivery timeout
    #[serde(with = "courier_reliability::duration")]
    pub message_timeout: Duration,
    /// PLAINTEXT, SSL, SASL_PLAINTEXT or SASL_SSL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl_mechanism: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: "courier".to_string(),
            group_id: "courier".to_string(),
            auto_offset_reset: "earliest".to_string(),
            message_timeout: Duration::from_secs(5),
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
        }
    }
}

impl KafkaConfig {
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            ..Self::default()
        }
    }

    /// Add SASL authentication over TLS
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set(
                "message.timeout.ms",
                self.message_timeout.as_millis().to_string(),
            )
            .set("acks", "all")
            .set("enable.idempotence", "true");
        self.apply_security(&mut config);
        config
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset);
        self.apply_security(&mut config);
        config
    }

    fn apply_security(&self, config: &mut ClientConfig) {
        let settings = [
            ("security.protocol", &self.security_protocol),
            ("sasl.mechanism", &self.sasl_mechanism),
            ("sasl.username", &self.sasl_username),
            ("sasl.password", &self.sasl_password),
            ("ssl.ca.location", &self.ssl_ca_location),
        ];
        for (key, value) in settings {
            if let Some(value) = value {
                config.set(key, value);
            }
        }
    }
}

type Routes = Arc<RwLock<BTreeMap<String, Delivery>>>;

struct Connection {
    producer: FutureProducer,
    consumer: Arc<StreamConsumer>,
    consume_loop: Option<JoinHandle<()>>,
}

/// Transport backed by librdkafka
pub struct KafkaTransport {
    config: KafkaConfig,
    routes: Routes,
    connection: Mutex<Option<Connection>>,
    connected: AtomicBool,
}

impl KafkaTransport {
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            routes: Arc::new(RwLock::new(BTreeMap::new())),
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Option<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn not_connected() -> PubSubError {
        PubSubError::NotConnected {
            driver: DRIVER.to_string(),
        }
    }

    fn topics(&self) -> Vec<String> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Point the consumer at the current topic set
    fn resubscribe(&self, consumer: &StreamConsumer) -> PubSubResult<()> {
        let topics = self.topics();
        if topics.is_empty() {
            consumer.unsubscribe();
            debug!("Kafka consumer unsubscribed from all topics");
            return Ok(());
        }
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&refs)
            .map_err(|e| PubSubError::subscription(refs.join(","), e.to_string()))?;
        info!(topics = ?topics, "Kafka consumer subscribed");
        Ok(())
    }
}

/// Header map built from envelope attributes
fn headers(attributes: Option<&courier_core::MessageMap>) -> Option<OwnedHeaders> {
    let attributes = attributes.filter(|a| !a.is_empty())?;
    let mut headers = OwnedHeaders::new_with_capacity(attributes.len());
    for (key, value) in attributes {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        headers = headers.insert(Header {
            key: key.as_str(),
            value: Some(text.as_str()),
        });
    }
    Some(headers)
}

/// Message key: explicit key, else the correlation id
fn message_key<'a>(message: &'a Message, options: &'a PublishOptions) -> Option<&'a str> {
    options.key.as_deref().or_else(|| message.correlation_id())
}

async fn consume(consumer: Arc<StreamConsumer>, routes: Routes) {
    let mut stream = consumer.stream();
    while let Some(result) = stream.next().await {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, "Kafka consumer error");
                continue;
            }
        };

        let topic = record.topic().to_string();
        let delivery = routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned();

        let Some(delivery) = delivery else {
            debug!(topic = %topic, "Dropping message for unsubscribed topic");
            if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                error!(error = %e, "Failed to commit offset");
            }
            continue;
        };

        debug!(
            topic = %topic,
            partition = record.partition(),
            offset = record.offset(),
            headers = record.headers().map_or(0, |h| h.count()),
            "Received Kafka message"
        );

        let inbound = Inbound::Raw {
            topic: topic.clone(),
            payload: record.payload().unwrap_or_default().to_vec(),
        };
        match delivery.deliver(inbound).await {
            Ok(()) => {
                if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                    error!(error = %e, "Failed to commit offset");
                }
            }
            Err(err) => {
                warn!(
                    topic = %topic,
                    offset = record.offset(),
                    error = %err,
                    "Delivery failed, not committing its offset"
                );
            }
        }
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    fn name(&self) -> &str {
        DRIVER
    }

    async fn connect(&self) -> PubSubResult<()> {
        let producer: FutureProducer = self.config.producer_config().create().map_err(|e| {
            PubSubError::connection(DRIVER, format!("Failed to create Kafka producer: {}", e))
        })?;
        let consumer: StreamConsumer = self.config.consumer_config().create().map_err(|e| {
            PubSubError::connection(DRIVER, format!("Failed to create Kafka consumer: {}", e))
        })?;

        *self.connection() = Some(Connection {
            producer,
            consumer: Arc::new(consumer),
            consume_loop: None,
        });
        self.connected.store(true, Ordering::SeqCst);
        info!(
            brokers = %self.config.brokers,
            group_id = %self.config.group_id,
            "Connected to Kafka"
        );
        Ok(())
    }

    async fn disconnect(&self) -> PubSubResult<()> {
        let connection = self.connection().take();
        self.connected.store(false, Ordering::SeqCst);
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        if let Some(connection) = connection {
            if let Some(handle) = connection.consume_loop {
                handle.abort();
            }
            connection.consumer.unsubscribe();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_internal(
        &self,
        topic: &str,
        message: &Message,
        options: &PublishOptions,
    ) -> PubSubResult<()> {
        let producer = self
            .connection()
            .as_ref()
            .map(|c| c.producer.clone())
            .ok_or_else(Self::not_connected)?;

        let payload = message.to_bytes()?;
        let key = message_key(message, options);
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(payload.as_slice());
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(headers) = headers(message.attributes.as_ref()) {
            record = record.headers(headers);
        }

        let (partition, offset) = producer
            .send(record, self.config.message_timeout)
            .await
            .map_err(|(e, _)| PubSubError::backend(format!("Failed to publish: {}", e)))?;

        debug!(
            topic,
            key = ?key,
            partition,
            offset,
            message_id = %message.id,
            "Published to Kafka"
        );
        Ok(())
    }

    async fn subscribe_internal(
        &self,
        topic: &str,
        delivery: Delivery,
        options: &SubscribeOptions,
    ) -> PubSubResult<()> {
        if options.pattern {
            return Err(PubSubError::unsupported(DRIVER, "pattern subscriptions"));
        }

        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), delivery);

        let mut guard = self.connection();
        let Some(connection) = guard.as_mut() else {
            return Err(Self::not_connected());
        };
        if let Err(err) = self.resubscribe(&connection.consumer) {
            self.routes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(topic);
            return Err(err);
        }

        if connection.consume_loop.is_none() {
            connection.consume_loop = Some(tokio::spawn(consume(
                Arc::clone(&connection.consumer),
                Arc::clone(&self.routes),
            )));
        }
        Ok(())
    }

    async fn unsubscribe_internal(
        &self,
        topic: &str,
        _options: &UnsubscribeOptions,
    ) -> PubSubResult<()> {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);

        let consumer = self
            .connection()
            .as_ref()
            .map(|c| Arc::clone(&c.consumer))
            .ok_or_else(Self::not_connected)?;
        self.resubscribe(&consumer)
    }
}

/// Kafka transport wrapped in the reliability shell
pub type KafkaDriver = BaseDriver<KafkaTransport>;

impl BaseDriver<KafkaTransport> {
    pub fn kafka(kafka: KafkaConfig, config: ShellConfig, plugins: ShellPlugins) -> PubSubResult<Self> {
        Self::new(KafkaTransport::new(kafka), config, plugins)
    }
}
