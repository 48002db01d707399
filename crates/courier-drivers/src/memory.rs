//! In-process transport
//!
//! A [`MemoryBus`] is a cheap, cloneable handle to one shared routing table.
//! Every [`MemoryTransport`] built from the same bus sees the others'
//! messages, which makes it the transport of choice for tests and
//! single-process deployments. Nothing is persisted.
//!
//! Delivery is asynchronous: publishing enqueues the message on every
//! matching subscription and returns. Each subscription sees messages in
//! publish order. Use [`MemoryBus::settle`] to wait for queued deliveries.

use async_trait::async_trait;
use courier_core::{
    Message, PubSubError, PubSubResult, PublishOptions, SubscribeOptions, TopicPattern,
    UnsubscribeOptions,
};
use serde::{Deserialize, Serialize};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

use crate::shell::{BaseDriver, ShellConfig, ShellPlugins};
use crate::transport::{Delivery, Inbound, Transport};

/// Memory transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Treat `*` and `**` in subscribed topics as wildcards even without
    /// `SubscribeOptions::pattern`
    pub wildcards: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { wildcards: true }
    }
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
enum Matcher {
    Exact(String),
    Pattern(TopicPattern),
}

impl Matcher {
    fn matches(&self, topic: &str) -> bool {
        match self {
            Matcher::Exact(exact) => exact == topic,
            Matcher::Pattern(pattern) => pattern.matches(topic),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Matcher::Exact(exact) => exact,
            Matcher::Pattern(pattern) => pattern.as_str(),
        }
    }
}

#[derive(Debug)]
struct BusSubscription {
    owner: u64,
    matcher: Matcher,
    queue: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct BusState {
    subscriptions: Vec<BusSubscription>,
    published: u64,
}

/// Deliveries queued on the bus but not yet handled
#[derive(Debug, Default)]
struct Inflight {
    pending: AtomicUsize,
    idle: Notify,
}

impl Inflight {
    fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Shared in-process routing table
///
/// Each subscription owns a FIFO queue drained by its own task, so a
/// publish returns as soon as the message is enqueued. Handlers never run
/// on the publisher's task and a slow handler only delays its own queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<RwLock<BusState>>,
    inflight: Arc<Inflight>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions across every transport on this bus
    pub fn subscription_count(&self) -> usize {
        self.read(|state| state.subscriptions.len())
    }

    /// Messages routed through this bus so far
    pub fn published(&self) -> u64 {
        self.read(|state| state.published)
    }

    /// Deliveries enqueued but not yet handed to their handler
    pub fn pending(&self) -> usize {
        self.inflight.pending.load(Ordering::Acquire)
    }

    /// Wait until every enqueued delivery has been handled
    pub async fn settle(&self) {
        loop {
            let idle = self.inflight.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    fn read<R>(&self, f: impl FnOnce(&BusState) -> R) -> R {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<R>(&self, f: impl FnOnce(&mut BusState) -> R) -> R {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn add(&self, owner: u64, matcher: Matcher, delivery: Delivery) {
        let (queue, mut rx) = mpsc::unbounded_channel::<Message>();
        let inflight = Arc::clone(&self.inflight);
        let subscribed = matcher.as_str().to_string();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let handled = delivery.deliver(Inbound::Envelope(message.clone()));
                let outcome = AssertUnwindSafe(handled).catch_unwind().await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(
                        topic = %message.topic,
                        message_id = %message.id,
                        error = %err,
                        "In-memory delivery failed"
                    ),
                    Err(_) => warn!(
                        topic = %message.topic,
                        message_id = %message.id,
                        "In-memory handler panicked"
                    ),
                }
                inflight.done();
            }
            debug!(subscription = %subscribed, "In-memory subscription drained");
        });

        self.write(|state| {
            state.subscriptions.push(BusSubscription {
                owner,
                matcher,
                queue,
            })
        });
    }

    fn remove(&self, owner: u64, topic: &str) -> usize {
        self.write(|state| {
            let before = state.subscriptions.len();
            state
                .subscriptions
                .retain(|s| !(s.owner == owner && s.matcher.as_str() == topic));
            before - state.subscriptions.len()
        })
    }

    fn remove_owner(&self, owner: u64) -> usize {
        self.write(|state| {
            let before = state.subscriptions.len();
            state.subscriptions.retain(|s| s.owner != owner);
            before - state.subscriptions.len()
        })
    }

    /// Enqueue `message` on every matching subscription
    fn route(&self, message: &Message) -> usize {
        self.write(|state| {
            state.published += 1;
            let mut enqueued = 0;
            for subscription in state
                .subscriptions
                .iter()
                .filter(|s| s.matcher.matches(&message.topic))
            {
                self.inflight.pending.fetch_add(1, Ordering::AcqRel);
                if subscription.queue.send(message.clone()).is_ok() {
                    enqueued += 1;
                } else {
                    self.inflight.done();
                }
            }
            enqueued
        })
    }
}

/// Transport backed by a [`MemoryBus`]
#[derive(Debug)]
pub struct MemoryTransport {
    bus: MemoryBus,
    config: MemoryConfig,
    owner: u64,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Transport on a private bus
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_bus(MemoryBus::new(), config)
    }

    /// Transport sharing `bus` with other transports
    pub fn with_bus(bus: MemoryBus, config: MemoryConfig) -> Self {
        Self {
            bus,
            config,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            connected: AtomicBool::new(false),
        }
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    fn ensure_connected(&self) -> PubSubResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(PubSubError::NotConnected {
                driver: self.name().to_string(),
            })
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> PubSubResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> PubSubResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        let removed = self.bus.remove_owner(self.owner);
        debug!(removed, "Released in-memory subscriptions");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_internal(
        &self,
        topic: &str,
        message: &Message,
        _options: &PublishOptions,
    ) -> PubSubResult<()> {
        self.ensure_connected()?;
        let enqueued = self.bus.route(message);
        debug!(topic, message_id = %message.id, enqueued, "Routed in-memory message");
        Ok(())
    }

    async fn subscribe_internal(
        &self,
        topic: &str,
        delivery: Delivery,
        options: &SubscribeOptions,
    ) -> PubSubResult<()> {
        self.ensure_connected()?;
        let matcher = if options.pattern || self.config.wildcards {
            Matcher::Pattern(TopicPattern::parse(topic))
        } else {
            Matcher::Exact(topic.to_string())
        };
        self.bus.add(self.owner, matcher, delivery);
        Ok(())
    }

    async fn unsubscribe_internal(
        &self,
        topic: &str,
        _options: &UnsubscribeOptions,
    ) -> PubSubResult<()> {
        self.bus.remove(self.owner, topic);
        Ok(())
    }
}

/// Memory transport wrapped in the reliability shell
pub type MemoryDriver = BaseDriver<MemoryTransport>;

impl BaseDriver<MemoryTransport> {
    /// Memory driver on a private bus
    pub fn memory(config: ShellConfig, plugins: ShellPlugins) -> PubSubResult<Self> {
        Self::new(MemoryTransport::new(MemoryConfig::default()), config, plugins)
    }

    /// Memory driver sharing `bus`
    pub fn on_bus(
        bus: MemoryBus,
        memory: MemoryConfig,
        config: ShellConfig,
        plugins: ShellPlugins,
    ) -> PubSubResult<Self> {
        Self::new(MemoryTransport::with_bus(bus, memory), config, plugins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recording(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Delivery {
        let log = Arc::clone(log);
        Delivery::new(move |inbound: Inbound| {
            let log = Arc::clone(&log);
            async move {
                log.lock()
                    .unwrap()
                    .push(format!("{}:{}", tag, inbound.topic()));
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let transport = MemoryTransport::new(MemoryConfig::default());
        let msg = Message::new("orders", json!(1));

        let err = transport
            .publish_internal("orders", &msg, &PublishOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PUBSUB_NOT_CONNECTED");
    }

    #[tokio::test]
    async fn test_each_subscription_sees_publish_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = MemoryTransport::new(MemoryConfig::default());
        transport.connect().await.unwrap();

        transport
            .subscribe_internal("orders.*", recording(&log, "a"), &SubscribeOptions::default())
            .await
            .unwrap();
        transport
            .subscribe_internal("orders.eu", recording(&log, "b"), &SubscribeOptions::default())
            .await
            .unwrap();
        transport
            .subscribe_internal("users", recording(&log, "c"), &SubscribeOptions::default())
            .await
            .unwrap();

        for topic in ["orders.eu", "orders.us", "orders.eu"] {
            let msg = Message::new(topic, json!({}));
            transport
                .publish_internal(topic, &msg, &PublishOptions::default())
                .await
                .unwrap();
        }
        transport.bus().settle().await;

        let log = log.lock().unwrap();
        let by = |tag: &str| -> Vec<String> {
            log.iter()
                .filter(|entry| entry.starts_with(tag))
                .cloned()
                .collect()
        };
        assert_eq!(by("a:"), vec!["a:orders.eu", "a:orders.us", "a:orders.eu"]);
        assert_eq!(by("b:"), vec!["b:orders.eu", "b:orders.eu"]);
        assert!(by("c:").is_empty());
        assert_eq!(transport.bus().published(), 3);
        assert_eq!(transport.bus().pending(), 0);
    }

    #[tokio::test]
    async fn test_publish_returns_before_handler_finishes() {
        let transport = MemoryTransport::new(MemoryConfig::default());
        transport.connect().await.unwrap();

        let release = Arc::new(tokio::sync::Semaphore::new(0));
        let handled = Arc::new(AtomicUsize::new(0));
        let delivery = {
            let release = Arc::clone(&release);
            let handled = Arc::clone(&handled);
            Delivery::new(move |_inbound: Inbound| {
                let release = Arc::clone(&release);
                let handled = Arc::clone(&handled);
                async move {
                    release.acquire().await.unwrap().forget();
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        transport
            .subscribe_internal("jobs", delivery, &SubscribeOptions::default())
            .await
            .unwrap();

        let msg = Message::new("jobs", json!({"n": 1}));
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            transport.publish_internal("jobs", &msg, &PublishOptions::default()),
        )
        .await
        .expect("publish must not wait for the handler")
        .unwrap();
        assert_eq!(transport.bus().pending(), 1);
        assert_eq!(handled.load(Ordering::SeqCst), 0);

        release.add_permits(1);
        transport.bus().settle().await;
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let transport = MemoryTransport::new(MemoryConfig::default());
        transport.connect().await.unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        transport
            .subscribe_internal(
                "jobs",
                Delivery::new(|inbound: Inbound| async move {
                    if inbound.topic() == "jobs" {
                        panic!("handler bug");
                    }
                    Ok(())
                }),
                &SubscribeOptions::default(),
            )
            .await
            .unwrap();
        transport
            .subscribe_internal("jobs", recording(&log, "ok"), &SubscribeOptions::default())
            .await
            .unwrap();

        for n in 0..2 {
            let msg = Message::new("jobs", json!(n));
            transport
                .publish_internal("jobs", &msg, &PublishOptions::default())
                .await
                .unwrap();
        }
        transport.bus().settle().await;

        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(transport.bus().pending(), 0);
    }

    #[tokio::test]
    async fn test_wildcards_disabled_matches_literally() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = MemoryTransport::new(MemoryConfig { wildcards: false });
        transport.connect().await.unwrap();

        transport
            .subscribe_internal("orders.*", recording(&log, "a"), &SubscribeOptions::default())
            .await
            .unwrap();

        for topic in ["orders.eu", "orders.*"] {
            let msg = Message::new(topic, json!({}));
            transport
                .publish_internal(topic, &msg, &PublishOptions::default())
                .await
                .unwrap();
        }
        transport.bus().settle().await;

        assert_eq!(*log.lock().unwrap(), vec!["a:orders.*"]);
    }

    #[tokio::test]
    async fn test_shared_bus_and_disconnect() {
        let bus = MemoryBus::new();
        let first = MemoryTransport::with_bus(bus.clone(), MemoryConfig::default());
        let second = MemoryTransport::with_bus(bus.clone(), MemoryConfig::default());
        first.connect().await.unwrap();
        second.connect().await.unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        first
            .subscribe_internal("events", recording(&log, "first"), &SubscribeOptions::default())
            .await
            .unwrap();

        let msg = Message::new("events", json!(true));
        second
            .publish_internal("events", &msg, &PublishOptions::default())
            .await
            .unwrap();
        bus.settle().await;
        assert_eq!(*log.lock().unwrap(), vec!["first:events"]);

        first.disconnect().await.unwrap();
        assert_eq!(bus.subscription_count(), 0);

        second
            .publish_internal("events", &msg, &PublishOptions::default())
            .await
            .unwrap();
        bus.settle().await;
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_only_removes_own_subscription() {
        let bus = MemoryBus::new();
        let first = MemoryTransport::with_bus(bus.clone(), MemoryConfig::default());
        let second = MemoryTransport::with_bus(bus.clone(), MemoryConfig::default());
        first.connect().await.unwrap();
        second.connect().await.unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        for transport in [&first, &second] {
            transport
                .subscribe_internal("events", recording(&log, "x"), &SubscribeOptions::default())
                .await
                .unwrap();
        }

        first
            .unsubscribe_internal("events", &UnsubscribeOptions::default())
            .await
            .unwrap();
        assert_eq!(bus.subscription_count(), 1);
    }
}
