//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use courier::drivers::{
    BaseDriver, Delivery, MemoryBus, MemoryConfig, MemoryTransport, ShellPlugins, Transport,
};
use courier::{
    Message, PubSubConfig, PubSubDriver, PubSubError, PubSubResult, PubSubService,
    PublishOptions, SubscribeOptions, UnsubscribeOptions, handler_fn,
};
use courier::{DriverRegistry, SharedHandler};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Memory transport that counts publishes and fails or blocks on demand
///
/// Failures and holds only apply to topics other than `exempt`, so a
/// dead-letter topic keeps working while the primary topic is broken.
pub struct SpyTransport {
    inner: MemoryTransport,
    pub publishes: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    pub gate: Option<Arc<Semaphore>>,
    exempt: Option<String>,
}

/// Handles kept by the test after the transport moved into a driver
#[derive(Clone)]
pub struct Spy {
    pub publishes: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    pub bus: MemoryBus,
}

impl Spy {
    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

impl SpyTransport {
    pub fn new(bus: MemoryBus) -> (Self, Spy) {
        let spy = Spy {
            publishes: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
            bus: bus.clone(),
        };
        let transport = Self {
            inner: MemoryTransport::with_bus(bus, MemoryConfig::default()),
            publishes: Arc::clone(&spy.publishes),
            fail: Arc::clone(&spy.fail),
            gate: None,
            exempt: None,
        };
        (transport, spy)
    }

    pub fn exempt(mut self, topic: impl Into<String>) -> Self {
        self.exempt = Some(topic.into());
        self
    }

    /// Every publish must acquire and keep a permit until the test adds one
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn is_exempt(&self, topic: &str) -> bool {
        self.exempt.as_deref().is_some_and(|t| topic.ends_with(t))
    }
}

#[async_trait]
impl Transport for SpyTransport {
    fn name(&self) -> &str {
        "spy"
    }

    async fn connect(&self) -> PubSubResult<()> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> PubSubResult<()> {
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn publish_internal(
        &self,
        topic: &str,
        message: &Message,
        options: &PublishOptions,
    ) -> PubSubResult<()> {
        if !self.is_exempt(topic) {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let permit = gate
                    .acquire()
                    .await
                    .map_err(|e| PubSubError::backend(e.to_string()))?;
                permit.forget();
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(PubSubError::backend("broker unavailable"));
            }
        }
        self.inner.publish_internal(topic, message, options).await
    }

    async fn subscribe_internal(
        &self,
        topic: &str,
        delivery: Delivery,
        options: &SubscribeOptions,
    ) -> PubSubResult<()> {
        self.inner.subscribe_internal(topic, delivery, options).await
    }

    async fn unsubscribe_internal(
        &self,
        topic: &str,
        options: &UnsubscribeOptions,
    ) -> PubSubResult<()> {
        self.inner.unsubscribe_internal(topic, options).await
    }
}

/// Retry settings that keep tests fast
pub fn fast_config() -> PubSubConfig {
    let mut config = PubSubConfig::default();
    config.retry.max_retries = 0;
    config.retry.retry_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config
}

/// Memory-backed service plus the bus its deliveries are queued on
pub async fn memory_service(config: PubSubConfig) -> (PubSubService, MemoryBus) {
    let registry = DriverRegistry::with_builtin();
    let bus = registry.memory_bus().clone();
    let service = PubSubService::builder(config)
        .registry(registry)
        .build()
        .unwrap();
    service.connect().await.unwrap();
    (service, bus)
}

/// Service whose driver runs over a [`SpyTransport`]
pub async fn spy_service(
    config: PubSubConfig,
    customize: impl FnOnce(SpyTransport) -> SpyTransport + Send + Sync + 'static,
) -> (PubSubService, Spy) {
    let shared: Arc<Mutex<Option<Spy>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&shared);
    let customize = Mutex::new(Some(customize));

    let mut registry = DriverRegistry::new();
    registry.register("spy", move |config, plugins: ShellPlugins| {
        let (transport, spy) = SpyTransport::new(MemoryBus::new());
        let transport = match customize.lock().unwrap().take() {
            Some(customize) => customize(transport),
            None => transport,
        };
        *slot.lock().unwrap() = Some(spy);
        let driver = BaseDriver::new(transport, config.shell_config()?, plugins)?;
        Ok(Arc::new(driver) as Arc<dyn PubSubDriver>)
    });

    let mut config = config;
    config.driver = "spy".to_string();
    let service = PubSubService::builder(config)
        .registry(registry)
        .build()
        .unwrap();
    service.connect().await.unwrap();

    let spy = shared.lock().unwrap().take().unwrap();
    (service, spy)
}

/// Handler that records every message it sees
pub fn recorder() -> (SharedHandler, Arc<Mutex<Vec<Message>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |msg: Message| {
        sink.lock().unwrap().push(msg);
        async { Ok(()) }
    });
    (handler, seen)
}
