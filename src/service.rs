//! # Pub/Sub service
//!
//! [`PubSubService`] is the application-facing handle. It builds its driver
//! through a [`DriverRegistry`], applies the configured namespace to every
//! topic it is given, and hands topics back to handlers and callers without
//! the prefix.

use crate::config::PubSubConfig;
use crate::health::HealthMonitor;
use crate::registry::DriverRegistry;
use courier_core::{
    HandlerResult, Message, MessageId, Namespace, PubSubDriver, PubSubResult, PublishOptions,
    SharedHandler, SubscribeOptions, SubscriptionId, UnsubscribeOptions, handler_fn, namespaced,
};
use courier_drivers::ShellPlugins;
use courier_observability::{HealthSnapshot, SharedMetrics};
use courier_reliability::SharedValidator;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Builder for [`PubSubService`]
#[derive(Default)]
pub struct PubSubServiceBuilder {
    config: PubSubConfig,
    registry: Option<DriverRegistry>,
    metrics: Option<SharedMetrics>,
    validator: Option<SharedValidator>,
    driver: Option<Arc<dyn PubSubDriver>>,
}

impl PubSubServiceBuilder {
    pub fn new(config: PubSubConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Resolve the driver through `registry` instead of the built-in one
    pub fn registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Custom validator run after the size check
    pub fn validator(mut self, validator: SharedValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Use a pre-built driver; `config.driver` is ignored
    pub fn driver(mut self, driver: Arc<dyn PubSubDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Validate configuration and create the driver
    ///
    /// # Errors
    ///
    /// Returns `PubSubError::Config` for invalid configuration and
    /// `PubSubError::DriverNotFound` for unknown driver names.
    pub fn build(self) -> PubSubResult<PubSubService> {
        self.config.validate()?;
        let namespace = self.config.namespace()?;

        let driver = match self.driver {
            Some(driver) => driver,
            None => {
                let plugins = ShellPlugins {
                    validator: self.validator,
                    metrics: self.metrics,
                };
                self.registry
                    .unwrap_or_default()
                    .create(&self.config, plugins)?
            }
        };

        info!(
            driver = driver.name(),
            namespace = namespace.as_ref().map(Namespace::as_str),
            "Pub/sub service created"
        );

        Ok(PubSubService {
            health: HealthMonitor::new(&self.config.health),
            driver,
            namespace,
            config: self.config,
        })
    }
}

/// Application-facing pub/sub handle
pub struct PubSubService {
    driver: Arc<dyn PubSubDriver>,
    namespace: Option<Namespace>,
    health: HealthMonitor,
    config: PubSubConfig,
}

impl PubSubService {
    pub fn builder(config: PubSubConfig) -> PubSubServiceBuilder {
        PubSubServiceBuilder::new(config)
    }

    /// Service over the built-in drivers
    pub fn new(config: PubSubConfig) -> PubSubResult<Self> {
        Self::builder(config).build()
    }

    /// Service configured from `COURIER_*` environment variables
    pub fn from_env() -> PubSubResult<Self> {
        Self::new(PubSubConfig::from_env()?)
    }

    pub fn driver(&self) -> &Arc<dyn PubSubDriver> {
        &self.driver
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub fn config(&self) -> &PubSubConfig {
        &self.config
    }

    pub async fn connect(&self) -> PubSubResult<()> {
        self.driver.connect().await
    }

    pub async fn disconnect(&self) -> PubSubResult<()> {
        self.driver.disconnect().await
    }

    /// Disconnect, logging instead of returning failures
    pub async fn shutdown(&self) {
        match self.driver.disconnect().await {
            Ok(()) => info!(driver = self.driver.name(), "Pub/sub service shut down"),
            Err(e) => warn!(
                driver = self.driver.name(),
                error = %e,
                "Disconnect failed during shutdown"
            ),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    pub async fn publish(
        &self,
        topic: &str,
        data: Value,
        options: PublishOptions,
    ) -> PubSubResult<MessageId> {
        self.driver
            .publish(&self.physical(topic), data, options)
            .await
    }

    /// Serialize `value` and publish it
    pub async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        value: &T,
        options: PublishOptions,
    ) -> PubSubResult<MessageId> {
        let data = serde_json::to_value(value)?;
        self.publish(topic, data, options).await
    }

    /// Register `handler`; it sees topics without the namespace
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> PubSubResult<SubscriptionId> {
        let handler = match &self.namespace {
            Some(ns) => logical_topics(ns.clone(), handler),
            None => handler,
        };
        self.driver
            .subscribe(&self.physical(topic), handler, options)
            .await
    }

    /// Register a handler that receives payloads decoded as `T`
    ///
    /// A payload that does not decode fails the delivery like any other
    /// handler error.
    pub async fn subscribe_typed<T, F, Fut>(
        &self,
        topic: &str,
        handler: F,
        options: SubscribeOptions,
    ) -> PubSubResult<SubscriptionId>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let typed = handler_fn(move |msg: Message| {
            let decoded = msg.decode::<T>().map(&*handler);
            async move {
                match decoded {
                    Ok(fut) => fut.await,
                    Err(e) => Err(e.into()),
                }
            }
        });
        self.subscribe(topic, typed, options).await
    }

    pub async fn unsubscribe(&self, topic: &str, options: UnsubscribeOptions) -> PubSubResult<()> {
        self.driver.unsubscribe(&self.physical(topic), options).await
    }

    pub async fn unsubscribe_handler(&self, id: SubscriptionId) -> PubSubResult<()> {
        self.driver.unsubscribe_handler(id).await
    }

    /// Active topics without the namespace
    pub fn subscribed_topics(&self) -> Vec<String> {
        let topics = self.driver.subscribed_topics();
        match &self.namespace {
            Some(ns) => topics.iter().map(|t| ns.strip(t).to_string()).collect(),
            None => topics,
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot(self.driver.as_ref())
    }

    fn physical(&self, topic: &str) -> String {
        namespaced(self.namespace.as_ref(), topic)
    }
}

impl std::fmt::Debug for PubSubService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubService")
            .field("driver", &self.driver.name())
            .field("namespace", &self.namespace)
            .field("connected", &self.driver.is_connected())
            .finish()
    }
}

fn logical_topics(namespace: Namespace, handler: SharedHandler) -> SharedHandler {
    handler_fn(move |mut msg: Message| {
        msg.topic = namespace.strip(&msg.topic).to_string();
        handler.handle(msg)
    })
}
