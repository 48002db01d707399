//! Driver registry
//!
//! Maps configuration driver names to factories. Built-in drivers are
//! registered by [`DriverRegistry::with_builtin`]; applications add their own
//! through [`DriverRegistry::register`].

use crate::config::PubSubConfig;
use courier_core::{PubSubDriver, PubSubError, PubSubResult};
use courier_drivers::{MemoryBus, MemoryDriver, ShellPlugins};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a driver from configuration and plugins
pub type DriverFactory =
    Arc<dyn Fn(&PubSubConfig, ShellPlugins) -> PubSubResult<Arc<dyn PubSubDriver>> + Send + Sync>;

/// Named driver factories
#[derive(Clone)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
    memory_bus: MemoryBus,
}

impl DriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            memory_bus: MemoryBus::new(),
        }
    }

    /// Registry with `memory` and every transport compiled in
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        // Services created from one registry share one in-process bus
        let bus = registry.memory_bus.clone();
        registry.register("memory", move |config, plugins| {
            let driver =
                MemoryDriver::on_bus(bus.clone(), config.memory.clone(), config.shell_config()?, plugins)?;
            Ok(Arc::new(driver) as Arc<dyn PubSubDriver>)
        });

        #[cfg(feature = "redis")]
        registry.register("redis", |config, plugins| {
            let driver = courier_drivers::RedisDriver::redis(
                config.redis.clone(),
                config.shell_config()?,
                plugins,
            )?;
            Ok(Arc::new(driver) as Arc<dyn PubSubDriver>)
        });

        #[cfg(feature = "kafka")]
        registry.register("kafka", |config, plugins| {
            let driver = courier_drivers::KafkaDriver::kafka(
                config.kafka.clone(),
                config.shell_config()?,
                plugins,
            )?;
            Ok(Arc::new(driver) as Arc<dyn PubSubDriver>)
        });

        registry
    }

    /// Register or replace the factory for `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&PubSubConfig, ShellPlugins) -> PubSubResult<Arc<dyn PubSubDriver>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered driver names in sorted order
    pub fn available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Bus shared by every `memory` driver this registry creates
    pub fn memory_bus(&self) -> &MemoryBus {
        &self.memory_bus
    }

    /// Build the driver named by `config.driver`
    ///
    /// # Errors
    ///
    /// Returns `PubSubError::DriverNotFound` for unknown names, or whatever
    /// the factory returns.
    pub fn create(
        &self,
        config: &PubSubConfig,
        plugins: ShellPlugins,
    ) -> PubSubResult<Arc<dyn PubSubDriver>> {
        let factory = self
            .factories
            .get(&config.driver)
            .ok_or_else(|| PubSubError::DriverNotFound {
                driver: config.driver.clone(),
                available: self.available(),
            })?;
        factory(config, plugins)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.available())
            .finish()
    }
}
