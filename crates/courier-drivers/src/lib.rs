//! # Courier Drivers
//!
//! Every transport implements the small [`Transport`] trait and is wrapped in
//! [`BaseDriver`], which supplies validation, namespacing, correlation ids,
//! rate limiting, circuit breaking, backpressure, retries, handler fan-out,
//! dead-letter routing, metrics and sampled logging.
//!
//! | Driver | Feature | Transport |
//! |---|---|---|
//! | [`MemoryDriver`] | always | [`MemoryTransport`] |
//! | `RedisDriver` | `redis` | `RedisTransport` |
//! | `KafkaDriver` | `kafka` | `KafkaTransport` |
//!
//! ```rust
//! use courier_core::{PubSubDriver, PublishOptions, SubscribeOptions, handler_fn};
//! use courier_drivers::{MemoryDriver, ShellConfig, ShellPlugins};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let driver = MemoryDriver::memory(ShellConfig::default(), ShellPlugins::default()).unwrap();
//! driver.connect().await.unwrap();
//!
//! driver
//!     .subscribe("orders", handler_fn(|_msg| async { Ok(()) }), SubscribeOptions::default())
//!     .await
//!     .unwrap();
//! driver
//!     .publish("orders", json!({"id": 1}), PublishOptions::default())
//!     .await
//!     .unwrap();
//! # });
//! ```

pub mod dlq;
pub mod memory;
pub mod shell;
pub mod transport;

#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "redis")]
pub mod redis;

pub use dlq::{DeadLetter, DeadLetterError};
pub use memory::{MemoryBus, MemoryConfig, MemoryDriver, MemoryTransport};
pub use shell::{BaseDriver, ShellConfig, ShellPlugins};
pub use transport::{Delivery, Inbound, Transport};

#[cfg(feature = "kafka")]
pub use self::kafka::{KafkaConfig, KafkaDriver, KafkaTransport};
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisDriver, RedisTransport};
