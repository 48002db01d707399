//! # Courier
//!
//! Driver-agnostic publish/subscribe. Application code talks to one
//! [`PubSubService`]; the configured driver (in-memory, Redis or Kafka) is
//! wrapped in a reliability shell providing validation, namespacing,
//! correlation ids, rate limiting, circuit breaking, backpressure, retries,
//! dead-letter routing, metrics and health.
//!
//! ## Quick start
//!
//! ```rust
//! use courier::{PubSubConfig, PubSubService, PublishOptions, SubscribeOptions, handler_fn};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mut config = PubSubConfig::default();
//! config.namespace = Some("staging".into());
//!
//! let service = PubSubService::new(config).unwrap();
//! service.connect().await.unwrap();
//!
//! service
//!     .subscribe(
//!         "user.created",
//!         handler_fn(|msg| async move {
//!             assert_eq!(msg.topic, "user.created");
//!             Ok(())
//!         }),
//!         SubscribeOptions::default(),
//!     )
//!     .await
//!     .unwrap();
//!
//! service
//!     .publish("user.created", json!({"id": "u1"}), PublishOptions::default())
//!     .await
//!     .unwrap();
//!
//! service.shutdown().await;
//! # });
//! ```
//!
//! ## Crates
//!
//! - [`courier_core`]: message envelope, topics, errors and the driver contract
//! - [`courier_reliability`]: validators, rate limiter, circuit breaker,
//!   backpressure and retry
//! - [`courier_observability`]: metrics sinks, log sampling, tracing setup and
//!   health snapshots
//! - [`courier_drivers`]: the reliability shell and the transports

pub mod config;
pub mod health;
pub mod registration;
pub mod registry;
pub mod service;

pub use config::{ConfigError, HealthConfig, PubSubConfig};
pub use health::HealthMonitor;
pub use registration::{RegistrationReport, SubscriberSet};
pub use registry::{DriverFactory, DriverRegistry};
pub use service::{PubSubService, PubSubServiceBuilder};

pub use courier_core::{
    BoxError, HandlerResult, Message, MessageHandler, MessageId, Namespace, PubSubDriver,
    PubSubError, PubSubResult, PublishOptions, SharedHandler, SubscribeOptions, SubscriptionId,
    UnsubscribeOptions, handler_fn,
};
pub use courier_observability::{HealthSnapshot, HealthStatus, init_tracing};

pub use courier_core as core;
pub use courier_drivers as drivers;
pub use courier_observability as observability;
pub use courier_reliability as reliability;
