//! Core driver contract every transport implements.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::{
    diagnostics::DriverDiagnostics,
    error::{PubSubError, PubSubResult},
    handler::SharedHandler,
    message::MessageId,
    options::{PublishOptions, SubscribeOptions, UnsubscribeOptions},
};

/// Identifier of one handler registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Uniform publish/subscribe contract
///
/// Implementations must treat `connect`/`disconnect` as idempotent and
/// `unsubscribe` of an unknown topic as a no-op.
///
/// # Example
///
/// ```rust,no_run
/// use courier_core::{handler_fn, PubSubDriver, PublishOptions, SubscribeOptions};
/// use serde_json::json;
///
/// async fn example(driver: &dyn PubSubDriver) -> Result<(), Box<dyn std::error::Error>> {
///     driver.connect().await?;
///
///     let handler = handler_fn(|msg| async move {
///         println!("{} -> {}", msg.topic, msg.data);
///         Ok(())
///     });
///     driver
///         .subscribe("user.created", handler, SubscribeOptions::default())
///         .await?;
///
///     driver
///         .publish("user.created", json!({"id": "u1"}), PublishOptions::default())
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait PubSubDriver: Send + Sync {
    /// Driver name as used in configuration (`memory`, `redis`, `kafka`, …)
    fn name(&self) -> &str;

    /// Connect to the transport
    ///
    /// # Errors
    ///
    /// Returns `PubSubError::Connection` if the transport cannot be reached
    async fn connect(&self) -> PubSubResult<()>;

    /// Disconnect from the transport
    async fn disconnect(&self) -> PubSubResult<()>;

    /// Publish `data` to `topic`
    ///
    /// Returns the id assigned to the published envelope.
    ///
    /// # Errors
    ///
    /// Returns `PubSubError::Validation` for rejected payloads and
    /// `PubSubError::PublishFailed` once the transport gave up
    async fn publish(
        &self,
        topic: &str,
        data: Value,
        options: PublishOptions,
    ) -> PubSubResult<MessageId>;

    /// Register `handler` for messages on `topic`
    ///
    /// # Errors
    ///
    /// Returns `PubSubError::Subscription` if registration fails
    async fn subscribe(
        &self,
        topic: &str,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> PubSubResult<SubscriptionId>;

    /// Remove every handler registered on `topic`
    async fn unsubscribe(&self, topic: &str, options: UnsubscribeOptions) -> PubSubResult<()>;

    /// Remove one handler registration
    async fn unsubscribe_handler(&self, id: SubscriptionId) -> PubSubResult<()> {
        let _ = id;
        Err(PubSubError::unsupported(self.name(), "unsubscribe_handler"))
    }

    /// Whether the driver currently holds a live connection
    fn is_connected(&self) -> bool;

    /// Topics with at least one active subscription
    fn subscribed_topics(&self) -> Vec<String>;

    /// Snapshot of driver state for health reporting
    fn diagnostics(&self) -> DriverDiagnostics {
        DriverDiagnostics::basic(
            self.name(),
            self.is_connected(),
            self.subscribed_topics().len(),
        )
    }
}
