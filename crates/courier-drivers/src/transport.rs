//! Transport contract wrapped by [`BaseDriver`](crate::BaseDriver).
//!
//! A transport only moves envelopes on and off the wire. Validation, gates,
//! retries, fan-out to handlers and dead-letter routing all live in the
//! shell, so each transport sees at most one subscription per topic.

use async_trait::async_trait;
use courier_core::{
    Message, PubSubResult, PublishOptions, SubscribeOptions, UnsubscribeOptions,
};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A delivery coming off the wire
#[derive(Debug, Clone)]
pub enum Inbound {
    /// An already decoded envelope (in-process transports)
    Envelope(Message),
    /// Raw bytes received on `topic`
    Raw { topic: String, payload: Vec<u8> },
}

impl Inbound {
    /// Topic the delivery arrived on
    pub fn topic(&self) -> &str {
        match self {
            Inbound::Envelope(message) => &message.topic,
            Inbound::Raw { topic, .. } => topic,
        }
    }
}

type DeliveryFn = dyn Fn(Inbound) -> BoxFuture<'static, PubSubResult<()>> + Send + Sync;

/// Callback a transport invokes for every message on a subscription
///
/// Resolves to an error only when handler failures are configured to
/// propagate; transports with acknowledgements use it to skip the ack.
#[derive(Clone)]
pub struct Delivery {
    inner: Arc<DeliveryFn>,
}

impl Delivery {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Inbound) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PubSubResult<()>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |inbound| Box::pin(f(inbound))),
        }
    }

    pub async fn deliver(&self, inbound: Inbound) -> PubSubResult<()> {
        (self.inner)(inbound).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery").finish_non_exhaustive()
    }
}

/// Wire-level operations of one transport
///
/// Subscriptions live only while connected: `disconnect` drops them and the
/// shell re-issues `subscribe_internal` after the next `connect`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Driver name (`memory`, `redis`, `kafka`, …)
    fn name(&self) -> &str;

    async fn connect(&self) -> PubSubResult<()>;

    async fn disconnect(&self) -> PubSubResult<()>;

    fn is_connected(&self) -> bool;

    /// Put one envelope on the wire
    async fn publish_internal(
        &self,
        topic: &str,
        message: &Message,
        options: &PublishOptions,
    ) -> PubSubResult<()>;

    /// Start delivering messages on `topic` to `delivery`
    async fn subscribe_internal(
        &self,
        topic: &str,
        delivery: Delivery,
        options: &SubscribeOptions,
    ) -> PubSubResult<()>;

    /// Stop delivering messages on `topic`
    async fn unsubscribe_internal(
        &self,
        topic: &str,
        options: &UnsubscribeOptions,
    ) -> PubSubResult<()>;
}
