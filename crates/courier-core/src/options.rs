//! Per-call options for publish, subscribe and unsubscribe.

use serde_json::Value;

use crate::message::MessageMap;

/// Options for a single publish
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Partition/ordering key (Kafka message key)
    pub key: Option<String>,
    /// Explicit correlation id; generated when absent and correlation ids are enabled
    pub correlation_id: Option<String>,
    /// Extra envelope metadata
    pub metadata: MessageMap,
    /// Envelope attributes (Kafka headers)
    pub attributes: MessageMap,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add an attribute entry
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Options for a subscription
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Treat the topic as a pattern (Redis `PSUBSCRIBE`)
    pub pattern: bool,
    /// Driver-specific options passed through untouched
    pub raw: MessageMap,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a pattern instead of an exact topic
    pub fn pattern() -> Self {
        Self {
            pattern: true,
            ..Self::default()
        }
    }

    /// Add a driver-specific option
    pub fn with_raw(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw.insert(key.into(), value.into());
        self
    }
}

/// Options for unsubscribing
#[derive(Debug, Clone, Default)]
pub struct UnsubscribeOptions {
    /// The subscription was a pattern subscription
    pub pattern: bool,
}

impl From<&SubscribeOptions> for UnsubscribeOptions {
    fn from(options: &SubscribeOptions) -> Self {
        Self {
            pattern: options.pattern,
        }
    }
}
