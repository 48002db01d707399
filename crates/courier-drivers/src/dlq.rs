//! Dead-letter envelopes
//!
//! A message that permanently failed to publish, or whose handler failed, is
//! wrapped in a [`DeadLetter`] and published on the dead-letter topic. The
//! wrapper keeps the original envelope untouched so it can be replayed.
//! `originalTopic` is the logical topic, without the driver's namespace, so
//! it can be handed straight back to the service; the wrapped envelope still
//! carries the physical topic it travelled on.

use chrono::{DateTime, Utc};
use courier_core::{CORRELATION_ID_KEY, Message, Namespace, PubSubError, PubSubResult};
use courier_observability::FailureStage;
use serde::{Deserialize, Serialize};

/// Error summary carried by a dead letter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterError {
    pub code: String,
    pub message: String,
}

/// Payload of a message on the dead-letter topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// Topic as the application names it
    pub original_topic: String,
    /// Envelope as it was on the wire
    pub original_message: Message,
    pub error: DeadLetterError,
    /// `publish` or `handler`
    pub stage: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(message: &Message, error: &PubSubError, stage: FailureStage, attempts: u32) -> Self {
        Self {
            original_topic: message.topic.clone(),
            original_message: message.clone(),
            error: DeadLetterError {
                code: error.code().to_string(),
                message: error.to_string(),
            },
            stage: stage.as_str().to_string(),
            attempts,
            failed_at: Utc::now(),
        }
    }

    /// Drop `namespace` from the recorded topic
    pub fn logical(mut self, namespace: Option<&Namespace>) -> Self {
        if let Some(ns) = namespace {
            self.original_topic = ns.strip(&self.original_topic).to_string();
        }
        self
    }

    /// Envelope for the dead-letter topic, carrying the original correlation id
    pub fn into_message(self, dead_letter_topic: &str) -> PubSubResult<Message> {
        let correlation_id = self.original_message.correlation_id().map(str::to_string);
        let mut message = Message::new(dead_letter_topic, serde_json::to_value(&self)?)
            .with_metadata("deadLetter", true)
            .with_metadata("originalTopic", self.original_topic);
        if let Some(id) = correlation_id {
            message = message.with_metadata(CORRELATION_ID_KEY, id);
        }
        Ok(message)
    }

    /// Read a dead letter back from a message on the dead-letter topic
    pub fn from_message(message: &Message) -> PubSubResult<Self> {
        message.decode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dead_letter_envelope() {
        let original = Message::new("orders", json!({"id": 7})).with_correlation_id("req-1");
        let error = PubSubError::backend("broker down");

        let dl = DeadLetter::new(&original, &error, FailureStage::Publish, 4);
        let msg = dl.into_message("dlq").unwrap();

        assert_eq!(msg.topic, "dlq");
        assert_eq!(msg.correlation_id(), Some("req-1"));
        assert_eq!(msg.data["originalTopic"], "orders");
        assert_eq!(msg.data["originalMessage"]["data"]["id"], 7);
        assert_eq!(msg.data["error"]["code"], "PUBSUB_BACKEND_ERROR");
        assert_eq!(msg.data["stage"], "publish");
        assert_eq!(msg.data["attempts"], 4);

        let back = DeadLetter::from_message(&msg).unwrap();
        assert_eq!(back.original_message.id, original.id);
    }

    #[test]
    fn test_original_topic_is_logical() {
        let ns = Namespace::new("staging").unwrap();
        let original = Message::new("staging.orders", json!({"id": 8}));
        let error = PubSubError::backend("broker down");

        let msg = DeadLetter::new(&original, &error, FailureStage::Publish, 1)
            .logical(Some(&ns))
            .into_message("staging.dlq")
            .unwrap();
        assert_eq!(msg.data["originalTopic"], "orders");
        assert_eq!(msg.data["originalMessage"]["topic"], "staging.orders");

        let plain = DeadLetter::new(&original, &error, FailureStage::Publish, 1).logical(None);
        assert_eq!(plain.original_topic, "staging.orders");
    }
}
