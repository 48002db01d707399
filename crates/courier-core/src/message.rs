//! Message envelope shared by every driver.
//!
//! The envelope is the JSON document that travels over the wire:
//!
//! ```json
//! { "id": "…", "topic": "orders", "data": {…}, "timestamp": "2024-01-01T00:00:00Z",
//!   "metadata": { "correlationId": "…" }, "attributes": {…} }
//! ```
//!
//! `metadata` and `attributes` are omitted when empty.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{PubSubError, PubSubResult};

/// Metadata key holding the correlation id.
pub const CORRELATION_ID_KEY: &str = "correlationId";

/// Free-form map used for metadata and attributes
pub type MessageMap = serde_json::Map<String, Value>;

/// Error type for MessageId validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageIdError {
    /// The provided string is not a valid UUID
    InvalidFormat(String),
}

impl std::fmt::Display for MessageIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageIdError::InvalidFormat(s) => {
                write!(f, "Invalid MessageId format (expected UUID): '{}'", s)
            }
        }
    }
}

impl std::error::Error for MessageIdError {}

/// Unique identifier for a message (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a new random message ID (UUID v4)
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse and validate a message ID from a string
    ///
    /// ```
    /// use courier_core::MessageId;
    ///
    /// assert!(MessageId::parse("550e8400-e29b-41d4-a716-446655440000").is_ok());
    /// assert!(MessageId::parse("not-a-uuid").is_err());
    /// ```
    pub fn parse(id: impl AsRef<str>) -> Result<Self, MessageIdError> {
        let s = id.as_ref();
        Uuid::parse_str(s).map_err(|_| MessageIdError::InvalidFormat(s.to_string()))?;
        Ok(Self(s.to_string()))
    }

    /// Get the message ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message published to, or delivered from, a topic.
///
/// Envelope ids are accepted verbatim on decode: foreign producers are not
/// required to use UUIDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier, assigned once at publish time
    pub id: MessageId,
    /// Physical topic the message was published to
    pub topic: String,
    /// Message payload
    pub data: Value,
    /// Timestamp when the message was created
    pub timestamp: DateTime<Utc>,
    /// Message metadata (correlation id lives here)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMap>,
    /// Transport attributes (headers for Kafka, passthrough elsewhere)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<MessageMap>,
}

impl Message {
    /// Create a new message for `topic`
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            data,
            timestamp: Utc::now(),
            metadata: None,
            attributes: None,
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(MessageMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Add an attribute entry
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .get_or_insert_with(MessageMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the correlation id (stored under `metadata.correlationId`)
    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_metadata(CORRELATION_ID_KEY, correlation_id.into())
    }

    /// Correlation id, if one was attached
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(CORRELATION_ID_KEY))
            .and_then(Value::as_str)
    }

    /// Get a metadata value by key
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    /// Get an attribute value by key
    pub fn get_attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.as_ref().and_then(|m| m.get(key))
    }

    /// Decode `data` into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> PubSubResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Serialize message to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Decode a payload received on `topic`.
    ///
    /// Courier envelopes are returned as-is. Any other JSON value is wrapped
    /// as the `data` of a fresh envelope, and payloads that are not JSON are
    /// wrapped as a string (UTF-8) or a base64 string.
    pub fn from_wire(topic: &str, payload: &[u8]) -> PubSubResult<Self> {
        if payload.is_empty() {
            return Err(PubSubError::validation(topic, "empty payload"));
        }

        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(_) => {
                let data = match std::str::from_utf8(payload) {
                    Ok(text) => Value::String(text.to_string()),
                    Err(_) => Value::String(
                        base64::engine::general_purpose::STANDARD.encode(payload),
                    ),
                };
                return Ok(Self::new(topic, data));
            }
        };

        if is_envelope(&value) {
            return Ok(serde_json::from_value(value)?);
        }

        Ok(Self::new(topic, value))
    }
}

fn is_envelope(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => {
            obj.get("id").is_some_and(Value::is_string)
                && obj.get("topic").is_some_and(Value::is_string)
                && obj.contains_key("data")
                && obj.get("timestamp").is_some_and(Value::is_string)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("user.created", json!({"id": "u1"}));
        assert_eq!(msg.topic, "user.created");
        assert_eq!(msg.data["id"], "u1");
        assert!(msg.metadata.is_none());
        assert!(MessageId::parse(msg.id.as_str()).is_ok());
    }

    #[test]
    fn test_correlation_id_lives_in_metadata() {
        let msg = Message::new("orders", json!(1)).with_correlation_id("req-123");
        assert_eq!(msg.correlation_id(), Some("req-123"));
        assert_eq!(
            msg.get_metadata(CORRELATION_ID_KEY),
            Some(&json!("req-123"))
        );
    }

    #[test]
    fn test_wire_format_omits_empty_maps() {
        let msg = Message::new("orders", json!({"n": 1}));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        let obj = value.as_object().unwrap();

        assert!(obj.contains_key("id"));
        assert!(obj.contains_key("timestamp"));
        assert!(!obj.contains_key("metadata"));
        assert!(!obj.contains_key("attributes"));
    }

    #[test]
    fn test_from_wire_accepts_envelope() {
        let msg = Message::new("orders", json!({"n": 1})).with_attribute("source", "web");
        let decoded = Message::from_wire("orders", &msg.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_from_wire_wraps_foreign_json() {
        let decoded = Message::from_wire("orders", br#"{"order": 7}"#).unwrap();
        assert_eq!(decoded.topic, "orders");
        assert_eq!(decoded.data, json!({"order": 7}));
    }

    #[test]
    fn test_from_wire_wraps_plain_text() {
        let decoded = Message::from_wire("logs", b"hello world").unwrap();
        assert_eq!(decoded.data, json!("hello world"));
    }

    #[test]
    fn test_from_wire_rejects_empty_payload() {
        let err = Message::from_wire("logs", b"").unwrap_err();
        assert_eq!(err.code(), "PUBSUB_VALIDATION_ERROR");
    }

    #[test]
    fn test_decode_typed_payload() {
        #[derive(serde::Deserialize)]
        struct User {
            id: String,
        }

        let msg = Message::new("user.created", json!({"id": "u1"}));
        let user: User = msg.decode().unwrap();
        assert_eq!(user.id, "u1");
    }
}
