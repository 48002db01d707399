//! # Courier Core
//!
//! Shared vocabulary for every Courier crate: the wire-level message envelope,
//! topic and namespace handling, the error taxonomy and the driver contract
//! that each transport implements.
//!
//! ## Example
//!
//! ```rust
//! use courier_core::{Message, Namespace};
//! use serde_json::json;
//!
//! let ns = Namespace::new("staging").unwrap();
//! let topic = ns.apply("user.created");
//! assert_eq!(topic, "staging.user.created");
//!
//! let msg = Message::new(&topic, json!({"id": "u1"})).with_correlation_id("req-42");
//! assert_eq!(msg.correlation_id(), Some("req-42"));
//! ```

pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod handler;
pub mod message;
pub mod options;
pub mod topic;

pub use diagnostics::{CircuitState, DriverDiagnostics, ErrorRecord, LoadSignal};
pub use driver::{PubSubDriver, SubscriptionId};
pub use error::{PubSubError, PubSubResult};
pub use handler::{BoxError, HandlerResult, MessageHandler, SharedHandler, handler_fn};
pub use message::{CORRELATION_ID_KEY, Message, MessageId, MessageIdError, MessageMap};
pub use options::{PublishOptions, SubscribeOptions, UnsubscribeOptions};
pub use topic::{Namespace, TopicPattern, namespaced, validate_topic};
