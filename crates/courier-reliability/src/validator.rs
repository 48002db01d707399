//! Outbound message validation.
//!
//! Validators run synchronously before any transport call. The default
//! [`NoopValidator`] accepts everything so validation is always callable.

use courier_core::{PubSubError, PubSubResult};
use serde_json::Value;
use std::io;
use std::sync::Arc;

/// Validates a payload before it is published
pub trait MessageValidator: Send + Sync {
    /// Reject the payload with `PubSubError::Validation` when invalid
    fn validate(&self, topic: &str, data: &Value) -> PubSubResult<()>;
}

/// Shared, type-erased validator
pub type SharedValidator = Arc<dyn MessageValidator>;

/// Accepts every message
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopValidator;

impl MessageValidator for NoopValidator {
    fn validate(&self, _topic: &str, _data: &Value) -> PubSubResult<()> {
        Ok(())
    }
}

/// Rejects payloads whose serialized JSON exceeds a byte limit
#[derive(Debug, Clone, Copy)]
pub struct MaxSizeValidator {
    max_message_size: usize,
}

impl MaxSizeValidator {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn limit(&self) -> usize {
        self.max_message_size
    }
}

/// Counts bytes without buffering them
#[derive(Default)]
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serialized JSON length of `data` in bytes
pub fn serialized_size(data: &Value) -> PubSubResult<usize> {
    let mut counter = ByteCounter::default();
    serde_json::to_writer(&mut counter, data)?;
    Ok(counter.0)
}

impl MessageValidator for MaxSizeValidator {
    fn validate(&self, topic: &str, data: &Value) -> PubSubResult<()> {
        let size = serialized_size(data)?;
        if size > self.max_message_size {
            return Err(PubSubError::message_too_large(
                topic,
                size,
                self.max_message_size,
            ));
        }
        Ok(())
    }
}

/// Validator backed by a closure
pub struct FnValidator<F>(F);

impl<F> FnValidator<F>
where
    F: Fn(&str, &Value) -> PubSubResult<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> MessageValidator for FnValidator<F>
where
    F: Fn(&str, &Value) -> PubSubResult<()> + Send + Sync,
{
    fn validate(&self, topic: &str, data: &Value) -> PubSubResult<()> {
        (self.0)(topic, data)
    }
}

/// Runs validators in order, stopping at the first rejection
#[derive(Clone, Default)]
pub struct ValidatorChain {
    validators: Vec<SharedValidator>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: impl MessageValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn push(&mut self, validator: SharedValidator) {
        self.validators.push(validator);
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl MessageValidator for ValidatorChain {
    fn validate(&self, topic: &str, data: &Value) -> PubSubResult<()> {
        self.validators
            .iter()
            .try_for_each(|v| v.validate(topic, data))
    }
}
