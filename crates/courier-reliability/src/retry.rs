//! Bounded retries with exponential backoff.
//!
//! Uses `backon` for the delay schedule: the delay before retry `k` is
//! `retry_delay * backoff_multiplier^(k-1)`, capped at `max_delay`, with
//! optional jitter. `max_retries` counts retries after the first attempt.

use backon::{BackoffBuilder, ExponentialBuilder};
use courier_core::{PubSubError, PubSubResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "crate::duration")]
    pub retry_delay: Duration,
    pub backoff_multiplier: f32,
    /// Upper bound for any single delay
    #[serde(with = "crate::duration")]
    pub max_delay: Duration,
    pub jitter: bool,
    /// Error codes or message fragments worth retrying; empty retries everything
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> PubSubResult<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(PubSubError::Config(
                "retry.backoff_multiplier must be at least 1.0".into(),
            ));
        }
        if self.max_delay < self.retry_delay {
            return Err(PubSubError::Config(
                "retry.max_delay must not be shorter than retry.retry_delay".into(),
            ));
        }
        Ok(())
    }
}

/// Retries exhausted or a non-retryable error occurred
#[derive(Error, Debug)]
#[error("operation failed after {attempts} attempt(s): {last_error}")]
pub struct RetryError {
    #[source]
    pub last_error: PubSubError,
    /// Attempts made, including the first
    pub attempts: u32,
}

/// Retry policy applied to transport calls
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A policy making exactly one attempt
    pub fn none() -> Self {
        Self::new(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.config.retry_delay)
            .with_max_delay(self.config.max_delay)
            .with_factor(self.config.backoff_multiplier)
            .with_max_times(self.config.max_retries as usize);
        if self.config.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Delays that would be slept between attempts
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        self.backoff().build()
    }

    /// Whether `error` matches the retryable list
    pub fn is_retryable(&self, error: &PubSubError) -> bool {
        if self.config.retryable_errors.is_empty() {
            return true;
        }
        let code = error.root_cause().code();
        let message = error.to_string();
        self.config
            .retryable_errors
            .iter()
            .any(|pattern| pattern == code || message.contains(pattern.as_str()))
    }

    /// Run `operation` until it succeeds, fails terminally or retries run out
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PubSubResult<T>>,
    {
        let mut delays = self.delays();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.is_retryable(&error) {
                debug!(attempt, code = error.code(), "Error is not retryable");
                return Err(RetryError {
                    last_error: error,
                    attempts: attempt,
                });
            }

            match delays.next() {
                Some(delay) => {
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(RetryError {
                        last_error: error,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}
