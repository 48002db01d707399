//! # Service configuration
//!
//! [`PubSubConfig`] selects the driver and tunes the reliability shell. It is
//! loaded from TOML ([`PubSubConfig::from_toml_str`], [`PubSubConfig::from_file`])
//! or from the environment ([`PubSubConfig::from_env`]). Every field has a
//! default, so an empty document is a valid in-memory configuration.
//!
//! Durations accept `humantime` strings (`"250ms"`, `"30s"`) or integer
//! milliseconds.
//!
//! ## Environment variables
//!
//! ### General
//! - `COURIER_DRIVER` - Driver name: memory, redis, kafka (default: memory)
//! - `COURIER_NAMESPACE` - Topic namespace prefix
//! - `COURIER_DEAD_LETTER_QUEUE` - Dead-letter topic
//! - `COURIER_THROW_ON_HANDLER_ERROR` - Propagate handler failures (default: false)
//! - `COURIER_MAX_MESSAGE_SIZE` - Serialized payload limit in bytes
//! - `COURIER_MAX_HANDLERS_PER_TOPIC` - Handler ceiling per topic (default: 100)
//! - `COURIER_MAX_SUBSCRIPTION_FAILURE_RATE` - Tolerated startup failures 0.0-1.0 (default: 0.0)
//! - `COURIER_ENABLE_CORRELATION_ID` - Generate correlation ids (default: true)
//! - `COURIER_INCLUDE_PAYLOAD_IN_ERRORS` - Attach payloads to publish errors (default: false)
//! - `COURIER_LOG_SAMPLING_RATE` - Success-path log sampling 0.0-1.0 (default: 1.0)
//!
//! ### Retry
//! - `COURIER_MAX_RETRIES` - Retries after the first attempt (default: 3)
//! - `COURIER_RETRY_DELAY` - Delay before the first retry (default: 100ms)
//! - `COURIER_RETRY_MAX_DELAY` - Ceiling on any delay (default: 30s)
//! - `COURIER_RETRY_BACKOFF_MULTIPLIER` - Exponential factor (default: 2.0)
//! - `COURIER_RETRY_JITTER` - Randomise delays (default: false)
//!
//! ### Circuit breaker
//! - `COURIER_CIRCUIT_BREAKER_ENABLED` (default: true)
//! - `COURIER_CIRCUIT_BREAKER_FAILURE_THRESHOLD` (default: 5)
//! - `COURIER_CIRCUIT_BREAKER_SUCCESS_THRESHOLD` (default: 3)
//! - `COURIER_CIRCUIT_BREAKER_RESET_TIMEOUT` (default: 30s)
//!
//! ### Rate limiter
//! - `COURIER_RATE_LIMIT_ENABLED` (default: false)
//! - `COURIER_RATE_LIMIT_MAX_REQUESTS` - Operations per window (default: 1000)
//! - `COURIER_RATE_LIMIT_WINDOW` (default: 1s)
//! - `COURIER_RATE_LIMIT_STRATEGY` - sliding_window, fixed_window, token_bucket
//!
//! ### Backpressure
//! - `COURIER_BACKPRESSURE_ENABLED` (default: false)
//! - `COURIER_BACKPRESSURE_MAX_INFLIGHT` (default: 1000)
//! - `COURIER_BACKPRESSURE_WAIT_TIMEOUT` - Duration, or `none` to wait indefinitely (default: 5s)
//!
//! ### Transports
//! - `COURIER_MEMORY_WILDCARDS` (default: true)
//! - `COURIER_REDIS_URL`, `COURIER_REDIS_POOL_SIZE` (`redis` feature)
//! - `COURIER_KAFKA_BROKERS`, `COURIER_KAFKA_GROUP_ID`, `COURIER_KAFKA_CLIENT_ID` (`kafka` feature)
//!
//! ### Logging and health
//! - `COURIER_LOG_FILTER` - Filter when `RUST_LOG` is unset (default: info)
//! - `COURIER_LOG_FORMAT` - json, pretty, compact (default: json)
//! - `COURIER_HEALTH_DEGRADED_WINDOW` - How long a captured error degrades health (default: 60s)

use courier_core::{Namespace, PubSubError};
use courier_drivers::{MemoryConfig, ShellConfig};
use courier_observability::{LogFormat, LoggingConfig};
use courier_reliability::{
    BackpressureConfig, CircuitBreakerConfig, RateLimitConfig, RateLimitStrategy, RetryConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "kafka")]
use courier_drivers::KafkaConfig;
#[cfg(feature = "redis")]
use courier_drivers::RedisConfig;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Failed to read configuration file '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for PubSubError {
    fn from(err: ConfigError) -> Self {
        PubSubError::Config(err.to_string())
    }
}

/// Health evaluation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// A captured error keeps the service degraded for this long
    #[serde(with = "courier_reliability::duration")]
    pub degraded_window: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_window: Duration::from_secs(60),
        }
    }
}

/// Complete configuration of one pub/sub service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Registered driver name
    pub driver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_queue: Option<String>,
    pub throw_on_handler_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,
    pub max_handlers_per_topic: usize,
    /// Share of startup registrations allowed to fail
    pub max_subscription_failure_rate: f64,
    pub enable_correlation_id: bool,
    pub include_payload_in_errors: bool,
    pub log_sampling_rate: f64,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimitConfig,
    pub backpressure: BackpressureConfig,
    pub memory: MemoryConfig,
    #[cfg(feature = "redis")]
    pub redis: RedisConfig,
    #[cfg(feature = "kafka")]
    pub kafka: KafkaConfig,
    pub logging: LoggingConfig,
    pub health: HealthConfig,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            namespace: None,
            dead_letter_queue: None,
            throw_on_handler_error: false,
            max_message_size: None,
            max_handlers_per_topic: 100,
            max_subscription_failure_rate: 0.0,
            enable_correlation_id: true,
            include_payload_in_errors: false,
            log_sampling_rate: 1.0,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limiter: RateLimitConfig::default(),
            backpressure: BackpressureConfig::default(),
            memory: MemoryConfig::default(),
            #[cfg(feature = "redis")]
            redis: RedisConfig::default(),
            #[cfg(feature = "kafka")]
            kafka: KafkaConfig::default(),
            logging: LoggingConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl PubSubConfig {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::ValidationError` for inconsistent values.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` when the file cannot be read, otherwise as
    /// [`PubSubConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load configuration from `COURIER_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value
    /// or if the configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`PubSubConfig::from_env`] over an arbitrary key lookup
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut config = Self::default();

        // General
        if let Some(driver) = env.string("COURIER_DRIVER") {
            config.driver = driver;
        }
        if let Some(namespace) = env.string("COURIER_NAMESPACE") {
            config.namespace = Some(namespace);
        }
        if let Some(queue) = env.string("COURIER_DEAD_LETTER_QUEUE") {
            config.dead_letter_queue = Some(queue);
        }
        if let Some(throw) = env.bool("COURIER_THROW_ON_HANDLER_ERROR")? {
            config.throw_on_handler_error = throw;
        }
        if let Some(size) = env.parse::<usize>("COURIER_MAX_MESSAGE_SIZE")? {
            config.max_message_size = Some(size);
        }
        if let Some(max) = env.parse::<usize>("COURIER_MAX_HANDLERS_PER_TOPIC")? {
            config.max_handlers_per_topic = max;
        }
        if let Some(rate) = env.parse::<f64>("COURIER_MAX_SUBSCRIPTION_FAILURE_RATE")? {
            config.max_subscription_failure_rate = rate;
        }
        if let Some(enabled) = env.bool("COURIER_ENABLE_CORRELATION_ID")? {
            config.enable_correlation_id = enabled;
        }
        if let Some(include) = env.bool("COURIER_INCLUDE_PAYLOAD_IN_ERRORS")? {
            config.include_payload_in_errors = include;
        }
        if let Some(rate) = env.parse::<f64>("COURIER_LOG_SAMPLING_RATE")? {
            config.log_sampling_rate = rate;
        }

        // Retry
        if let Some(retries) = env.parse::<u32>("COURIER_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(delay) = env.duration("COURIER_RETRY_DELAY")? {
            config.retry.retry_delay = delay;
        }
        if let Some(delay) = env.duration("COURIER_RETRY_MAX_DELAY")? {
            config.retry.max_delay = delay;
        }
        if let Some(multiplier) = env.parse::<f32>("COURIER_RETRY_BACKOFF_MULTIPLIER")? {
            config.retry.backoff_multiplier = multiplier;
        }
        if let Some(jitter) = env.bool("COURIER_RETRY_JITTER")? {
            config.retry.jitter = jitter;
        }

        // Circuit breaker
        if let Some(enabled) = env.bool("COURIER_CIRCUIT_BREAKER_ENABLED")? {
            config.circuit_breaker.enabled = enabled;
        }
        if let Some(threshold) = env.parse::<u32>("COURIER_CIRCUIT_BREAKER_FAILURE_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(threshold) = env.parse::<u32>("COURIER_CIRCUIT_BREAKER_SUCCESS_THRESHOLD")? {
            config.circuit_breaker.success_threshold = threshold;
        }
        if let Some(timeout) = env.duration("COURIER_CIRCUIT_BREAKER_RESET_TIMEOUT")? {
            config.circuit_breaker.reset_timeout = timeout;
        }

        // Rate limiter
        if let Some(enabled) = env.bool("COURIER_RATE_LIMIT_ENABLED")? {
            config.rate_limiter.enabled = enabled;
        }
        if let Some(max) = env.parse::<u32>("COURIER_RATE_LIMIT_MAX_REQUESTS")? {
            config.rate_limiter.max_requests_per_window = max;
        }
        if let Some(window) = env.duration("COURIER_RATE_LIMIT_WINDOW")? {
            config.rate_limiter.window = window;
        }
        if let Some(strategy) = env.string("COURIER_RATE_LIMIT_STRATEGY") {
            config.rate_limiter.strategy = match strategy.to_lowercase().as_str() {
                "sliding_window" => RateLimitStrategy::SlidingWindow,
                "fixed_window" => RateLimitStrategy::FixedWindow,
                "token_bucket" => RateLimitStrategy::TokenBucket,
                _ => {
                    return Err(ConfigError::InvalidEnvVar {
                        key: "COURIER_RATE_LIMIT_STRATEGY".to_string(),
                        message: format!(
                            "invalid strategy '{strategy}', expected sliding_window/fixed_window/token_bucket"
                        ),
                    });
                }
            };
        }

        // Backpressure
        if let Some(enabled) = env.bool("COURIER_BACKPRESSURE_ENABLED")? {
            config.backpressure.enabled = enabled;
        }
        if let Some(max) = env.parse::<usize>("COURIER_BACKPRESSURE_MAX_INFLIGHT")? {
            config.backpressure.max_inflight = max;
        }
        if let Some(raw) = env.string("COURIER_BACKPRESSURE_WAIT_TIMEOUT") {
            config.backpressure.wait_timeout = if raw.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_duration("COURIER_BACKPRESSURE_WAIT_TIMEOUT", &raw)?)
            };
        }

        // Transports
        if let Some(wildcards) = env.bool("COURIER_MEMORY_WILDCARDS")? {
            config.memory.wildcards = wildcards;
        }
        #[cfg(feature = "redis")]
        {
            if let Some(url) = env.string("COURIER_REDIS_URL") {
                config.redis.url = url;
            }
            if let Some(size) = env.parse::<usize>("COURIER_REDIS_POOL_SIZE")? {
                config.redis.pool_size = size;
            }
        }
        #[cfg(feature = "kafka")]
        {
            if let Some(brokers) = env.string("COURIER_KAFKA_BROKERS") {
                config.kafka.brokers = brokers;
            }
            if let Some(group_id) = env.string("COURIER_KAFKA_GROUP_ID") {
                config.kafka.group_id = group_id;
            }
            if let Some(client_id) = env.string("COURIER_KAFKA_CLIENT_ID") {
                config.kafka.client_id = client_id;
            }
        }

        // Logging and health
        if let Some(filter) = env.string("COURIER_LOG_FILTER") {
            config.logging.filter = filter;
        }
        if let Some(format) = env.string("COURIER_LOG_FORMAT") {
            config.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                _ => {
                    return Err(ConfigError::InvalidEnvVar {
                        key: "COURIER_LOG_FORMAT".to_string(),
                        message: format!("invalid format '{format}', expected json/pretty/compact"),
                    });
                }
            };
        }
        if let Some(window) = env.duration("COURIER_HEALTH_DEGRADED_WINDOW")? {
            config.health.degraded_window = window;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent values
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "driver must not be empty".to_string(),
            ));
        }
        if self.max_handlers_per_topic == 0 {
            return Err(ConfigError::ValidationError(
                "max_handlers_per_topic must be greater than 0".to_string(),
            ));
        }
        if self.max_message_size == Some(0) {
            return Err(ConfigError::ValidationError(
                "max_message_size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_subscription_failure_rate) {
            return Err(ConfigError::ValidationError(
                "max_subscription_failure_rate must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.log_sampling_rate) {
            return Err(ConfigError::ValidationError(
                "log_sampling_rate must be between 0.0 and 1.0".to_string(),
            ));
        }
        if let Some(queue) = &self.dead_letter_queue {
            courier_core::validate_topic(queue).map_err(|e| {
                ConfigError::ValidationError(format!("dead_letter_queue: {}", e))
            })?;
        }
        self.namespace()?;

        let sections = [
            self.retry.validate(),
            self.circuit_breaker.validate(),
            self.rate_limiter.validate(),
            self.backpressure.validate(),
        ];
        for result in sections {
            result.map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        Ok(())
    }

    /// The parsed namespace, if one is configured
    pub fn namespace(&self) -> Result<Option<Namespace>, ConfigError> {
        self.namespace
            .as_deref()
            .map(Namespace::new)
            .transpose()
            .map_err(|e| ConfigError::ValidationError(format!("namespace: {}", e)))
    }

    /// Shell settings derived from this configuration
    pub fn shell_config(&self) -> Result<ShellConfig, ConfigError> {
        Ok(ShellConfig {
            namespace: self.namespace()?,
            enable_correlation_id: self.enable_correlation_id,
            dead_letter_queue: self.dead_letter_queue.clone(),
            throw_on_handler_error: self.throw_on_handler_error,
            max_handlers_per_topic: self.max_handlers_per_topic,
            max_message_size: self.max_message_size,
            include_payload_in_errors: self.include_payload_in_errors,
            log_sampling_rate: self.log_sampling_rate,
            retry: self.retry.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            rate_limit: self.rate_limiter.clone(),
            backpressure: self.backpressure.clone(),
        })
    }
}

// Environment variable helpers

struct Env<L>(L);

impl<L: Fn(&str) -> Option<String>> Env<L> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.string(key) {
            Some(val) => match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::InvalidEnvVar {
                    key: key.to_string(),
                    message: format!(
                        "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                    ),
                }),
            },
            None => Ok(None),
        }
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|val| {
                val.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
                    key: key.to_string(),
                    message: format!("invalid value '{val}': {e}"),
                })
            })
            .transpose()
    }

    fn duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        self.string(key)
            .map(|val| parse_duration(key, &val))
            .transpose()
    }
}

fn parse_duration(key: &str, val: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(val.trim()).map_err(|e| ConfigError::InvalidEnvVar {
        key: key.to_string(),
        message: format!("invalid duration '{val}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PubSubConfig::default();
        config.validate().unwrap();

        assert_eq!(config.driver, "memory");
        assert_eq!(config.max_handlers_per_topic, 100);
        assert!(config.enable_correlation_id);
        assert!(!config.throw_on_handler_error);
        assert_eq!(config.health.degraded_window, Duration::from_secs(60));
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = PubSubConfig::from_toml_str("").unwrap();
        assert_eq!(config.driver, "memory");
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_toml_sections() {
        let config = PubSubConfig::from_toml_str(
            r#"
            driver = "memory"
            namespace = "staging"
            dead_letter_queue = "dlq"
            max_message_size = 1024
            log_sampling_rate = 0.1

            [retry]
            max_retries = 5
            retry_delay = "250ms"

            [circuit_breaker]
            failure_threshold = 2
            reset_timeout = "1m"

            [rate_limiter]
            enabled = true
            max_requests_per_window = 10
            window = 1000
            strategy = "token_bucket"

            [backpressure]
            enabled = true
            max_inflight = 8

            [memory]
            wildcards = false
            "#,
        )
        .unwrap();

        assert_eq!(config.namespace.as_deref(), Some("staging"));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.retry_delay, Duration::from_millis(250));
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(60));
        assert_eq!(config.rate_limiter.strategy, RateLimitStrategy::TokenBucket);
        assert_eq!(config.rate_limiter.window, Duration::from_secs(1));
        assert_eq!(config.backpressure.max_inflight, 8);
        assert!(!config.memory.wildcards);

        let shell = config.shell_config().unwrap();
        assert_eq!(shell.namespace.unwrap().as_str(), "staging");
        assert_eq!(shell.dead_letter_queue.as_deref(), Some("dlq"));
        assert_eq!(shell.max_message_size, Some(1024));
    }

    #[test]
    fn test_invalid_toml_values() {
        let err = PubSubConfig::from_toml_str("max_handlers_per_topic = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = PubSubConfig::from_toml_str("log_sampling_rate = 1.5").unwrap_err();
        assert!(err.to_string().contains("log_sampling_rate"));

        let err = PubSubConfig::from_toml_str("driver = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_lookup() {
        let config = PubSubConfig::from_lookup(lookup(&[
            ("COURIER_DRIVER", "memory"),
            ("COURIER_NAMESPACE", "prod"),
            ("COURIER_THROW_ON_HANDLER_ERROR", "yes"),
            ("COURIER_MAX_RETRIES", "7"),
            ("COURIER_RETRY_DELAY", "2s"),
            ("COURIER_RATE_LIMIT_STRATEGY", "fixed_window"),
            ("COURIER_BACKPRESSURE_WAIT_TIMEOUT", "none"),
            ("COURIER_LOG_FORMAT", "pretty"),
        ]))
        .unwrap();

        assert_eq!(config.namespace.as_deref(), Some("prod"));
        assert!(config.throw_on_handler_error);
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.retry_delay, Duration::from_secs(2));
        assert_eq!(config.rate_limiter.strategy, RateLimitStrategy::FixedWindow);
        assert_eq!(config.backpressure.wait_timeout, None);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = PubSubConfig::from_lookup(lookup(&[("COURIER_MAX_RETRIES", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref key, .. } if key == "COURIER_MAX_RETRIES"));

        let err =
            PubSubConfig::from_lookup(lookup(&[("COURIER_RETRY_JITTER", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("invalid boolean"));

        let err =
            PubSubConfig::from_lookup(lookup(&[("COURIER_RETRY_DELAY", "soon")])).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "namespace = \"files\"\n").unwrap();

        let config = PubSubConfig::from_file(&path).unwrap();
        assert_eq!(config.namespace.as_deref(), Some("files"));

        let missing = PubSubConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn test_config_error_converts_to_pubsub_error() {
        let err: PubSubError = ConfigError::ValidationError("bad".into()).into();
        assert_eq!(err.code(), "PUBSUB_CONFIG_ERROR");
    }
}
