//! # Courier Reliability
//!
//! The primitives every driver shell runs outbound publishes through:
//!
//! - [`validator`]: synchronous payload checks before any transport call
//! - [`rate_limit`]: sliding window, fixed window or token bucket limits
//! - [`circuit_breaker`]: fail-fast while the transport is unhealthy
//! - [`backpressure`]: a bounded in-flight gate with RAII permits
//! - [`retry`]: exponential backoff over transport failures
//!
//! Each primitive is owned by a single driver instance, so two drivers in
//! one process never share limiter or breaker state.

pub mod backpressure;
pub mod circuit_breaker;
pub mod duration;
pub mod rate_limit;
pub mod retry;
pub mod validator;

pub use backpressure::{BackpressureConfig, BackpressureGate, BackpressurePermit, BackpressureStats};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStats};
pub use rate_limit::{RateLimitConfig, RateLimitStats, RateLimitStrategy, RateLimiter};
pub use retry::{RetryConfig, RetryError, RetryPolicy};
pub use validator::{
    FnValidator, MaxSizeValidator, MessageValidator, NoopValidator, SharedValidator,
    ValidatorChain, serialized_size,
};
