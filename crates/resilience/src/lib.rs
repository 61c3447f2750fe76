//! Composable resilience policies for outbound request pipelines.
//!
//! Five independent leaf policies, each usable on its own or wired
//! together by a request executor:
//! - [`circuit_breaker`]: fail fast while a downstream is unhealthy
//! - [`retry`]: bounded re-execution with capped exponential backoff
//! - [`rate_limit`]: keyed token-bucket and sliding-window limiting
//! - [`cache`]: TTL storage with a stale-while-revalidate window
//! - [`dedupe`]: single-flight sharing of identical in-flight calls
//!
//! Every time-sensitive policy is generic over [`clock::Clock`], so tests
//! drive them with [`clock::MockClock`] instead of real delays.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

use thiserror::Error;

pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod dedupe;
pub mod key;
pub mod rate_limit;
pub mod registry;
pub mod retry;

pub use cache::{CacheConfig, CacheStats, RequestCache};
pub use circuit_breaker::{
    BreakerError, BreakerMetrics, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use dedupe::{DedupeStats, Deduplicator};
pub use key::request_key;
pub use rate_limit::{
    host_key, wait_for_allowance, RateLimitConfig, RateLimitStats, RateLimiter,
    SlidingWindowLimiter, TokenBucketLimiter,
};
pub use registry::BreakerRegistry;
pub use retry::{
    policies, retry_with, RetryConfig, RetryConfigBuilder, RetryExecutor, RetryPolicy,
};

/// Simple configuration error for validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;
