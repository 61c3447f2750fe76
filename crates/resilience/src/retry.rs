//! Retry with capped exponential backoff and proportional jitter.
//!
//! The executor reruns a fallible operation up to a bounded number of
//! attempts, sleeping between attempts. The delay before retry `n` is
//! `initial_delay * multiplier^(n-1)`, capped at `max_delay`, plus a
//! uniformly random positive jitter of at most `jitter_factor` times the
//! capped delay. When attempts run out, or the policy declines to retry,
//! the operation's own last error is returned unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::{ConfigError, ConfigResult};

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Determine if the error from the given attempt (1-based) is retryable
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

impl<E, P> RetryPolicy<E> for Arc<P>
where
    P: RetryPolicy<E> + ?Sized,
{
    fn should_retry(&self, error: &E, attempt: u32) -> bool {
        (**self).should_retry(error, attempt)
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay before jitter
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub multiplier: f64,
    /// Jitter added on top of the delay, as a fraction of it (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }

        if self.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                message: "multiplier must be at least 1.0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Invalid {
                message: "jitter_factor must be between 0.0 and 1.0".to_string(),
            });
        }

        if self.max_delay < self.initial_delay {
            return Err(ConfigError::Invalid {
                message: "max_delay must not be less than initial_delay".to_string(),
            });
        }

        Ok(())
    }

    /// Backoff delay before the retry that follows failed attempt `attempt`
    /// (1-based), capped at `max_delay` and without jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Add uniform positive jitter in `[0, delay * jitter_factor]`
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let max_jitter = delay.as_secs_f64() * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(0.0..=max_jitter);
        delay + Duration::from_secs_f64(jitter)
    }
}

/// Builder for [`RetryConfig`] with fluent API
#[derive(Debug)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The main retry executor
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    /// Create with default configuration
    pub fn with_policy(policy: P) -> Self {
        Self::new(RetryConfig::default(), policy)
    }

    /// Execute an operation with retry logic
    ///
    /// Attempts run strictly sequentially. The error of the final attempt
    /// (or of a non-retryable failure) is returned unchanged.
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1u32;

        loop {
            debug!(attempt, max_attempts = self.config.max_attempts, "executing operation");

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt >= self.config.max_attempts {
                        warn!(attempt, ?error, "all retry attempts exhausted");
                        return Err(error);
                    }

                    if !self.policy.should_retry(&error, attempt) {
                        debug!(attempt, ?error, "error is not retryable");
                        return Err(error);
                    }

                    let delay = self.config.with_jitter(self.config.delay_for(attempt));
                    warn!(attempt, ?delay, ?error, "operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Convenience function to create a retry executor and execute an operation
pub async fn retry_with<F, Fut, T, E, P>(
    config: RetryConfig,
    policy: P,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: RetryPolicy<E>,
    E: fmt::Debug,
{
    RetryExecutor::new(config, policy).execute(operation).await
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::RetryPolicy;

    /// Always retry policy - retries on any error
    #[derive(Debug, Clone)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            true
        }
    }

    /// Never retry policy - never retries
    #[derive(Debug, Clone)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            false
        }
    }

    /// Predicate-based retry policy
    #[derive(Debug)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> bool {
            (self.predicate)(error, attempt)
        }
    }
}
