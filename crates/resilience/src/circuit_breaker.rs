//! Circuit breaker for fail-fast protection of flaky downstreams.
//!
//! Tracks consecutive failures per breaker and short-circuits calls while
//! the circuit is open. After the cool-down elapses the next caller probes
//! the downstream in half-open state; enough consecutive probe successes
//! close the circuit again, any probe failure reopens it.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::{ConfigError, ConfigResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, probing whether the downstream recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`]
///
/// Generic over the operation's own error type `E`, which is passed through
/// untouched so callers can keep matching on their domain errors.
#[derive(Debug, Error)]
pub enum BreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit is open; the operation was not invoked
    #[error("circuit breaker is open, retry after {retry_after:?}")]
    Open { retry_after: Duration },

    /// The underlying operation failed
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Extract the underlying operation error, if any
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(error) => Some(error),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,
    /// Time to wait after opening before allowing a half-open probe
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cool_down: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "success_threshold must be greater than 0".to_string(),
            });
        }

        if self.cool_down.is_zero() {
            return Err(ConfigError::Invalid {
                message: "cool_down must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn cool_down(mut self, cool_down: Duration) -> Self {
        self.config.cool_down = cool_down;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_successes: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_at: Option<Instant>,
}

/// Generic circuit breaker implementation
///
/// Prevents cascading failures by monitoring consecutive operation failures
/// and temporarily rejecting calls once a threshold is reached. Clones share
/// state, so the same breaker can guard every call site for one target.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    failure_count: Arc<AtomicU32>,
    half_open_successes: Arc<AtomicU32>,
    total_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
    last_failure_at: Arc<RwLock<Option<Instant>>>,
    opened_at: Arc<RwLock<Option<Instant>>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Acquire))
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            failure_count: Arc::clone(&self.failure_count),
            half_open_successes: Arc::clone(&self.half_open_successes),
            total_calls: Arc::clone(&self.total_calls),
            rejected_calls: Arc::clone(&self.rejected_calls),
            last_failure_at: Arc::clone(&self.last_failure_at),
            opened_at: Arc::clone(&self.opened_at),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker with the given configuration using
    /// system time
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default()).expect("default config is valid")
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: Arc::new(AtomicU32::new(0)),
            half_open_successes: Arc::new(AtomicU32::new(0)),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            last_failure_at: Arc::new(RwLock::new(None)),
            opened_at: Arc::new(RwLock::new(None)),
            clock: Arc::new(clock),
        })
    }

    /// Check whether the circuit breaker currently admits a call
    ///
    /// Returns the remaining cool-down as the error when the circuit is open
    /// and the cool-down has not elapsed. When the cool-down has elapsed the
    /// circuit transitions to half-open and the call is admitted as a probe.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        match self.read_state() {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let opened_at = match self.opened_at.read() {
                    Ok(guard) => *guard,
                    Err(poisoned) => {
                        warn!("circuit breaker opened_at lock poisoned");
                        *poisoned.into_inner()
                    }
                };

                let Some(opened) = opened_at else {
                    // Open without a recorded instant; treat the full
                    // cool-down as remaining.
                    return Err(self.config.cool_down);
                };

                let elapsed = self.clock.now().duration_since(opened);
                if elapsed >= self.config.cool_down {
                    if let Ok(mut state) = self.state.write() {
                        // Another caller may have probed first.
                        if *state == CircuitState::Open {
                            *state = CircuitState::HalfOpen;
                            self.half_open_successes.store(0, Ordering::Release);
                            info!("circuit breaker half-open after cool-down");
                        }
                    }
                    return Ok(());
                }

                Err(self.config.cool_down - elapsed)
            }
        }
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Rejected calls fail fast with [`BreakerError::Open`] carrying the
    /// remaining cool-down; the operation is not invoked. Operation errors
    /// pass through unchanged inside [`BreakerError::Inner`].
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Err(retry_after) = self.try_acquire() {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!(?retry_after, "circuit breaker rejecting call");
            return Err(BreakerError::Open { retry_after });
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation().await {
            Ok(value) => {
                self.record_success();
                debug!("circuit breaker: operation succeeded");
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                warn!("circuit breaker: operation failed");
                Err(BreakerError::Inner(error))
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        match self.read_state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    if let Ok(mut state) = self.state.write() {
                        *state = CircuitState::Closed;
                        self.failure_count.store(0, Ordering::Release);
                        self.half_open_successes.store(0, Ordering::Release);
                    }
                    info!(successes, "circuit breaker closed after successful probes");
                }
            }
            CircuitState::Open => {
                warn!("success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let now = self.clock.now();

        if let Ok(mut last_failure) = self.last_failure_at.write() {
            *last_failure = Some(now);
        }

        match self.read_state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.trip(now);
                    warn!(failures, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during probing immediately reopens the circuit
                // and discards accumulated probe successes.
                self.half_open_successes.store(0, Ordering::Release);
                self.trip(now);
                warn!("circuit breaker reopened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.read_state()
    }

    /// Get a metrics snapshot
    pub fn metrics(&self) -> BreakerMetrics {
        BreakerMetrics {
            state: self.read_state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            half_open_successes: self.half_open_successes.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
            last_failure_at: self.last_failure_at.read().ok().and_then(|guard| *guard),
        }
    }

    /// Reset the circuit breaker to closed state, clearing all counters
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        self.half_open_successes.store(0, Ordering::Relaxed);

        if let Ok(mut last_failure) = self.last_failure_at.write() {
            *last_failure = None;
        }
        if let Ok(mut opened) = self.opened_at.write() {
            *opened = None;
        }
        if let Ok(mut state) = self.state.write() {
            *state = CircuitState::Closed;
        }
        info!("circuit breaker manually reset to closed state");
    }

    fn trip(&self, now: Instant) {
        if let Ok(mut state) = self.state.write() {
            *state = CircuitState::Open;
        }
        if let Ok(mut opened) = self.opened_at.write() {
            *opened = Some(now);
        }
    }

    fn read_state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                *poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for circuit breaker state transitions
    //!
    //! Tests cover threshold-driven opening, fast-fail with remaining
    //! cool-down, half-open probing, and counter resets, all driven by
    //! `MockClock` so no real time passes.

    use super::*;
    use crate::clock::MockClock;

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    #[error("downstream unavailable")]
    struct TestError;

    fn breaker(clock: MockClock) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .success_threshold(2)
            .cool_down(Duration::from_secs(10))
            .build()
            .unwrap();
        CircuitBreaker::with_clock(config, clock).unwrap()
    }

    /// Validates `CircuitBreakerConfig::validate` behavior for the zero
    /// threshold scenario.
    ///
    /// Assertions:
    /// - Confirms zero failure and success thresholds are rejected.
    /// - Confirms a zero cool-down is rejected.
    #[test]
    fn test_config_validation_rejects_zeroes() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().success_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().cool_down(Duration::ZERO).build().is_err());
        assert!(CircuitBreakerConfig::builder().build().is_ok());
    }

    /// Validates `CircuitBreaker::record_failure` behavior for the
    /// threshold-opening scenario.
    ///
    /// Assertions:
    /// - Confirms the circuit stays closed below the failure threshold.
    /// - Confirms the circuit opens exactly at the threshold.
    #[test]
    fn test_opens_after_consecutive_failures() {
        let cb = breaker(MockClock::new());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    /// Validates `CircuitBreaker::record_success` behavior for the closed
    /// state scenario.
    ///
    /// Assertions:
    /// - Confirms a success resets the consecutive failure count to zero.
    #[test]
    fn test_closed_success_resets_failure_count() {
        let cb = breaker(MockClock::new());

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.metrics().failure_count, 0);

        // Two more failures should not reach the threshold of three.
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    /// Validates `CircuitBreaker::try_acquire` behavior for the open-circuit
    /// fast-fail scenario.
    ///
    /// Assertions:
    /// - Confirms calls are rejected while the cool-down is pending.
    /// - Confirms the remaining cool-down shrinks as mock time advances.
    #[test]
    fn test_open_rejects_with_remaining_cool_down() {
        let clock = MockClock::new();
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.try_acquire(), Err(Duration::from_secs(10)));

        clock.advance(Duration::from_secs(4));
        assert_eq!(cb.try_acquire(), Err(Duration::from_secs(6)));
    }

    /// Validates `CircuitBreaker::try_acquire` behavior for the half-open
    /// transition scenario.
    ///
    /// Assertions:
    /// - Confirms a call after the cool-down is admitted as a probe.
    /// - Confirms the state observed afterwards is half-open.
    #[test]
    fn test_half_open_after_cool_down() {
        let clock = MockClock::new();
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(10));

        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    /// Validates `CircuitBreaker::record_success` behavior for the half-open
    /// recovery scenario.
    ///
    /// Assertions:
    /// - Confirms the circuit stays half-open below the success threshold.
    /// - Confirms it closes once the success threshold is met.
    #[test]
    fn test_closes_after_half_open_successes() {
        let clock = MockClock::new();
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(10));
        assert!(cb.try_acquire().is_ok());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 0);
    }

    /// Validates `CircuitBreaker::record_failure` behavior for the half-open
    /// relapse scenario.
    ///
    /// Assertions:
    /// - Confirms a probe failure reopens the circuit immediately.
    /// - Confirms accumulated probe successes are discarded.
    /// - Confirms the cool-down restarts from the relapse instant.
    #[test]
    fn test_half_open_failure_reopens() {
        let clock = MockClock::new();
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(10));
        assert!(cb.try_acquire().is_ok());

        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().half_open_successes, 0);
        assert_eq!(cb.try_acquire(), Err(Duration::from_secs(10)));
    }

    /// Validates `CircuitBreaker::execute` behavior for the async pipeline
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms failures pass through unchanged inside `Inner`.
    /// - Confirms the operation is not invoked once the circuit opens.
    /// - Confirms the rejection carries the remaining cool-down.
    #[tokio::test]
    async fn test_execute_fast_fails_without_invoking() {
        let clock = MockClock::new();
        let cb = breaker(clock.clone());

        for _ in 0..3 {
            let result: Result<(), _> = cb.execute(|| async { Err(TestError) }).await;
            match result {
                Err(BreakerError::Inner(error)) => assert_eq!(error, TestError),
                other => panic!("expected inner error, got {other:?}"),
            }
        }

        let mut invoked = false;
        let result: Result<(), _> = cb
            .execute(|| {
                invoked = true;
                async { Err(TestError) }
            })
            .await;
        assert!(!invoked);
        match result {
            Err(BreakerError::Open { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(10));
            }
            other => panic!("expected open error, got {other:?}"),
        }
        assert_eq!(cb.metrics().rejected_calls, 1);
    }

    /// Validates `CircuitBreaker::reset` behavior for the manual reset
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms an open circuit returns to closed with cleared counters.
    #[test]
    fn test_reset_returns_to_closed() {
        let cb = breaker(MockClock::new());

        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.failure_count, 0);
        assert!(metrics.last_failure_at.is_none());
        assert!(cb.try_acquire().is_ok());
    }

    /// Validates `CircuitBreaker::clone` behavior for the shared state
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms failures recorded through a clone open the original.
    #[test]
    fn test_clone_shares_state() {
        let cb = breaker(MockClock::new());
        let clone = cb.clone();

        for _ in 0..3 {
            clone.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
