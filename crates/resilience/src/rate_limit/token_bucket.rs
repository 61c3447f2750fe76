//! Token bucket rate limiter with lazy fractional refill.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::ConfigResult;

use super::{RateLimitConfig, RateLimitStats, RateLimiter};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Keyed token bucket limiter
///
/// Each key starts with a full bucket of `max_requests` tokens. Tokens
/// refill continuously in proportion to elapsed time, at
/// `max_requests / window` per second, and are capped at the bucket size.
/// Refill happens lazily on access; there is no background task. Clones
/// share bucket state.
pub struct TokenBucketLimiter<C: Clock = SystemClock> {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for TokenBucketLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            buckets: Arc::clone(&self.buckets),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl TokenBucketLimiter<SystemClock> {
    /// Create a new limiter using system time
    pub fn new(config: RateLimitConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> TokenBucketLimiter<C> {
    /// Create a new limiter with a custom clock (useful for testing)
    pub fn with_clock(config: RateLimitConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
        })
    }

    /// Wait until a request to `target` is admitted
    pub async fn wait_for_allowance(&self, target: &str) {
        super::wait_for_allowance(self, target).await;
    }

    /// Tokens refilled per second
    fn rate(&self) -> f64 {
        f64::from(self.config.max_requests) / self.config.window.as_secs_f64()
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if !elapsed.is_zero() {
            let replenished = state.tokens + elapsed.as_secs_f64() * self.rate();
            state.tokens = replenished.min(f64::from(self.config.max_requests));
            state.last_refill = now;
        }
    }
}

impl<C: Clock> RateLimiter for TokenBucketLimiter<C> {
    fn is_allowed(&self, target: &str) -> bool {
        let key = self.config.key_for(target);
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();

        let state = buckets.entry(key.clone()).or_insert_with(|| BucketState {
            tokens: f64::from(self.config.max_requests),
            last_refill: now,
        });
        self.refill(state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            debug!(%key, "token bucket exhausted");
            false
        }
    }

    fn stats(&self, target: &str) -> RateLimitStats {
        let key = self.config.key_for(target);
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();

        // A query must not materialize bucket state for unseen keys.
        let tokens = match buckets.get_mut(&key) {
            Some(state) => {
                self.refill(state, now);
                state.tokens
            }
            None => f64::from(self.config.max_requests),
        };

        let rate = self.rate();
        let retry_after = if tokens >= 1.0 {
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - tokens) / rate))
        };
        let deficit = f64::from(self.config.max_requests) - tokens;

        RateLimitStats {
            limit: self.config.max_requests,
            remaining: tokens.floor() as u32,
            reset_after: Duration::from_secs_f64(deficit / rate),
            retry_after,
        }
    }

    fn reset(&self, target: Option<&str>) {
        let mut buckets = self.buckets.lock();
        match target {
            Some(target) => {
                buckets.remove(&self.config.key_for(target));
            }
            None => buckets.clear(),
        }
    }
}
