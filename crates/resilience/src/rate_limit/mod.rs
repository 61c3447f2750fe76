//! Keyed client-side rate limiting.
//!
//! Two interchangeable limiters share one configuration shape: a token
//! bucket (smooth, fractional refill) and a sliding window (hard cap over
//! any trailing window). Both group requests under a key derived from the
//! target, by default the URL host, so limits apply per downstream service.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::{ConfigError, ConfigResult};

pub mod sliding_window;
pub mod token_bucket;

pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// Function deriving the limit key from a request target
pub type KeyExtractor = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Default key extractor: the URL host, or the whole target when it does
/// not parse as a URL
pub fn host_key(target: &str) -> String {
    Url::parse(target)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| target.to_string())
}

/// Configuration shared by both limiter flavors
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum allowances per window
    pub max_requests: u32,
    /// Length of the limiting window
    pub window: Duration,
    /// Derives the limit key from a request target
    pub key_extractor: KeyExtractor,
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            key_extractor: Arc::new(host_key),
        }
    }
}

impl RateLimitConfig {
    /// Create a configuration with the given limit over the given window
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self { max_requests, window, ..Self::default() }
    }

    /// Replace the key extractor
    pub fn with_key_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.key_extractor = Arc::new(extractor);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_requests == 0 {
            return Err(ConfigError::Invalid {
                message: "max_requests must be greater than 0".to_string(),
            });
        }

        if self.window.is_zero() {
            return Err(ConfigError::Invalid {
                message: "window must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub(crate) fn key_for(&self, target: &str) -> String {
        (self.key_extractor)(target)
    }
}

/// Point-in-time view of one key's budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStats {
    /// Configured allowances per window
    pub limit: u32,
    /// Whole allowances currently available
    pub remaining: u32,
    /// Time until the budget is fully restored
    pub reset_after: Duration,
    /// Time until at least one allowance is available; `None` when one
    /// already is
    pub retry_after: Option<Duration>,
}

/// Common surface of the limiter flavors
pub trait RateLimiter: Send + Sync {
    /// Check whether a request to `target` is currently allowed, consuming
    /// one allowance when it is. A denial consumes nothing.
    fn is_allowed(&self, target: &str) -> bool;

    /// Current budget for `target`'s key, without consuming anything
    fn stats(&self, target: &str) -> RateLimitStats;

    /// Clear state for `target`'s key, or for all keys when `None`
    fn reset(&self, target: Option<&str>);
}

/// Upper bound on each sleep inside [`wait_for_allowance`]
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait until the limiter admits a request to `target`, then return with
/// the allowance already consumed
///
/// Sleeps are sized from the limiter's own `retry_after` hint, bounded
/// above by [`WAIT_POLL_INTERVAL`] so a stale hint cannot oversleep.
pub async fn wait_for_allowance<L>(limiter: &L, target: &str)
where
    L: RateLimiter + ?Sized,
{
    loop {
        if limiter.is_allowed(target) {
            return;
        }

        let hint = limiter.stats(target).retry_after.unwrap_or(WAIT_POLL_INTERVAL);
        let wait = hint.clamp(Duration::from_millis(10), WAIT_POLL_INTERVAL);
        debug!(limit_target = target, ?wait, "rate limited, waiting for allowance");
        tokio::time::sleep(wait).await;
    }
}
