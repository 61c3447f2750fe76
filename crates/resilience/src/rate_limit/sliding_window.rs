//! Sliding window rate limiter over retained request timestamps.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::ConfigResult;

use super::{RateLimitConfig, RateLimitStats, RateLimiter};

/// Keyed sliding window limiter
///
/// Retains one timestamp per allowed request and enforces a hard cap of
/// `max_requests` within any trailing window. Timestamps older than the
/// window are evicted lazily on access. Clones share window state.
pub struct SlidingWindowLimiter<C: Clock = SystemClock> {
    config: RateLimitConfig,
    windows: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for SlidingWindowLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            windows: Arc::clone(&self.windows),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl SlidingWindowLimiter<SystemClock> {
    /// Create a new limiter using system time
    pub fn new(config: RateLimitConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    /// Create a new limiter with a custom clock (useful for testing)
    pub fn with_clock(config: RateLimitConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
        })
    }

    /// Wait until a request to `target` is admitted
    pub async fn wait_for_allowance(&self, target: &str) {
        super::wait_for_allowance(self, target).await;
    }

    fn evict(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.config.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

impl<C: Clock> RateLimiter for SlidingWindowLimiter<C> {
    fn is_allowed(&self, target: &str) -> bool {
        let key = self.config.key_for(target);
        let now = self.clock.now();
        let mut windows = self.windows.lock();

        let timestamps = windows.entry(key.clone()).or_default();
        self.evict(timestamps, now);

        if timestamps.len() < self.config.max_requests as usize {
            timestamps.push_back(now);
            true
        } else {
            debug!(%key, "sliding window full");
            false
        }
    }

    fn stats(&self, target: &str) -> RateLimitStats {
        let key = self.config.key_for(target);
        let now = self.clock.now();
        let mut windows = self.windows.lock();

        // A query must not materialize window state for unseen keys.
        let (used, oldest, newest) = match windows.get_mut(&key) {
            Some(timestamps) => {
                self.evict(timestamps, now);
                (
                    timestamps.len() as u32,
                    timestamps.front().copied(),
                    timestamps.back().copied(),
                )
            }
            None => (0, None, None),
        };

        let remaining = self.config.max_requests.saturating_sub(used);
        let until_expiry = |timestamp: Instant| {
            (timestamp + self.config.window).saturating_duration_since(now)
        };

        RateLimitStats {
            limit: self.config.max_requests,
            remaining,
            reset_after: newest.map(until_expiry).unwrap_or(Duration::ZERO),
            retry_after: if remaining > 0 { None } else { oldest.map(until_expiry) },
        }
    }

    fn reset(&self, target: Option<&str>) {
        let mut windows = self.windows.lock();
        match target {
            Some(target) => {
                windows.remove(&self.config.key_for(target));
            }
            None => windows.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn limiter(max: u32, window_secs: u64, clock: MockClock) -> SlidingWindowLimiter<MockClock> {
        SlidingWindowLimiter::with_clock(
            RateLimitConfig::new(max, Duration::from_secs(window_secs)),
            clock,
        )
        .unwrap()
    }

    /// Validates `SlidingWindowLimiter::is_allowed` behavior for the hard
    /// cap scenario.
    ///
    /// Assertions:
    /// - Confirms exactly `max_requests` allowances within one window.
    /// - Confirms further checks are denied without consuming anything.
    #[test]
    fn test_cap_within_window() {
        let rl = limiter(3, 10, MockClock::new());
        let target = "https://api.example.com/users";

        for _ in 0..3 {
            assert!(rl.is_allowed(target));
        }
        assert!(!rl.is_allowed(target));
        assert!(!rl.is_allowed(target));
        assert_eq!(rl.stats(target).remaining, 0);
    }

    /// Validates `SlidingWindowLimiter` eviction behavior for the oldest
    /// timestamp aging out scenario.
    ///
    /// Assertions:
    /// - Confirms one allowance returns as soon as the oldest retained
    ///   timestamp leaves the window, not before.
    #[test]
    fn test_oldest_ages_out() {
        let clock = MockClock::new();
        let rl = limiter(2, 10, clock.clone());
        let target = "https://api.example.com/users";

        assert!(rl.is_allowed(target));
        clock.advance(Duration::from_secs(4));
        assert!(rl.is_allowed(target));
        assert!(!rl.is_allowed(target));

        // 9s after the first call: still within its window.
        clock.advance(Duration::from_secs(5));
        assert!(!rl.is_allowed(target));

        // 10s after the first call: it ages out, freeing one slot.
        clock.advance(Duration::from_secs(1));
        assert!(rl.is_allowed(target));
        assert!(!rl.is_allowed(target));
    }

    /// Validates `SlidingWindowLimiter::stats` behavior for the timing
    /// hint scenario.
    ///
    /// Assertions:
    /// - Confirms `retry_after` points at the oldest timestamp's expiry.
    /// - Confirms `reset_after` points at the newest timestamp's expiry.
    #[test]
    fn test_stats_hints() {
        let clock = MockClock::new();
        let rl = limiter(2, 10, clock.clone());
        let target = "https://api.example.com/users";

        assert!(rl.is_allowed(target));
        clock.advance(Duration::from_secs(3));
        assert!(rl.is_allowed(target));

        let stats = rl.stats(target);
        assert_eq!(stats.limit, 2);
        assert_eq!(stats.remaining, 0);
        assert_eq!(stats.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(stats.reset_after, Duration::from_secs(10));
    }

    /// Validates `SlidingWindowLimiter::stats` behavior for the unseen key
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms querying stats does not materialize window state, so an
    ///   unbounded set of queried keys cannot grow the map.
    #[test]
    fn test_stats_does_not_create_state() {
        let rl = limiter(2, 10, MockClock::new());

        let stats = rl.stats("https://never-called.example.com/");
        assert_eq!(stats.remaining, 2);
        assert_eq!(stats.retry_after, None);
        assert!(rl.windows.lock().is_empty());

        assert!(rl.is_allowed("https://a.example.com/"));
        rl.stats("https://never-called.example.com/");
        assert_eq!(rl.windows.lock().len(), 1);
    }

    /// Validates `SlidingWindowLimiter` keying behavior for the per-host
    /// isolation scenario.
    ///
    /// Assertions:
    /// - Confirms a full window for one host does not affect another.
    #[test]
    fn test_keys_are_independent() {
        let rl = limiter(1, 10, MockClock::new());

        assert!(rl.is_allowed("https://a.example.com/x"));
        assert!(!rl.is_allowed("https://a.example.com/y"));
        assert!(rl.is_allowed("https://b.example.com/x"));
    }

    /// Validates `SlidingWindowLimiter::reset` behavior for the targeted
    /// reset scenario.
    ///
    /// Assertions:
    /// - Confirms resetting a target clears only that key's window.
    #[test]
    fn test_reset_single_key() {
        let rl = limiter(1, 10, MockClock::new());

        assert!(rl.is_allowed("https://a.example.com/"));
        assert!(rl.is_allowed("https://b.example.com/"));

        rl.reset(Some("https://a.example.com/"));
        assert!(rl.is_allowed("https://a.example.com/"));
        assert!(!rl.is_allowed("https://b.example.com/"));
    }
}
