//! TTL response cache with a stale-while-revalidate window.
//!
//! Entries are fresh while their age is within the TTL, then servable but
//! flagged stale for a further grace window, then gone. All expiry is
//! computed at read time against the injected clock; nothing runs in the
//! background. `prune` exists for callers that want to reclaim memory for
//! entries past their stale window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::{ConfigError, ConfigResult};

/// Configuration for cache freshness behavior
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied by [`RequestCache::set`]
    pub default_ttl: Duration,
    /// Grace period after the TTL during which entries are served stale
    pub stale_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { default_ttl: Duration::from_secs(60), stale_window: Duration::from_secs(30) }
    }
}

impl CacheConfig {
    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                message: "default_ttl must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub expirations: u64,
    pub size: usize,
}

impl CacheStats {
    /// Hit rate in `[0.0, 1.0]`; zero when nothing was looked up yet
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[derive(Debug, Default)]
struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    expirations: AtomicU64,
}

impl MetricsCollector {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    fn snapshot(&self, size: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.age(now) <= self.ttl
    }

    fn is_servable(&self, now: Instant, stale_window: Duration) -> bool {
        self.age(now) <= self.ttl + stale_window
    }
}

/// String-keyed TTL cache with stale-while-revalidate semantics
///
/// Values are returned by clone; callers typically store `Arc`ed or cheaply
/// cloneable response payloads. Clones of the cache share storage and
/// statistics.
pub struct RequestCache<V, C: Clock = SystemClock> {
    config: CacheConfig,
    entries: Arc<Mutex<HashMap<String, CacheEntry<V>>>>,
    metrics: Arc<MetricsCollector>,
    clock: Arc<C>,
}

impl<V, C: Clock> Clone for RequestCache<V, C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            entries: Arc::clone(&self.entries),
            metrics: Arc::clone(&self.metrics),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<V: Clone> RequestCache<V, SystemClock> {
    /// Create a new cache using system time
    pub fn new(config: CacheConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<V: Clone> Default for RequestCache<V, SystemClock> {
    fn default() -> Self {
        Self::new(CacheConfig::default()).expect("default config is valid")
    }
}

impl<V: Clone, C: Clock> RequestCache<V, C> {
    /// Create a new cache with a custom clock (useful for testing)
    pub fn with_clock(config: CacheConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(MetricsCollector::default()),
            clock: Arc::new(clock),
        })
    }

    /// Insert a value under the default TTL
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.config.default_ttl);
    }

    /// Insert a value with an entry-specific TTL
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry { value, inserted_at: self.clock.now(), ttl };
        self.entries.lock().insert(key.into(), entry);
        self.metrics.record_insert();
    }

    /// Look up a servable value
    ///
    /// Returns fresh and stale-but-servable values alike; use
    /// [`is_stale`](Self::is_stale) to tell them apart. An entry past its
    /// stale window is removed and counts as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_servable(now, self.config.stale_window) => {
                self.metrics.record_hit();
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.metrics.record_expirations(1);
                self.metrics.record_miss();
                debug!(key, "cache entry expired past stale window");
                None
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Whether the entry is past its TTL but still servable
    ///
    /// `false` for fresh entries and for keys that are absent or expired.
    pub fn is_stale(&self, key: &str) -> bool {
        let now = self.clock.now();
        let entries = self.entries.lock();

        entries.get(key).is_some_and(|entry| {
            !entry.is_fresh(now) && entry.is_servable(now, self.config.stale_window)
        })
    }

    /// Look up a servable value, generating and inserting one on miss
    pub fn get_or_set_with<F>(&self, key: &str, generate: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = generate();
        self.set(key, value.clone());
        value
    }

    /// Remove a single entry; returns whether it existed
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remove every entry whose key matches the glob `pattern`
    ///
    /// `*` matches any run of characters; everything else is literal.
    /// Returns the number of entries removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let anchored = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
        let matcher = match Regex::new(&anchored) {
            Ok(matcher) => matcher,
            Err(error) => {
                warn!(pattern, %error, "invalid cache invalidation pattern");
                return 0;
            }
        };

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !matcher.is_match(key));
        let removed = before - entries.len();
        debug!(pattern, removed, "cache pattern invalidation");
        removed
    }

    /// Remove every entry past its stale window; returns the removal count
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let stale_window = self.config.stale_window;

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_servable(now, stale_window));
        let removed = before - entries.len();
        self.metrics.record_expirations(removed as u64);
        removed
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, including not-yet-pruned expired ones
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Point-in-time statistics snapshot
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.len())
    }
}
