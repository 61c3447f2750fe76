//! Get-or-create registry of circuit breakers, one per logical target.
//!
//! The registry is a plain value the application constructs once and owns
//! for the process lifetime, then hands to whatever needs breaker lookups.
//! There is no global instance; tests build their own and stay isolated.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::clock::{Clock, SystemClock};
use crate::ConfigResult;

/// Keyed collection of circuit breakers sharing one configuration
///
/// Returned breakers are clones sharing state with the registry's copy, so
/// every caller asking for the same key observes the same circuit. Clones
/// of the registry itself also share the underlying map.
pub struct BreakerRegistry<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker<Arc<C>>>>>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for BreakerRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            breakers: Arc::clone(&self.breakers),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl BreakerRegistry<SystemClock> {
    /// Create a registry whose breakers use system time
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for BreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default()).expect("default config is valid")
    }
}

impl<C: Clock> BreakerRegistry<C> {
    /// Create a registry whose breakers share a custom clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            breakers: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
        })
    }

    /// Fetch the breaker for `key`, creating it on first use
    ///
    /// The registry's configuration must be valid by construction, so
    /// creation cannot fail here.
    pub fn get_or_create(&self, key: &str) -> CircuitBreaker<Arc<C>> {
        let mut breakers = self.breakers.lock();
        if let Some(existing) = breakers.get(key) {
            return existing.clone();
        }

        let breaker =
            CircuitBreaker::with_clock(self.config.clone(), Arc::clone(&self.clock))
                .expect("registry config validated at construction");
        breakers.insert(key.to_string(), breaker.clone());
        breaker
    }

    /// Drop the breaker for `key`; returns whether one existed
    pub fn remove(&self, key: &str) -> bool {
        self.breakers.lock().remove(key).is_some()
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.lock().is_empty()
    }

    /// Reset every registered breaker to closed
    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }
}
