//! Single-flight deduplication of identical in-flight operations.
//!
//! Concurrent callers presenting the same key share one execution: the
//! first caller's operation runs, later callers await the same shared
//! future and observe the identical settled value or error. The registry
//! entry is removed the moment the operation settles, so later calls
//! start a fresh execution. Nothing is cached beyond settlement.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct InFlight<T, E> {
    /// Registration identity; settlement only deregisters its own entry,
    /// never a newer registration that reused the key after `clear`.
    id: u64,
    shared: SharedOutcome<T, E>,
}

/// Point-in-time deduplication statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupeStats {
    /// Calls handled in total
    pub total: u64,
    /// Calls that joined an existing in-flight execution
    pub deduplicated: u64,
}

impl DedupeStats {
    /// Fraction of calls that were joined onto an existing execution
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.deduplicated as f64 / self.total as f64
    }
}

/// Keyed single-flight executor
///
/// Values and errors must be `Clone` because every joined caller receives
/// its own copy of the settled outcome. Clones of the deduplicator share
/// the in-flight registry.
pub struct Deduplicator<T, E> {
    in_flight: Arc<Mutex<HashMap<String, InFlight<T, E>>>>,
    next_id: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    deduplicated: Arc<AtomicU64>,
}

impl<T, E> Clone for Deduplicator<T, E> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
            next_id: Arc::clone(&self.next_id),
            total: Arc::clone(&self.total),
            deduplicated: Arc::clone(&self.deduplicated),
        }
    }
}

impl<T, E> Default for Deduplicator<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deduplicator<T, E> {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            total: Arc::new(AtomicU64::new(0)),
            deduplicated: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T, E> Deduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Execute `operation` under `key`, joining an in-flight execution for
    /// the same key when one exists
    ///
    /// The closure is only invoked when this call starts a fresh execution;
    /// joined callers never run theirs. Both the value and the error of the
    /// shared execution are delivered to every waiter.
    pub async fn execute<F, Fut>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.total.fetch_add(1, Ordering::Relaxed);

        let shared = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(key) {
                self.deduplicated.fetch_add(1, Ordering::Relaxed);
                debug!(key, "joining in-flight execution");
                existing.shared.clone()
            } else {
                let registry = Arc::clone(&self.in_flight);
                let owned_key = key.to_string();
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let fut = operation();
                let shared = async move {
                    let outcome = fut.await;
                    // Deregister before any waiter observes the outcome, so
                    // follow-up calls start fresh. Only this execution's own
                    // registration is removed.
                    let mut registry = registry.lock();
                    if registry.get(&owned_key).is_some_and(|entry| entry.id == id) {
                        registry.remove(&owned_key);
                    }
                    outcome
                }
                .boxed()
                .shared();
                in_flight.insert(key.to_string(), InFlight { id, shared: shared.clone() });
                shared
            }
        };

        shared.await
    }

    /// Number of currently in-flight keyed executions
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Drop every in-flight registration
    ///
    /// Running executions continue for the callers already attached; new
    /// calls for the same keys start fresh executions.
    pub fn clear(&self) {
        self.in_flight.lock().clear();
    }

    /// Point-in-time statistics snapshot
    pub fn stats(&self) -> DedupeStats {
        DedupeStats {
            total: self.total.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
        }
    }
}
