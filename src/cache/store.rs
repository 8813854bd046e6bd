//! Time-bounded memoization of query results.

use std::{
    future::Future,
    hash::Hash,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use lru::LruCache;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum CacheError<E> {
    /// The fetch ran and failed. Nothing was stored.
    #[error(transparent)]
    Fetch(E),
    /// The fetch task panicked or was cancelled by the runtime.
    #[error("cache fetch task aborted: {0}")]
    Aborted(String),
}

struct Entry<V> {
    value: Arc<V>,
    fetched_at: Instant,
}

type Slot<V> = Arc<AsyncMutex<Option<Entry<V>>>>;

/// LRU-bounded cache whose entries expire `ttl` after they were fetched.
///
/// Each key owns an async lock held for the whole lookup-or-fetch, so callers
/// racing on a missing or stale key wait for a single fetch and then share its
/// result. Fetches run on their own task: a caller that goes away does not
/// cancel the query, and its result is still stored for the next caller.
///
/// Capacity evicts the least recently used entry that no caller holds. Entries
/// with a waiter or a running fetch are never evicted, so the cache may exceed
/// its capacity while more keys than that are in flight.
pub struct TtlCache<K, V> {
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
    slots: Mutex<LruCache<K, Slot<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: config.ttl,
            capacity: config.capacity_non_zero().get(),
            clock,
            slots: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Return the fresh value for `key`, running `fetch` only if there is none.
    ///
    /// Failed fetches are returned to the caller and never stored.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<Arc<V>, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Send + 'static,
    {
        let slot = self.slot(&key);
        let mut guard = slot.lock_owned().await;

        if let Some(entry) = guard.as_ref() {
            if self.is_fresh(entry) {
                counter!("connexa_monitor_cache_hit_total").increment(1);
                return Ok(Arc::clone(&entry.value));
            }
        }

        counter!("connexa_monitor_cache_miss_total").increment(1);
        let fut = fetch();
        let clock = Arc::clone(&self.clock);
        let handle = tokio::spawn(async move {
            match fut.await {
                Ok(value) => {
                    let value = Arc::new(value);
                    *guard = Some(Entry {
                        value: Arc::clone(&value),
                        fetched_at: clock.now(),
                    });
                    Ok(value)
                }
                Err(err) => {
                    counter!("connexa_monitor_cache_fetch_error_total").increment(1);
                    Err(err)
                }
            }
        });

        match handle.await {
            Ok(result) => result.map_err(CacheError::Fetch),
            Err(join_err) => {
                warn!(
                    target = SOURCE,
                    error = %join_err,
                    "Cache fetch task did not complete"
                );
                Err(CacheError::Aborted(join_err.to_string()))
            }
        }
    }

    /// Drop expired and empty entries that nobody is currently using.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let mut slots = mutex_lock(&self.slots, SOURCE, "purge_expired");
        let now = self.clock.now();

        let stale: Vec<K> = slots
            .iter()
            .filter(|(_, slot)| Arc::strong_count(slot) == 1)
            .filter_map(|(key, slot)| {
                let guard = slot.try_lock().ok()?;
                let expired = match guard.as_ref() {
                    Some(entry) => now.saturating_duration_since(entry.fetched_at) >= self.ttl,
                    None => true,
                };
                expired.then(|| key.clone())
            })
            .collect();

        for key in &stale {
            slots.pop(key);
        }

        gauge!("connexa_monitor_cache_entries").set(slots.len() as f64);
        if !stale.is_empty() {
            debug!(target = SOURCE, removed = stale.len(), "Purged expired cache entries");
        }
        stale.len()
    }

    /// Number of keys currently tracked, including in-flight ones.
    pub fn len(&self) -> usize {
        mutex_lock(&self.slots, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut slots = mutex_lock(&self.slots, SOURCE, "clear");
        slots.clear();
        gauge!("connexa_monitor_cache_entries").set(0.0);
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = mutex_lock(&self.slots, SOURCE, "slot");
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }

        self.make_room(&mut slots);
        let slot: Slot<V> = Arc::new(AsyncMutex::new(None));
        slots.put(key.clone(), Arc::clone(&slot));
        gauge!("connexa_monitor_cache_entries").set(slots.len() as f64);
        slot
    }

    /// Evict idle entries, least recently used first, until a new key fits.
    fn make_room(&self, slots: &mut LruCache<K, Slot<V>>) {
        while slots.len() >= self.capacity {
            let idle = slots
                .iter()
                .rev()
                .find(|(_, slot)| Arc::strong_count(slot) == 1)
                .map(|(key, _)| key.clone());
            match idle {
                Some(key) => {
                    slots.pop(&key);
                }
                None => {
                    debug!(
                        target = SOURCE,
                        entries = slots.len(),
                        capacity = self.capacity,
                        "Every cache entry is in use; growing past capacity"
                    );
                    break;
                }
            }
        }
    }

    fn is_fresh(&self, entry: &Entry<V>) -> bool {
        self.clock.now().saturating_duration_since(entry.fetched_at) < self.ttl
    }
}
