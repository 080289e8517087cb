//! In-memory cache with per-entry TTL.
//!
//! An entry is readable only while `now - written_at < ttl`. Expired entries
//! are removed by whichever comes first: a read that finds them expired, or
//! the eviction timer scheduled when they were written.
//!
//! Every operation is total. Unknown keys are not errors and a poisoned lock
//! is recovered rather than propagated.

use residenthub_core::{CacheSettings, Clock, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use super::stats::CacheStats;
use super::timer::{TimerHandle, TimerScheduler};

struct CacheEntry<V> {
    value: V,
    written_at: Timestamp,
    ttl: Duration,
    timer: TimerHandle,
    /// Distinguishes this write from earlier writes to the same key, so a
    /// timer that fires late can never evict a newer value.
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Timestamp) -> bool {
        let age = now
            .signed_duration_since(self.written_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age >= self.ttl
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    next_generation: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }
}

/// TTL cache shared by reference across the app.
///
/// Values are returned as clones; callers never hold references into the
/// map.
pub struct TtlCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn TimerScheduler>,
    default_ttl: Duration,
    max_entries: usize,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + 'static,
{
    /// Create a cache with the given time sources and settings.
    pub fn new(
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn TimerScheduler>,
        settings: &CacheSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            clock,
            scheduler,
            default_ttl: settings.default_ttl(),
            max_entries: settings.max_entries.max(1),
        }
    }

    /// TTL used by [`TtlCache::put`].
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Current time on the cache's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// Any eviction timer from an earlier write to `key` is cancelled before
    /// the new one is scheduled, so exactly one eviction is pending per key.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let written_at = self.clock.now();
        let mut inner = self.lock();

        if let Some(previous) = inner.entries.remove(&key) {
            self.scheduler.cancel(previous.timer);
        }
        if inner.entries.len() >= self.max_entries {
            self.evict_oldest(&mut inner);
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let timer = self.schedule_eviction(key.clone(), generation, ttl);

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                written_at,
                ttl,
                timer,
                generation,
            },
        );
    }

    /// Store `value` with the default TTL.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Return the live value for `key`, evicting it if expired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.read(key, true, |entry| entry.value.clone())
    }

    /// Like [`TtlCache::get`], also returning when the value was written.
    pub fn get_entry(&self, key: &str) -> Option<(V, Timestamp)> {
        self.read(key, true, |entry| (entry.value.clone(), entry.written_at))
    }

    /// True exactly when [`TtlCache::get`] would return a value.
    ///
    /// Re-validates expiry (and evicts) but does not count as a hit or miss.
    pub fn has(&self, key: &str) -> bool {
        self.read(key, false, |_| ()).is_some()
    }

    /// Remove `key` and cancel its eviction. Returns whether an entry existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.lock();
        match inner.entries.remove(key) {
            Some(entry) => {
                self.scheduler.cancel(entry.timer);
                true
            }
            None => false,
        }
    }

    /// Cancel all pending evictions and empty the cache.
    pub fn clear(&self) {
        let mut inner = self.lock();
        for (_, entry) in inner.entries.drain() {
            self.scheduler.cancel(entry.timer);
        }
    }

    /// Number of stored entries, including expired ones not yet visited.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entry_count: inner.entries.len() as u64,
            evictions: inner.evictions,
        }
    }

    fn read<R>(
        &self,
        key: &str,
        record: bool,
        f: impl FnOnce(&CacheEntry<V>) -> R,
    ) -> Option<R> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let expired = inner.entries.get(key).map(|entry| entry.is_expired(now));
        match expired {
            None => {
                if record {
                    inner.misses += 1;
                }
                None
            }
            Some(true) => {
                if let Some(entry) = inner.entries.remove(key) {
                    self.scheduler.cancel(entry.timer);
                }
                inner.evictions += 1;
                if record {
                    inner.misses += 1;
                }
                tracing::debug!(key = %key, "Evicted expired cache entry on read");
                None
            }
            Some(false) => {
                if record {
                    inner.hits += 1;
                }
                inner.entries.get(key).map(f)
            }
        }
    }

    fn schedule_eviction(&self, key: String, generation: u64, ttl: Duration) -> TimerHandle {
        let weak: Weak<Mutex<Inner<V>>> = Arc::downgrade(&self.inner);
        self.scheduler.schedule(
            ttl,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    evict_if_current(&inner, &key, generation);
                }
            }),
        )
    }

    fn evict_oldest(&self, inner: &mut Inner<V>) {
        let oldest = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.written_at, entry.generation))
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            if let Some(entry) = inner.entries.remove(&key) {
                self.scheduler.cancel(entry.timer);
                inner.evictions += 1;
                tracing::debug!(key = %key, max_entries = self.max_entries, "Evicted oldest cache entry at capacity");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn evict_if_current<V>(inner: &Mutex<Inner<V>>, key: &str, generation: u64) {
    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
    let current = inner
        .entries
        .get(key)
        .is_some_and(|entry| entry.generation == generation);
    if current {
        inner.entries.remove(key);
        inner.evictions += 1;
        tracing::debug!(key = %key, "Evicted cache entry at TTL expiry");
    }
}

impl<V> Drop for TtlCache<V> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in inner.entries.drain() {
            self.scheduler.cancel(entry.timer);
        }
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self
            .inner
            .lock()
            .map(|inner| inner.entries.len())
            .unwrap_or_default();
        f.debug_struct("TtlCache")
            .field("entries", &entries)
            .field("default_ttl", &self.default_ttl)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
