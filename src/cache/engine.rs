//! Cache Engine Module
//!
//! Main cache engine combining the concurrent store with the eviction index
//! and the single-flight resolution protocol.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::TimeDelta;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cache::flight;
use crate::cache::stats::StatsRecorder;
use crate::cache::{CacheEntry, CacheStats, CacheStore, ComputationState, EvictionIndex};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Upper bound on expired-entry refresh hops within one `resolve` call.
pub const MAX_RESOLVE_ATTEMPTS: usize = 8;

type EntryRef<V> = Arc<CacheEntry<V>>;

// == Cache ==
/// Cheaply cloneable handle to one cache instance.
///
/// Every public operation first sweeps expired entries, then acts on the
/// store. The store and the eviction index are only changed together while
/// the index lock is held, so no caller sees an entry in one and not the
/// other.
pub struct Cache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CacheInner<V> {
    /// Key to entry mapping
    store: CacheStore<CacheEntry<V>>,
    /// Entries ordered by expiry. Lock order: index, then store shards.
    index: Mutex<EvictionIndex<CacheEntry<V>>>,
    /// Performance statistics
    stats: StatsRecorder,
    config: CacheConfig,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache whose entries expire after `default_ttl` unless a
    /// call says otherwise. `None` = entries never expire by default.
    pub fn new(default_ttl: Option<TimeDelta>) -> Self {
        Self::with_config(CacheConfig::with_default_ttl(default_ttl))
    }

    /// Creates a cache from a full configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store: CacheStore::new(),
                index: Mutex::new(EvictionIndex::new()),
                stats: StatsRecorder::default(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // == Resolve ==
    /// Returns the cached value for `key`, computing it with `factory` on a
    /// miss. Uses the default TTL.
    ///
    /// See [`Cache::resolve_with_ttl`].
    pub async fn resolve<F, Fut, E>(&self, key: &str, factory: F) -> Result<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        self.resolve_with_ttl(key, self.inner.config.default_ttl, factory)
            .await
    }

    /// Returns the cached value for `key`, computing it with `factory` on a
    /// miss. `ttl = None` makes the new entry never expire.
    ///
    /// Concurrent callers for the same key share one factory run and all see
    /// its outcome. The factory receives the entry's cancellation token;
    /// `remove_and_kill` trips it, and the factory future is also dropped at
    /// its next await point once that happens.
    ///
    /// # Errors
    /// - `Factory` if the factory failed (for every waiter of that run)
    /// - `RecursiveResolve` if called for a key whose factory encloses this call
    /// - `Killed` if the computation was cancelled
    pub async fn resolve_with_ttl<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<TimeDelta>,
        factory: F,
    ) -> Result<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.sweep_expired_now();

            let (entry, created) = self.inner.acquire(key, ttl);
            if created {
                self.inner.stats.record_miss();
                return self.compute(&entry, factory).await;
            }

            if entry.is_pending() && flight::is_computing_on_this_task(&entry) {
                warn!("Recursive resolve of key {}, evicting entry", key);
                self.inner.evict(&entry);
                self.inner.stats.record_failure();
                return Err(CacheError::RecursiveResolve(key.to_string()));
            }

            let value = entry.wait().await?;

            // Whoever created the entry already got their value; an expired
            // entry seen by anyone else is dropped and resolved again.
            if entry.is_expired(Instant::now()) && attempt < MAX_RESOLVE_ATTEMPTS {
                debug!("Entry for key {} expired on read, refreshing", key);
                self.inner.stats.record_refresh();
                self.inner.evict(&entry);
                continue;
            }

            self.inner.stats.record_hit();
            return Ok(value);
        }
    }

    /// Runs the factory as the sole computer of `entry` and publishes the
    /// outcome to every waiter.
    async fn compute<F, Fut, E>(&self, entry: &EntryRef<V>, factory: F) -> Result<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Into<anyhow::Error>,
    {
        let mut guard = ComputeGuard::new(&self.inner, entry);
        entry.begin();

        let cancel = entry.cancel_token().clone();
        let run = flight::within_chain(entry, factory(cancel.clone()));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CacheError::Killed(entry.key().to_string())),
            result = run => result.map_err(|err| CacheError::from_factory(entry.key(), err.into())),
        };
        guard.disarm();

        match outcome {
            Ok(value) => {
                self.inner.complete(entry, value.clone());
                Ok(value)
            }
            Err(err) => {
                warn!("Computation failed: {}", err);
                self.inner.stats.record_failure();
                self.inner.evict(entry);
                entry.publish(Err(err.clone()));
                Err(err)
            }
        }
    }

    // == Add Or Replace ==
    /// Stores `value` under `key` with the default TTL, replacing any entry.
    pub fn add_or_replace(&self, key: &str, value: V) {
        self.add_or_replace_with_ttl(key, value, self.inner.config.default_ttl)
    }

    /// Stores `value` under `key`, replacing any entry and starting a fresh
    /// TTL. An in-flight computation of the replaced entry still completes
    /// for its own waiters.
    pub fn add_or_replace_with_ttl(&self, key: &str, value: V, ttl: Option<TimeDelta>) {
        self.sweep_expired_now();

        let entry = Arc::new(CacheEntry::ready(key, value, ttl, Instant::now()));
        let displaced = {
            let mut index = self.inner.index.lock();
            let displaced = self.inner.store.replace(key, Arc::clone(&entry));
            if let Some(old) = &displaced {
                index.remove_exact(old.expires_at(), old);
            }
            index.insert(entry.expires_at(), entry);
            displaced
        };

        if displaced.is_some() {
            self.inner.stats.record_removal();
        }
        debug!("Stored value for key {}", key);
    }

    // == Remove ==
    /// Removes `key`. Returns whether an entry was present.
    ///
    /// An in-flight computation is left to finish for its waiters.
    pub fn remove(&self, key: &str) -> bool {
        self.sweep_expired_now();
        self.inner.take(key).is_some()
    }

    /// Removes `key` and cancels its computation if one is in flight.
    ///
    /// Waiters of a cancelled computation observe `Killed`. Returns whether
    /// an entry was present.
    ///
    /// # Errors
    /// `CancellationUnsupported` if the computation did not stop within the
    /// configured kill grace period. The entry is removed regardless.
    pub async fn remove_and_kill(&self, key: &str) -> Result<bool> {
        self.sweep_expired_now();
        let Some(entry) = self.inner.take(key) else {
            return Ok(false);
        };
        if !entry.is_pending() {
            return Ok(true);
        }

        warn!("Killing in-flight computation for key {}", key);
        entry.kill();
        match tokio::time::timeout(self.inner.config.kill_grace, entry.settled()).await {
            Ok(()) => Ok(true),
            Err(_) => {
                warn!(
                    "Computation for key {} ignored cancellation for {:?}",
                    key, self.inner.config.kill_grace
                );
                Err(CacheError::CancellationUnsupported(key.to_string()))
            }
        }
    }

    // == Reset ==
    /// Restarts the TTL of `key` from now.
    ///
    /// # Errors
    /// `NotFound` if the key is absent.
    pub fn reset(&self, key: &str) -> Result<()> {
        self.sweep_expired_now();

        let mut index = self.inner.index.lock();
        let entry = self
            .inner
            .store
            .get(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        index.remove_exact(entry.expires_at(), &entry);
        let expiry = entry.reset(Instant::now());
        index.insert(expiry, entry);
        drop(index);

        debug!("Reset TTL for key {}", key);
        Ok(())
    }

    // == Contains Key ==
    /// True if an entry (computed or in flight) exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.sweep_expired_now();
        self.inner.store.contains_key(key)
    }

    // == Get ==
    /// Returns the value stored under `key`, waiting for an in-flight
    /// computation to finish.
    ///
    /// # Errors
    /// `NotFound` if the key is absent, or the failure of the computation.
    pub async fn get(&self, key: &str) -> Result<V> {
        self.sweep_expired_now();
        let entry = self
            .inner
            .store
            .get(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;

        if entry.is_pending() && flight::is_computing_on_this_task(&entry) {
            warn!("Read of key {} from inside its own factory, evicting entry", key);
            self.inner.evict(&entry);
            self.inner.stats.record_failure();
            return Err(CacheError::RecursiveResolve(key.to_string()));
        }
        entry.wait().await
    }

    /// Returns the value stored under `key`, or `default` on any failure.
    pub async fn get_or(&self, key: &str, default: V) -> V {
        self.get(key).await.unwrap_or(default)
    }

    // == Time To Live ==
    /// Signed milliseconds until `key` expires; infinite if it never does.
    ///
    /// # Errors
    /// `NotFound` if the key is absent.
    pub fn milliseconds_remaining(&self, key: &str) -> Result<f64> {
        self.sweep_expired_now();
        self.inner
            .store
            .get(key)
            .map(|entry| entry.milliseconds_remaining(Instant::now()))
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    // == Inspect ==
    /// Returns the computation state of `key`, if present.
    pub fn state(&self, key: &str) -> Option<ComputationState> {
        self.sweep_expired_now();
        self.inner.store.get(key).map(|entry| entry.state())
    }

    // == Clear ==
    /// Drops every entry. In-flight computations finish for their waiters
    /// but are not stored.
    pub fn clear(&self) {
        let mut index = self.inner.index.lock();
        index.clear();
        self.inner.store.clear();
        drop(index);

        debug!("Cache cleared");
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.inner.store.len())
    }

    // == Sweep Expired ==
    /// Removes every expired entry. Returns the number removed.
    ///
    /// Entries still being computed are not removed: they are parked at
    /// `Expiry::Never` until their owner publishes and re-times them, so a
    /// slow factory never gets a second concurrent run.
    ///
    /// Called at the start of every operation; cheap when nothing is due.
    pub fn sweep_expired_now(&self) -> usize {
        let now = Instant::now();
        let expired = {
            let mut index = self.inner.index.lock();
            let mut expired = index.sweep_expired(now);
            expired.retain(|entry| {
                if entry.is_pending() && self.inner.store.is_current(entry.key(), entry) {
                    index.insert(entry.hold(), Arc::clone(entry));
                    return false;
                }
                self.inner.store.remove_if_same(entry.key(), entry);
                true
            });
            expired
        };

        if !expired.is_empty() {
            self.inner.stats.record_expirations(expired.len());
            trace!("Swept {} expired entries", expired.len());
        }
        expired.len()
    }
}

impl<V: Clone> CacheInner<V> {
    /// Gets the entry for `key` or atomically creates and indexes a new one.
    fn acquire(&self, key: &str, ttl: Option<TimeDelta>) -> (EntryRef<V>, bool) {
        if let Some(entry) = self.store.get(key) {
            return (entry, false);
        }

        let now = Instant::now();
        let mut index = self.index.lock();
        let (entry, created) = self
            .store
            .get_or_insert_with(key, || CacheEntry::new(key, ttl, now));
        if created {
            index.insert(entry.expires_at(), Arc::clone(&entry));
        }
        drop(index);

        if created {
            debug!("Created entry for key {}", key);
        }
        (entry, created)
    }

    /// Removes whatever entry `key` maps to from both structures.
    fn take(&self, key: &str) -> Option<EntryRef<V>> {
        let mut index = self.index.lock();
        let entry = self.store.remove(key)?;
        index.remove_exact(entry.expires_at(), &entry);
        drop(index);

        self.stats.record_removal();
        debug!("Removed entry for key {}", key);
        Some(entry)
    }

    /// Removes `entry` from both structures if it is still the current one.
    fn evict(&self, entry: &EntryRef<V>) -> bool {
        let mut index = self.index.lock();
        if !self.store.remove_if_same(entry.key(), entry) {
            return false;
        }
        index.remove_exact(entry.expires_at(), entry)
    }

    /// Publishes a computed value and restarts the entry's TTL if it is
    /// still current.
    ///
    /// Both happen under the index lock so a sweep never sees the entry
    /// pending with its fresh expiry.
    fn complete(&self, entry: &EntryRef<V>, value: V) {
        let mut index = self.index.lock();
        entry.publish(Ok(value));
        if !self.store.is_current(entry.key(), entry) {
            return;
        }
        index.remove_exact(entry.expires_at(), entry);
        let expiry = entry.reset(Instant::now());
        index.insert(expiry, Arc::clone(entry));
    }
}

// == Compute Guard ==
/// Fails an entry whose owner stopped before publishing: the owning future
/// was dropped or the factory panicked. Waiters then see `Abandoned`.
struct ComputeGuard<'a, V: Clone> {
    inner: &'a CacheInner<V>,
    entry: &'a EntryRef<V>,
    armed: bool,
}

impl<'a, V: Clone> ComputeGuard<'a, V> {
    fn new(inner: &'a CacheInner<V>, entry: &'a EntryRef<V>) -> Self {
        Self {
            inner,
            entry,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<V: Clone> Drop for ComputeGuard<'_, V> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let key = self.entry.key().to_string();
        warn!("Computation for key {} abandoned", key);
        self.inner.stats.record_failure();
        self.inner.evict(self.entry);
        self.entry.publish(Err(CacheError::Abandoned(key)));
    }
}
