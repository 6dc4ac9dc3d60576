// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tag-indexed expiring cache for remote reads.
//!
//! Entries carry an explicit TTL and a set of tags for bulk invalidation.
//! The in-memory index is authoritative; entries flagged `persist` are
//! mirrored best-effort to the durable store so they survive a restart.
//! Expired entries are evicted lazily on `get` and reclaimed eventually by
//! the periodic sweep, using one validity computation and one clock for
//! both paths.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::{ClockSource, SystemClock};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::store::DurableStore;

/// Durable collection mirroring persisted cache entries.
const CACHE_COLLECTION: &str = "cache";

/// A single cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    /// Wall clock milliseconds at creation.
    pub created_at_ms: u64,
    pub ttl_ms: u64,
    pub tags: HashSet<String>,
}

impl CacheEntry {
    /// The one validity check: an entry is valid iff
    /// `now - created_at < ttl`. A zero TTL is expired immediately.
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) >= self.ttl_ms
    }
}

/// Options for [`TaggedCacheStore::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time to live; `None` uses the cache default.
    pub ttl: Option<std::time::Duration>,
    /// Tags for bulk invalidation.
    pub tags: Vec<String>,
    /// Mirror to the durable store (best-effort).
    pub persist: bool,
}

/// Callback invoked when an entry is explicitly invalidated.
pub type InvalidateCallback = dyn Fn(&str) -> Result<()> + Send + Sync;

struct CacheInner {
    config: CacheConfig,
    clock: Arc<dyn ClockSource>,
    store: Box<dyn DurableStore>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    invalidate_callbacks: Mutex<Vec<Arc<InvalidateCallback>>>,
    /// Non-reentrancy gate for the sweep.
    sweep_gate: tokio::sync::Mutex<()>,
    cancel: Mutex<Option<CancellationToken>>,
}

/// TTL-based memoization with tag-based bulk invalidation.
#[derive(Clone)]
pub struct TaggedCacheStore {
    inner: Arc<CacheInner>,
}

impl TaggedCacheStore {
    /// Opens a cache over the given store with the system clock.
    pub fn open(store: Box<dyn DurableStore>, config: CacheConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Opens a cache with a caller-supplied clock.
    ///
    /// Restores persisted entries from the durable mirror, dropping any
    /// that expired while the process was down.
    pub fn with_clock(
        store: Box<dyn DurableStore>,
        config: CacheConfig,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self> {
        let now = clock.now_ms();
        let mut entries = HashMap::new();
        let mut stale = Vec::new();
        for record in store.get_all(CACHE_COLLECTION)? {
            let entry: CacheEntry = serde_json::from_value(record)
                .map_err(|e| Error::CorruptedRecord(format!("cache entry: {e}")))?;
            if entry.is_expired(now) {
                stale.push(entry.key);
            } else {
                entries.insert(entry.key.clone(), entry);
            }
        }
        for key in stale {
            if let Err(e) = store.delete(CACHE_COLLECTION, &key) {
                warn!("failed to drop stale cache mirror entry '{}': {}", key, e);
            }
        }

        Ok(TaggedCacheStore {
            inner: Arc::new(CacheInner {
                config,
                clock,
                store,
                entries: Mutex::new(entries),
                invalidate_callbacks: Mutex::new(Vec::new()),
                sweep_gate: tokio::sync::Mutex::new(()),
                cancel: Mutex::new(None),
            }),
        })
    }

    /// Starts the periodic sweep. Idempotent; must be called from within a
    /// tokio runtime.
    pub fn start(&self) {
        let mut cancel = self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if cancel.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return;
        }
        let token = CancellationToken::new();
        let cache = self.clone();
        let loop_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => return,
                    _ = tokio::time::sleep(cache.inner.config.sweep_interval) => {}
                }
                let swept = cache.sweep();
                if swept > 0 {
                    debug!("sweep evicted {} expired cache entries", swept);
                }
            }
        });
        *cancel = Some(token);
    }

    /// Stops the periodic sweep. Idempotent.
    pub fn stop(&self) {
        let mut cancel = self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cancel.take() {
            token.cancel();
        }
    }

    /// Stores a value. A second `set` with the same key fully replaces the
    /// entry, mirror included.
    ///
    /// The in-memory update is strict; the durable mirror is best-effort
    /// and a persistence failure never fails the call.
    pub fn set(&self, key: &str, value: serde_json::Value, options: SetOptions) {
        let ttl = options.ttl.unwrap_or(self.inner.config.default_ttl);
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            created_at_ms: self.inner.clock.now_ms(),
            ttl_ms: ttl.as_millis() as u64,
            tags: options.tags.into_iter().collect(),
        };

        if options.persist {
            match serde_json::to_value(&entry) {
                Ok(record) => {
                    if let Err(e) = self.inner.store.put(CACHE_COLLECTION, key, &record) {
                        warn!("failed to persist cache entry '{}': {}", key, e);
                    }
                }
                Err(e) => warn!("failed to serialize cache entry '{}': {}", key, e),
            }
        } else {
            // The replacement is not persisted, so an older mirrored value
            // must not resurrect on restart.
            self.delete_mirror(key);
        }

        self.lock_entries().insert(key.to_string(), entry);
    }

    /// Returns the cached value, or `None` if absent or expired. Expired
    /// entries are evicted lazily, mirror included.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = self.inner.clock.now_ms();
        {
            let mut entries = self.lock_entries();
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.is_expired(now) => {
                    entries.remove(key);
                }
                Some(entry) => return Some(entry.value.clone()),
            }
        }
        self.delete_mirror(key);
        None
    }

    /// Returns the cached value if valid; otherwise invokes `fetcher`
    /// exactly once, stores the result on success, and propagates the
    /// fetcher's failure without caching it.
    pub async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: SetOptions,
    ) -> Result<serde_json::Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = fetcher().await?;
        self.set(key, value.clone(), options);
        Ok(value)
    }

    /// Removes one entry from memory and mirror. Returns true if it was
    /// present.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.lock_entries().remove(key).is_some();
        self.delete_mirror(key);
        if removed {
            self.emit_invalidate(key);
        }
        removed
    }

    /// Removes every entry whose tag set contains `tag`, returning how many
    /// were removed. Entries with disjoint tag sets are untouched.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let keys: Vec<String> = {
            let mut entries = self.lock_entries();
            let keys: Vec<String> = entries
                .values()
                .filter(|e| e.tags.contains(tag))
                .map(|e| e.key.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        for key in &keys {
            self.delete_mirror(key);
            self.emit_invalidate(key);
        }
        keys.len()
    }

    /// Removes every entry, memory and mirror.
    pub fn clear(&self) {
        self.lock_entries().clear();
        if let Err(e) = self.inner.store.delete_all(CACHE_COLLECTION) {
            warn!("failed to clear cache mirror: {}", e);
        }
    }

    /// Walks all entries and evicts any past their TTL, whether or not
    /// `get` is ever called on them again. Returns the eviction count.
    ///
    /// Non-reentrant: a sweep started while one is active is a no-op.
    pub fn sweep(&self) -> usize {
        let Ok(_guard) = self.inner.sweep_gate.try_lock() else {
            debug!("sweep already active, skipping");
            return 0;
        };

        let now = self.inner.clock.now_ms();
        let expired: Vec<String> = {
            let mut entries = self.lock_entries();
            let expired: Vec<String> = entries
                .values()
                .filter(|e| e.is_expired(now))
                .map(|e| e.key.clone())
                .collect();
            for key in &expired {
                entries.remove(key);
            }
            expired
        };

        for key in &expired {
            self.delete_mirror(key);
        }
        expired.len()
    }

    /// Registers a callback invoked with the key of every explicitly
    /// invalidated entry. Callback failures are logged, never propagated.
    pub fn on_invalidate<F>(&self, callback: F)
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .invalidate_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    /// Returns the number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn delete_mirror(&self, key: &str) {
        if let Err(e) = self.inner.store.delete(CACHE_COLLECTION, key) {
            warn!("failed to remove cache mirror entry '{}': {}", key, e);
        }
    }

    fn emit_invalidate(&self, key: &str) {
        let callbacks: Vec<Arc<InvalidateCallback>> = self
            .inner
            .invalidate_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in callbacks {
            if let Err(e) = callback(key) {
                warn!("invalidation callback failed for '{}': {}", key, e);
            }
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
