// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Engine facade and wiring.
//!
//! [`SyncEngine`] constructs the monitor, queue, and cache as explicit
//! instances and owns their lifecycle: `start` wires transitions into
//! online to a queue drain (and optional cache invalidation), `stop` tears
//! everything down in reverse. There are no module-level singletons; hosts
//! hold the engine and pass it where needed.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::cache::TaggedCacheStore;
use crate::clock::{ClockSource, SystemClock};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::monitor::{ListenerHandle, NetworkStateMonitor, ReachabilityProbe, TcpProbe};
use crate::queue::DurableOperationQueue;
use crate::store::{DurableStore, MemoryStore, SqliteStore};

/// Queue database filename within the data directory.
const QUEUE_DB_NAME: &str = "queue.db";
/// Cache database filename within the data directory.
const CACHE_DB_NAME: &str = "cache.db";

/// The offline synchronization engine: one lifecycle owner for the network
/// monitor, the durable operation queue, and the tagged cache.
pub struct SyncEngine {
    config: EngineConfig,
    monitor: Arc<NetworkStateMonitor>,
    queue: DurableOperationQueue,
    cache: TaggedCacheStore,
    sync_handle: Mutex<Option<ListenerHandle>>,
}

impl SyncEngine {
    /// Builds an engine from configuration alone: SQLite stores under
    /// `data_dir` (or the in-memory fallback without one), the default TCP
    /// probe, and the system clock.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let (queue_store, cache_store): (Box<dyn DurableStore>, Box<dyn DurableStore>) =
            match &config.data_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    (
                        Box::new(SqliteStore::open(dir.join(QUEUE_DB_NAME))?),
                        Box::new(SqliteStore::open(dir.join(CACHE_DB_NAME))?),
                    )
                }
                None => (Box::new(MemoryStore::new()), Box::new(MemoryStore::new())),
            };
        let probe = Arc::new(TcpProbe::new(config.monitor.probe_endpoint.clone()));
        Self::with_parts(config, probe, queue_store, cache_store, Arc::new(SystemClock))
    }

    /// Builds an engine from injected parts (probe, stores, clock).
    pub fn with_parts(
        config: EngineConfig,
        probe: Arc<dyn ReachabilityProbe>,
        queue_store: Box<dyn DurableStore>,
        cache_store: Box<dyn DurableStore>,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self> {
        let monitor = Arc::new(NetworkStateMonitor::with_probe(config.monitor.clone(), probe));
        let queue = DurableOperationQueue::open(queue_store, config.queue.clone())?;
        queue.attach_monitor(Arc::clone(&monitor));
        let cache = TaggedCacheStore::with_clock(cache_store, config.cache.clone(), clock)?;

        Ok(SyncEngine {
            config,
            monitor,
            queue,
            cache,
            sync_handle: Mutex::new(None),
        })
    }

    /// Starts the engine: probe loop, cache sweep, and the wiring from
    /// "became online" to a queue drain. Idempotent; must be called from
    /// within a tokio runtime.
    pub fn start(&self) {
        // The reconnect wiring must exist before the probe loop runs: a
        // first probe that reports reachable right away would otherwise
        // transition to online with no drain subscribed.
        {
            let mut handle = self.sync_handle.lock().unwrap_or_else(|e| e.into_inner());
            if handle.is_none() {
                let queue = self.queue.clone();
                let cache = self.cache.clone();
                let tags = self.config.invalidate_on_reconnect.clone();
                *handle = Some(self.monitor.add_sync_callback(move || {
                    let queue = queue.clone();
                    let cache = cache.clone();
                    let tags = tags.clone();
                    Box::pin(async move {
                        for tag in &tags {
                            let removed = cache.invalidate_by_tag(tag);
                            if removed > 0 {
                                debug!(
                                    "reconnect invalidated {} entries tagged '{}'",
                                    removed, tag
                                );
                            }
                        }
                        queue.drain().await?;
                        Ok(())
                    })
                }));
            }
        }

        self.cache.start();
        self.monitor.start();
        info!("sync engine started");
    }

    /// Stops the engine in reverse order. Idempotent.
    pub fn stop(&self) {
        self.monitor.stop();
        self.cache.stop();
        if let Some(handle) = self
            .sync_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.unsubscribe();
        }
        info!("sync engine stopped");
    }

    /// The network state monitor.
    pub fn monitor(&self) -> &Arc<NetworkStateMonitor> {
        &self.monitor
    }

    /// The durable operation queue.
    pub fn queue(&self) -> &DurableOperationQueue {
        &self.queue
    }

    /// The tagged cache store.
    pub fn cache(&self) -> &TaggedCacheStore {
        &self.cache
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
