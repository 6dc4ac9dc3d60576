// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether-core: Offline synchronization engine
//!
//! This crate keeps a client application working while disconnected from
//! its backend: it queues local mutations durably and replays them once
//! connectivity returns, and it memoizes remote reads with explicit expiry
//! so stale data is never served past its lifetime.
//!
//! Three components, wired by [`SyncEngine`]:
//!
//! - [`NetworkStateMonitor`]: single source of truth for connectivity,
//!   notifying on transitions only.
//! - [`DurableOperationQueue`]: persists pending operations and drains them
//!   in priority order through caller-supplied [`Executor`]s while online.
//! - [`TaggedCacheStore`]: TTL-based memoization with tag-based bulk
//!   invalidation and a periodic sweep.

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod store;

pub use cache::{CacheEntry, SetOptions, TaggedCacheStore};
pub use clock::{ClockSource, SystemClock};
pub use config::{CacheConfig, EngineConfig, MonitorConfig, QueueConfig};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use monitor::{
    LinkQuality, ListenerHandle, NetworkStateMonitor, NetworkStatus, ProbeReport,
    ReachabilityProbe, TcpProbe,
};
pub use queue::{
    DrainReport, DurableOperationQueue, EnqueueOptions, Executor, OperationStatus, Outcome,
    Priority, QueuedOperation, TerminalOutcome,
};
pub use store::{DurableStore, MemoryStore, SqliteStore};
