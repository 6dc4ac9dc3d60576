// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration.
//!
//! All tunables live here with their defaults; components receive their
//! config section at construction time.

use std::path::PathBuf;
use std::time::Duration;

use crate::monitor::NetworkStatus;

/// Default maximum delivery attempts for a queued operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration for the network state monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Endpoint the reachability probe connects to (`host:port`).
    pub probe_endpoint: String,
    /// How often the reachability probe runs.
    pub probe_interval: Duration,
    /// Upper bound on a single probe attempt. A timed-out probe is a
    /// failed probe, never an unknown state.
    pub probe_timeout: Duration,
    /// Status assumed before the first probe completes.
    pub initial_status: NetworkStatus,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_endpoint: "1.1.1.1:443".to_string(),
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            initial_status: NetworkStatus::Online,
        }
    }
}

/// Configuration for the durable operation queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Pause inserted between operations during a drain pass so a long
    /// queue never starves the host.
    pub drain_pause: Duration,
    /// Default retry budget for operations enqueued without an explicit one.
    pub default_max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            drain_pause: Duration::from_millis(100),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Configuration for the tagged cache store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How often the periodic sweep evicts expired entries.
    pub sweep_interval: Duration,
    /// TTL applied when a caller does not specify one.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            default_ttl: Duration::from_secs(60),
        }
    }
}

/// Top-level configuration for a [`crate::engine::SyncEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub monitor: MonitorConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    /// Directory for the durable stores. `None` selects the in-memory
    /// fallback (nothing survives a restart).
    pub data_dir: Option<PathBuf>,
    /// Cache tags invalidated on every transition into online, for hosts
    /// that want reconnection to force re-fetching.
    pub invalidate_on_reconnect: Vec<String>,
}
