// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Network state monitoring.
//!
//! [`NetworkStateMonitor`] is the single source of truth for connectivity.
//! It combines an edge-triggered link signal (reported by the host via
//! [`NetworkStateMonitor::report_link_up`] / `report_link_down`) with an
//! active periodic reachability probe, because the edge signal alone cannot
//! detect "reports connected but has no real route" (captive portals).
//!
//! Subscribers are notified on transitions only, never on repeated checks
//! that compute the same status.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};

/// Current connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    /// Reachable with a usable link.
    Online,
    /// Unreachable, or the probe failed/timed out.
    Offline,
    /// Reachable but over a very low-bandwidth link.
    Degraded,
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkStatus::Online => "online",
            NetworkStatus::Offline => "offline",
            NetworkStatus::Degraded => "degraded",
        };
        write!(f, "{s}")
    }
}

impl FromStr for NetworkStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(NetworkStatus::Online),
            "offline" => Ok(NetworkStatus::Offline),
            "degraded" => Ok(NetworkStatus::Degraded),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

/// Link-quality hint reported by a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkQuality {
    Good,
    /// Very low bandwidth; maps to [`NetworkStatus::Degraded`].
    Poor,
}

/// Result of one reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReport {
    Reachable(LinkQuality),
    Unreachable,
}

/// Active reachability check against a well-known external endpoint.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Runs one check, bounded by `timeout`. A timed-out check must be
    /// reported as [`ProbeReport::Unreachable`], never as an unknown state.
    async fn check(&self, timeout: Duration) -> ProbeReport;
}

/// Default probe: a bounded-timeout TCP connect.
///
/// A plain connect has no bandwidth signal, so this probe always reports
/// [`LinkQuality::Good`] on success; hosts with a real link-quality hint
/// supply their own [`ReachabilityProbe`].
pub struct TcpProbe {
    endpoint: String,
}

impl TcpProbe {
    /// Creates a probe targeting `host:port`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        TcpProbe {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn check(&self, timeout: Duration) -> ProbeReport {
        match tokio::time::timeout(timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(_stream)) => ProbeReport::Reachable(LinkQuality::Good),
            Ok(Err(e)) => {
                debug!("probe connect to {} failed: {}", self.endpoint, e);
                ProbeReport::Unreachable
            }
            Err(_) => {
                debug!("probe connect to {} timed out", self.endpoint);
                ProbeReport::Unreachable
            }
        }
    }
}

/// Callback invoked on every status transition.
pub type StatusListener = dyn Fn(NetworkStatus, NetworkStatus) -> Result<()> + Send + Sync;

/// Async callback invoked on transitions into online.
pub type SyncCallback = dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync;

enum HandleKind {
    Listener,
    SyncCallback,
}

/// Registration handle returned by [`NetworkStateMonitor::add_listener`] and
/// [`NetworkStateMonitor::add_sync_callback`].
///
/// Dropping the handle does not unsubscribe; call
/// [`ListenerHandle::unsubscribe`] explicitly.
pub struct ListenerHandle {
    inner: Arc<MonitorInner>,
    id: u64,
    kind: HandleKind,
}

impl ListenerHandle {
    /// Removes the registered callback.
    pub fn unsubscribe(self) {
        let mut state = self.inner.lock_state();
        match self.kind {
            HandleKind::Listener => state.listeners.retain(|(id, _)| *id != self.id),
            HandleKind::SyncCallback => state.sync_callbacks.retain(|(id, _)| *id != self.id),
        }
    }
}

struct MonitorState {
    status: NetworkStatus,
    last_online: Option<DateTime<Utc>>,
    listeners: Vec<(u64, Arc<StatusListener>)>,
    sync_callbacks: Vec<(u64, Arc<SyncCallback>)>,
    next_id: u64,
}

struct MonitorInner {
    config: MonitorConfig,
    probe: Arc<dyn ReachabilityProbe>,
    state: Mutex<MonitorState>,
    status_tx: watch::Sender<NetworkStatus>,
    /// Nudges the probe loop to re-probe immediately (link-up signal).
    kick: Notify,
}

impl MonitorInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Single source of truth for connectivity.
pub struct NetworkStateMonitor {
    inner: Arc<MonitorInner>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl NetworkStateMonitor {
    /// Creates a monitor using the default TCP probe.
    pub fn new(config: MonitorConfig) -> Self {
        let probe = Arc::new(TcpProbe::new(config.probe_endpoint.clone()));
        Self::with_probe(config, probe)
    }

    /// Creates a monitor with a caller-supplied probe.
    pub fn with_probe(config: MonitorConfig, probe: Arc<dyn ReachabilityProbe>) -> Self {
        let initial = config.initial_status;
        let (status_tx, _) = watch::channel(initial);
        let inner = Arc::new(MonitorInner {
            config,
            probe,
            state: Mutex::new(MonitorState {
                status: initial,
                last_online: None,
                listeners: Vec::new(),
                sync_callbacks: Vec::new(),
                next_id: 0,
            }),
            status_tx,
            kick: Notify::new(),
        });
        NetworkStateMonitor {
            inner,
            cancel: Mutex::new(None),
        }
    }

    /// Starts the periodic probe loop. Idempotent; must be called from
    /// within a tokio runtime.
    pub fn start(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if cancel.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return;
        }
        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let loop_token = token.clone();
        tokio::spawn(async move {
            probe_loop(inner, loop_token).await;
        });
        *cancel = Some(token);
    }

    /// Stops the probe loop. Idempotent.
    pub fn stop(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cancel.take() {
            token.cancel();
        }
    }

    /// Returns the current cached status.
    pub fn status(&self) -> NetworkStatus {
        self.inner.lock_state().status
    }

    /// Returns true if the current status is online.
    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    /// Returns true if the current status is offline.
    pub fn is_offline(&self) -> bool {
        self.status() == NetworkStatus::Offline
    }

    /// Returns the time of the last transition into online, if any.
    pub fn last_online(&self) -> Option<DateTime<Utc>> {
        self.inner.lock_state().last_online
    }

    /// Registers a listener invoked on every status transition, in
    /// registration order. A listener returning `Err` is logged and never
    /// blocks the remaining listeners.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(NetworkStatus, NetworkStatus) -> Result<()> + Send + Sync + 'static,
    {
        let mut state = self.inner.lock_state();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        ListenerHandle {
            inner: Arc::clone(&self.inner),
            id,
            kind: HandleKind::Listener,
        }
    }

    /// Registers an async callback invoked only on transitions into online.
    ///
    /// All registered callbacks are awaited settle-all: one failing callback
    /// never prevents the others from running.
    pub fn add_sync_callback<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let mut state = self.inner.lock_state();
        let id = state.next_id;
        state.next_id += 1;
        state.sync_callbacks.push((id, Arc::new(callback)));
        ListenerHandle {
            inner: Arc::clone(&self.inner),
            id,
            kind: HandleKind::SyncCallback,
        }
    }

    /// Resolves true immediately if already online, otherwise true on the
    /// next transition into online, or false after `timeout`.
    ///
    /// The internal subscription is dropped on timeout, so this never fires
    /// late.
    pub async fn wait_for_online(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.status_tx.subscribe();
        if *rx.borrow() == NetworkStatus::Online {
            return true;
        }
        tokio::time::timeout(timeout, async move {
            while rx.changed().await.is_ok() {
                if *rx.borrow() == NetworkStatus::Online {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    /// Edge-triggered link-down signal from the host: goes offline
    /// immediately without waiting for the next probe.
    pub fn report_link_down(&self) {
        let _ = transition(&self.inner, NetworkStatus::Offline);
    }

    /// Edge-triggered link-up signal from the host: nudges the probe loop
    /// to re-probe immediately rather than flipping online unverified.
    pub fn report_link_up(&self) {
        self.inner.kick.notify_one();
    }
}

/// Applies a computed status, returning the sync callbacks to await if this
/// was a transition into online.
///
/// A computed status equal to the current status is a no-op. All state
/// mutation happens in one synchronous step; callbacks are invoked outside
/// the lock.
fn transition(
    inner: &Arc<MonitorInner>,
    new: NetworkStatus,
) -> Option<Vec<Arc<SyncCallback>>> {
    let (old, listeners, sync_callbacks) = {
        let mut state = inner.lock_state();
        if state.status == new {
            return None;
        }
        let old = state.status;
        state.status = new;
        if new == NetworkStatus::Online {
            state.last_online = Some(Utc::now());
        }
        let listeners: Vec<Arc<StatusListener>> =
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        let sync_callbacks = (new == NetworkStatus::Online).then(|| {
            state
                .sync_callbacks
                .iter()
                .map(|(_, c)| Arc::clone(c))
                .collect::<Vec<_>>()
        });
        (old, listeners, sync_callbacks)
    };

    debug!("network status changed: {} -> {}", old, new);
    let _ = inner.status_tx.send(new);

    for listener in listeners {
        if let Err(e) = listener(old, new) {
            warn!("status listener failed: {}", e);
        }
    }

    sync_callbacks
}

/// Awaits all sync callbacks, discarding individual failures.
async fn notify_sync_callbacks(callbacks: Vec<Arc<SyncCallback>>) {
    let futures: Vec<_> = callbacks.iter().map(|cb| cb()).collect();
    for result in join_all(futures).await {
        if let Err(e) = result {
            warn!("sync callback failed: {}", e);
        }
    }
}

/// Periodic probe loop: check, apply the computed status, then wait for the
/// next interval, a link-up kick, or cancellation.
async fn probe_loop(inner: Arc<MonitorInner>, cancel: CancellationToken) {
    loop {
        let report = tokio::select! {
            _ = cancel.cancelled() => return,
            report = inner.probe.check(inner.config.probe_timeout) => report,
        };

        let status = match report {
            ProbeReport::Unreachable => NetworkStatus::Offline,
            ProbeReport::Reachable(LinkQuality::Poor) => NetworkStatus::Degraded,
            ProbeReport::Reachable(LinkQuality::Good) => NetworkStatus::Online,
        };

        if let Some(callbacks) = transition(&inner, status) {
            notify_sync_callbacks(callbacks).await;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = inner.kick.notified() => {}
            _ = tokio::time::sleep(inner.config.probe_interval) => {}
        }
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
