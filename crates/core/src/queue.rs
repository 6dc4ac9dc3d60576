// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable prioritized operation queue.
//!
//! Operations describing pending remote mutations are persisted before the
//! enqueue call returns, then drained through caller-supplied [`Executor`]s
//! whenever the host is online. The in-memory index is authoritative for
//! the process lifetime; the durable mirror reconstructs it after a restart.
//!
//! Drain order is a strict total order by (priority, enqueue time, sequence
//! number). Retries are bounded per operation; an operation that exhausts
//! its budget or fails permanently is dead-lettered and reported exactly
//! once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::monitor::NetworkStateMonitor;
use crate::store::DurableStore;

/// Durable collection holding pending operations.
const PENDING_COLLECTION: &str = "operations";
/// Durable collection mirroring dead-lettered operations.
const DEAD_COLLECTION: &str = "dead_letters";

/// Delivery priority. Declaration order is drain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(Error::InvalidPriority(s.to_string())),
        }
    }
}

/// Lifecycle status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Dead,
}

/// A single pending remote mutation awaiting network availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Globally unique identifier.
    pub id: String,
    /// Opaque string selecting which executor handles this operation.
    pub kind: String,
    /// Opaque payload handed to the executor.
    pub payload: serde_json::Value,
    /// Subject the operation belongs to (e.g. a user id).
    pub owner: String,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    /// Process-monotonic tiebreaker for same-millisecond enqueues.
    pub seq: u64,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub status: OperationStatus,
}

impl QueuedOperation {
    /// Strict total drain order: (priority, enqueue time, sequence).
    fn drain_order(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.enqueued_at.cmp(&other.enqueued_at))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Result of one executor attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Might work next time: consumes one retry attempt.
    RetryableFailure(String),
    /// Will never work: dead-lettered immediately, retry budget ignored.
    PermanentFailure(String),
}

/// Terminal fate of an operation, reported exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    DeadLettered { reason: String },
}

/// Caller-supplied unit of work attempting one operation against a remote
/// system. One executor is registered per operation kind; it owns any
/// backend-specific retry nuance beyond the three-way [`Outcome`].
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, operation: &QueuedOperation) -> Outcome;
}

/// Options for [`DurableOperationQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub owner: String,
    /// Retry budget; `None` uses the queue default.
    pub max_attempts: Option<u32>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Medium,
            owner: String::new(),
            max_attempts: None,
        }
    }
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// True if the pass did not run (a drain was already active, or the
    /// monitor reported offline).
    pub skipped: bool,
    pub attempted: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl DrainReport {
    fn skipped() -> Self {
        DrainReport {
            skipped: true,
            ..Default::default()
        }
    }
}

/// Callback invoked when an operation reaches a terminal outcome.
pub type TerminalCallback = dyn Fn(&QueuedOperation, &TerminalOutcome) -> Result<()> + Send + Sync;

struct QueueState {
    pending: HashMap<String, QueuedOperation>,
    dead: Vec<QueuedOperation>,
}

struct QueueInner {
    config: QueueConfig,
    store: Box<dyn DurableStore>,
    state: Mutex<QueueState>,
    executors: Mutex<HashMap<String, Arc<dyn Executor>>>,
    terminal_callbacks: Mutex<Vec<Arc<TerminalCallback>>>,
    /// Non-reentrancy gate: only one drain pass is ever active.
    drain_gate: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<Arc<NetworkStateMonitor>>>,
    next_seq: AtomicU64,
}

impl QueueInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Durable prioritized retry queue for offline mutations.
#[derive(Clone)]
pub struct DurableOperationQueue {
    inner: Arc<QueueInner>,
}

impl DurableOperationQueue {
    /// Opens a queue over the given store, reconstructing pending and
    /// dead-lettered operations from the durable mirror.
    pub fn open(store: Box<dyn DurableStore>, config: QueueConfig) -> Result<Self> {
        let mut pending = HashMap::new();
        let mut max_seq = 0u64;
        for record in store.get_all(PENDING_COLLECTION)? {
            let op: QueuedOperation = serde_json::from_value(record)
                .map_err(|e| Error::CorruptedRecord(format!("pending operation: {e}")))?;
            max_seq = max_seq.max(op.seq);
            pending.insert(op.id.clone(), op);
        }

        let mut dead = Vec::new();
        for record in store.get_all(DEAD_COLLECTION)? {
            let op: QueuedOperation = serde_json::from_value(record)
                .map_err(|e| Error::CorruptedRecord(format!("dead letter: {e}")))?;
            dead.push(op);
        }

        if !pending.is_empty() {
            debug!("recovered {} pending operations from store", pending.len());
        }

        Ok(DurableOperationQueue {
            inner: Arc::new(QueueInner {
                config,
                store,
                state: Mutex::new(QueueState { pending, dead }),
                executors: Mutex::new(HashMap::new()),
                terminal_callbacks: Mutex::new(Vec::new()),
                drain_gate: tokio::sync::Mutex::new(()),
                monitor: Mutex::new(None),
                next_seq: AtomicU64::new(max_seq + 1),
            }),
        })
    }

    /// Attaches a monitor used to gate drains and to schedule opportunistic
    /// drains on enqueue while online.
    pub fn attach_monitor(&self, monitor: Arc<NetworkStateMonitor>) {
        *self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(monitor);
    }

    /// Registers the executor handling operations of `kind`.
    pub fn register_executor(&self, kind: impl Into<String>, executor: Arc<dyn Executor>) {
        self.inner
            .executors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind.into(), executor);
    }

    /// Registers a callback for terminal outcomes (completed or
    /// dead-lettered). Callback failures are logged, never propagated.
    pub fn on_terminal<F>(&self, callback: F)
    where
        F: Fn(&QueuedOperation, &TerminalOutcome) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .terminal_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    /// Enqueues an operation, returning its id.
    ///
    /// The durable write happens before this call returns; a store failure
    /// fails the call and nothing is enqueued. If the attached monitor
    /// reports online, a background drain is scheduled opportunistically
    /// (the enqueue does not wait for it).
    pub fn enqueue(
        &self,
        kind: impl Into<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String> {
        let seq = self.inner.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        let op = QueuedOperation {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            owner: options.owner,
            priority: options.priority,
            enqueued_at: Utc::now(),
            seq,
            attempt_count: 0,
            max_attempts: options
                .max_attempts
                .unwrap_or(self.inner.config.default_max_attempts),
            status: OperationStatus::Pending,
        };

        let record = serde_json::to_value(&op)?;
        self.inner.store.put(PENDING_COLLECTION, &op.id, &record)?;

        let id = op.id.clone();
        self.inner.lock_state().pending.insert(op.id.clone(), op);

        if self.monitor_is_online() {
            self.spawn_drain();
        }

        Ok(id)
    }

    /// Returns the number of pending operations, optionally scoped to one
    /// owner.
    pub fn queue_size(&self, owner: Option<&str>) -> usize {
        let state = self.inner.lock_state();
        match owner {
            None => state.pending.len(),
            Some(o) => state.pending.values().filter(|op| op.owner == o).count(),
        }
    }

    /// Durably removes matching pending operations, returning how many were
    /// removed.
    ///
    /// An operation mid-executor-call at the moment of `clear` is not
    /// interrupted; its outcome is discarded once it resolves.
    pub fn clear(&self, owner: Option<&str>) -> Result<usize> {
        let ids: Vec<String> = {
            let state = self.inner.lock_state();
            state
                .pending
                .values()
                .filter(|op| owner.is_none_or(|o| op.owner == o))
                .map(|op| op.id.clone())
                .collect()
        };

        let mut removed = 0;
        for id in &ids {
            self.inner.store.delete(PENDING_COLLECTION, id)?;
            self.inner.lock_state().pending.remove(id);
            removed += 1;
        }
        Ok(removed)
    }

    /// Returns the dead-lettered operations seen so far.
    pub fn dead_letters(&self) -> Vec<QueuedOperation> {
        self.inner.lock_state().dead.clone()
    }

    /// Drains all currently pending operations in strict (priority, enqueue
    /// order) through their executors.
    ///
    /// Non-reentrant: a call while a drain is already active is a no-op and
    /// returns a report marked skipped. Operations enqueued mid-pass are
    /// deferred to the next pass. A store read/write failure aborts the pass
    /// with `Err`; an individual executor failure never does.
    ///
    /// No timeout is enforced on executor calls: a hung executor blocks the
    /// pass indefinitely. Bounding executor latency is the executor's
    /// responsibility. Strict priority order also means sustained
    /// high-priority enqueueing can delay low-priority operations across
    /// passes; no aging policy is applied.
    pub async fn drain(&self) -> Result<DrainReport> {
        let Ok(_guard) = self.inner.drain_gate.try_lock() else {
            debug!("drain already active, skipping");
            return Ok(DrainReport::skipped());
        };

        if self.monitor_is_offline() {
            debug!("offline, skipping drain");
            return Ok(DrainReport::skipped());
        }

        let mut snapshot: Vec<QueuedOperation> = {
            let state = self.inner.lock_state();
            state.pending.values().cloned().collect()
        };
        snapshot.sort_by(|a, b| a.drain_order(b));

        let mut report = DrainReport::default();
        for stale in snapshot {
            // Re-read: the operation may have been cleared or retried with a
            // newer attempt count since the snapshot.
            let Some(op) = self.inner.lock_state().pending.get(&stale.id).cloned() else {
                continue;
            };

            let executor = self
                .inner
                .executors
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(&op.kind)
                .cloned();

            let outcome = match executor {
                Some(executor) => executor.execute(&op).await,
                None => Outcome::PermanentFailure(format!(
                    "no executor registered for kind '{}'",
                    op.kind
                )),
            };
            report.attempted += 1;

            // A clear() while the executor was in flight removes the record;
            // the resolved outcome is discarded.
            if !self.inner.lock_state().pending.contains_key(&op.id) {
                debug!("operation {} cleared mid-drain, discarding outcome", op.id);
                continue;
            }

            match outcome {
                Outcome::Success => {
                    // Durably delete before processing continues.
                    self.inner.store.delete(PENDING_COLLECTION, &op.id)?;
                    self.inner.lock_state().pending.remove(&op.id);
                    report.completed += 1;
                    self.emit_terminal(&op, &TerminalOutcome::Completed);
                }
                Outcome::RetryableFailure(reason) => {
                    let mut updated = op.clone();
                    updated.attempt_count += 1;
                    if updated.attempt_count >= updated.max_attempts {
                        self.dead_letter(updated, reason)?;
                        report.dead_lettered += 1;
                    } else {
                        debug!(
                            "operation {} failed (attempt {}/{}): {}",
                            updated.id, updated.attempt_count, updated.max_attempts, reason
                        );
                        let record = serde_json::to_value(&updated)?;
                        self.inner
                            .store
                            .put(PENDING_COLLECTION, &updated.id, &record)?;
                        self.inner
                            .lock_state()
                            .pending
                            .insert(updated.id.clone(), updated);
                        report.retried += 1;
                    }
                }
                Outcome::PermanentFailure(reason) => {
                    self.dead_letter(op, reason)?;
                    report.dead_lettered += 1;
                }
            }

            tokio::time::sleep(self.inner.config.drain_pause).await;
        }

        Ok(report)
    }

    /// Moves an operation out of the pending set into the dead letters.
    ///
    /// Removal from the pending collection is durable and propagates store
    /// failure; the dead-letter mirror is best-effort.
    fn dead_letter(&self, mut op: QueuedOperation, reason: String) -> Result<()> {
        op.status = OperationStatus::Dead;
        self.inner.store.delete(PENDING_COLLECTION, &op.id)?;

        match serde_json::to_value(&op) {
            Ok(record) => {
                if let Err(e) = self.inner.store.put(DEAD_COLLECTION, &op.id, &record) {
                    warn!("failed to mirror dead letter {}: {}", op.id, e);
                }
            }
            Err(e) => warn!("failed to serialize dead letter {}: {}", op.id, e),
        }

        {
            let mut state = self.inner.lock_state();
            state.pending.remove(&op.id);
            state.dead.push(op.clone());
        }

        warn!("operation {} dead-lettered: {}", op.id, reason);
        self.emit_terminal(&op, &TerminalOutcome::DeadLettered { reason });
        Ok(())
    }

    fn emit_terminal(&self, op: &QueuedOperation, outcome: &TerminalOutcome) {
        let callbacks: Vec<Arc<TerminalCallback>> = self
            .inner
            .terminal_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in callbacks {
            if let Err(e) = callback(op, outcome) {
                warn!("terminal callback failed for {}: {}", op.id, e);
            }
        }
    }

    /// Schedules a background drain; errors are logged, not surfaced.
    fn spawn_drain(&self) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let queue = self.clone();
            handle.spawn(async move {
                if let Err(e) = queue.drain().await {
                    warn!("background drain failed: {}", e);
                }
            });
        }
    }

    fn monitor_is_online(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|m| m.is_online())
    }

    fn monitor_is_offline(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|m| m.is_offline())
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
