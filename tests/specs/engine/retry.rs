// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Specs for retry semantics: bounded retry budgets, immediate
//! dead-lettering of permanent failures, and exactly-once terminal
//! reporting.

#![allow(clippy::unwrap_used)]

mod common;

use common::*;

use std::sync::{Arc, Mutex};

use serde_json::json;
use tether_core::{
    EnqueueOptions, OperationStatus, Outcome, Priority, TerminalOutcome,
};

#[tokio::test]
async fn successful_operations_complete_exactly_once() {
    let queue = memory_queue();
    let executor = RecordingExecutor::succeeding();
    queue.register_executor("upload", executor.clone());

    enqueue_labeled(&queue, "a", Priority::Medium);
    enqueue_labeled(&queue, "b", Priority::Medium);

    queue.drain().await.unwrap();
    queue.drain().await.unwrap();

    assert_eq!(executor.calls(), vec!["a", "b"]);
    assert_eq!(queue.queue_size(None), 0);
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test]
async fn retryable_failure_is_attempted_exactly_max_attempts_times() {
    let queue = memory_queue();
    let executor = RecordingExecutor::scripted(vec![
        Outcome::RetryableFailure("connection reset".into());
        10
    ]);
    queue.register_executor("upload", executor.clone());

    queue
        .enqueue(
            "upload",
            json!({ "label": "flaky" }),
            EnqueueOptions {
                priority: Priority::Medium,
                owner: String::new(),
                max_attempts: Some(3),
            },
        )
        .unwrap();

    for _ in 0..6 {
        queue.drain().await.unwrap();
    }

    assert_eq!(executor.calls().len(), 3);
    let dead = queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempt_count, 3);
    assert_eq!(dead[0].status, OperationStatus::Dead);
}

#[tokio::test]
async fn success_after_retryable_failures_completes_within_budget() {
    let queue = memory_queue();
    let executor = RecordingExecutor::scripted(vec![
        Outcome::RetryableFailure("timeout".into()),
        Outcome::RetryableFailure("timeout".into()),
        Outcome::Success,
    ]);
    queue.register_executor("upload", executor.clone());

    queue
        .enqueue(
            "upload",
            json!({ "label": "eventually" }),
            EnqueueOptions {
                priority: Priority::Medium,
                owner: String::new(),
                max_attempts: Some(5),
            },
        )
        .unwrap();

    for _ in 0..4 {
        queue.drain().await.unwrap();
    }

    assert_eq!(executor.calls().len(), 3);
    assert_eq!(queue.queue_size(None), 0);
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test]
async fn permanent_failure_skips_remaining_retry_budget() {
    let queue = memory_queue();
    let executor =
        RecordingExecutor::scripted(vec![Outcome::PermanentFailure("unprocessable".into())]);
    queue.register_executor("upload", executor.clone());

    queue
        .enqueue(
            "upload",
            json!({ "label": "rejected" }),
            EnqueueOptions {
                priority: Priority::Medium,
                owner: String::new(),
                max_attempts: Some(5),
            },
        )
        .unwrap();

    for _ in 0..3 {
        queue.drain().await.unwrap();
    }

    assert_eq!(executor.calls().len(), 1);
    assert_eq!(queue.dead_letters().len(), 1);
}

#[tokio::test]
async fn one_failing_operation_does_not_block_the_rest() {
    let queue = memory_queue();
    // First call (high priority op) fails permanently; the rest succeed.
    let executor =
        RecordingExecutor::scripted(vec![Outcome::PermanentFailure("bad payload".into())]);
    queue.register_executor("upload", executor.clone());

    enqueue_labeled(&queue, "doomed", Priority::High);
    enqueue_labeled(&queue, "fine-1", Priority::Medium);
    enqueue_labeled(&queue, "fine-2", Priority::Low);

    let report = queue.drain().await.unwrap();

    assert_eq!(executor.calls(), vec!["doomed", "fine-1", "fine-2"]);
    assert_eq!(report.completed, 2);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(queue.queue_size(None), 0);
}

#[tokio::test]
async fn terminal_outcome_is_reported_exactly_once_per_operation() {
    let queue = memory_queue();
    let executor = RecordingExecutor::scripted(vec![
        Outcome::Success,
        Outcome::RetryableFailure("busy".into()),
        Outcome::RetryableFailure("busy".into()),
    ]);
    queue.register_executor("upload", executor.clone());

    let events = Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&events);
    queue.on_terminal(move |op, outcome| {
        e.lock().unwrap().push((op.id.clone(), outcome.clone()));
        Ok(())
    });

    let winner = enqueue_labeled(&queue, "winner", Priority::High);
    let loser = queue
        .enqueue(
            "upload",
            json!({ "label": "loser" }),
            EnqueueOptions {
                priority: Priority::Medium,
                owner: String::new(),
                max_attempts: Some(2),
            },
        )
        .unwrap();

    for _ in 0..4 {
        queue.drain().await.unwrap();
    }

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], (winner, TerminalOutcome::Completed));
    assert_eq!(
        events[1],
        (
            loser,
            TerminalOutcome::DeadLettered {
                reason: "busy".into()
            }
        )
    );
}

#[tokio::test]
async fn operation_without_executor_is_dead_lettered() {
    let queue = memory_queue();
    queue
        .enqueue("unknown-kind", json!({}), Default::default())
        .unwrap();

    let report = queue.drain().await.unwrap();

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(queue.queue_size(None), 0);
    assert_eq!(queue.dead_letters().len(), 1);
}
