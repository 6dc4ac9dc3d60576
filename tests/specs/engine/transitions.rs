// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Specs for connectivity transitions: notification on change only, a
//! single transition for repeated identical probe results, settle-all
//! callback dispatch, and the reconnect-to-drain wiring.

#![allow(clippy::unwrap_used)]

mod common;

use common::*;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tether_core::{
    EngineConfig, Error, LinkQuality, MemoryStore, NetworkStateMonitor, NetworkStatus,
    ProbeReport, Priority, SetOptions, SyncEngine, SystemClock,
};

fn engine_with(
    config: EngineConfig,
    script: Vec<ProbeReport>,
    fallback: ProbeReport,
) -> SyncEngine {
    SyncEngine::with_parts(
        config,
        ScriptedProbe::new(script, fallback),
        Box::new(MemoryStore::new()),
        Box::new(MemoryStore::new()),
        Arc::new(SystemClock),
    )
    .unwrap()
}

fn offline_config() -> EngineConfig {
    EngineConfig {
        monitor: fast_monitor_config(NetworkStatus::Offline),
        queue: fast_queue_config(),
        ..Default::default()
    }
}

#[tokio::test]
async fn repeated_failed_probes_notify_exactly_once() {
    let monitor = NetworkStateMonitor::with_probe(
        fast_monitor_config(NetworkStatus::Online),
        ScriptedProbe::new(vec![], ProbeReport::Unreachable),
    );

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let t = Arc::clone(&transitions);
    let _handle = monitor.add_listener(move |old, new| {
        t.lock().unwrap().push((old, new));
        Ok(())
    });

    monitor.start();
    // Roughly ten probe intervals: every probe fails, one transition.
    tokio::time::sleep(Duration::from_millis(120)).await;
    monitor.stop();

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![(NetworkStatus::Online, NetworkStatus::Offline)]
    );
    assert!(monitor.is_offline());
}

#[tokio::test]
async fn flapping_connectivity_notifies_each_edge() {
    let monitor = NetworkStateMonitor::with_probe(
        fast_monitor_config(NetworkStatus::Online),
        ScriptedProbe::new(
            vec![
                ProbeReport::Unreachable,
                ProbeReport::Reachable(LinkQuality::Good),
                ProbeReport::Unreachable,
            ],
            ProbeReport::Reachable(LinkQuality::Good),
        ),
    );

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let t = Arc::clone(&transitions);
    let _handle = monitor.add_listener(move |old, new| {
        t.lock().unwrap().push((old, new));
        Ok(())
    });

    monitor.start();
    tokio::time::sleep(Duration::from_millis(120)).await;
    monitor.stop();

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![
            (NetworkStatus::Online, NetworkStatus::Offline),
            (NetworkStatus::Offline, NetworkStatus::Online),
            (NetworkStatus::Online, NetworkStatus::Offline),
            (NetworkStatus::Offline, NetworkStatus::Online),
        ]
    );
}

#[tokio::test]
async fn all_sync_callbacks_run_even_when_one_fails() {
    let monitor = NetworkStateMonitor::with_probe(
        fast_monitor_config(NetworkStatus::Offline),
        ScriptedProbe::new(vec![], ProbeReport::Reachable(LinkQuality::Good)),
    );

    let ran = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&ran);
    let _failing = monitor.add_sync_callback(move || {
        let r = Arc::clone(&r);
        Box::pin(async move {
            r.lock().unwrap().push("failing");
            Err(Error::Listener("refresh failed".into()))
        })
    });
    let r = Arc::clone(&ran);
    let _succeeding = monitor.add_sync_callback(move || {
        let r = Arc::clone(&r);
        Box::pin(async move {
            r.lock().unwrap().push("succeeding");
            Ok(())
        })
    });

    monitor.start();
    assert!(monitor.wait_for_online(Duration::from_millis(500)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.stop();

    let ran = ran.lock().unwrap();
    assert!(ran.contains(&"failing"));
    assert!(ran.contains(&"succeeding"));
}

#[tokio::test]
async fn going_online_drains_work_queued_while_offline() {
    let engine = engine_with(
        offline_config(),
        vec![ProbeReport::Unreachable],
        ProbeReport::Reachable(LinkQuality::Good),
    );
    let executor = RecordingExecutor::succeeding();
    engine.queue().register_executor("upload", executor.clone());

    enqueue_labeled(engine.queue(), "offline-edit", Priority::High);
    enqueue_labeled(engine.queue(), "offline-note", Priority::Low);
    assert_eq!(engine.queue().queue_size(None), 2);

    engine.start();
    assert!(
        engine
            .monitor()
            .wait_for_online(Duration::from_millis(500))
            .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop();

    assert_eq!(executor.calls(), vec!["offline-edit", "offline-note"]);
    assert_eq!(engine.queue().queue_size(None), 0);
}

#[tokio::test]
async fn reconnect_invalidates_configured_cache_tags() {
    let config = EngineConfig {
        invalidate_on_reconnect: vec!["remote".into()],
        ..offline_config()
    };
    let engine = engine_with(config, vec![], ProbeReport::Reachable(LinkQuality::Good));

    engine.cache().set(
        "remote:issues",
        json!([1]),
        SetOptions {
            ttl: Some(Duration::from_secs(60)),
            tags: vec!["remote".into()],
            persist: false,
        },
    );
    engine.cache().set(
        "local:draft",
        json!("keep"),
        SetOptions {
            ttl: Some(Duration::from_secs(60)),
            tags: vec![],
            persist: false,
        },
    );

    engine.start();
    assert!(
        engine
            .monitor()
            .wait_for_online(Duration::from_millis(500))
            .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.stop();

    assert_eq!(engine.cache().get("remote:issues"), None);
    assert_eq!(engine.cache().get("local:draft"), Some(json!("keep")));
}

#[tokio::test]
async fn drain_is_skipped_while_offline() {
    let engine = engine_with(offline_config(), vec![], ProbeReport::Unreachable);
    let executor = RecordingExecutor::succeeding();
    engine.queue().register_executor("upload", executor.clone());

    enqueue_labeled(engine.queue(), "parked", Priority::Medium);

    let report = engine.queue().drain().await.unwrap();
    assert!(report.skipped);
    assert!(executor.calls().is_empty());
    assert_eq!(engine.queue().queue_size(None), 1);
}

#[tokio::test]
async fn link_down_signal_takes_effect_without_a_probe() {
    let monitor = NetworkStateMonitor::with_probe(
        fast_monitor_config(NetworkStatus::Online),
        ScriptedProbe::new(vec![], ProbeReport::Reachable(LinkQuality::Good)),
    );

    monitor.report_link_down();
    assert!(monitor.is_offline());
}
