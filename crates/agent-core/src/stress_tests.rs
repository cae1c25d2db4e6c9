//! Concurrency stress tests that push well past the two- or three-way races
//! the per-module unit tests exercise, standing in for the multi-process
//! race scenarios that need real separate processes to reproduce exactly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_types::Event;
use tempfile::tempdir;

use crate::broker::Broker;
use crate::job::{CachePaths, JobRegistry};

const CONCURRENT_CLIENTS: usize = 50;

#[tokio::test]
async fn many_concurrent_clients_dedup_to_one_job_under_load() {
    let tmp = tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("packages")).unwrap();
    let paths = CachePaths::new(tmp.path().to_path_buf());
    let broker = Arc::new(Broker::new());
    let registry = Arc::new(JobRegistry::new(broker));
    let runs = Arc::new(AtomicUsize::new(0));

    let mut receivers = Vec::with_capacity(CONCURRENT_CLIENTS);
    for _ in 0..CONCURRENT_CLIENTS {
        let runs = runs.clone();
        let rx = registry.ensure_stream(&paths, "hl7.fhir.us.core", "6.1.0", move |ctx| async move {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.broker.finish(
                &ctx.key,
                Event::Completed { id: ctx.id, version: ctx.version, path: "/final".to_string() },
            );
        });
        receivers.push(rx);
    }

    for mut rx in receivers {
        let mut terminal = None;
        while terminal.is_none() {
            let event = rx.recv().await.unwrap();
            if event.is_terminal() {
                terminal = Some(event);
            }
        }
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn broker_handles_concurrent_publishers_without_losing_the_terminal_event() {
    let broker = Arc::new(Broker::new());
    let (mut rx, _owner) = broker.subscribe("k");

    let mut publishers = Vec::new();
    for i in 0..20 {
        let broker = broker.clone();
        publishers.push(tokio::spawn(async move {
            broker.publish(
                "k",
                Event::Progress { id: "pkg".into(), version: "1.0.0".into(), message: format!("tick {i}") },
            );
        }));
    }
    for p in publishers {
        p.await.unwrap();
    }

    broker.finish("k", Event::Completed { id: "pkg".into(), version: "1.0.0".into(), path: "/final".into() });

    let mut saw_completed = false;
    loop {
        match rx.recv().await {
            Ok(event) => {
                if matches!(event, Event::Completed { .. }) {
                    saw_completed = true;
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    assert!(saw_completed, "the terminal event must survive a burst of concurrent publishes");
}

#[tokio::test]
#[serial_test::serial]
async fn singleton_survives_rapid_acquire_release_cycles() {
    let pid = std::process::id();
    let nonce: u64 = rand::random();
    let service = format!("agent-core-stress-service-{pid}-{nonce:x}");
    let lock = format!("agent-core-stress-lock-{pid}-{nonce:x}");

    for _ in 0..25 {
        let singleton = crate::singleton::try_acquire(&service, &lock).await.unwrap();
        assert!(singleton.is_some(), "the lock must be reclaimable after every release");
        drop(singleton);
    }
}
