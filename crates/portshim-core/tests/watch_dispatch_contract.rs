//! Contract: watch/dispatch loop
//!
//! Changes observed by one watch loop must reach the handlers strictly in
//! store-index order, malformed or foreign keys must never take the loop
//! down, and an index jump beyond the gap limit must only reset the resume
//! point, not the loop.

mod common;

use common::*;
use portshim_core::config::WatchSettings;
use portshim_core::store::MemoryCoordinationStore;
use portshim_core::traits::CoordinationStore;
use portshim_core::{ServiceHandler, WatchLoop};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const SERVICE: &str = "net-l3vpn";
const CANONICAL: &str = "/proton/net-l3vpn/Port/p1";
const RESULT_KEY: &str = "/controller/net-l3vpn/Port/p1";

fn settings() -> WatchSettings {
    WatchSettings {
        watch_timeout_secs: 1,
        unavailable_backoff_secs: 1,
        max_backoff_secs: 2,
        index_gap_limit: 1000,
    }
}

/// Seed a bound port from "a previous run" so every snapshot update turns
/// into an observable `modify_port`
async fn seed_bound_port(store: &MemoryCoordinationStore) {
    store
        .write(
            CANONICAL,
            &serde_json::to_string(&port_attrs("compute-1", "vm-9")).unwrap(),
        )
        .await
        .unwrap();
    store
        .write(
            RESULT_KEY,
            &json!({"vif_type": "ovs", "controller": "shim-a"}).to_string(),
        )
        .await
        .unwrap();
}

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<portshim_core::Result<()>>,
}

async fn start_loop(store: &MemoryCoordinationStore, backend: &RecordingBackend) -> RunningLoop {
    let ctx = Arc::new(test_ctx(store, "shim-a", &["*"]));
    let handlers = vec![ServiceHandler::new(SERVICE, Arc::new(backend.clone()))];
    let (shutdown, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(
        WatchLoop::new(ctx, handlers, settings()).run_with_shutdown(Some(shutdown_rx)),
    );
    // the resync bookkeeping call marks the loop as up; give the first
    // watch a moment to be issued so nothing written next is skipped
    let backend = backend.clone();
    wait_until(move || backend.call_count() >= 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    RunningLoop { shutdown, task }
}

async fn write_snapshot(store: &MemoryCoordinationStore, name: &str) {
    let mut attributes = port_attrs("compute-1", "vm-9");
    attributes.insert("name".to_string(), json!(name));
    store
        .write(CANONICAL, &serde_json::to_string(&attributes).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn dispatch_order_follows_the_store_index() {
    let store = MemoryCoordinationStore::new();
    seed_bound_port(&store).await;
    let backend = RecordingBackend::new();
    let running = start_loop(&store, &backend).await;

    for i in 1..=20 {
        write_snapshot(&store, &i.to_string()).await;
    }

    {
        let backend = backend.clone();
        wait_until(move || backend.call_count() >= 21).await;
    }
    running.shutdown.send(()).unwrap();
    running.task.await.unwrap().unwrap();

    let names: Vec<String> = backend
        .calls()
        .into_iter()
        .skip(1) // resync bookkeeping call
        .map(|call| match call {
            BackendCall::ModifyPort(_, changes) => {
                changes["name"].as_str().unwrap_or_default().to_string()
            }
            other => panic!("unexpected backend call {other:?}"),
        })
        .collect();
    let expected: Vec<String> = (1..=20).map(|i| i.to_string()).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn index_jump_beyond_the_gap_limit_only_resets_the_resume_point() {
    let store = MemoryCoordinationStore::new();
    seed_bound_port(&store).await;
    let backend = RecordingBackend::new();
    let running = start_loop(&store, &backend).await;

    write_snapshot(&store, "before-gap").await;
    {
        let backend = backend.clone();
        wait_until(move || backend.call_count() >= 2).await;
    }

    // unrelated churn elsewhere in the store blows past the gap limit
    store.bump_index(1300);
    write_snapshot(&store, "at-gap").await;
    {
        let backend = backend.clone();
        wait_until(move || backend.call_count() >= 3).await;
    }

    // the loop is watching "from now" again and stays live
    tokio::time::sleep(Duration::from_millis(50)).await;
    write_snapshot(&store, "after-gap").await;
    {
        let backend = backend.clone();
        wait_until(move || backend.call_count() >= 4).await;
    }

    running.shutdown.send(()).unwrap();
    running.task.await.unwrap().unwrap();

    let names: Vec<String> = backend
        .calls()
        .into_iter()
        .skip(1)
        .map(|call| match call {
            BackendCall::ModifyPort(_, changes) => {
                changes["name"].as_str().unwrap_or_default().to_string()
            }
            other => panic!("unexpected backend call {other:?}"),
        })
        .collect();
    assert_eq!(names, vec!["before-gap", "at-gap", "after-gap"]);
}

#[tokio::test]
async fn malformed_and_foreign_keys_do_not_stop_dispatch() {
    let store = MemoryCoordinationStore::new();
    seed_bound_port(&store).await;
    let backend = RecordingBackend::new();
    let running = start_loop(&store, &backend).await;

    store.write("/proton/garbage", "{}").await.unwrap();
    store
        .write("/proton/other-svc/Port/x", "{}")
        .await
        .unwrap();
    store
        .write("/proton/net-l3vpn/UnknownTable/x", "{}")
        .await
        .unwrap();
    store
        .write("/proton/net-l3vpn/Port/p2", "not json")
        .await
        .unwrap();
    write_snapshot(&store, "still-alive").await;

    {
        let backend = backend.clone();
        wait_until(move || backend.call_count() >= 2).await;
    }
    running.shutdown.send(()).unwrap();
    running.task.await.unwrap().unwrap();

    match backend.calls().last().unwrap() {
        BackendCall::ModifyPort(key, changes) => {
            assert_eq!(key, "p1");
            assert_eq!(changes["name"], json!("still-alive"));
        }
        other => panic!("unexpected backend call {other:?}"),
    }
}

#[tokio::test]
async fn snapshot_deletes_reach_the_handler() {
    let store = MemoryCoordinationStore::new();
    seed_bound_port(&store).await;
    let backend = RecordingBackend::new();
    let running = start_loop(&store, &backend).await;

    store.delete(CANONICAL).await.unwrap();

    {
        let backend = backend.clone();
        wait_until(move || backend.call_count() >= 2).await;
    }
    running.shutdown.send(()).unwrap();
    running.task.await.unwrap().unwrap();

    assert_eq!(
        backend.calls().last(),
        Some(&BackendCall::DeletePort("p1".to_string()))
    );
}
