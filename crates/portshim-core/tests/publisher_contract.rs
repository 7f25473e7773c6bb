//! Contract: change publication
//!
//! Snapshots are published only after the local commit and stringified the
//! way peers expect; deletes and deregisters are idempotent; losing a
//! canonical write is fatal to the worker instead of being silently
//! dropped.

mod common;

use common::*;
use portshim_core::record::MemoryRecordStore;
use portshim_core::store::MemoryCoordinationStore;
use portshim_core::traits::{CoordinationStore, PORT_TABLE, RecordStore};
use portshim_core::{ChangeEnvelope, ChangePublisher, Error, PublisherHandle};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const SERVICE: &str = "net-l3vpn";

fn spawn_publisher(
    records: &MemoryRecordStore,
    store: &MemoryCoordinationStore,
) -> (
    PublisherHandle,
    tokio::task::JoinHandle<portshim_core::Result<()>>,
) {
    let (publisher, handle) = ChangePublisher::new(
        Arc::new(records.clone()),
        Arc::new(store.clone()),
        "proton",
    );
    (handle, tokio::spawn(publisher.run()))
}

fn update_envelope(key: &str) -> ChangeEnvelope {
    ChangeEnvelope::Update {
        service: SERVICE.to_string(),
        table: PORT_TABLE.to_string(),
        key: key.to_string(),
    }
}

async fn wait_for_key(store: &MemoryCoordinationStore, key: &str) -> String {
    for _ in 0..200 {
        if let Ok(message) = store.read(key).await {
            return message.value;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("key {key} never appeared");
}

#[tokio::test]
async fn snapshots_are_stringified_attribute_maps() {
    let records = MemoryRecordStore::new();
    let store = MemoryCoordinationStore::new();
    let (handle, _worker) = spawn_publisher(&records, &store);

    records
        .create(
            PORT_TABLE,
            attrs(&[
                ("id", json!("p1")),
                ("name", json!("web")),
                ("mtu", json!(1500)),
                ("admin_up", json!(true)),
                ("vif_type", Value::Null),
            ]),
        )
        .await
        .unwrap();
    handle.send(update_envelope("p1"));

    let snapshot: Value =
        serde_json::from_str(&wait_for_key(&store, "/proton/net-l3vpn/Port/p1").await).unwrap();
    assert_eq!(snapshot["name"], json!("web"));
    assert_eq!(snapshot["mtu"], json!("1500"));
    assert_eq!(snapshot["admin_up"], json!("true"));
    assert_eq!(snapshot["vif_type"], Value::Null);
}

#[tokio::test]
async fn snapshot_keys_collapse_whitespace() {
    let records = MemoryRecordStore::new();
    let store = MemoryCoordinationStore::new();
    let (handle, _worker) = spawn_publisher(&records, &store);

    records
        .create(PORT_TABLE, attrs(&[("id", json!("a b"))]))
        .await
        .unwrap();
    handle.send(update_envelope("a b"));

    wait_for_key(&store, "/proton/net-l3vpn/Port/a_b").await;
}

#[tokio::test]
async fn deleting_a_missing_snapshot_is_swallowed() {
    let records = MemoryRecordStore::new();
    let store = MemoryCoordinationStore::new();
    let (handle, worker) = spawn_publisher(&records, &store);

    handle.send(ChangeEnvelope::Delete {
        service: SERVICE.to_string(),
        table: PORT_TABLE.to_string(),
        key: "ghost".to_string(),
    });

    // the worker keeps going: a later update still lands
    records
        .create(PORT_TABLE, attrs(&[("id", json!("p1"))]))
        .await
        .unwrap();
    handle.send(update_envelope("p1"));
    wait_for_key(&store, "/proton/net-l3vpn/Port/p1").await;
    assert!(!worker.is_finished());
}

#[tokio::test]
async fn registry_entries_round_trip_and_deregister_is_idempotent() {
    let records = MemoryRecordStore::new();
    let store = MemoryCoordinationStore::new();
    let (handle, worker) = spawn_publisher(&records, &store);

    handle.send(ChangeEnvelope::Register {
        port_id: "p1".to_string(),
        tenant_id: "t1".to_string(),
        service: SERVICE.to_string(),
        url: "http://proton:2705".to_string(),
    });
    let entry: Value = serde_json::from_str(&wait_for_key(&store, "/gluon/port/p1").await).unwrap();
    assert_eq!(entry["tenant_id"], json!("t1"));
    assert_eq!(entry["service"], json!(SERVICE));
    assert_eq!(entry["url"], json!("http://proton:2705"));

    handle.send(ChangeEnvelope::Deregister {
        port_id: "p1".to_string(),
    });
    handle.send(ChangeEnvelope::Deregister {
        port_id: "p1".to_string(),
    });

    // repeated deregister is a no-op, and the worker survives it
    handle.send(ChangeEnvelope::Register {
        port_id: "p2".to_string(),
        tenant_id: "t1".to_string(),
        service: SERVICE.to_string(),
        url: "http://proton:2705".to_string(),
    });
    wait_for_key(&store, "/gluon/port/p2").await;
    assert!(store.read("/gluon/port/p1").await.is_err());
    assert!(!worker.is_finished());
}

#[tokio::test]
async fn missing_record_is_fatal_to_the_worker() {
    let records = MemoryRecordStore::new();
    let store = MemoryCoordinationStore::new();
    let (handle, worker) = spawn_publisher(&records, &store);

    handle.send(update_envelope("no-such-record"));

    let result = worker.await.unwrap();
    assert!(matches!(result, Err(Error::RecordNotFound { .. })));
}

#[tokio::test]
async fn store_failure_is_fatal_to_the_worker() {
    let records = MemoryRecordStore::new();
    records
        .create(PORT_TABLE, attrs(&[("id", json!("p1"))]))
        .await
        .unwrap();
    let (publisher, handle) =
        ChangePublisher::new(Arc::new(records.clone()), Arc::new(FailingStore), "proton");
    let worker = tokio::spawn(publisher.run());

    handle.send(update_envelope("p1"));

    let result = worker.await.unwrap();
    assert!(matches!(result, Err(Error::StoreUnavailable(_))));
}

#[tokio::test]
async fn worker_exits_cleanly_when_every_handle_is_dropped() {
    let records = MemoryRecordStore::new();
    let store = MemoryCoordinationStore::new();
    let (handle, worker) = spawn_publisher(&records, &store);

    drop(handle);
    let result = worker.await.unwrap();
    assert!(result.is_ok());
}
