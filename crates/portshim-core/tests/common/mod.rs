//! Test doubles and common utilities for the contract tests
//!
//! The recording backend captures every driver invocation in order, which is
//! what most contracts assert on; the failing store exists to drive the
//! fatal paths without a real outage.

use async_trait::async_trait;
use portshim_core::context::{HostSet, ShimContext};
use portshim_core::model::{AttrMap, ChangeSet, ServiceModel};
use portshim_core::store::MemoryCoordinationStore;
use portshim_core::traits::{BackendDriver, CoordinationStore, VifMap, WatchMessage};
use portshim_core::{Error, Result};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded driver invocation
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    BindPort(String),
    UnbindPort(String),
    ModifyPort(String, AttrMap),
    DeletePort(String),
    ModifyInterface(String, AttrMap),
    DeleteInterface(String),
    ModifyService(String, AttrMap),
    DeleteService(String),
    ModifyServiceBinding(String, AttrMap),
    DeleteServiceBinding(AttrMap),
}

/// A backend driver that records every call
///
/// Clones share the same call log, so tests keep one clone for assertions
/// and hand the other to the handler.
#[derive(Clone)]
pub struct RecordingBackend {
    calls: Arc<Mutex<Vec<BackendCall>>>,
    vif: VifMap,
    fail_bind: bool,
}

impl RecordingBackend {
    /// Accepts every bind with an OVS vif map
    pub fn new() -> Self {
        Self::with_vif(default_vif())
    }

    /// Rejects every bind (empty vif map)
    pub fn rejecting() -> Self {
        Self::with_vif(VifMap::new())
    }

    /// Fails every bind with a driver error
    pub fn failing() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            vif: VifMap::new(),
            fail_bind: true,
        }
    }

    /// Accepts every bind with the given vif map
    pub fn with_vif(vif: VifMap) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            vif,
            fail_bind: false,
        }
    }

    /// Snapshot of the recorded calls, in invocation order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BackendDriver for RecordingBackend {
    async fn bind_port(
        &self,
        key: &str,
        _model: &ServiceModel,
        _changes: &ChangeSet,
    ) -> Result<VifMap> {
        self.record(BackendCall::BindPort(key.to_string()));
        if self.fail_bind {
            return Err(Error::backend("recording", "bind failure requested"));
        }
        Ok(self.vif.clone())
    }

    async fn unbind_port(
        &self,
        key: &str,
        _model: &ServiceModel,
        _changes: &ChangeSet,
    ) -> Result<()> {
        self.record(BackendCall::UnbindPort(key.to_string()));
        Ok(())
    }

    async fn modify_port(&self, key: &str, _model: &ServiceModel, changes: &ChangeSet) {
        self.record(BackendCall::ModifyPort(key.to_string(), changes.new.clone()));
    }

    async fn delete_port(&self, key: &str, _model: &ServiceModel) {
        self.record(BackendCall::DeletePort(key.to_string()));
    }

    async fn modify_interface(&self, key: &str, _model: &ServiceModel, changes: &ChangeSet) {
        self.record(BackendCall::ModifyInterface(
            key.to_string(),
            changes.new.clone(),
        ));
    }

    async fn delete_interface(&self, key: &str, _model: &ServiceModel) {
        self.record(BackendCall::DeleteInterface(key.to_string()));
    }

    async fn modify_service(&self, key: &str, _model: &ServiceModel, changes: &ChangeSet) {
        self.record(BackendCall::ModifyService(
            key.to_string(),
            changes.new.clone(),
        ));
    }

    async fn delete_service(&self, key: &str, _model: &ServiceModel) {
        self.record(BackendCall::DeleteService(key.to_string()));
    }

    async fn modify_service_binding(
        &self,
        key: &str,
        _model: &ServiceModel,
        prev_binding: &AttrMap,
    ) {
        self.record(BackendCall::ModifyServiceBinding(
            key.to_string(),
            prev_binding.clone(),
        ));
    }

    async fn delete_service_binding(&self, _model: &ServiceModel, prev_binding: &AttrMap) {
        self.record(BackendCall::DeleteServiceBinding(prev_binding.clone()));
    }

    async fn modify_subport_parent(
        &self,
        _key: &str,
        _model: &ServiceModel,
        _prev_parent: Option<&str>,
        _prev_parent_type: Option<&str>,
    ) {
    }

    fn driver_name(&self) -> &'static str {
        "recording"
    }
}

/// A coordination store that fails every operation
pub struct FailingStore;

#[async_trait]
impl CoordinationStore for FailingStore {
    async fn read(&self, _key: &str) -> Result<WatchMessage> {
        Err(Error::store_unavailable("store is down"))
    }

    async fn read_prefix(&self, _prefix: &str) -> Result<Vec<WatchMessage>> {
        Err(Error::store_unavailable("store is down"))
    }

    async fn watch(
        &self,
        _prefix: &str,
        _wait_index: Option<u64>,
        _timeout: Duration,
    ) -> Result<WatchMessage> {
        Err(Error::store_unavailable("store is down"))
    }

    async fn write(&self, _key: &str, _value: &str) -> Result<u64> {
        Err(Error::store_unavailable("store is down"))
    }

    async fn compare_and_write(
        &self,
        _key: &str,
        _expected: Option<&str>,
        _value: &str,
    ) -> Result<bool> {
        Err(Error::store_unavailable("store is down"))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(Error::store_unavailable("store is down"))
    }
}

/// The vif map the recording backend answers binds with
pub fn default_vif() -> VifMap {
    [
        ("vif_type".to_string(), json!("ovs")),
        (
            "vif_details".to_string(),
            json!({"port_filter": false, "bridge_name": "br-int"}),
        ),
    ]
    .into_iter()
    .collect()
}

/// Build an attribute map from literal pairs
pub fn attrs(pairs: &[(&str, Value)]) -> AttrMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Port attributes with the bind-relevant pair set to the given values
pub fn port_attrs(host: &str, device: &str) -> AttrMap {
    attrs(&[
        ("host_id", json!(host)),
        ("device_id", json!(device)),
        ("tenant_id", json!("t1")),
    ])
}

/// A shim context over a shared memory store
pub fn test_ctx(store: &MemoryCoordinationStore, name: &str, hosts: &[&str]) -> ShimContext {
    ShimContext {
        name: name.to_string(),
        hosts: HostSet::new(hosts.iter().copied()),
        store: Arc::new(store.clone()),
        source_tag: "proton".to_string(),
    }
}

/// Poll until `cond` holds or a second passes
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within one second");
}
