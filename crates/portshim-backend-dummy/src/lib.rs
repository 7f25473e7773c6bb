// # Dummy Backend
//
// Log-only backend driver. Accepts every bind with a fixed OVS vif map and
// logs every notification. Used for testing deployments of the shim without
// a reachable SDN controller, and as the reference for what a driver must
// and must not do.
//
// ## Behavior
//
// - `bind_port` answers with the configured vif map (default
//   `vif_type = "ovs"` plus minimal details); never fails
// - `unbind_port` logs and succeeds
// - every notification method logs at info level
//
// Drivers hold no state, spawn no tasks and never retry; those concerns
// belong to the handler and the watch loop.

use async_trait::async_trait;
use portshim_core::config::BackendConfig;
use portshim_core::model::{AttrMap, ChangeSet, ServiceModel};
use portshim_core::registry::BackendRegistry;
use portshim_core::traits::{BackendDriver, BackendFactory, VifMap};
use portshim_core::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Registry name of this driver
pub const DRIVER_NAME: &str = "dummy";

/// Log-only backend driver
#[derive(Debug, Clone)]
pub struct DummyBackend {
    vif: VifMap,
}

impl DummyBackend {
    /// Create a driver answering binds with the default OVS vif map
    pub fn new() -> Self {
        let vif: VifMap = [
            ("vif_type".to_string(), json!("ovs")),
            (
                "vif_details".to_string(),
                json!({"port_filter": false, "bridge_name": "br-int"}),
            ),
        ]
        .into_iter()
        .collect();
        Self { vif }
    }

    /// Create a driver answering binds with a custom vif map
    ///
    /// An empty map makes the driver reject every bind, which is how tests
    /// exercise the rejection path.
    pub fn with_vif(vif: VifMap) -> Self {
        Self { vif }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendDriver for DummyBackend {
    async fn bind_port(
        &self,
        key: &str,
        _model: &ServiceModel,
        changes: &ChangeSet,
    ) -> Result<VifMap> {
        info!(?changes, "dummy: bind port {key}");
        Ok(self.vif.clone())
    }

    async fn unbind_port(
        &self,
        key: &str,
        _model: &ServiceModel,
        changes: &ChangeSet,
    ) -> Result<()> {
        info!(?changes, "dummy: unbind port {key}");
        Ok(())
    }

    async fn modify_port(&self, key: &str, _model: &ServiceModel, changes: &ChangeSet) {
        info!(?changes, "dummy: modify port {key}");
    }

    async fn delete_port(&self, key: &str, _model: &ServiceModel) {
        info!("dummy: delete port {key}");
    }

    async fn modify_interface(&self, key: &str, _model: &ServiceModel, changes: &ChangeSet) {
        info!(?changes, "dummy: modify interface {key}");
    }

    async fn delete_interface(&self, key: &str, _model: &ServiceModel) {
        info!("dummy: delete interface {key}");
    }

    async fn modify_service(&self, key: &str, _model: &ServiceModel, changes: &ChangeSet) {
        info!(?changes, "dummy: modify service {key}");
    }

    async fn delete_service(&self, key: &str, _model: &ServiceModel) {
        info!("dummy: delete service {key}");
    }

    async fn modify_service_binding(
        &self,
        key: &str,
        _model: &ServiceModel,
        prev_binding: &AttrMap,
    ) {
        info!(?prev_binding, "dummy: modify service binding {key}");
    }

    async fn delete_service_binding(&self, _model: &ServiceModel, prev_binding: &AttrMap) {
        info!(?prev_binding, "dummy: delete service binding");
    }

    async fn modify_subport_parent(
        &self,
        key: &str,
        _model: &ServiceModel,
        prev_parent: Option<&str>,
        prev_parent_type: Option<&str>,
    ) {
        info!(
            ?prev_parent,
            ?prev_parent_type,
            "dummy: modify subport parent {key}"
        );
    }

    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }
}

/// Factory creating [`DummyBackend`] instances
pub struct DummyFactory;

impl BackendFactory for DummyFactory {
    fn create(&self, _config: &BackendConfig) -> Result<Arc<dyn BackendDriver>> {
        Ok(Arc::new(DummyBackend::new()))
    }
}

/// Register this driver with a backend registry
pub fn register(registry: &BackendRegistry) {
    registry.register(DRIVER_NAME, Box::new(DummyFactory));
}
