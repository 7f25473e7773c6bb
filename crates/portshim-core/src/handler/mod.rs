//! Object lifecycle state machine
//!
//! One [`ServiceHandler`] per (service, shim process) owns that service's
//! [`ServiceModel`] mirror and decides which backend side effects each
//! observed change triggers. Ports drive the interesting transitions
//! (`Unbound → Bound → Unbound`, with `InUse` marking ports owned by a peer
//! shim); the other object types only notify the backend while their port is
//! bound.
//!
//! Illegal transitions (a bind request on an already bound or in-use port)
//! are logged and ignored rather than failing the dispatch: the mirror
//! self-corrects from later events. Only a `bind_port`/`unbind_port` driver
//! failure aborts a step, leaving the port where it was so the transition
//! can be retried by a future change.

use crate::context::ShimContext;
use crate::error::{Error, Result};
use crate::model::{
    self, AttrMap, CONTROLLER, ChangeSet, HOST_ID, IPV4_FAMILY, IPV6_FAMILY, MirroredObject,
    ObjectType, PORT_ID, Port, PortState, SERVICE_INSTANCE, ServiceModel,
};
use crate::paths;
use crate::traits::{BackendDriver, VifMap};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-service state machine over the mirrored object model
pub struct ServiceHandler {
    name: String,
    backend: Arc<dyn BackendDriver>,
    model: ServiceModel,
    resync_mode: bool,
}

impl ServiceHandler {
    /// Create a handler for one service with its configured backend
    pub fn new(name: impl Into<String>, backend: Arc<dyn BackendDriver>) -> Self {
        Self {
            name: name.into(),
            backend,
            model: ServiceModel::new(),
            resync_mode: false,
        }
    }

    /// Service name this handler is registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read-only view of the mirrored model
    pub fn model(&self) -> &ServiceModel {
        &self.model
    }

    /// Lifecycle state of a mirrored port
    pub fn port_state(&self, key: &str) -> Option<PortState> {
        self.model.port_state(key)
    }

    /// Replay the full current snapshot tree through the change handling
    ///
    /// Runs once at startup, before steady-state dispatch. Backend calls
    /// that only make sense for live changes (service-binding notifications)
    /// are suppressed; every pre-existing port instead gets one
    /// `modify_port` with an empty diff so the driver can re-attach its
    /// bookkeeping. Read failures are logged per object type and skipped;
    /// the watch stream will fill the gaps.
    pub async fn load_model(&mut self, ctx: &ShimContext) {
        self.resync_mode = true;
        for object in ObjectType::all() {
            let prefix =
                paths::canonical_table_prefix(&ctx.source_tag, &self.name, object.table());
            let snapshots = match ctx.store.read_prefix(&prefix).await {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    error!("reading {object} snapshots failed: {e}");
                    continue;
                }
            };
            for message in snapshots {
                let Some((_, _, key)) = paths::parse_canonical(&message.key) else {
                    warn!("skipping malformed snapshot key {}", message.key);
                    continue;
                };
                let attributes: AttrMap = match serde_json::from_str(&message.value) {
                    Ok(attributes) => attributes,
                    Err(e) => {
                        error!("malformed snapshot at {}: {e}", message.key);
                        continue;
                    }
                };
                let key = key.to_string();
                if let Err(e) = self.handle_object_change(object, &key, attributes, ctx).await {
                    error!("resync of {object} {key} failed: {e}");
                }
            }
        }
        self.resync_mode = false;
    }

    /// Apply one observed create/update to the mirror
    ///
    /// Only a `bind_port`/`unbind_port` driver failure comes back as `Err`;
    /// everything else is handled in place.
    pub async fn handle_object_change(
        &mut self,
        object: ObjectType,
        key: &str,
        attributes: AttrMap,
        ctx: &ShimContext,
    ) -> Result<()> {
        debug!(service = %self.name, %object, key, "object change");
        match object {
            ObjectType::Port => self.handle_port_change(key, attributes, ctx).await,
            ObjectType::Interface => {
                self.handle_interface_change(key, attributes).await;
                Ok(())
            }
            ObjectType::ServiceInstance => {
                self.handle_service_instance_change(key, attributes).await;
                Ok(())
            }
            ObjectType::ServiceBinding => {
                self.handle_service_binding_change(key, attributes).await;
                Ok(())
            }
            ObjectType::AfConfig => {
                self.handle_af_config_change(key, attributes).await;
                Ok(())
            }
        }
    }

    /// Apply one observed delete to the mirror
    pub async fn handle_object_delete(&mut self, object: ObjectType, key: &str) {
        debug!(service = %self.name, %object, key, "object delete");
        match object {
            ObjectType::Port => self.handle_port_delete(key).await,
            ObjectType::Interface => self.handle_interface_delete(key).await,
            ObjectType::ServiceInstance => self.handle_service_instance_delete(key).await,
            ObjectType::ServiceBinding => self.handle_service_binding_delete(key).await,
            ObjectType::AfConfig => self.handle_af_config_delete(key).await,
        }
    }

    async fn handle_port_change(
        &mut self,
        key: &str,
        attributes: AttrMap,
        ctx: &ShimContext,
    ) -> Result<()> {
        if self.model.ports.contains_key(key) {
            self.update_existing_port(key, attributes, ctx).await
        } else {
            self.observe_new_port(key, attributes, ctx).await;
            Ok(())
        }
    }

    async fn update_existing_port(
        &mut self,
        key: &str,
        attributes: AttrMap,
        ctx: &ShimContext,
    ) -> Result<()> {
        let (changes, state) = match self.model.ports.get_mut(key) {
            Some(port) => (port.object.update_attrs(&attributes), port.state),
            None => return Ok(()),
        };

        if !model::bind_attrs_changed(&changes) {
            if state == PortState::Bound {
                self.backend.modify_port(key, &self.model, &changes).await;
            }
            return Ok(());
        }

        match state {
            PortState::Bound => {
                if model::is_bind_intent(&changes.new) {
                    error!("bind request on bound port {key}");
                } else {
                    self.backend.unbind_port(key, &self.model, &changes).await?;
                    let vif = self.read_bound_data(ctx, key).await;
                    if let Some(port) = self.model.ports.get_mut(key) {
                        for vif_key in vif.keys() {
                            port.object
                                .set_attr(vif_key.clone(), Value::String(String::new()));
                        }
                        port.state = PortState::Unbound;
                    }
                    self.reset_result_key(ctx, key).await;
                }
            }
            PortState::Unbound => {
                if model::is_bind_intent(&changes.new) {
                    let host = changes
                        .new
                        .get(HOST_ID)
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if ctx.hosts.contains(host) {
                        self.bind_owned_port(key, &changes, ctx).await?;
                    } else {
                        // Bound by another shim.
                        self.set_port_state(key, PortState::InUse);
                    }
                }
            }
            PortState::InUse => {
                if model::is_bind_intent(&changes.new) {
                    error!("bind request on in-use port {key}");
                } else {
                    self.set_port_state(key, PortState::Unbound);
                }
            }
        }
        Ok(())
    }

    async fn bind_owned_port(
        &mut self,
        key: &str,
        changes: &ChangeSet,
        ctx: &ShimContext,
    ) -> Result<()> {
        let vif = self.backend.bind_port(key, &self.model, changes).await?;
        if vif.is_empty() {
            info!("bind request rejected for port {key}");
            return Ok(());
        }
        if self.claim_result_key(ctx, key, &vif).await {
            if let Some(port) = self.model.ports.get_mut(key) {
                port.object.update_attrs(&vif);
                port.state = PortState::Bound;
            }
        } else {
            warn!("lost the ownership claim for port {key}, rolling back");
            if let Err(e) = self.backend.unbind_port(key, &self.model, changes).await {
                error!("rollback unbind for port {key} failed: {e}");
            }
            self.set_port_state(key, PortState::InUse);
        }
        Ok(())
    }

    async fn observe_new_port(&mut self, key: &str, attributes: AttrMap, ctx: &ShimContext) {
        let mut port = Port::new(key, attributes);
        let vif = self.read_bound_data(ctx, key).await;
        if !vif.is_empty() {
            port.state = if vif.get(CONTROLLER).and_then(Value::as_str) == Some(ctx.name.as_str())
            {
                PortState::Bound
            } else {
                PortState::InUse
            };
        }
        self.model.ports.insert(key.to_string(), port);
        if self.resync_mode {
            // Pre-existing port: let the driver re-attach its bookkeeping.
            self.backend
                .modify_port(key, &self.model, &ChangeSet::empty())
                .await;
        }
    }

    async fn handle_port_delete(&mut self, key: &str) {
        if self.model.ports.remove(key).is_some() {
            self.backend.delete_port(key, &self.model).await;
        }
    }

    async fn handle_interface_change(&mut self, key: &str, attributes: AttrMap) {
        if self.model.interfaces.contains_key(key) {
            let (changes, port_id) = match self.model.interfaces.get_mut(key) {
                Some(interface) => {
                    let changes = interface.update_attrs(&attributes);
                    let port_id = interface
                        .attr_str(PORT_ID)
                        .unwrap_or(&interface.id)
                        .to_string();
                    (changes, port_id)
                }
                None => return,
            };
            if self.model.port_state(&port_id) == Some(PortState::Bound) {
                self.backend.modify_interface(key, &self.model, &changes).await;
            }
        } else {
            self.model
                .interfaces
                .insert(key.to_string(), MirroredObject::new(key, attributes));
        }
    }

    async fn handle_interface_delete(&mut self, key: &str) {
        if let Some(interface) = self.model.interfaces.remove(key) {
            let port_id = interface
                .attr_str(PORT_ID)
                .unwrap_or(&interface.id)
                .to_string();
            if self.model.port_state(&port_id) == Some(PortState::Bound) {
                self.backend.delete_interface(key, &self.model).await;
            }
        }
    }

    async fn handle_service_instance_change(&mut self, key: &str, attributes: AttrMap) {
        if self.model.service_instances.contains_key(key) {
            let changes = match self.model.service_instances.get_mut(key) {
                Some(instance) => instance.update_attrs(&attributes),
                None => return,
            };
            if self.instance_port_bound(key) {
                self.backend.modify_service(key, &self.model, &changes).await;
            }
        } else {
            self.model
                .service_instances
                .insert(key.to_string(), MirroredObject::new(key, attributes));
        }
    }

    async fn handle_service_instance_delete(&mut self, key: &str) {
        let bound = self.instance_port_bound(key);
        if self.model.service_instances.remove(key).is_some() && bound {
            self.backend.delete_service(key, &self.model).await;
        }
    }

    async fn handle_service_binding_change(&mut self, key: &str, attributes: AttrMap) {
        let port_bound = self.model.port_state(key) == Some(PortState::Bound);
        if self.model.service_bindings.contains_key(key) {
            let prev_binding = match self.model.service_bindings.get_mut(key) {
                Some(binding) => {
                    let mut prev = AttrMap::new();
                    prev.insert("id".to_string(), Value::String(binding.id.clone()));
                    if let Some(instance) = binding.attr(SERVICE_INSTANCE) {
                        prev.insert(SERVICE_INSTANCE.to_string(), instance.clone());
                    }
                    binding.update_attrs(&attributes);
                    prev
                }
                None => return,
            };
            if !self.resync_mode && port_bound {
                self.backend
                    .modify_service_binding(key, &self.model, &prev_binding)
                    .await;
            }
        } else {
            self.model
                .service_bindings
                .insert(key.to_string(), MirroredObject::new(key, attributes));
            if !self.resync_mode && port_bound {
                self.backend
                    .modify_service_binding(key, &self.model, &AttrMap::new())
                    .await;
            }
        }
    }

    async fn handle_service_binding_delete(&mut self, key: &str) {
        let port_bound = self.model.port_state(key) == Some(PortState::Bound);
        if let Some(binding) = self.model.service_bindings.remove(key) {
            if port_bound {
                self.backend
                    .delete_service_binding(&self.model, binding.attrs())
                    .await;
            }
        }
    }

    async fn handle_af_config_change(&mut self, key: &str, attributes: AttrMap) {
        if self.model.af_configs.contains_key(key) {
            if let Some(config) = self.model.af_configs.get_mut(key) {
                config.update_attrs(&attributes);
            }
            // Re-push every instance whose family list references this config.
            let affected = self.affected_instances(key, |list| list.to_string());
            for (instance_id, changes) in affected {
                if self.instance_port_bound(&instance_id) {
                    self.backend
                        .modify_service(&instance_id, &self.model, &changes)
                        .await;
                }
            }
        } else {
            self.model
                .af_configs
                .insert(key.to_string(), MirroredObject::new(key, attributes));
        }
    }

    async fn handle_af_config_delete(&mut self, key: &str) {
        if self.model.af_configs.remove(key).is_none() {
            return;
        }
        let affected = self.affected_instances(key, |list| family_remove(list, key));
        for (instance_id, changes) in affected {
            if self.instance_port_bound(&instance_id) {
                self.backend
                    .modify_service(&instance_id, &self.model, &changes)
                    .await;
            }
        }
    }

    /// Service instances whose family lists reference `config_key`, with the
    /// family diff produced by `derive` from the current list value
    fn affected_instances(
        &self,
        config_key: &str,
        derive: impl Fn(&str) -> String,
    ) -> Vec<(String, ChangeSet)> {
        self.model
            .service_instances
            .values()
            .filter_map(|instance| {
                let mut changes = ChangeSet::empty();
                for family in [IPV4_FAMILY, IPV6_FAMILY] {
                    if let Some(list) = instance.attr_str(family) {
                        if family_contains(list, config_key) {
                            changes
                                .new
                                .insert(family.to_string(), Value::String(derive(list)));
                        }
                    }
                }
                if changes.is_empty() {
                    None
                } else {
                    Some((instance.id.clone(), changes))
                }
            })
            .collect()
    }

    fn instance_port_bound(&self, instance_id: &str) -> bool {
        self.model
            .port_for_instance(instance_id)
            .map(|port| port.state)
            == Some(PortState::Bound)
    }

    fn set_port_state(&mut self, key: &str, state: PortState) {
        if let Some(port) = self.model.ports.get_mut(key) {
            port.state = state;
        }
    }

    /// Read the binding-result key; absence and malformed payloads are an
    /// empty map
    async fn read_bound_data(&self, ctx: &ShimContext, key: &str) -> AttrMap {
        let bind_key = paths::binding_result_key(&self.name, key);
        match ctx.store.read(&bind_key).await {
            Ok(message) => match serde_json::from_str::<AttrMap>(&message.value) {
                Ok(map) => map,
                Err(e) => {
                    warn!("malformed binding result at {bind_key}: {e}");
                    AttrMap::new()
                }
            },
            Err(Error::KeyNotFound(_)) => AttrMap::new(),
            Err(e) => {
                warn!("could not read {bind_key}: {e}");
                AttrMap::new()
            }
        }
    }

    /// Reset the binding-result key to unclaimed
    async fn reset_result_key(&self, ctx: &ShimContext, key: &str) {
        let bind_key = paths::binding_result_key(&self.name, key);
        if let Err(e) = ctx.store.write(&bind_key, "{}").await {
            error!("resetting {bind_key} to unbound failed: {e}");
        }
    }

    /// Claim the binding-result key for this shim
    ///
    /// The claim is a compare-and-swap against the exact value read, so two
    /// shims binding the same port concurrently cannot both succeed; the
    /// loser reports `false` and backs out.
    async fn claim_result_key(&self, ctx: &ShimContext, key: &str, vif: &VifMap) -> bool {
        let bind_key = paths::binding_result_key(&self.name, key);
        let mut claim = vif.clone();
        claim.insert(CONTROLLER.to_string(), Value::String(ctx.name.clone()));
        let value = match serde_json::to_string(&claim) {
            Ok(value) => value,
            Err(e) => {
                error!("could not serialize binding result for port {key}: {e}");
                return false;
            }
        };

        let expected = match ctx.store.read(&bind_key).await {
            Ok(message) => {
                let current: AttrMap = serde_json::from_str(&message.value).unwrap_or_default();
                match current.get(CONTROLLER).and_then(Value::as_str) {
                    Some(owner) if owner != ctx.name => {
                        warn!("port {key} already claimed by {owner}");
                        return false;
                    }
                    _ => Some(message.value),
                }
            }
            Err(Error::KeyNotFound(_)) => None,
            Err(e) => {
                error!("could not read {bind_key}: {e}");
                return false;
            }
        };

        match ctx
            .store
            .compare_and_write(&bind_key, expected.as_deref(), &value)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                warn!("concurrent claim on {bind_key}");
                false
            }
            Err(e) => {
                error!("updating {bind_key} to bound failed: {e}");
                false
            }
        }
    }
}

/// Exact membership test on a comma-separated family list
fn family_contains(list: &str, key: &str) -> bool {
    list.split(',').any(|item| item == key)
}

/// Remove a key from a comma-separated family list
fn family_remove(list: &str, key: &str) -> String {
    list.split(',')
        .filter(|item| *item != key)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_list_membership_is_exact() {
        assert!(family_contains("65000:1,65000:2", "65000:1"));
        assert!(!family_contains("65000:10", "65000:1"));
    }

    #[test]
    fn family_remove_drops_only_the_key() {
        assert_eq!(family_remove("a,b,c", "b"), "a,c");
        assert_eq!(family_remove("a", "a"), "");
        assert_eq!(family_remove("a,b", "x"), "a,b");
    }
}
