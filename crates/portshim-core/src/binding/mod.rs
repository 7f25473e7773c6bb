//! Port coordinator
//!
//! Request-time logic for port mutations, invoked synchronously by the API
//! layer. Most record operations just commit and enqueue a snapshot; the
//! interesting path is a bind, which parks the request on a watch of the
//! port's binding-result key until whichever shim owns the host writes the
//! vif outcome there.
//!
//! A bind that never produces a result is not an error: after the bounded
//! attempts the record keeps its bind intent and the caller gets it back
//! without vif data. Peers converge later through the watch loop.

use crate::config::BindPolicy;
use crate::error::{Error, Result};
use crate::model::{self, AttrMap, DEVICE_ID, HOST_ID, VIF_DETAILS, VIF_TYPE};
use crate::paths;
use crate::publisher::{ChangeEnvelope, PublisherHandle};
use crate::traits::{CoordinationStore, INTERFACE_TABLE, PORT_TABLE, PRIMARY_KEY, RecordStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Coordinates port record mutations with the shims watching the store
pub struct PortCoordinator {
    service: String,
    api_url: String,
    records: Arc<dyn RecordStore>,
    store: Arc<dyn CoordinationStore>,
    publisher: PublisherHandle,
    bind: BindPolicy,
}

impl PortCoordinator {
    /// Create a coordinator for one service
    ///
    /// `api_url` is the endpoint advertised in the cross-service registry.
    pub fn new(
        service: impl Into<String>,
        api_url: impl Into<String>,
        records: Arc<dyn RecordStore>,
        store: Arc<dyn CoordinationStore>,
        publisher: PublisherHandle,
        bind: BindPolicy,
    ) -> Self {
        Self {
            service: service.into(),
            api_url: api_url.into(),
            records,
            store,
            publisher,
            bind,
        }
    }

    /// Create a port record, register it, and give it a default interface
    pub async fn create_port(&self, attrs: AttrMap) -> Result<AttrMap> {
        let record = self.records.create(PORT_TABLE, attrs).await?;
        let port_id = record
            .get(PRIMARY_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tenant_id = record
            .get("tenant_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.publisher.send(ChangeEnvelope::Register {
            port_id: port_id.clone(),
            tenant_id,
            service: self.service.clone(),
            url: self.api_url.clone(),
        });
        self.publisher.send(ChangeEnvelope::Update {
            service: self.service.clone(),
            table: PORT_TABLE.to_string(),
            key: port_id.clone(),
        });

        // Every port gets a default interface sharing its primary key.
        let name = match record.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => format!("{name}_default"),
            _ => "default".to_string(),
        };
        let interface: AttrMap = [
            (PRIMARY_KEY.to_string(), Value::String(port_id.clone())),
            (model::PORT_ID.to_string(), Value::String(port_id.clone())),
            ("name".to_string(), Value::String(name)),
            ("segmentation_type".to_string(), Value::String("none".to_string())),
            ("segmentation_id".to_string(), Value::from(0)),
        ]
        .into_iter()
        .collect();
        self.records.create(INTERFACE_TABLE, interface).await?;
        self.publisher.send(ChangeEnvelope::Update {
            service: self.service.clone(),
            table: INTERFACE_TABLE.to_string(),
            key: port_id,
        });

        Ok(record)
    }

    /// Update a port record, coordinating bind/unbind transitions
    ///
    /// A bind intent blocks the caller on the binding-result key for up to
    /// the configured attempts; on timeout the record is returned without
    /// vif data and the request still succeeds. An unbind is decided locally
    /// and never touches the store.
    pub async fn update_port(&self, key: &str, new_values: AttrMap) -> Result<AttrMap> {
        let has_bind_attrs = matches!(new_values.get(HOST_ID), Some(v) if !v.is_null())
            && matches!(new_values.get(DEVICE_ID), Some(v) if !v.is_null());
        let is_bind_request = has_bind_attrs && model::is_bind_intent(&new_values);

        let wait_index = if is_bind_request {
            self.setup_bind_key(key).await
        } else {
            None
        };

        let mut record = self.records.update(PORT_TABLE, key, &new_values).await?;
        self.publish_port_update(key);

        if is_bind_request {
            let vif = self.wait_for_bind(key, wait_index).await;
            if vif.is_empty() {
                error!("no binding information available for port {key}");
            } else {
                info!(?vif, "binding result for port {key}");
                let mut vif_values = AttrMap::new();
                if let Some(vif_type) = vif.get(VIF_TYPE) {
                    vif_values.insert(VIF_TYPE.to_string(), vif_type.clone());
                }
                if let Some(details) = vif.get(VIF_DETAILS) {
                    vif_values.insert(
                        VIF_DETAILS.to_string(),
                        Value::String(serde_json::to_string(details)?),
                    );
                }
                if !vif_values.is_empty() {
                    record = self.records.update(PORT_TABLE, key, &vif_values).await?;
                    self.publish_port_update(key);
                }
            }
        } else if has_bind_attrs {
            // Unbind: locally decidable, no store round trip.
            let vif_values: AttrMap = [
                (VIF_TYPE.to_string(), Value::Null),
                (VIF_DETAILS.to_string(), Value::String("{}".to_string())),
            ]
            .into_iter()
            .collect();
            record = self.records.update(PORT_TABLE, key, &vif_values).await?;
            self.publish_port_update(key);
        }

        Ok(record)
    }

    /// Delete a port record, its registry entry and its default interface
    pub async fn delete_port(&self, key: &str) -> Result<()> {
        self.publisher.send(ChangeEnvelope::Deregister {
            port_id: key.to_string(),
        });
        self.records.delete(PORT_TABLE, key).await?;
        self.publisher.send(ChangeEnvelope::Delete {
            service: self.service.clone(),
            table: PORT_TABLE.to_string(),
            key: key.to_string(),
        });

        match self.records.delete(INTERFACE_TABLE, key).await {
            Ok(()) => self.publisher.send(ChangeEnvelope::Delete {
                service: self.service.clone(),
                table: INTERFACE_TABLE.to_string(),
                key: key.to_string(),
            }),
            Err(Error::RecordNotFound { .. }) => {
                info!("default interface not found for port {key}");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn publish_port_update(&self, key: &str) {
        self.publisher.send(ChangeEnvelope::Update {
            service: self.service.clone(),
            table: PORT_TABLE.to_string(),
            key: key.to_string(),
        });
    }

    /// Establish the watch starting point on the binding-result key
    ///
    /// If the key exists its current index is the resume point; otherwise an
    /// empty object is written so there is something to wait on. `None`
    /// degrades the later watch to "from now".
    async fn setup_bind_key(&self, key: &str) -> Option<u64> {
        let bind_key = paths::binding_result_key(&self.service, key);
        match self.store.read(&bind_key).await {
            Ok(message) => Some(message.modified_index + 1),
            Err(Error::KeyNotFound(_)) => {
                info!("binding-result key absent, creating it: {bind_key}");
                match self.store.write(&bind_key, "{}").await {
                    Ok(index) => Some(index + 1),
                    Err(e) => {
                        warn!("could not create binding-result key {bind_key}: {e}");
                        None
                    }
                }
            }
            Err(e) => {
                warn!("could not read binding-result key {bind_key}: {e}");
                None
            }
        }
    }

    /// Block on the binding-result key for up to the configured attempts
    ///
    /// Returns the parsed result map; empty means no binding information
    /// (timeout, unreachable store, or a malformed payload).
    async fn wait_for_bind(&self, key: &str, wait_index: Option<u64>) -> AttrMap {
        let bind_key = paths::binding_result_key(&self.service, key);
        let mut retry = self.bind.attempts;
        while retry > 0 {
            info!("watching {bind_key}");
            match self
                .store
                .watch(&bind_key, wait_index, self.bind.attempt_timeout)
                .await
            {
                Ok(message) => {
                    return match serde_json::from_str::<AttrMap>(&message.value) {
                        Ok(map) => map,
                        Err(e) => {
                            warn!("malformed binding result for port {key}: {e}");
                            AttrMap::new()
                        }
                    };
                }
                Err(Error::KeyNotFound(_)) => {
                    info!("binding-result key not found: {bind_key}");
                    retry -= 1;
                    tokio::time::sleep(self.bind.retry_delay).await;
                }
                Err(Error::WatchTimedOut) => {
                    info!("timed out waiting for binding result on {bind_key}");
                    retry -= 1;
                }
                Err(Error::StoreUnavailable(e)) => {
                    error!("cannot reach coordination store: {e}");
                    retry = 0;
                }
                Err(e) => {
                    error!("unexpected error waiting for binding result: {e}");
                    retry -= 1;
                }
            }
        }
        AttrMap::new()
    }
}
