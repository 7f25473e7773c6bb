// # Backend Driver Trait
//
// Defines the interface for executing bind/unbind/modify/delete side effects
// against an external network controller. Exactly one concrete driver is
// active per service per deployment.
//
// ## Implementations
//
// - Dummy (log-only, fixed vif map): `portshim-backend-dummy` crate
// - Remote controller REST API: `portshim-backend-http` crate
//
// ## Failure contract
//
// `bind_port` and `unbind_port` failures abort the coordination step that
// triggered them and must be returned. The `modify_*`/`delete_*` methods are
// notifications: drivers log their own failures and never surface them, so a
// misbehaving controller cannot crash the dispatch loop.
//
// ## Forbidden behavior
//
// Drivers must not touch the coordination store, the record store, or the
// mirrored model beyond the read-only reference they are handed, and must
// not implement their own retry loops; retries are owned by the callers.

use crate::config::BackendConfig;
use crate::model::{AttrMap, ChangeSet, ServiceModel};
use async_trait::async_trait;

/// Binding output produced by a successful bind: `vif_type`, `vif_details`
/// and any driver-specific extras. An empty map means the bind was rejected.
pub type VifMap = AttrMap;

/// Trait for backend driver implementations
#[async_trait]
pub trait BackendDriver: Send + Sync {
    /// Bind a port to its requested host
    ///
    /// # Parameters
    ///
    /// - `key`: primary key of the port
    /// - `model`: read-only view of the service's mirrored objects
    /// - `changes`: attribute diff that triggered the bind
    ///
    /// # Returns
    ///
    /// - `Ok(VifMap)`: vif parameters; empty if the driver rejects the bind
    /// - `Err(Error)`: the bind failed and the triggering step must abort
    async fn bind_port(
        &self,
        key: &str,
        model: &ServiceModel,
        changes: &ChangeSet,
    ) -> Result<VifMap, crate::Error>;

    /// Unbind a port from its host
    async fn unbind_port(
        &self,
        key: &str,
        model: &ServiceModel,
        changes: &ChangeSet,
    ) -> Result<(), crate::Error>;

    /// Attributes changed on a bound port
    async fn modify_port(&self, key: &str, model: &ServiceModel, changes: &ChangeSet);

    /// A mirrored port was deleted
    async fn delete_port(&self, key: &str, model: &ServiceModel);

    /// Attributes changed on an interface of a bound port
    async fn modify_interface(&self, key: &str, model: &ServiceModel, changes: &ChangeSet);

    /// An interface of a bound port was deleted
    async fn delete_interface(&self, key: &str, model: &ServiceModel);

    /// Attributes changed on a service instance with a bound port
    async fn modify_service(&self, key: &str, model: &ServiceModel, changes: &ChangeSet);

    /// A service instance with a bound port was deleted
    async fn delete_service(&self, key: &str, model: &ServiceModel);

    /// A service association of a bound port changed
    ///
    /// `prev_binding` carries the previous association attributes; empty for
    /// a newly created binding.
    async fn modify_service_binding(&self, key: &str, model: &ServiceModel, prev_binding: &AttrMap);

    /// A service association of a bound port was removed
    async fn delete_service_binding(&self, model: &ServiceModel, prev_binding: &AttrMap);

    /// A subport's parent relationship changed
    async fn modify_subport_parent(
        &self,
        key: &str,
        model: &ServiceModel,
        prev_parent: Option<&str>,
        prev_parent_type: Option<&str>,
    );

    /// Driver name (for logging/debugging)
    fn driver_name(&self) -> &'static str;
}

/// Helper trait for constructing backend drivers from configuration
pub trait BackendFactory: Send + Sync {
    /// Create a driver instance from configuration
    fn create(
        &self,
        config: &BackendConfig,
    ) -> Result<std::sync::Arc<dyn BackendDriver>, crate::Error>;
}
