//! Backend driver registry
//!
//! Maps backend names to factories so the per-service driver selection in
//! the `handlers` config resolves without hard-coded driver knowledge in
//! the core. Driver crates register themselves during startup:
//!
//! ```rust,ignore
//! let registry = BackendRegistry::new();
//! portshim_backend_dummy::register(&registry);
//! portshim_backend_http::register(&registry);
//! let handlers = registry.build_handlers(&config.handlers);
//! ```

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::handler::ServiceHandler;
use crate::traits::{BackendDriver, BackendFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{error, info};

/// Registry of backend driver factories
///
/// Interior mutability with an `RwLock`, so registration and lookup can
/// share one instance across the process.
#[derive(Default)]
pub struct BackendRegistry {
    factories: RwLock<HashMap<String, Box<dyn BackendFactory>>>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver factory under a name
    pub fn register(&self, name: impl Into<String>, factory: Box<dyn BackendFactory>) {
        let name = name.into();
        let mut factories = self.factories.write().unwrap();
        factories.insert(name, factory);
    }

    /// Create a driver from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn BackendDriver>)`: created driver instance
    /// - `Err(Error)`: the backend type is not registered or creation failed
    pub fn create(&self, config: &BackendConfig) -> Result<Arc<dyn BackendDriver>> {
        let backend_type = config.type_name();
        let factories = self.factories.read().unwrap();
        let factory = factories
            .get(backend_type)
            .ok_or_else(|| Error::config(format!("unknown backend type: {backend_type}")))?;
        factory.create(config)
    }

    /// Check if a backend type is registered
    pub fn has(&self, name: &str) -> bool {
        self.factories.read().unwrap().contains_key(name)
    }

    /// List all registered backend types
    pub fn list(&self) -> Vec<String> {
        self.factories.read().unwrap().keys().cloned().collect()
    }

    /// Build one service handler per configured service
    ///
    /// A service whose backend cannot be created is logged and skipped so
    /// one bad entry does not take down the rest of the shim.
    pub fn build_handlers(
        &self,
        handlers: &HashMap<String, BackendConfig>,
    ) -> Vec<ServiceHandler> {
        let mut built = Vec::new();
        for (service, config) in handlers {
            match self.create(config) {
                Ok(backend) => {
                    info!(
                        "loaded handler {:?} with backend {:?}",
                        service,
                        backend.driver_name()
                    );
                    built.push(ServiceHandler::new(service.clone(), backend));
                }
                Err(e) => {
                    error!("cannot load backend for handler {service:?}: {e}");
                }
            }
        }
        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrMap, ChangeSet, ServiceModel};
    use crate::traits::VifMap;
    use async_trait::async_trait;

    struct NullBackend;

    #[async_trait]
    impl BackendDriver for NullBackend {
        async fn bind_port(
            &self,
            _key: &str,
            _model: &ServiceModel,
            _changes: &ChangeSet,
        ) -> Result<VifMap> {
            Ok(VifMap::new())
        }
        async fn unbind_port(
            &self,
            _key: &str,
            _model: &ServiceModel,
            _changes: &ChangeSet,
        ) -> Result<()> {
            Ok(())
        }
        async fn modify_port(&self, _key: &str, _model: &ServiceModel, _changes: &ChangeSet) {}
        async fn delete_port(&self, _key: &str, _model: &ServiceModel) {}
        async fn modify_interface(&self, _key: &str, _model: &ServiceModel, _changes: &ChangeSet) {
        }
        async fn delete_interface(&self, _key: &str, _model: &ServiceModel) {}
        async fn modify_service(&self, _key: &str, _model: &ServiceModel, _changes: &ChangeSet) {}
        async fn delete_service(&self, _key: &str, _model: &ServiceModel) {}
        async fn modify_service_binding(
            &self,
            _key: &str,
            _model: &ServiceModel,
            _prev_binding: &AttrMap,
        ) {
        }
        async fn delete_service_binding(&self, _model: &ServiceModel, _prev_binding: &AttrMap) {}
        async fn modify_subport_parent(
            &self,
            _key: &str,
            _model: &ServiceModel,
            _prev_parent: Option<&str>,
            _prev_parent_type: Option<&str>,
        ) {
        }
        fn driver_name(&self) -> &'static str {
            "null"
        }
    }

    struct NullFactory;

    impl BackendFactory for NullFactory {
        fn create(&self, _config: &BackendConfig) -> Result<Arc<dyn BackendDriver>> {
            Ok(Arc::new(NullBackend))
        }
    }

    #[test]
    fn registration_and_lookup() {
        let registry = BackendRegistry::new();
        assert!(!registry.has("dummy"));
        registry.register("dummy", Box::new(NullFactory));
        assert!(registry.has("dummy"));
        assert!(registry.create(&BackendConfig::Dummy).is_ok());
    }

    #[test]
    fn unknown_backend_type_is_a_config_error() {
        let registry = BackendRegistry::new();
        assert!(matches!(
            registry.create(&BackendConfig::Dummy),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn build_handlers_skips_services_without_backend() {
        let registry = BackendRegistry::new();
        registry.register("dummy", Box::new(NullFactory));
        let mut handlers = HashMap::new();
        handlers.insert("net-l3vpn".to_string(), BackendConfig::Dummy);
        handlers.insert(
            "net-other".to_string(),
            BackendConfig::Custom {
                factory: "missing".to_string(),
                config: serde_json::Value::Null,
            },
        );
        let built = registry.build_handlers(&handlers);
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name(), "net-l3vpn");
    }
}
