// # HTTP Backend
//
// Backend driver that forwards bind/unbind/modify/delete events to a remote
// SDN controller's REST API.
//
// ## Endpoint layout
//
// - `PUT  <base>/ports/<key>/bind`    body: changed attributes, response:
//   JSON vif map (`{}` = bind rejected)
// - `PUT  <base>/ports/<key>/unbind`  body: changed attributes
// - `POST <base>/<collection>/<key>`  notification of changed attributes
// - `DELETE <base>/<collection>/<key>`
//
// ## Failure contract
//
// Bind and unbind failures are returned to the caller, which aborts the
// triggering coordination step. Notification failures are logged here and
// swallowed: the dispatch loop must keep running no matter how the
// controller misbehaves. No retries in either case; retrying is owned by
// the state machine observing future changes.

use async_trait::async_trait;
use portshim_core::config::BackendConfig;
use portshim_core::model::{AttrMap, ChangeSet, ServiceModel};
use portshim_core::registry::BackendRegistry;
use portshim_core::traits::{BackendDriver, BackendFactory, VifMap};
use portshim_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Registry name of this driver
pub const DRIVER_NAME: &str = "http";

/// Default request timeout against the controller API
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend driver speaking to a remote controller over HTTP
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create a driver for the given controller base URL
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::config("controller base URL cannot be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT))
            .build()
            .map_err(|e| Error::backend(DRIVER_NAME, format!("building HTTP client: {e}")))?;
        Ok(Self { base_url, client })
    }

    fn url(&self, collection: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, key)
    }

    /// Send one PUT carrying the changed attributes, expecting a JSON map
    async fn put(&self, url: &str, changes: &ChangeSet) -> Result<AttrMap> {
        let response = self
            .client
            .put(url)
            .json(&changes.new)
            .send()
            .await
            .map_err(|e| Error::backend(DRIVER_NAME, format!("PUT {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::backend(
                DRIVER_NAME,
                format!("PUT {url}: controller answered {status}"),
            ));
        }
        response
            .json::<AttrMap>()
            .await
            .map_err(|e| Error::backend(DRIVER_NAME, format!("PUT {url}: bad response: {e}")))
    }

    /// Best-effort notification; failures are logged and dropped
    async fn notify(&self, url: &str, body: &AttrMap) {
        let result = self.client.post(url).json(body).send().await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!("POST {url}: controller answered {}", response.status());
            }
            Err(e) => {
                warn!("POST {url}: {e}");
            }
        }
    }

    /// Best-effort delete notification; failures are logged and dropped
    async fn notify_delete(&self, url: &str) {
        match self.client.delete(url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!("DELETE {url}: controller answered {}", response.status());
            }
            Err(e) => {
                warn!("DELETE {url}: {e}");
            }
        }
    }
}

#[async_trait]
impl BackendDriver for HttpBackend {
    async fn bind_port(
        &self,
        key: &str,
        _model: &ServiceModel,
        changes: &ChangeSet,
    ) -> Result<VifMap> {
        let url = format!("{}/bind", self.url("ports", key));
        info!("binding port {key} via {url}");
        self.put(&url, changes).await
    }

    async fn unbind_port(
        &self,
        key: &str,
        _model: &ServiceModel,
        changes: &ChangeSet,
    ) -> Result<()> {
        let url = format!("{}/unbind", self.url("ports", key));
        info!("unbinding port {key} via {url}");
        self.put(&url, changes).await.map(|_| ())
    }

    async fn modify_port(&self, key: &str, _model: &ServiceModel, changes: &ChangeSet) {
        self.notify(&self.url("ports", key), &changes.new).await;
    }

    async fn delete_port(&self, key: &str, _model: &ServiceModel) {
        self.notify_delete(&self.url("ports", key)).await;
    }

    async fn modify_interface(&self, key: &str, _model: &ServiceModel, changes: &ChangeSet) {
        self.notify(&self.url("interfaces", key), &changes.new).await;
    }

    async fn delete_interface(&self, key: &str, _model: &ServiceModel) {
        self.notify_delete(&self.url("interfaces", key)).await;
    }

    async fn modify_service(&self, key: &str, _model: &ServiceModel, changes: &ChangeSet) {
        self.notify(&self.url("services", key), &changes.new).await;
    }

    async fn delete_service(&self, key: &str, _model: &ServiceModel) {
        self.notify_delete(&self.url("services", key)).await;
    }

    async fn modify_service_binding(
        &self,
        key: &str,
        _model: &ServiceModel,
        prev_binding: &AttrMap,
    ) {
        self.notify(&self.url("service-bindings", key), prev_binding)
            .await;
    }

    async fn delete_service_binding(&self, _model: &ServiceModel, prev_binding: &AttrMap) {
        if let Some(key) = prev_binding.get("id").and_then(|v| v.as_str()) {
            self.notify_delete(&self.url("service-bindings", key)).await;
        } else {
            warn!("service binding delete without id, not forwarded");
        }
    }

    async fn modify_subport_parent(
        &self,
        key: &str,
        _model: &ServiceModel,
        prev_parent: Option<&str>,
        prev_parent_type: Option<&str>,
    ) {
        let body: AttrMap = [
            (
                "prev_parent".to_string(),
                prev_parent.map(Into::into).unwrap_or(serde_json::Value::Null),
            ),
            (
                "prev_parent_type".to_string(),
                prev_parent_type
                    .map(Into::into)
                    .unwrap_or(serde_json::Value::Null),
            ),
        ]
        .into_iter()
        .collect();
        self.notify(&format!("{}/parent", self.url("subports", key)), &body)
            .await;
    }

    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }
}

/// Factory creating [`HttpBackend`] instances from configuration
pub struct HttpFactory;

impl BackendFactory for HttpFactory {
    fn create(&self, config: &BackendConfig) -> Result<Arc<dyn BackendDriver>> {
        match config {
            BackendConfig::Http {
                controller_url,
                timeout_secs,
            } => {
                let timeout = timeout_secs.map(Duration::from_secs);
                Ok(Arc::new(HttpBackend::new(controller_url.clone(), timeout)?))
            }
            other => Err(Error::config(format!(
                "http backend cannot be built from a {:?} config",
                other.type_name()
            ))),
        }
    }
}

/// Register this driver with a backend registry
pub fn register(registry: &BackendRegistry) {
    registry.register(DRIVER_NAME, Box::new(HttpFactory));
}
