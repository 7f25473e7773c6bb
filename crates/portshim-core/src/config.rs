//! Configuration types for the shim system
//!
//! This module defines all configuration structures used throughout the
//! crate. The daemon builds a [`ShimConfig`] from environment variables and
//! validates it before anything else starts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Source tag under which canonical snapshots are published when none is
/// configured. Part of the persisted key layout, so changing it breaks
/// interop with peers watching the same store.
pub const DEFAULT_SOURCE_TAG: &str = "proton";

/// Main shim configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimConfig {
    /// Identity string of this shim process; written as the `controller`
    /// field of every binding-result key it claims
    pub shim_name: String,

    /// Host identifiers this shim instance may bind; `*` means all hosts
    pub host_list: Vec<String>,

    /// Map from service name to the backend driver serving it
    pub handlers: HashMap<String, BackendConfig>,

    /// Coordination store endpoint
    #[serde(default)]
    pub store: StoreConfig,

    /// Tag prefixing every canonical snapshot key
    #[serde(default = "default_source_tag")]
    pub source_tag: String,

    /// Watch loop settings
    #[serde(default)]
    pub watch: WatchSettings,

    /// Bind coordination settings
    #[serde(default)]
    pub bind: BindSettings,
}

fn default_source_tag() -> String {
    DEFAULT_SOURCE_TAG.to_string()
}

impl ShimConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.shim_name.is_empty() {
            return Err(crate::Error::config("shim_name cannot be empty"));
        }
        if self.host_list.is_empty() {
            return Err(crate::Error::config("host_list cannot be empty"));
        }
        if self.handlers.is_empty() {
            return Err(crate::Error::config("no handlers configured"));
        }
        if self.source_tag.is_empty() || self.source_tag.contains('/') {
            return Err(crate::Error::config(format!(
                "invalid source_tag: {:?}",
                self.source_tag
            )));
        }
        for config in self.handlers.values() {
            config.validate()?;
        }
        self.watch.validate()?;
        self.bind.validate()?;
        Ok(())
    }
}

/// Coordination store endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store host
    pub host: String,
    /// Store port
    pub port: u16,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2379,
        }
    }
}

/// Backend driver configuration
///
/// Exactly one concrete driver is active per service. The `Custom` variant
/// routes through a factory registered under its own name, so driver crates
/// outside this workspace can plug in without a config change here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Log-only driver answering every bind with a fixed vif map
    Dummy,

    /// Driver forwarding events to a remote SDN controller's REST API
    Http {
        /// Base URL of the controller API
        controller_url: String,
        /// Request timeout in seconds
        timeout_secs: Option<u64>,
    },

    /// Custom driver
    Custom {
        /// Factory name to use
        factory: String,
        /// Driver-specific configuration data
        config: serde_json::Value,
    },
}

impl BackendConfig {
    /// Validate the backend configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            BackendConfig::Http { controller_url, .. } => {
                if controller_url.is_empty() {
                    return Err(crate::Error::config("controller_url cannot be empty"));
                }
                Ok(())
            }
            BackendConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "custom backend factory cannot be empty",
                    ));
                }
                Ok(())
            }
            BackendConfig::Dummy => Ok(()),
        }
    }

    /// Registry name of the factory serving this configuration
    pub fn type_name(&self) -> &str {
        match self {
            BackendConfig::Dummy => "dummy",
            BackendConfig::Http { .. } => "http",
            BackendConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Watch loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Per-attempt bound on the blocking watch read, in seconds
    pub watch_timeout_secs: u64,

    /// Fixed backoff after a store-unavailable error, in seconds
    pub unavailable_backoff_secs: u64,

    /// Cap for the escalating backoff applied to unclassified errors,
    /// in seconds
    pub max_backoff_secs: u64,

    /// Index gap beyond which the resume point is abandoned and the watch
    /// restarts from "now"
    pub index_gap_limit: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            watch_timeout_secs: 3600,
            unavailable_backoff_secs: 5,
            max_backoff_secs: 300,
            index_gap_limit: 1000,
        }
    }
}

impl WatchSettings {
    /// Validate the watch settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.watch_timeout_secs == 0 {
            return Err(crate::Error::config("watch_timeout_secs must be > 0"));
        }
        if self.index_gap_limit == 0 {
            return Err(crate::Error::config("index_gap_limit must be > 0"));
        }
        Ok(())
    }

    /// Per-attempt watch bound as a [`Duration`]
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }
}

/// Bind coordination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindSettings {
    /// Number of blocking read attempts on the binding-result key
    pub attempts: u32,

    /// Per-attempt wait bound, in seconds
    pub attempt_timeout_secs: u64,

    /// Sleep between attempts after a missing result key, in seconds
    pub retry_delay_secs: u64,
}

impl Default for BindSettings {
    fn default() -> Self {
        Self {
            attempts: 4,
            attempt_timeout_secs: 2,
            retry_delay_secs: 1,
        }
    }
}

impl BindSettings {
    /// Validate the bind settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.attempts == 0 {
            return Err(crate::Error::config("bind attempts must be > 0"));
        }
        Ok(())
    }

    /// Runtime policy derived from these settings
    pub fn policy(&self) -> BindPolicy {
        BindPolicy {
            attempts: self.attempts,
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

/// Runtime bind policy handed to the port coordinator
///
/// Separate from [`BindSettings`] so tests can drive sub-second timeouts
/// without going through the serialized config surface.
#[derive(Debug, Clone)]
pub struct BindPolicy {
    /// Number of blocking read attempts on the binding-result key
    pub attempts: u32,
    /// Per-attempt wait bound
    pub attempt_timeout: Duration,
    /// Sleep between attempts after a missing result key
    pub retry_delay: Duration,
}

impl Default for BindPolicy {
    fn default() -> Self {
        BindSettings::default().policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ShimConfig {
        let mut handlers = HashMap::new();
        handlers.insert("net-l3vpn".to_string(), BackendConfig::Dummy);
        ShimConfig {
            shim_name: "shim-a".to_string(),
            host_list: vec!["*".to_string()],
            handlers,
            store: StoreConfig::default(),
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            watch: WatchSettings::default(),
            bind: BindSettings::default(),
        }
    }

    #[test]
    fn minimal_config_validates() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn empty_identity_is_rejected() {
        let mut config = minimal();
        config.shim_name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn source_tag_with_slash_is_rejected() {
        let mut config = minimal();
        config.source_tag = "a/b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn backend_config_type_names() {
        assert_eq!(BackendConfig::Dummy.type_name(), "dummy");
        let http = BackendConfig::Http {
            controller_url: "http://ctrl:8080".to_string(),
            timeout_secs: None,
        };
        assert_eq!(http.type_name(), "http");
    }

    #[test]
    fn default_bind_policy_is_four_attempts() {
        let policy = BindPolicy::default();
        assert_eq!(policy.attempts, 4);
    }
}
