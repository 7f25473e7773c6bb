//! Process-wide shim context
//!
//! One [`ShimContext`] is constructed at process start and handed to the
//! watch loop, the service handlers and anything else that needs the shared
//! coordination-store client or the process identity. There are no
//! module-level globals; lifecycle is create-once, drop-at-shutdown.

use crate::config::ShimConfig;
use crate::traits::CoordinationStore;
use std::collections::HashSet;
use std::sync::Arc;

/// Hosts this shim instance is allowed to bind
#[derive(Debug, Clone)]
pub struct HostSet {
    hosts: HashSet<String>,
    wildcard: bool,
}

impl HostSet {
    /// Build from a configured host list; `*` anywhere means every host
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts: HashSet<String> = hosts.into_iter().map(Into::into).collect();
        let wildcard = hosts.contains("*");
        Self { hosts, wildcard }
    }

    /// True if this shim may bind ports on `host`
    pub fn contains(&self, host: &str) -> bool {
        self.wildcard || self.hosts.contains(host)
    }
}

/// Shared state of one shim process
pub struct ShimContext {
    /// Identity written as `controller` into claimed binding-result keys
    pub name: String,
    /// Hosts this process may bind
    pub hosts: HostSet,
    /// Coordination store client
    pub store: Arc<dyn CoordinationStore>,
    /// Tag prefixing the canonical snapshot namespace
    pub source_tag: String,
}

impl ShimContext {
    /// Build a context from validated configuration and a store client
    pub fn new(config: &ShimConfig, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            name: config.shim_name.clone(),
            hosts: HostSet::new(config.host_list.iter().cloned()),
            store,
            source_tag: config.source_tag.clone(),
        }
    }
}

impl std::fmt::Debug for ShimContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimContext")
            .field("name", &self.name)
            .field("hosts", &self.hosts)
            .field("source_tag", &self.source_tag)
            .finish()
    }
}
