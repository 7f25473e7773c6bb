//! In-memory mirror of the published object state
//!
//! Each service handler owns one [`ServiceModel`]: a per-object-type map of
//! mirrored attribute sets, created on first observed change and dropped on
//! observed delete. Ports additionally carry a [`PortState`] lifecycle
//! marker. The model is owned exclusively by the dispatch worker of one shim
//! process; nothing else mutates it.

use serde_json::Value;
use std::collections::HashMap;

/// Attribute map of a record or mirrored object
pub type AttrMap = HashMap<String, Value>;

/// Attribute carrying the host a port is bound to
pub const HOST_ID: &str = "host_id";
/// Attribute carrying the device a port is attached to
pub const DEVICE_ID: &str = "device_id";
/// Attribute carrying the vif type produced by a bind
pub const VIF_TYPE: &str = "vif_type";
/// Attribute carrying the vif details produced by a bind
pub const VIF_DETAILS: &str = "vif_details";
/// Binding-result field naming the shim that claimed the port
pub const CONTROLLER: &str = "controller";
/// Interface attribute referencing the owning port
pub const PORT_ID: &str = "port_id";
/// Service-binding attribute referencing the service instance
pub const SERVICE_INSTANCE: &str = "service_instance";
/// Service-instance attribute listing IPv4 address-family configs
pub const IPV4_FAMILY: &str = "ipv4_family";
/// Service-instance attribute listing IPv6 address-family configs
pub const IPV6_FAMILY: &str = "ipv6_family";

/// Object types carried in the canonical snapshot namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// A network port
    Port,
    /// A logical interface on a port
    Interface,
    /// A service instance (e.g. one VPN)
    ServiceInstance,
    /// An association between a port and a service instance
    ServiceBinding,
    /// An address-family configuration referenced by service instances
    AfConfig,
}

impl ObjectType {
    /// Parse a snapshot table name
    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "Port" => Some(Self::Port),
            "Interface" => Some(Self::Interface),
            "ServiceInstance" => Some(Self::ServiceInstance),
            "ServiceBinding" => Some(Self::ServiceBinding),
            "AfConfig" => Some(Self::AfConfig),
            _ => None,
        }
    }

    /// Snapshot table name of this object type
    pub fn table(&self) -> &'static str {
        match self {
            Self::Port => "Port",
            Self::Interface => "Interface",
            Self::ServiceInstance => "ServiceInstance",
            Self::ServiceBinding => "ServiceBinding",
            Self::AfConfig => "AfConfig",
        }
    }

    /// All object types, in the order a resync loads them: ports first so
    /// the dependent object handlers can see port state
    pub fn all() -> [ObjectType; 5] {
        [
            Self::Port,
            Self::ServiceInstance,
            Self::AfConfig,
            Self::ServiceBinding,
            Self::Interface,
        ]
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// Lifecycle state of a mirrored port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortState {
    /// Not bound by anyone, as far as this shim knows
    #[default]
    Unbound,
    /// Bound by this shim process
    Bound,
    /// Bound by another shim process
    InUse,
}

/// Attribute diff produced by [`MirroredObject::update_attrs`]
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Attributes that were added or changed, with their new values
    pub new: AttrMap,
    /// Previous values of the attributes that changed
    pub prev: AttrMap,
}

impl ChangeSet {
    /// An empty diff
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if nothing changed
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
    }
}

/// One mirrored object: a key plus its last-known attributes
#[derive(Debug, Clone)]
pub struct MirroredObject {
    /// Primary key
    pub id: String,
    attrs: AttrMap,
}

impl MirroredObject {
    /// Create a mirror from an observed attribute set
    pub fn new(id: impl Into<String>, attrs: AttrMap) -> Self {
        Self {
            id: id.into(),
            attrs,
        }
    }

    /// Merge new attributes into the mirror, returning the diff
    ///
    /// Unchanged attributes are absent from the diff; attributes not
    /// previously mirrored appear in `new` with no `prev` entry.
    pub fn update_attrs(&mut self, new_attributes: &AttrMap) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for (key, value) in new_attributes {
            match self.attrs.get(key) {
                Some(old) if old == value => {}
                Some(old) => {
                    changes.prev.insert(key.clone(), old.clone());
                    changes.new.insert(key.clone(), value.clone());
                    self.attrs.insert(key.clone(), value.clone());
                }
                None => {
                    changes.new.insert(key.clone(), value.clone());
                    self.attrs.insert(key.clone(), value.clone());
                }
            }
        }
        changes
    }

    /// Look up an attribute
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// Look up a string attribute
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// Overwrite one attribute
    pub fn set_attr(&mut self, key: impl Into<String>, value: Value) {
        self.attrs.insert(key.into(), value);
    }

    /// Full attribute view
    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }
}

/// A mirrored port with its lifecycle state
#[derive(Debug, Clone)]
pub struct Port {
    /// Mirrored attributes
    pub object: MirroredObject,
    /// Lifecycle state
    pub state: PortState,
}

impl Port {
    /// Mirror a newly observed port; state starts [`PortState::Unbound`]
    pub fn new(id: impl Into<String>, attrs: AttrMap) -> Self {
        Self {
            object: MirroredObject::new(id, attrs),
            state: PortState::default(),
        }
    }
}

/// The full mirrored state of one service in one shim process
#[derive(Debug, Default)]
pub struct ServiceModel {
    /// Ports by primary key
    pub ports: HashMap<String, Port>,
    /// Interfaces by primary key
    pub interfaces: HashMap<String, MirroredObject>,
    /// Service instances by primary key
    pub service_instances: HashMap<String, MirroredObject>,
    /// Service bindings by primary key (the key is the port id)
    pub service_bindings: HashMap<String, MirroredObject>,
    /// Address-family configs by primary key
    pub af_configs: HashMap<String, MirroredObject>,
}

impl ServiceModel {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifecycle state of a port, if mirrored
    pub fn port_state(&self, key: &str) -> Option<PortState> {
        self.ports.get(key).map(|p| p.state)
    }

    /// The port associated with a service instance through a binding
    pub fn port_for_instance(&self, instance_id: &str) -> Option<&Port> {
        self.service_bindings
            .values()
            .find(|b| b.attr_str(SERVICE_INSTANCE) == Some(instance_id))
            .and_then(|b| self.ports.get(&b.id))
    }
}

/// True if `attrs` carries a value for `key` that is neither null nor the
/// empty string
pub fn attr_is_set(attrs: &AttrMap, key: &str) -> bool {
    match attrs.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// True if the diff touches the bind-relevant attribute pair
pub fn bind_attrs_changed(changes: &ChangeSet) -> bool {
    changes.new.contains_key(HOST_ID) && changes.new.contains_key(DEVICE_ID)
}

/// True if `attrs` expresses bind intent: host and device both set
pub fn is_bind_intent(attrs: &AttrMap) -> bool {
    attr_is_set(attrs, HOST_ID) && attr_is_set(attrs, DEVICE_ID)
}
