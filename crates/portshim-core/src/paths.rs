//! Coordination-store key layout
//!
//! Three disjoint hierarchies live under the store:
//!
//! - canonical snapshots: `/<source_tag>/<service>/<table>/<key>`
//! - binding results:     `/controller/<service>/Port/<key>`
//! - cross-service registry: `/gluon/port/<port_id>`
//!
//! The layout is interop-relevant: peer processes written against the same
//! store parse these paths byte for byte. Whitespace inside a primary key is
//! collapsed to `_` so a key is always a single path segment.

/// Root of the binding-result hierarchy
pub const CONTROLLER_DIR: &str = "controller";

/// Root of the cross-service port registry
pub const PORT_REGISTRY_DIR: &str = "/gluon/port";

/// Collapse whitespace runs in a primary key to single underscores
pub fn normalize_key(key: &str) -> String {
    key.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Canonical snapshot key for one record
pub fn canonical_key(source_tag: &str, service: &str, table: &str, key: &str) -> String {
    format!(
        "/{}/{}/{}/{}",
        source_tag,
        service,
        table,
        normalize_key(key)
    )
}

/// Prefix covering every snapshot of one table
pub fn canonical_table_prefix(source_tag: &str, service: &str, table: &str) -> String {
    format!("/{}/{}/{}", source_tag, service, table)
}

/// Prefix covering the whole published-change namespace of one source
pub fn canonical_root(source_tag: &str) -> String {
    format!("/{}", source_tag)
}

/// Binding-result key for one port
pub fn binding_result_key(service: &str, key: &str) -> String {
    format!(
        "/{}/{}/Port/{}",
        CONTROLLER_DIR,
        service,
        normalize_key(key)
    )
}

/// Registry key for one port id
pub fn registry_key(port_id: &str) -> String {
    format!("{}/{}", PORT_REGISTRY_DIR, normalize_key(port_id))
}

/// Parse a canonical snapshot key into `(service, table, primary_key)`
///
/// Returns `None` for keys outside the `/<source_tag>/<service>/<table>/<key>`
/// shape.
pub fn parse_canonical(key: &str) -> Option<(&str, &str, &str)> {
    let mut parts = key.strip_prefix('/')?.splitn(4, '/');
    let _source = parts.next()?;
    let service = parts.next()?;
    let table = parts.next()?;
    let primary_key = parts.next()?;
    if service.is_empty() || table.is_empty() || primary_key.is_empty() {
        return None;
    }
    Some((service, table, primary_key))
}
