// # Record Store Trait
//
// Defines the interface to the authoritative local database that owns the
// typed records (ports, interfaces, service objects). The relational engine
// behind it is out of scope; the shim only needs create/read/update/delete
// by primary key.
//
// ## Implementations
//
// - In-memory: `record::MemoryRecordStore` (tests, sample deployments)

use crate::model::AttrMap;
use async_trait::async_trait;

/// Attribute name holding a record's primary key
pub const PRIMARY_KEY: &str = "id";

/// Table name for port records
pub const PORT_TABLE: &str = "Port";
/// Table name for interface records
pub const INTERFACE_TABLE: &str = "Interface";
/// Table name for service instance records
pub const SERVICE_INSTANCE_TABLE: &str = "ServiceInstance";
/// Table name for service binding records
pub const SERVICE_BINDING_TABLE: &str = "ServiceBinding";
/// Table name for address-family config records
pub const AF_CONFIG_TABLE: &str = "AfConfig";

/// Trait for record store implementations
///
/// All methods are safe to call concurrently. The store owns the committed
/// truth: the change publisher re-reads records through this trait after
/// each commit rather than trusting the caller's view.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record; `attrs` must contain the primary key
    ///
    /// # Returns
    ///
    /// The committed record.
    async fn create(&self, table: &str, attrs: AttrMap) -> Result<AttrMap, crate::Error>;

    /// Fetch a record by primary key
    ///
    /// # Returns
    ///
    /// - `Ok(AttrMap)`: the record's attributes
    /// - `Err(Error::RecordNotFound)`: no such record
    async fn get_by_primary_key(&self, table: &str, key: &str) -> Result<AttrMap, crate::Error>;

    /// Merge `attrs` into an existing record
    ///
    /// # Returns
    ///
    /// The committed record after the update.
    async fn update(
        &self,
        table: &str,
        key: &str,
        attrs: &AttrMap,
    ) -> Result<AttrMap, crate::Error>;

    /// Delete a record by primary key
    ///
    /// # Returns
    ///
    /// - `Ok(())`: deleted
    /// - `Err(Error::RecordNotFound)`: no such record
    async fn delete(&self, table: &str, key: &str) -> Result<(), crate::Error>;
}
