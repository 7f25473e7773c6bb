// # Coordination Store Trait
//
// Defines the interface to the shared, watchable key-value store that all
// shim and API processes coordinate through.
//
// ## Contract
//
// Implementations must provide:
// - linearizable reads and writes,
// - a store-global, monotonically increasing modification index,
// - a resumable, ordered, blocking watch over a key prefix.
//
// ## Implementations
//
// - In-memory: `store::MemoryCoordinationStore` (tests, single-process
//   deployments)
// - An etcd-style networked store can be supplied by embedders; the watch
//   semantics here are modeled on its v2 API (wait + waitIndex).

use async_trait::async_trait;
use std::time::Duration;

/// A single change delivered by the store's watch primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchMessage {
    /// Full key the change happened at
    pub key: String,
    /// Value after the change; empty for deletes
    pub value: String,
    /// Kind of mutation
    pub action: WatchAction,
    /// Store-global modification index of this change
    pub modified_index: u64,
}

/// Kind of mutation carried by a [`WatchMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    /// Key created
    Set,
    /// Existing key overwritten
    Update,
    /// Key removed
    Delete,
}

impl WatchAction {
    /// True for the actions that carry a (possibly new) value
    pub fn is_write(&self) -> bool {
        matches!(self, WatchAction::Set | WatchAction::Update)
    }
}

/// Trait for coordination store implementations
///
/// All methods are safe to call concurrently. Errors divide into
/// [`Error::KeyNotFound`](crate::Error::KeyNotFound) (absence, usually not a
/// failure), [`Error::WatchTimedOut`](crate::Error::WatchTimedOut) (normal
/// for long watches) and
/// [`Error::StoreUnavailable`](crate::Error::StoreUnavailable) (backend
/// unreachable).
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read the current value of a key
    ///
    /// # Returns
    ///
    /// - `Ok(WatchMessage)`: current value and its modification index
    /// - `Err(Error::KeyNotFound)`: the key does not exist
    async fn read(&self, key: &str) -> Result<WatchMessage, crate::Error>;

    /// Read every key under a prefix, ordered by key
    ///
    /// A missing prefix is an empty result, not an error.
    async fn read_prefix(&self, prefix: &str) -> Result<Vec<WatchMessage>, crate::Error>;

    /// Block until a change at or after `wait_index` happens under `prefix`
    ///
    /// `prefix` may be a single key. With `wait_index = None` the watch
    /// starts from "now": only changes made after the call are delivered.
    /// The call returns the earliest matching change, so watchers resume
    /// with `wait_index = Some(modified_index + 1)` to walk the change
    /// stream in order.
    ///
    /// # Returns
    ///
    /// - `Ok(WatchMessage)`: the next change
    /// - `Err(Error::WatchTimedOut)`: nothing happened within `timeout`
    async fn watch(
        &self,
        prefix: &str,
        wait_index: Option<u64>,
        timeout: Duration,
    ) -> Result<WatchMessage, crate::Error>;

    /// Write a value, creating or overwriting the key
    ///
    /// # Returns
    ///
    /// The modification index assigned to this write.
    async fn write(&self, key: &str, value: &str) -> Result<u64, crate::Error>;

    /// Write only if the key's current value matches `expected`
    ///
    /// `expected = None` means "the key must not exist". Returns whether the
    /// write was applied. This is the primitive the ownership claim on the
    /// binding-result key is built on.
    async fn compare_and_write(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, crate::Error>;

    /// Delete a key
    ///
    /// # Returns
    ///
    /// - `Ok(())`: deleted
    /// - `Err(Error::KeyNotFound)`: the key did not exist
    async fn delete(&self, key: &str) -> Result<(), crate::Error>;
}
