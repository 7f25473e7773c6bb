//! Core traits for the shim system
//!
//! This module defines the abstract interfaces at the system's seams.
//!
//! - [`CoordinationStore`]: shared, watchable key-value store
//! - [`RecordStore`]: authoritative local record database
//! - [`BackendDriver`]: bind/unbind/modify/delete side effects against an
//!   external network controller

pub mod backend;
pub mod coordination_store;
pub mod record_store;

pub use backend::{BackendDriver, BackendFactory, VifMap};
pub use coordination_store::{CoordinationStore, WatchAction, WatchMessage};
pub use record_store::{
    AF_CONFIG_TABLE, INTERFACE_TABLE, PORT_TABLE, PRIMARY_KEY, RecordStore,
    SERVICE_BINDING_TABLE, SERVICE_INSTANCE_TABLE,
};
