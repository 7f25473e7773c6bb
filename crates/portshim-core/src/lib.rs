// # portshim-core
//
// Core library for the port-binding arbitration shim.
//
// ## Architecture Overview
//
// Multiple independent shim processes share nothing but a watchable
// coordination store. Each one mirrors the published object state, agrees
// with its peers on which process owns each port, and drives a pluggable
// backend accordingly:
//
// - **ChangePublisher**: turns committed record mutations into canonical
//   snapshots and registry entries in the coordination store
// - **PortCoordinator**: request-time bind/unbind logic that blocks on the
//   binding-result key until a shim reports the outcome
// - **WatchLoop**: resumable ordered prefix watch feeding a single-consumer
//   dispatch queue
// - **ServiceHandler**: per-service lifecycle state machine deciding which
//   backend side effects each change triggers
// - **BackendDriver**: trait seam to the external network controller
//
// ## Data Flow
//
// ```text
// API mutation -> RecordStore -> ChangePublisher -> coordination store
//                                                        |
//                                       WatchLoop <------+
//                                           |
//                                    ServiceHandler -> BackendDriver
// ```
//
// The PortCoordinator rides a narrower path: it parks the mutating request
// on the binding-result key, which whichever shim owns the target host
// writes after a successful bind.
//
// ## Design Principles
//
// 1. **Advisory ownership**: at-most-one-Bound is best effort and
//    self-correcting; claims go through the store's compare-and-swap
// 2. **Availability over strictness**: watchers retry transient faults
//    forever; only losing a canonical write is fatal
// 3. **Single-consumer models**: each mirrored model is owned by exactly
//    one dispatch worker, so no locking inside the state machine

pub mod binding;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod model;
pub mod paths;
pub mod publisher;
pub mod record;
pub mod registry;
pub mod store;
pub mod traits;
pub mod watch;

// Re-export core types for convenience
pub use binding::PortCoordinator;
pub use config::{BackendConfig, BindPolicy, BindSettings, ShimConfig, WatchSettings};
pub use context::{HostSet, ShimContext};
pub use error::{Error, Result};
pub use handler::ServiceHandler;
pub use model::{AttrMap, ChangeSet, MirroredObject, ObjectType, Port, PortState, ServiceModel};
pub use publisher::{ChangeEnvelope, ChangePublisher, PublisherHandle};
pub use record::MemoryRecordStore;
pub use registry::BackendRegistry;
pub use store::MemoryCoordinationStore;
pub use traits::{
    BackendDriver, BackendFactory, CoordinationStore, RecordStore, VifMap, WatchAction,
    WatchMessage,
};
pub use watch::WatchLoop;
