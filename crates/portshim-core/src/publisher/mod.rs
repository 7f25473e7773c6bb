//! Change publisher
//!
//! Turns local record mutations into canonical snapshots in the coordination
//! store, and maintains the cross-service port registry. Request-side call
//! sites enqueue [`ChangeEnvelope`]s fire-and-forget; a single worker task
//! drains the queue in submission order so snapshot writes can never race
//! each other.
//!
//! ## Failure behavior
//!
//! A missing key on delete/deregister is idempotent and swallowed. Any other
//! store or record-store failure terminates the worker with an error: a
//! silently lost canonical write would desynchronize every watcher, so the
//! process is expected to be supervised and restarted instead.

use crate::error::{Error, Result};
use crate::model::AttrMap;
use crate::paths;
use crate::traits::{CoordinationStore, RecordStore};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A record mutation to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEnvelope {
    /// A record was created or updated; reload and snapshot it
    Update {
        /// Service the record belongs to
        service: String,
        /// Record table
        table: String,
        /// Primary key
        key: String,
    },
    /// A record was deleted; drop its snapshot
    Delete {
        /// Service the record belongs to
        service: String,
        /// Record table
        table: String,
        /// Primary key
        key: String,
    },
    /// A port was created; announce it in the cross-service registry
    Register {
        /// Port id
        port_id: String,
        /// Owning tenant
        tenant_id: String,
        /// Service the port belongs to
        service: String,
        /// API endpoint of the owning service
        url: String,
    },
    /// A port was deleted; withdraw it from the registry
    Deregister {
        /// Port id
        port_id: String,
    },
}

/// Queue handle used by request-side call sites
///
/// Sends never block and never fail while the worker is alive; a send after
/// worker exit is dropped, which matches the fire-and-forget contract.
#[derive(Clone)]
pub struct PublisherHandle {
    tx: mpsc::UnboundedSender<ChangeEnvelope>,
}

impl PublisherHandle {
    /// Enqueue an envelope
    pub fn send(&self, envelope: ChangeEnvelope) {
        if self.tx.send(envelope).is_err() {
            warn!("change publisher is gone; envelope dropped");
        }
    }
}

/// Worker that publishes record changes to the coordination store
pub struct ChangePublisher {
    records: Arc<dyn RecordStore>,
    store: Arc<dyn CoordinationStore>,
    source_tag: String,
    rx: mpsc::UnboundedReceiver<ChangeEnvelope>,
}

impl ChangePublisher {
    /// Create a publisher and the handle feeding it
    pub fn new(
        records: Arc<dyn RecordStore>,
        store: Arc<dyn CoordinationStore>,
        source_tag: impl Into<String>,
    ) -> (Self, PublisherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = Self {
            records,
            store,
            source_tag: source_tag.into(),
            rx,
        };
        (publisher, PublisherHandle { tx })
    }

    /// Drain the queue until every handle is dropped
    ///
    /// Returns `Err` on the first fatal store failure; the queue's remaining
    /// envelopes are abandoned with the process.
    pub async fn run(mut self) -> Result<()> {
        info!("change publisher starting");
        while let Some(envelope) = self.rx.recv().await {
            debug!(?envelope, "publishing change");
            if let Err(e) = self.process(envelope).await {
                error!("fatal error publishing change: {e}");
                return Err(e);
            }
        }
        info!("change publisher queue closed, exiting");
        Ok(())
    }

    async fn process(&self, envelope: ChangeEnvelope) -> Result<()> {
        match envelope {
            ChangeEnvelope::Update {
                service,
                table,
                key,
            } => {
                let record = self.records.get_by_primary_key(&table, &key).await?;
                let snapshot = stringify_attrs(&record);
                let etcd_key = paths::canonical_key(&self.source_tag, &service, &table, &key);
                let value = serde_json::to_string(&snapshot)?;
                self.store.write(&etcd_key, &value).await?;
            }
            ChangeEnvelope::Delete {
                service,
                table,
                key,
            } => {
                let etcd_key = paths::canonical_key(&self.source_tag, &service, &table, &key);
                match self.store.delete(&etcd_key).await {
                    Ok(()) => {}
                    Err(Error::KeyNotFound(_)) => {
                        warn!("snapshot already gone: {etcd_key}");
                    }
                    Err(e) => return Err(e),
                }
            }
            ChangeEnvelope::Register {
                port_id,
                tenant_id,
                service,
                url,
            } => {
                let entry = serde_json::json!({
                    "tenant_id": tenant_id,
                    "service": service,
                    "url": url,
                });
                let etcd_key = paths::registry_key(&port_id);
                self.store.write(&etcd_key, &entry.to_string()).await?;
            }
            ChangeEnvelope::Deregister { port_id } => {
                let etcd_key = paths::registry_key(&port_id);
                match self.store.delete(&etcd_key).await {
                    Ok(()) => {}
                    Err(Error::KeyNotFound(_)) => {
                        warn!("registry entry already gone: {etcd_key}");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

/// Stringify record attributes for the canonical snapshot: null stays null,
/// strings stay as-is, everything else becomes its text form
fn stringify_attrs(attrs: &AttrMap) -> AttrMap {
    attrs
        .iter()
        .map(|(key, value)| {
            let out = match value {
                Value::Null => Value::Null,
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            };
            (key.clone(), out)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringify_preserves_null_and_text() {
        let attrs: AttrMap = [
            ("a".to_string(), Value::Null),
            ("b".to_string(), json!("text")),
            ("c".to_string(), json!(5)),
            ("d".to_string(), json!(true)),
        ]
        .into_iter()
        .collect();
        let out = stringify_attrs(&attrs);
        assert_eq!(out["a"], Value::Null);
        assert_eq!(out["b"], json!("text"));
        assert_eq!(out["c"], json!("5"));
        assert_eq!(out["d"], json!("true"));
    }
}
