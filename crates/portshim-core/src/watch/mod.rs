//! Watch/dispatch loop
//!
//! One long-running loop per shim process: a resumable, ordered, prefix
//! watch over the published-change namespace feeding a single-consumer
//! dispatch queue. Watch resumption and handler execution are decoupled on
//! purpose: a slow backend call must never hold up the watch long enough to
//! trip the index-gap reset.
//!
//! ## Resume semantics
//!
//! `wait_index` starts unset ("watch from now") and advances to
//! `modified_index + 1` after every delivery. A jump larger than the
//! configured gap limit abandons the resume point instead of trusting a
//! possibly-compacted history; completeness is traded for boundedness and
//! the next watch starts from "now".
//!
//! ## Failure policy
//!
//! The loop never exits on a transient fault. Timeouts re-issue the watch
//! immediately, an unreachable store waits a fixed backoff, and anything
//! unclassified is logged at error level and retried with a doubling
//! backoff up to a cap, so a persistent misconfiguration stays visible in
//! the logs instead of spinning silently.

use crate::config::WatchSettings;
use crate::context::ShimContext;
use crate::error::{Error, Result};
use crate::handler::ServiceHandler;
use crate::model::{AttrMap, ObjectType};
use crate::paths;
use crate::traits::{WatchAction, WatchMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// The shim process's watch loop plus its dispatch worker
pub struct WatchLoop {
    ctx: Arc<ShimContext>,
    handlers: HashMap<String, ServiceHandler>,
    settings: WatchSettings,
}

struct WatchState {
    wait_index: Option<u64>,
    unknown_backoff: Duration,
}

impl WatchLoop {
    /// Create a loop dispatching to the given per-service handlers
    pub fn new(
        ctx: Arc<ShimContext>,
        handlers: Vec<ServiceHandler>,
        settings: WatchSettings,
    ) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|h| (h.name().to_string(), h))
            .collect();
        Self {
            ctx,
            handlers,
            settings,
        }
    }

    /// Run until SIGINT
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(None).await
    }

    /// Run until the given shutdown signal fires (or SIGINT if `None`)
    ///
    /// Performs the full resync first, then starts the dispatch worker and
    /// enters the watch loop. Returns once the watch has stopped and the
    /// dispatch queue has drained.
    pub async fn run_with_shutdown(
        mut self,
        shutdown: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        // Resync runs to completion before steady-state dispatch starts, so
        // the model is never touched from two tasks.
        for handler in self.handlers.values_mut() {
            handler.load_model(&self.ctx).await;
        }

        let (tx, rx) = mpsc::unbounded_channel::<WatchMessage>();
        let worker = tokio::spawn(dispatch_worker(
            rx,
            std::mem::take(&mut self.handlers),
            Arc::clone(&self.ctx),
        ));

        let mut state = WatchState {
            wait_index: None,
            unknown_backoff: Duration::from_secs(self.settings.unavailable_backoff_secs),
        };
        info!("watching {}", paths::canonical_root(&self.ctx.source_tag));

        if let Some(mut shutdown) = shutdown {
            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("shutdown signal received");
                        break;
                    }
                    _ = self.watch_once(&tx, &mut state) => {}
                }
            }
        } else {
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutdown signal received");
                        break;
                    }
                    _ = self.watch_once(&tx, &mut state) => {}
                }
            }
        }

        drop(tx);
        worker
            .await
            .map_err(|e| Error::other(format!("dispatch worker panicked: {e}")))?;
        Ok(())
    }

    async fn watch_once(
        &self,
        tx: &mpsc::UnboundedSender<WatchMessage>,
        state: &mut WatchState,
    ) {
        let prefix = paths::canonical_root(&self.ctx.source_tag);
        match self
            .ctx
            .store
            .watch(&prefix, state.wait_index, self.settings.watch_timeout())
            .await
        {
            Ok(message) => {
                let modified = message.modified_index;
                if tx.send(message).is_err() {
                    warn!("dispatch worker gone; change dropped");
                }
                state.wait_index = next_wait_index(
                    state.wait_index,
                    modified,
                    self.settings.index_gap_limit,
                );
                state.unknown_backoff =
                    Duration::from_secs(self.settings.unavailable_backoff_secs);
            }
            Err(Error::WatchTimedOut) => {
                debug!("watch timed out, re-issuing");
            }
            Err(Error::StoreUnavailable(e)) => {
                error!(
                    "cannot reach coordination store: {e}; retrying in {}s",
                    self.settings.unavailable_backoff_secs
                );
                tokio::time::sleep(Duration::from_secs(self.settings.unavailable_backoff_secs))
                    .await;
            }
            Err(e) => {
                error!(
                    "unexpected watch error: {e}; retrying in {:?}",
                    state.unknown_backoff
                );
                tokio::time::sleep(state.unknown_backoff).await;
                state.unknown_backoff = (state.unknown_backoff * 2)
                    .min(Duration::from_secs(self.settings.max_backoff_secs));
            }
        }
    }
}

/// Advance the resume point past a delivered index
///
/// A jump beyond `gap_limit` resets to "unset": the history between the two
/// points may be compacted away, so resuming would either fail or silently
/// replay a partial window.
fn next_wait_index(previous: Option<u64>, modified_index: u64, gap_limit: u64) -> Option<u64> {
    match previous {
        Some(last) if modified_index.saturating_sub(last) > gap_limit => None,
        _ => Some(modified_index + 1),
    }
}

async fn dispatch_worker(
    mut rx: mpsc::UnboundedReceiver<WatchMessage>,
    mut handlers: HashMap<String, ServiceHandler>,
    ctx: Arc<ShimContext>,
) {
    info!("dispatch worker starting");
    while let Some(message) = rx.recv().await {
        dispatch_message(&mut handlers, &ctx, message).await;
    }
    info!("dispatch queue closed, worker exiting");
}

/// Route one watch message to its service handler, strictly in receive order
async fn dispatch_message(
    handlers: &mut HashMap<String, ServiceHandler>,
    ctx: &ShimContext,
    message: WatchMessage,
) {
    let Some((service, table, key)) = paths::parse_canonical(&message.key) else {
        error!("unknown message key {}, ignoring", message.key);
        return;
    };
    let Some(object) = ObjectType::from_table(table) else {
        error!("unknown object type {table} at {}", message.key);
        return;
    };
    let Some(handler) = handlers.get_mut(service) else {
        error!("unhandled service {service}");
        return;
    };

    match message.action {
        WatchAction::Set | WatchAction::Update => {
            let attributes: AttrMap = match serde_json::from_str(&message.value) {
                Ok(attributes) => attributes,
                Err(e) => {
                    error!("malformed change payload at {}: {e}", message.key);
                    return;
                }
            };
            if let Err(e) = handler
                .handle_object_change(object, key, attributes, ctx)
                .await
            {
                error!("handling change for {service}/{object}/{key} failed: {e}");
            }
        }
        WatchAction::Delete => handler.handle_object_delete(object, key).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_index_advances_past_each_delivery() {
        assert_eq!(next_wait_index(None, 7, 1000), Some(8));
        assert_eq!(next_wait_index(Some(8), 9, 1000), Some(10));
    }

    #[test]
    fn wait_index_resets_on_large_gap() {
        // 500 -> 1800 jumps by 1300, beyond the limit
        assert_eq!(next_wait_index(Some(500), 1800, 1000), None);
        // exactly at the limit still resumes
        assert_eq!(next_wait_index(Some(500), 1500, 1000), Some(1501));
    }

    #[test]
    fn wait_index_tolerates_out_of_order_indexes() {
        assert_eq!(next_wait_index(Some(100), 50, 1000), Some(51));
    }
}
