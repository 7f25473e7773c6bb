// # Memory Coordination Store
//
// In-memory implementation of CoordinationStore.
//
// ## Purpose
//
// Backs tests and single-process sample deployments. Watch semantics follow
// the networked stores this trait models: one store-global modification
// index, ordered delivery, resume via wait index.
//
// ## History window
//
// Watch resumption replays from a bounded in-memory history. Events older
// than the window are silently unavailable, the same way a compacted store
// loses them; the watch loop's index-gap reset is what keeps consumers
// correct across that loss.
//
// ## Index behavior
//
// The modification index counts every mutation of this store instance.
// [`MemoryCoordinationStore::bump_index`] advances it without an event,
// which models writes landing elsewhere in a shared store (the index is
// store-global, not per-subtree).

use crate::error::{Error, Result};
use crate::traits::{CoordinationStore, WatchAction, WatchMessage};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Number of past events kept for watch resumption
const HISTORY_WINDOW: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    modified_index: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    history: VecDeque<WatchMessage>,
    index: u64,
}

impl Inner {
    fn record(&mut self, key: &str, value: &str, action: WatchAction) -> u64 {
        self.index += 1;
        let index = self.index;
        match action {
            WatchAction::Set | WatchAction::Update => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        modified_index: index,
                    },
                );
            }
            WatchAction::Delete => {
                self.entries.remove(key);
            }
        }
        self.history.push_back(WatchMessage {
            key: key.to_string(),
            value: value.to_string(),
            action,
            modified_index: index,
        });
        if self.history.len() > HISTORY_WINDOW {
            self.history.pop_front();
        }
        index
    }
}

/// In-memory coordination store
///
/// Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryCoordinationStore {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryCoordinationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of the store-global modification index
    pub fn current_index(&self) -> u64 {
        self.inner.lock().unwrap().index
    }

    /// Advance the modification index without producing an event
    ///
    /// Models unrelated writes landing elsewhere in a shared store, which is
    /// how real watchers end up seeing index jumps far larger than the
    /// number of events under their own prefix.
    pub fn bump_index(&self, delta: u64) {
        self.inner.lock().unwrap().index += delta;
    }

    fn find_from(&self, prefix: &str, start: u64) -> Option<WatchMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .history
            .iter()
            .find(|m| m.modified_index >= start && prefix_match(&m.key, prefix))
            .cloned()
    }
}

fn prefix_match(key: &str, prefix: &str) -> bool {
    key == prefix
        || (key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/'))
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn read(&self, key: &str) -> Result<WatchMessage> {
        let inner = self.inner.lock().unwrap();
        match inner.entries.get(key) {
            Some(entry) => Ok(WatchMessage {
                key: key.to_string(),
                value: entry.value.clone(),
                action: WatchAction::Set,
                modified_index: entry.modified_index,
            }),
            None => Err(Error::key_not_found(key)),
        }
    }

    async fn read_prefix(&self, prefix: &str) -> Result<Vec<WatchMessage>> {
        let inner = self.inner.lock().unwrap();
        let mut result: Vec<WatchMessage> = inner
            .entries
            .iter()
            .filter(|(key, _)| prefix_match(key, prefix))
            .map(|(key, entry)| WatchMessage {
                key: key.clone(),
                value: entry.value.clone(),
                action: WatchAction::Set,
                modified_index: entry.modified_index,
            })
            .collect();
        result.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(result)
    }

    async fn watch(
        &self,
        prefix: &str,
        wait_index: Option<u64>,
        timeout: Duration,
    ) -> Result<WatchMessage> {
        let start = match wait_index {
            Some(index) => index,
            // "from now": only events after this call
            None => self.current_index() + 1,
        };
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.find_from(prefix, start) {
                return Ok(message);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::WatchTimedOut);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Err(Error::WatchTimedOut);
            }
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<u64> {
        let index = {
            let mut inner = self.inner.lock().unwrap();
            let action = if inner.entries.contains_key(key) {
                WatchAction::Update
            } else {
                WatchAction::Set
            };
            inner.record(key, value, action)
        };
        self.notify.notify_waiters();
        Ok(index)
    }

    async fn compare_and_write(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let applied = {
            let mut inner = self.inner.lock().unwrap();
            let current = inner.entries.get(key).map(|e| e.value.clone());
            if current.as_deref() == expected {
                let action = if current.is_some() {
                    WatchAction::Update
                } else {
                    WatchAction::Set
                };
                inner.record(key, value, action);
                true
            } else {
                false
            }
        };
        if applied {
            self.notify.notify_waiters();
        }
        Ok(applied)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.entries.contains_key(key) {
                return Err(Error::key_not_found(key));
            }
            inner.record(key, "", WatchAction::Delete);
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
