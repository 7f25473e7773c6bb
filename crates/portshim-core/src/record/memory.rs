// # Memory Record Store
//
// In-memory implementation of RecordStore.
//
// ## Purpose
//
// Stands in for the relational store in tests and sample deployments.
// Records live in per-table maps keyed by primary key; updates merge
// attributes the way the real store's partial-update path does.

use crate::error::{Error, Result};
use crate::model::AttrMap;
use crate::traits::{PRIMARY_KEY, RecordStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory record store
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<RwLock<HashMap<String, HashMap<String, AttrMap>>>>,
}

impl MemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a table
    pub async fn len(&self, table: &str) -> usize {
        self.inner
            .read()
            .await
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, table: &str, attrs: AttrMap) -> Result<AttrMap> {
        let key = attrs
            .get(PRIMARY_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::record_store(format!("create in {table} without primary key")))?
            .to_string();
        let mut inner = self.inner.write().await;
        let rows = inner.entry(table.to_string()).or_default();
        if rows.contains_key(&key) {
            return Err(Error::record_store(format!(
                "duplicate primary key {table}/{key}"
            )));
        }
        rows.insert(key, attrs.clone());
        Ok(attrs)
    }

    async fn get_by_primary_key(&self, table: &str, key: &str) -> Result<AttrMap> {
        let inner = self.inner.read().await;
        inner
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned()
            .ok_or_else(|| Error::record_not_found(table, key))
    }

    async fn update(&self, table: &str, key: &str, attrs: &AttrMap) -> Result<AttrMap> {
        let mut inner = self.inner.write().await;
        let record = inner
            .get_mut(table)
            .and_then(|rows| rows.get_mut(key))
            .ok_or_else(|| Error::record_not_found(table, key))?;
        for (name, value) in attrs {
            record.insert(name.clone(), value.clone());
        }
        Ok(record.clone())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .get_mut(table)
            .and_then(|rows| rows.remove(key))
            .map(|_| ())
            .ok_or_else(|| Error::record_not_found(table, key))
    }
}
