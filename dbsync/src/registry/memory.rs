//! In-memory registry for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbsyncResult;
use crate::registry::base::{Checkpoint, CheckpointUpdate, TableRegistry};

#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<BTreeMap<String, Checkpoint>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored checkpoint, for assertions.
    pub fn entries(&self) -> BTreeMap<String, Checkpoint> {
        self.inner.lock().unwrap().clone()
    }
}

#[async_trait]
impl TableRegistry for MemoryRegistry {
    async fn ensure_storage_exists(&self) -> DbsyncResult<()> {
        Ok(())
    }

    async fn get(&self, table_name: &str) -> DbsyncResult<Option<Checkpoint>> {
        Ok(self.inner.lock().unwrap().get(table_name).copied())
    }

    async fn set(&self, table_name: &str, checkpoint: Checkpoint) -> DbsyncResult<()> {
        self.inner
            .lock()
            .unwrap()
            .entry(table_name.to_string())
            .or_insert(checkpoint);
        Ok(())
    }

    async fn set_force(&self, table_name: &str, checkpoint: Checkpoint) -> DbsyncResult<()> {
        self.inner
            .lock()
            .unwrap()
            .insert(table_name.to_string(), checkpoint);
        Ok(())
    }

    async fn update(
        &self,
        table_name: &str,
        expected_lock: Option<DateTime<Utc>>,
        values: CheckpointUpdate,
    ) -> DbsyncResult<u64> {
        let mut entries = self.inner.lock().unwrap();
        match entries.get_mut(table_name) {
            Some(checkpoint) if checkpoint.last_batch_synced_at == expected_lock => {
                checkpoint.last_synced_at = values.last_synced_at;
                checkpoint.last_row_at = values.last_row_at;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete(&self, table_name: &str) -> DbsyncResult<()> {
        self.inner.lock().unwrap().remove(table_name);
        Ok(())
    }

    async fn purge_except(&self, keep: &[String]) -> DbsyncResult<u64> {
        let mut entries = self.inner.lock().unwrap();
        let before = entries.len();
        entries.retain(|name, _| keep.iter().any(|k| k == name));
        Ok((before - entries.len()) as u64)
    }
}
