//! Where accepted remote records land on the device.

use crate::store::{StorageError, StoreResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tidesync_engine::{RecordId, SyncRecord};
use tokio::sync::Mutex;

/// The host's local data layer, as seen by the sync engine.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Store remote revisions locally. Called before the cycle commits, so a
    /// failure here leaves the cursor where it was.
    async fn apply_remote(&self, records: &[SyncRecord]) -> StoreResult<()>;
}

/// In-memory record sink keyed by record ID.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<RecordId, SyncRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<SyncRecord> {
        self.records.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn apply_remote(&self, records: &[SyncRecord]) -> StoreResult<()> {
        let mut stored = self.records.lock().await;
        for record in records {
            match stored.get_mut(&record.id) {
                Some(existing) => existing
                    .advance_to(record.clone())
                    .map_err(StorageError::from)?,
                None => {
                    stored.insert(record.id.clone(), record.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn applies_newer_revisions() {
        let sink = MemorySink::new();
        sink.apply_remote(&[SyncRecord::new("n1", "notes", 1, json!({"v": 1}), 10)])
            .await
            .unwrap();
        sink.apply_remote(&[SyncRecord::new("n1", "notes", 2, json!({"v": 2}), 20)])
            .await
            .unwrap();

        assert_eq!(sink.get("n1").await.unwrap().version, 2);
        assert_eq!(sink.len().await, 1);
    }

    #[tokio::test]
    async fn rejects_version_regression() {
        let sink = MemorySink::new();
        sink.apply_remote(&[SyncRecord::new("n1", "notes", 3, json!({}), 10)])
            .await
            .unwrap();

        let result = sink
            .apply_remote(&[SyncRecord::new("n1", "notes", 2, json!({}), 20)])
            .await;
        assert!(matches!(result, Err(StorageError::Engine(_))));
        assert_eq!(sink.get("n1").await.unwrap().version, 3);
    }
}
