//! C5: per-entity state checkpoints, keyed by sequence.

use crate::config::SnapshotConfig;
use parquedb_blobstore::{BlobStore, ListOptions, WriteOptions};
use parquedb_core::{Document, EntityId, Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotPayload {
    state: Option<Document>,
}

/// Non-authoritative per-entity checkpoints. Safe to purge at any time;
/// doing so only degrades reconstruction latency, never correctness (§4.5).
pub struct SnapshotStore {
    store: Arc<dyn BlobStore>,
    config: SnapshotConfig,
}

impl SnapshotStore {
    /// Build a snapshot store writing through `store`.
    pub fn new(store: Arc<dyn BlobStore>, config: SnapshotConfig) -> Self {
        SnapshotStore { store, config }
    }

    fn path_prefix(id: &EntityId) -> String {
        format!("snapshots/{}/{}/", id.namespace(), id.local_id())
    }

    fn path_for(id: &EntityId, seq: u64) -> String {
        format!("{}{:020}.bin", Self::path_prefix(id), seq)
    }

    /// Write one checkpoint row for `id` at `seq`.
    pub async fn create_snapshot(&self, id: &EntityId, seq: u64, state: Option<Document>) -> Result<()> {
        let payload = SnapshotPayload { state };
        let bytes = rmp_serde::to_vec_named(&payload)
            .map_err(|e| Error::backend_with_source("encode snapshot", e))?;
        self.store.write(&Self::path_for(id, seq), bytes, WriteOptions::default()).await?;
        trace!(entity = %id, seq, "wrote snapshot");
        Ok(())
    }

    /// The most recent checkpoint at or below `max_seq`, if any.
    pub async fn get_latest_snapshot(&self, id: &EntityId, max_seq: u64) -> Result<Option<(u64, Option<Document>)>> {
        let prefix = Self::path_prefix(id);
        let page = self.store.list(&prefix, ListOptions::default()).await?;
        let mut best: Option<u64> = None;
        for path in &page.paths {
            if let Some(seq) = parse_seq(&prefix, path) {
                if seq <= max_seq && best.map(|b| seq > b).unwrap_or(true) {
                    best = Some(seq);
                }
            }
        }
        let Some(seq) = best else { return Ok(None) };
        let bytes = self.store.read(&Self::path_for(id, seq)).await?;
        let payload: SnapshotPayload =
            rmp_serde::from_slice(&bytes).map_err(|e| Error::backend_with_source("decode snapshot", e))?;
        Ok(Some((seq, payload.state)))
    }

    /// Whether [`SnapshotStore::create_snapshot`] should run after
    /// replaying `replayed_events` events during a reconstruction that
    /// started at `start_seq` with no snapshot at or above it.
    pub fn should_snapshot(&self, replayed_events: usize, existing_at_or_above_start: bool) -> bool {
        !existing_at_or_above_start && replayed_events >= self.config.event_threshold
    }

    /// Delete every checkpoint for `id`. Always safe; only affects latency.
    pub async fn purge(&self, id: &EntityId) -> Result<()> {
        let prefix = Self::path_prefix(id);
        let page = self.store.list(&prefix, ListOptions::default()).await?;
        for path in page.paths {
            self.store.delete(&path).await?;
        }
        Ok(())
    }
}

fn parse_seq(prefix: &str, path: &str) -> Option<u64> {
    let rest = path.strip_prefix(prefix)?;
    let digits = rest.strip_suffix(".bin")?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_blobstore::MemoryStore;
    use parquedb_core::Value;
    use std::collections::BTreeMap;

    fn eid() -> EntityId {
        EntityId::parse("posts/1").unwrap()
    }

    #[tokio::test]
    async fn latest_snapshot_respects_max_seq() {
        let store = Arc::new(MemoryStore::new());
        let snaps = SnapshotStore::new(store, SnapshotConfig::default());
        let mut doc1 = BTreeMap::new();
        doc1.insert("version".to_string(), Value::Int(1));
        let mut doc2 = BTreeMap::new();
        doc2.insert("version".to_string(), Value::Int(2));
        snaps.create_snapshot(&eid(), 5, Some(doc1.clone())).await.unwrap();
        snaps.create_snapshot(&eid(), 10, Some(doc2.clone())).await.unwrap();

        let (seq, state) = snaps.get_latest_snapshot(&eid(), 7).await.unwrap().unwrap();
        assert_eq!(seq, 5);
        assert_eq!(state, Some(doc1));

        let (seq, state) = snaps.get_latest_snapshot(&eid(), 100).await.unwrap().unwrap();
        assert_eq!(seq, 10);
        assert_eq!(state, Some(doc2));
    }

    #[tokio::test]
    async fn missing_snapshot_returns_none() {
        let store = Arc::new(MemoryStore::new());
        let snaps = SnapshotStore::new(store, SnapshotConfig::default());
        assert!(snaps.get_latest_snapshot(&eid(), 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_every_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        let snaps = SnapshotStore::new(store, SnapshotConfig::default());
        snaps.create_snapshot(&eid(), 1, None).await.unwrap();
        snaps.purge(&eid()).await.unwrap();
        assert!(snaps.get_latest_snapshot(&eid(), 100).await.unwrap().is_none());
    }
}
