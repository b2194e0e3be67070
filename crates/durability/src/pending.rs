//! C4: pending row-groups — columnar blobs emitted directly by bulk writes,
//! registered as immutable metadata rows awaiting compaction.

use crate::codec::entity_batch::{self, EntityRow};
use parking_lot::Mutex;
use parquedb_blobstore::{BlobStore, WriteOptions};
use parquedb_core::{Document, EntityId, Error, Namespace, Result};
use std::sync::Arc;
use tracing::debug;

/// Metadata for one pending row-group: `(id, ns, path, row_count, first_seq,
/// last_seq, created_at)` (§3).
#[derive(Debug, Clone)]
pub struct PendingRowGroup {
    /// Opaque id for this row-group (also embedded in its blob path).
    pub id: String,
    /// The namespace these rows belong to.
    pub ns: Namespace,
    /// Where the columnar blob lives.
    pub path: String,
    /// Number of entity rows in the blob.
    pub row_count: usize,
    /// First sequence number covered.
    pub first_seq: u64,
    /// Last sequence number covered.
    pub last_seq: u64,
    /// When this row-group was written, milliseconds since epoch.
    pub created_at: i64,
}

/// One logical entry in a bulk write's payload: the affected entity and its
/// post-image, or `None` for a bulk delete.
pub struct BulkRow {
    /// The entity this row describes.
    pub id: EntityId,
    /// The entity's post-image, or `None` for a deletion.
    pub state: Option<Document>,
}

/// Registry of pending row-groups, one instance shared across namespaces.
pub struct PendingStore {
    store: Arc<dyn BlobStore>,
    rows: Mutex<Vec<PendingRowGroup>>,
}

impl PendingStore {
    /// Build a pending-row-group registry writing through `store`.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        PendingStore { store, rows: Mutex::new(Vec::new()) }
    }

    /// Write a bulk write's post-images as one immutable columnar blob and
    /// register its row-group metadata.
    pub async fn write_row_group(
        &self,
        ns: &Namespace,
        first_seq: u64,
        last_seq: u64,
        rows: &[BulkRow],
    ) -> Result<PendingRowGroup> {
        let encoded_rows: Vec<EntityRow> = rows
            .iter()
            .map(|r| {
                let state_json = r.state.as_ref().map(|d| serde_json::to_string(d).unwrap_or_default());
                EntityRow { id: r.id.clone(), seq: last_seq, state_json }
            })
            .collect();
        let bytes = entity_batch::encode(&encoded_rows)?;

        let id = uuid::Uuid::new_v4().to_string();
        let path = format!("events/pending/{id}.parquet");
        self.store.write(&path, bytes, WriteOptions::default()).await?;

        let group = PendingRowGroup {
            id,
            ns: ns.clone(),
            path,
            row_count: rows.len(),
            first_seq,
            last_seq,
            created_at: parquedb_core::Timestamp::now().as_millis(),
        };
        self.rows.lock().push(group.clone());
        debug!(ns = %ns, rows = rows.len(), first_seq, last_seq, "wrote pending row-group");
        Ok(group)
    }

    /// All row-groups for `ns`, sorted by `first_seq` ascending (§4.4).
    pub fn groups_for(&self, ns: &Namespace) -> Vec<PendingRowGroup> {
        let mut groups: Vec<PendingRowGroup> =
            self.rows.lock().iter().filter(|g| &g.ns == ns).cloned().collect();
        groups.sort_by_key(|g| g.first_seq);
        groups
    }

    /// Find the state of `id` across `ns`'s row-groups, applying
    /// last-write-wins across groups sorted by `first_seq` (§4.4 step 2).
    /// Returns `None` if no group mentions the entity.
    pub async fn find_latest(&self, ns: &Namespace, id: &EntityId) -> Result<Option<Option<Document>>> {
        let groups = self.groups_for(ns);
        let mut found = None;
        for group in groups {
            let bytes = self.store.read(&group.path).await?;
            let rows = entity_batch::decode(&bytes)?;
            for row in rows {
                if &row.id == id {
                    let state = match row.state_json {
                        Some(s) => Some(
                            serde_json::from_str(&s)
                                .map_err(|e| Error::backend_with_source("decode pending state", e))?,
                        ),
                        None => None,
                    };
                    found = Some(state);
                }
            }
        }
        Ok(found)
    }

    /// The state of `id` as recorded by the specific row-group covering
    /// `seq` — used to resolve a `BULK_*` event's per-entity payload during
    /// replay, as opposed to [`PendingStore::find_latest`]'s "most recent
    /// group overall" lookup (§4.4, §4.6 bulk reconstruction). `None` if no
    /// group covering `seq` mentions `id` (e.g. it has already been
    /// compacted away).
    pub async fn state_at_seq(&self, ns: &Namespace, seq: u64, id: &EntityId) -> Result<Option<Option<Document>>> {
        for group in self.groups_for(ns) {
            if seq < group.first_seq || seq > group.last_seq {
                continue;
            }
            let bytes = self.store.read(&group.path).await?;
            for row in entity_batch::decode(&bytes)? {
                if &row.id == id {
                    let state = match row.state_json {
                        Some(s) => Some(
                            serde_json::from_str(&s)
                                .map_err(|e| Error::backend_with_source("decode pending state", e))?,
                        ),
                        None => None,
                    };
                    return Ok(Some(state));
                }
            }
        }
        Ok(None)
    }

    /// Remove and return the row-groups for `ns` with `last_seq <=
    /// up_to_seq`, after the compactor has folded them into the canonical
    /// file. Does not delete the underlying blobs — the caller does that
    /// once the fold is durable.
    pub fn remove_up_to(&self, ns: &Namespace, up_to_seq: u64) -> Vec<PendingRowGroup> {
        let mut rows = self.rows.lock();
        let (removed, kept): (Vec<_>, Vec<_>) =
            rows.drain(..).partition(|g| &g.ns == ns && g.last_seq <= up_to_seq);
        *rows = kept;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_blobstore::MemoryStore;
    use parquedb_core::Value;

    fn ns() -> Namespace {
        Namespace::new("posts").unwrap()
    }

    #[tokio::test]
    async fn write_and_find_latest_round_trips() {
        let store = Arc::new(MemoryStore::new());
        let pending = PendingStore::new(store);
        let mut state = std::collections::BTreeMap::new();
        state.insert("title".to_string(), Value::String("hi".into()));
        let rows = vec![BulkRow { id: EntityId::parse("posts/1").unwrap(), state: Some(state.clone()) }];
        pending.write_row_group(&ns(), 1, 1, &rows).await.unwrap();

        let found = pending.find_latest(&ns(), &EntityId::parse("posts/1").unwrap()).await.unwrap();
        assert_eq!(found, Some(Some(state)));
    }

    #[tokio::test]
    async fn later_group_overrides_earlier_for_same_entity() {
        let store = Arc::new(MemoryStore::new());
        let pending = PendingStore::new(store);
        let id = EntityId::parse("posts/1").unwrap();
        let mut v1 = std::collections::BTreeMap::new();
        v1.insert("v".to_string(), Value::Int(1));
        let mut v2 = std::collections::BTreeMap::new();
        v2.insert("v".to_string(), Value::Int(2));
        pending
            .write_row_group(&ns(), 1, 1, &[BulkRow { id: id.clone(), state: Some(v1) }])
            .await
            .unwrap();
        pending
            .write_row_group(&ns(), 2, 2, &[BulkRow { id: id.clone(), state: Some(v2.clone()) }])
            .await
            .unwrap();
        let found = pending.find_latest(&ns(), &id).await.unwrap();
        assert_eq!(found, Some(Some(v2)));
    }

    #[tokio::test]
    async fn state_at_seq_scopes_lookup_to_the_covering_group() {
        let store = Arc::new(MemoryStore::new());
        let pending = PendingStore::new(store);
        let id = EntityId::parse("posts/1").unwrap();
        let mut v1 = std::collections::BTreeMap::new();
        v1.insert("v".to_string(), Value::Int(1));
        let mut v2 = std::collections::BTreeMap::new();
        v2.insert("v".to_string(), Value::Int(2));
        pending
            .write_row_group(&ns(), 1, 1, &[BulkRow { id: id.clone(), state: Some(v1.clone()) }])
            .await
            .unwrap();
        pending
            .write_row_group(&ns(), 2, 2, &[BulkRow { id: id.clone(), state: Some(v2.clone()) }])
            .await
            .unwrap();

        let at_first = pending.state_at_seq(&ns(), 1, &id).await.unwrap();
        assert_eq!(at_first, Some(Some(v1)));
        let at_second = pending.state_at_seq(&ns(), 2, &id).await.unwrap();
        assert_eq!(at_second, Some(Some(v2)));
        let at_unknown = pending.state_at_seq(&ns(), 99, &id).await.unwrap();
        assert_eq!(at_unknown, None);
    }

    #[tokio::test]
    async fn remove_up_to_only_removes_covered_groups() {
        let store = Arc::new(MemoryStore::new());
        let pending = PendingStore::new(store);
        let id = EntityId::parse("posts/1").unwrap();
        pending.write_row_group(&ns(), 1, 1, &[BulkRow { id: id.clone(), state: None }]).await.unwrap();
        pending.write_row_group(&ns(), 2, 2, &[BulkRow { id: id.clone(), state: None }]).await.unwrap();
        let removed = pending.remove_up_to(&ns(), 1);
        assert_eq!(removed.len(), 1);
        assert_eq!(pending.groups_for(&ns()).len(), 1);
    }
}
