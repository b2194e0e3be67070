//! C11: folds a namespace's WAL rows and pending row-groups into a single
//! canonical columnar file, crash-safely.

use super::lease::NamespaceLease;
use crate::codec::entity_batch::{self, EntityRow};
use crate::codec::event_batch;
use crate::config::CompactionConfig;
use crate::pending::PendingStore;
use crate::wal::Wal;
use parquedb_blobstore::path::{content_tag, TagMode};
use parquedb_blobstore::{BlobStore, PutOptions};
use parquedb_core::{Error, Namespace, Op, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Counts describing one compaction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Distinct entities written into the new canonical file.
    pub entities_written: usize,
    /// WAL rows folded and removed.
    pub wal_rows_removed: usize,
    /// Pending row-groups folded and removed.
    pub pending_groups_removed: usize,
    /// The sequence number the new canonical file covers up to.
    pub up_to_seq: u64,
}

/// Background namespace compactor (§4.11).
pub struct Compactor {
    store: Arc<dyn BlobStore>,
    config: CompactionConfig,
}

impl Compactor {
    /// Build a compactor writing through `store`.
    pub fn new(store: Arc<dyn BlobStore>, config: CompactionConfig) -> Self {
        Compactor { store, config }
    }

    fn canonical_path(ns: &Namespace) -> String {
        format!("{ns}/data.parquet")
    }

    /// Run one compaction pass over `ns`: take the namespace lease, drain
    /// the WAL, fold prior canonical state + pending row-groups + WAL
    /// events into a new canonical file, publish it conditionally, then
    /// delete the consumed inputs. Returns `Ok(None)` if there was nothing
    /// to fold.
    pub async fn compact(
        &self,
        ns: &Namespace,
        wal: &Wal,
        pending: &PendingStore,
        holder: &str,
    ) -> Result<Option<CompactionReport>> {
        let mut lease = NamespaceLease::acquire(self.store.clone(), ns, holder, self.config).await?;

        let result = self.compact_locked(ns, wal, pending, &mut lease).await;

        // Best-effort release regardless of outcome; an expired lease is
        // reclaimed by the next compactor either way.
        let _ = lease.release().await;
        result
    }

    async fn compact_locked(
        &self,
        ns: &Namespace,
        wal: &Wal,
        pending: &PendingStore,
        lease: &mut NamespaceLease,
    ) -> Result<Option<CompactionReport>> {
        wal.flush_all().await?;
        lease.renew(self.config).await?;

        let wal_rows = wal.rows_for(ns);
        let pending_groups = pending.groups_for(ns);
        if wal_rows.is_empty() && pending_groups.is_empty() {
            return Ok(None);
        }

        let canonical_path = Self::canonical_path(ns);
        let (prior_rows, prior_etag) = match self.store.read(&canonical_path).await {
            Ok(bytes) => {
                let meta = self.store.stat(&canonical_path).await?;
                (entity_batch::decode(&bytes)?, Some(meta.etag))
            }
            Err(Error::BackendError { .. }) => (Vec::new(), None),
            Err(e) => return Err(e),
        };

        let mut state: BTreeMap<String, EntityRow> =
            prior_rows.into_iter().map(|r| (r.id.to_string(), r)).collect();
        let mut up_to_seq = state.values().map(|r| r.seq).max().unwrap_or(0);

        for group in &pending_groups {
            let bytes = self.store.read(&group.path).await?;
            for row in entity_batch::decode(&bytes)? {
                state.insert(row.id.to_string(), row);
            }
            up_to_seq = up_to_seq.max(group.last_seq);
        }

        for row in &wal_rows {
            let bytes = self.store.read(&row.path).await?;
            for event in event_batch::decode(&bytes)? {
                let Ok(parsed) = event.parsed_target() else { continue };
                let parquedb_core::EventTarget::Entity(id) = parsed else { continue };
                let state_json = match event.op {
                    Op::Delete => None,
                    _ => event.after.as_ref().map(|d| serde_json::to_string(d).unwrap_or_default()),
                };
                state.insert(id.to_string(), EntityRow { id, seq: event.id.sequence(), state_json });
            }
            up_to_seq = up_to_seq.max(row.last_seq);
        }

        let rows: Vec<EntityRow> = state.into_values().collect();
        let entities_written = rows.len();
        let bytes = entity_batch::encode(&rows)?;
        let tag = content_tag(&bytes, TagMode::Deterministic);
        let put_opts = match prior_etag {
            Some(etag) => PutOptions::IfMatch { etag },
            None => PutOptions::IfAbsent,
        };
        self.store.write_conditional(&canonical_path, bytes, put_opts).await?;

        for row in &wal_rows {
            self.store.delete(&row.path).await?;
        }
        wal.delete_batches_up_to(ns, up_to_seq);

        for group in &pending_groups {
            self.store.delete(&group.path).await?;
        }
        pending.remove_up_to(ns, up_to_seq);

        let report = CompactionReport {
            entities_written,
            wal_rows_removed: wal_rows.len(),
            pending_groups_removed: pending_groups.len(),
            up_to_seq,
        };
        info!(ns = %ns, ?report, content_tag = %tag, "compaction complete");
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalConfig;
    use crate::event_log::EventLog;
    use crate::pending::{BulkRow, PendingStore};
    use parquedb_blobstore::MemoryStore;
    use parquedb_core::{EntityId, EventId, Timestamp, Value};

    fn ns() -> Namespace {
        Namespace::new("posts").unwrap()
    }

    fn actor() -> EntityId {
        EntityId::parse("users/admin").unwrap()
    }

    #[tokio::test]
    async fn compacts_wal_rows_into_canonical_file() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let wal = Wal::new(store.clone(), WalConfig { auto_flush_event_count: 1, auto_flush_bytes: usize::MAX });
        let pending = PendingStore::new(store.clone());
        let log = EventLog::new(crate::config::EventLogConfig::default());

        let mut after = std::collections::BTreeMap::new();
        after.insert("title".to_string(), Value::String("hi".into()));
        let event = parquedb_core::Event {
            id: EventId::from_seq(0),
            ts: Timestamp::from_millis(1),
            op: Op::Create,
            target: "posts:1".to_string(),
            before: None,
            after: Some(after),
            entity_ids: None,
            actor: actor(),
            compressed: false,
        };
        let appended = log.append(event);
        wal.append(&ns(), appended).await.unwrap();

        let compactor = Compactor::new(store.clone(), CompactionConfig::default());
        let report = compactor.compact(&ns(), &wal, &pending, "worker-1").await.unwrap().unwrap();
        assert_eq!(report.entities_written, 1);
        assert_eq!(report.wal_rows_removed, 1);
        assert!(wal.rows_for(&ns()).is_empty());

        let canonical = store.read("posts/data.parquet").await.unwrap();
        let rows = entity_batch::decode(&canonical).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, EntityId::parse("posts/1").unwrap());
    }

    #[tokio::test]
    async fn compacts_pending_row_groups_alongside_wal() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let wal = Wal::new(store.clone(), WalConfig::default());
        let pending = PendingStore::new(store.clone());

        let mut v = std::collections::BTreeMap::new();
        v.insert("n".to_string(), Value::Int(1));
        pending
            .write_row_group(&ns(), 1, 50, &[BulkRow { id: EntityId::parse("posts/bulk-1").unwrap(), state: Some(v) }])
            .await
            .unwrap();

        let compactor = Compactor::new(store.clone(), CompactionConfig::default());
        let report = compactor.compact(&ns(), &wal, &pending, "worker-1").await.unwrap().unwrap();
        assert_eq!(report.entities_written, 1);
        assert_eq!(report.pending_groups_removed, 1);
        assert!(pending.groups_for(&ns()).is_empty());
    }

    #[tokio::test]
    async fn no_op_when_nothing_to_fold() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
        let wal = Wal::new(store.clone(), WalConfig::default());
        let pending = PendingStore::new(store.clone());
        let compactor = Compactor::new(store, CompactionConfig::default());
        let report = compactor.compact(&ns(), &wal, &pending, "worker-1").await.unwrap();
        assert!(report.is_none());
    }
}
