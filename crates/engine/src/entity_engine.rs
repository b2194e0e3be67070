//! C6: the entity engine, the single mutation/read path every namespace's
//! CRUD, bulk, and query operations go through (§4.6).
//!
//! Sequence numbers are namespace-scoped (§3), so this engine multiplexes
//! one [`EventLog`] per namespace rather than sharing a single buffer.

use crate::cache::EntityCache;
use crate::document::{self, current_version, is_soft_deleted};
use crate::filter::{self, aggregate};
use crate::planner;
use crate::relationships::RelationshipIndex;
use crate::update_ops;
use async_trait::async_trait;
use dashmap::DashMap;
use parquedb_blobstore::BlobStore;
use parquedb_concurrency::{occ, TransactionHost};
use parquedb_core::{
    Document, EntityId, Error, Event, EventId, EventTarget, Namespace, Op, Result, Timestamp, Value, Version,
};
use parquedb_durability::codec::{entity_batch, event_batch};
use parquedb_durability::{BulkRow, EventLog, EventLogConfig, PendingStore, SnapshotConfig, SnapshotStore, Wal, WalConfig};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Options for [`EntityEngine::get`]/[`EntityEngine::find`] reads.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Reconstruct state as of this timestamp instead of "now".
    pub as_of: Option<Timestamp>,
    /// Include soft-deleted entities instead of treating them as absent.
    pub include_deleted: bool,
}

/// Options for [`EntityEngine::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Who performed the mutation; defaults to `system/anonymous` (§4.6).
    pub actor: Option<EntityId>,
    /// Create a minimal stub for any referenced entity that doesn't exist
    /// yet, instead of failing with `ReferenceNotFound` (§4.7).
    pub auto_create_refs: bool,
}

/// Options for [`EntityEngine::update`].
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Who performed the mutation.
    pub actor: Option<EntityId>,
    /// Fail with `VersionConflict` if the entity's current version differs.
    pub expected_version: Option<Version>,
    /// See [`CreateOptions::auto_create_refs`].
    pub auto_create_refs: bool,
}

/// Options for [`EntityEngine::delete`].
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Who performed the mutation.
    pub actor: Option<EntityId>,
    /// Fail with `VersionConflict` if the entity's current version differs.
    pub expected_version: Option<Version>,
    /// Hard-delete (tombstone, cascade outgoing edges) instead of
    /// soft-deleting (stamp `deletedAt`/`deletedBy`, keep the document).
    pub hard: bool,
}

/// Options for [`EntityEngine::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// `$operator` filter document; empty matches every live entity.
    pub filter: Document,
    /// Include soft-deleted entities.
    pub include_deleted: bool,
    /// Reconstruct candidates as of this timestamp.
    pub as_of: Option<Timestamp>,
    /// `{field: 1|-1}` sort document, applied after filtering.
    pub sort: Option<Document>,
    /// Skip this many matches before collecting results.
    pub skip: Option<usize>,
    /// Stop after collecting this many results.
    pub limit: Option<usize>,
}

fn no_lookups(_: &str) -> Vec<Document> {
    Vec::new()
}

/// Tunable knobs for the durability layers an [`EntityEngine`] owns.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub event_log: EventLogConfig,
    pub wal: WalConfig,
    pub snapshot: SnapshotConfig,
    /// `0` selects the default LRU capacity (§4.6).
    pub cache_capacity: usize,
}

/// Owns every namespace's event log, the shared WAL/pending/snapshot
/// layers, the reconstructed-entity cache, and the relationship index; every
/// CRUD, bulk, and query operation is a method here (§4.6).
pub struct EntityEngine {
    store: Arc<dyn BlobStore>,
    logs: DashMap<String, Arc<EventLog>>,
    event_log_config: EventLogConfig,
    wal: Wal,
    pending: PendingStore,
    snapshots: Arc<SnapshotStore>,
    cache: EntityCache,
    relationships: RelationshipIndex,
}

impl EntityEngine {
    /// Build an engine persisting through `store`, with default durability
    /// knobs.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Build an engine with explicit durability knobs.
    pub fn with_config(store: Arc<dyn BlobStore>, config: EngineConfig) -> Self {
        let wal = Wal::new(store.clone(), config.wal);
        let pending = PendingStore::new(store.clone());
        let snapshots = Arc::new(SnapshotStore::new(store.clone(), config.snapshot));
        let cache = if config.cache_capacity > 0 {
            EntityCache::with_capacity(config.cache_capacity)
        } else {
            EntityCache::new()
        };
        EntityEngine {
            store,
            logs: DashMap::new(),
            event_log_config: config.event_log,
            wal,
            pending,
            snapshots,
            cache,
            relationships: RelationshipIndex::new(),
        }
    }

    /// The relationship index backing `getRelated` queries.
    pub fn relationships(&self) -> &RelationshipIndex {
        &self.relationships
    }

    fn log_for(&self, ns: &Namespace) -> Arc<EventLog> {
        self.logs
            .entry(ns.as_str().to_string())
            .or_insert_with(|| Arc::new(EventLog::new(self.event_log_config)))
            .clone()
    }

    async fn append(&self, ns: &Namespace, event: Event) -> Result<Event> {
        let log = self.log_for(ns);
        let appended = log.append(event);
        self.wal.append(ns, appended.clone()).await?;
        Ok(appended)
    }

    fn canonical_path(ns: &Namespace) -> String {
        format!("{ns}/data.parquet")
    }

    /// Reconstruct `id`'s state, consulting the cache first when the read is
    /// not time-traveling (§4.6: "invalidate first, then append" keeps this
    /// coherent with concurrent writers).
    async fn reconstruct(&self, ns: &Namespace, id: &EntityId, as_of: Option<Timestamp>) -> Result<Option<Document>> {
        if as_of.is_none() {
            if let Some(cached) = self.cache.get(id) {
                return Ok(cached);
            }
        }
        let log = self.log_for(ns);
        let result =
            parquedb_durability::reconstruct(&self.snapshots, &self.pending, &self.wal, &log, ns, id, as_of).await?;
        if as_of.is_none() {
            self.cache.put(id.clone(), result.state.clone());
        }
        Ok(result.state)
    }

    /// Fetch `id`, honoring `include_deleted`/`as_of`. `None` if the entity
    /// was never created, was hard-deleted, or is soft-deleted and the
    /// caller didn't ask for deleted entities.
    pub async fn get(&self, ns: &Namespace, id: &EntityId, opts: &GetOptions) -> Result<Option<Document>> {
        let state = self.reconstruct(ns, id, opts.as_of).await?;
        Ok(match state {
            Some(doc) if is_soft_deleted(&doc) && !opts.include_deleted => None,
            other => other,
        })
    }

    /// Collect every field on `doc` that references another entity, as
    /// `(predicate, target)` pairs, for relationship-index maintenance and
    /// auto-create resolution (§4.7).
    fn collect_references(doc: &Document) -> Vec<(String, EntityId)> {
        let mut refs = Vec::new();
        for (field, value) in doc {
            match value {
                Value::Reference(id) => refs.push((field.clone(), id.clone())),
                Value::Array(items) => {
                    for item in items {
                        if let Value::Reference(id) = item {
                            refs.push((field.clone(), id.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
        refs
    }

    /// Ensure every referenced entity exists: auto-create a minimal stub if
    /// `auto_create` is set, otherwise fail with `ReferenceNotFound` (§4.7).
    async fn ensure_references_exist(
        &self,
        refs: &[(String, EntityId)],
        auto_create: bool,
        actor: &EntityId,
    ) -> Result<()> {
        for (_, target) in refs {
            if self.get(target.namespace(), target, &GetOptions::default()).await?.is_some() {
                continue;
            }
            if !auto_create {
                return Err(Error::reference_not_found(target.clone()));
            }
            let stub = document::stamp_created(Document::new(), target, actor, Timestamp::now());
            self.put_created(target.namespace(), target.clone(), stub, actor.clone()).await?;
        }
        Ok(())
    }

    /// Record the backward edges implied by every reference on `doc`.
    fn index_references(&self, from: &EntityId, doc: &Document) {
        for (predicate, target) in Self::collect_references(doc) {
            self.relationships.apply_forward_change(from, &predicate, &target, true);
        }
    }

    /// Append a `CREATE` event for an already-stamped document, caching and
    /// indexing it. Shared by [`EntityEngine::create`] and auto-created
    /// reference stubs.
    async fn put_created(&self, ns: &Namespace, id: EntityId, doc: Document, actor: EntityId) -> Result<Document> {
        let event = Event {
            id: EventId::from_seq(0),
            ts: Timestamp::now(),
            op: Op::Create,
            target: EventTarget::format_entity(&id),
            before: None,
            after: Some(doc.clone()),
            entity_ids: None,
            actor,
            compressed: false,
        };
        self.cache.invalidate(&id);
        self.append(ns, event).await?;
        self.cache.put(id.clone(), Some(doc.clone()));
        self.index_references(&id, &doc);
        Ok(doc)
    }

    /// Create a new entity in `ns`, assigning it a fresh id.
    pub async fn create(&self, ns: &Namespace, data: Document, opts: &CreateOptions) -> Result<Document> {
        let actor = opts.actor.clone().unwrap_or_else(EntityId::system_actor);
        let id = EntityId::new(ns.clone(), uuid::Uuid::new_v4().to_string())
            .map_err(|e| Error::validation(e.to_string()))?;
        let doc = document::stamp_created(data, &id, &actor, Timestamp::now());
        let refs = Self::collect_references(&doc);
        self.ensure_references_exist(&refs, opts.auto_create_refs, &actor).await?;
        self.put_created(ns, id, doc, actor).await
    }

    /// Apply `patch`'s update operators to `id`'s current state.
    pub async fn update(&self, ns: &Namespace, id: &EntityId, patch: &Document, opts: &UpdateOptions) -> Result<Document> {
        let current = self.get(ns, id, &GetOptions::default()).await?.ok_or_else(|| Error::not_found(id.clone()))?;
        let actual_version = current_version(&current).unwrap_or(Version::INITIAL);
        occ::check_version(id, opts.expected_version, actual_version)?;

        let actor = opts.actor.clone().unwrap_or_else(EntityId::system_actor);
        let (patched, links) = update_ops::apply(current.clone(), patch)?;
        let new_refs: Vec<(String, EntityId)> =
            links.iter().filter(|l| l.linked).map(|l| (l.predicate.clone(), l.target.clone())).collect();
        self.ensure_references_exist(&new_refs, opts.auto_create_refs, &actor).await?;
        let stamped = document::stamp_updated(patched, &actor, Timestamp::now());

        let event = Event {
            id: EventId::from_seq(0),
            ts: Timestamp::now(),
            op: Op::Update,
            target: EventTarget::format_entity(id),
            before: Some(current),
            after: Some(stamped.clone()),
            entity_ids: None,
            actor,
            compressed: false,
        };
        self.cache.invalidate(id);
        self.append(ns, event).await?;
        self.cache.put(id.clone(), Some(stamped.clone()));
        for link in &links {
            self.relationships.apply_forward_change(id, &link.predicate, &link.target, link.linked);
        }
        Ok(stamped)
    }

    /// Delete `id`, soft by default or hard when [`DeleteOptions::hard`].
    pub async fn delete(&self, ns: &Namespace, id: &EntityId, opts: &DeleteOptions) -> Result<()> {
        let current = self
            .get(ns, id, &GetOptions { include_deleted: true, ..GetOptions::default() })
            .await?
            .ok_or_else(|| Error::not_found(id.clone()))?;
        let actual_version = current_version(&current).unwrap_or(Version::INITIAL);
        occ::check_version(id, opts.expected_version, actual_version)?;
        let actor = opts.actor.clone().unwrap_or_else(EntityId::system_actor);

        let after = if opts.hard { None } else { Some(document::stamp_soft_deleted(current.clone(), &actor, Timestamp::now())) };
        let event = Event {
            id: EventId::from_seq(0),
            ts: Timestamp::now(),
            op: Op::Delete,
            target: EventTarget::format_entity(id),
            before: Some(current),
            after: after.clone(),
            entity_ids: None,
            actor,
            compressed: false,
        };
        self.cache.invalidate(id);
        self.append(ns, event).await?;
        self.cache.put(id.clone(), after);
        if opts.hard {
            self.relationships.remove_source(id);
        }
        Ok(())
    }

    /// Record every entity id `event` addresses into `ids`: its own target
    /// for a plain op, or the whole `entityIds` batch for a `BULK_*` op.
    fn collect_event_ids(event: &Event, ids: &mut BTreeSet<EntityId>) {
        if let Some(entity_ids) = &event.entity_ids {
            ids.extend(entity_ids.iter().cloned());
        } else if let Ok(EventTarget::Entity(id)) = event.parsed_target() {
            ids.insert(id);
        }
    }

    /// Every entity id this namespace has ever recorded: union of the
    /// canonical file, pending row-groups, flushed WAL batches, and the
    /// live event-log buffer. A missing canonical file means nothing has
    /// compacted yet, not a read failure (mirrors the compactor's own
    /// `BackendError` == not-found-yet handling).
    async fn ids_in_namespace(&self, ns: &Namespace) -> Result<Vec<EntityId>> {
        let mut ids = BTreeSet::new();

        match self.store.read(&Self::canonical_path(ns)).await {
            Ok(bytes) => ids.extend(entity_batch::decode(&bytes)?.into_iter().map(|r| r.id)),
            Err(Error::BackendError { .. }) => {}
            Err(e) => return Err(e),
        }

        for group in self.pending.groups_for(ns) {
            let bytes = self.store.read(&group.path).await?;
            ids.extend(entity_batch::decode(&bytes)?.into_iter().map(|r| r.id));
        }

        for row in self.wal.rows_for(ns) {
            let bytes = self.store.read(&row.path).await?;
            for event in event_batch::decode(&bytes)? {
                Self::collect_event_ids(&event, &mut ids);
            }
        }

        for event in self.wal.buffered_events(ns) {
            Self::collect_event_ids(&event, &mut ids);
        }

        let log = self.log_for(ns);
        for event in log.get_events_by_namespace(ns) {
            Self::collect_event_ids(&event, &mut ids);
        }

        Ok(ids.into_iter().collect())
    }

    /// Full scan (no secondary indexes are mounted by this engine) filtered
    /// by `opts.filter`, then sorted/paginated by reusing the aggregation
    /// pipeline's `$sort`/`$skip`/`$limit` stages (§4.8, §4.10).
    pub async fn find(&self, ns: &Namespace, opts: &FindOptions) -> Result<Vec<Document>> {
        let ids = self.ids_in_namespace(ns).await?;
        let plan = planner::plan(&opts.filter, None, None)?;
        let candidates = planner::candidates(&plan, None, None);
        let scan: Vec<EntityId> = match candidates {
            Some(c) => c.into_iter().filter(|id| ids.contains(id)).collect(),
            None => ids,
        };

        let get_opts = GetOptions { as_of: opts.as_of, include_deleted: opts.include_deleted };
        let mut matched = Vec::new();
        for id in scan {
            if let Some(doc) = self.get(ns, &id, &get_opts).await? {
                if filter::matches(&doc, &opts.filter)? {
                    matched.push(doc);
                }
            }
        }

        let mut pipeline = Vec::new();
        if let Some(sort) = &opts.sort {
            let mut stage = Document::new();
            stage.insert("$sort".to_string(), Value::Map(sort.clone()));
            pipeline.push(stage);
        }
        if let Some(skip) = opts.skip {
            let mut stage = Document::new();
            stage.insert("$skip".to_string(), Value::Int(skip as i64));
            pipeline.push(stage);
        }
        if let Some(limit) = opts.limit {
            let mut stage = Document::new();
            stage.insert("$limit".to_string(), Value::Int(limit as i64));
            pipeline.push(stage);
        }
        if pipeline.is_empty() {
            Ok(matched)
        } else {
            aggregate::run(&pipeline, matched, &no_lookups)
        }
    }

    /// `findOne` is `find` truncated to its first result.
    pub async fn find_one(&self, ns: &Namespace, opts: &FindOptions) -> Result<Option<Document>> {
        let mut capped = opts.clone();
        capped.limit = Some(1);
        Ok(self.find(ns, &capped).await?.into_iter().next())
    }

    /// Count of entities matching `filter`.
    pub async fn count(&self, ns: &Namespace, opts: &FindOptions) -> Result<usize> {
        Ok(self.find(ns, opts).await?.len())
    }

    /// `true` if any entity matches `filter`.
    pub async fn exists(&self, ns: &Namespace, opts: &FindOptions) -> Result<bool> {
        Ok(self.find_one(ns, opts).await?.is_some())
    }

    /// Run an aggregation pipeline over `ns`'s live entities, pre-fetching
    /// every `$lookup` stage's `from` collection since the evaluator itself
    /// has no storage access (§4.8).
    pub async fn aggregate(&self, ns: &Namespace, pipeline: &[Document]) -> Result<Vec<Document>> {
        let base = self.find(ns, &FindOptions::default()).await?;

        let mut froms = BTreeSet::new();
        for stage in pipeline {
            if let Some(spec) = stage.get("$lookup").and_then(Value::as_map) {
                if let Some(from) = spec.get("from").and_then(Value::as_str) {
                    froms.insert(from.to_string());
                }
            }
        }

        let mut lookup_docs = std::collections::HashMap::new();
        for from in froms {
            let from_ns = Namespace::new(&from).map_err(|e| Error::validation(e.to_string()))?;
            lookup_docs.insert(from, self.find(&from_ns, &FindOptions::default()).await?);
        }
        let lookups = move |c: &str| lookup_docs.get(c).cloned().unwrap_or_default();

        aggregate::run(pipeline, base, &lookups)
    }

    /// Create every item in `items` as one logical operation: exactly one
    /// `BULK_CREATE` event and one coalesced pending row-group carry all
    /// `N` post-images, so WAL growth is O(1) in the batch size rather than
    /// O(N) (§4.4). `getEntityFromEvents` resolves each created entity's
    /// state back out of that row-group by id.
    pub async fn bulk_create(&self, ns: &Namespace, items: Vec<Document>, opts: &CreateOptions) -> Result<Vec<Document>> {
        let actor = opts.actor.clone().unwrap_or_else(EntityId::system_actor);
        let now = Timestamp::now();

        let mut ids = Vec::with_capacity(items.len());
        let mut docs = Vec::with_capacity(items.len());
        for item in items {
            let id = EntityId::new(ns.clone(), uuid::Uuid::new_v4().to_string())
                .map_err(|e| Error::validation(e.to_string()))?;
            let doc = document::stamp_created(item, &id, &actor, now);
            let refs = Self::collect_references(&doc);
            self.ensure_references_exist(&refs, opts.auto_create_refs, &actor).await?;
            ids.push(id);
            docs.push(doc);
        }

        let event = Event {
            id: EventId::from_seq(0),
            ts: now,
            op: Op::BulkCreate,
            target: ids.first().map(EventTarget::format_entity).unwrap_or_else(|| format!("{ns}:bulk")),
            before: None,
            after: None,
            entity_ids: Some(ids.clone()),
            actor,
            compressed: false,
        };
        let appended = self.append(ns, event).await?;
        let seq = appended.id.sequence();
        let rows: Vec<BulkRow> =
            ids.iter().zip(docs.iter()).map(|(id, doc)| BulkRow { id: id.clone(), state: Some(doc.clone()) }).collect();
        self.pending.write_row_group(ns, seq, seq, &rows).await?;

        for (id, doc) in ids.iter().zip(docs.iter()) {
            self.cache.invalidate(id);
            self.cache.put(id.clone(), Some(doc.clone()));
            self.index_references(id, doc);
        }
        Ok(docs)
    }

    /// Update every entity in `ids` with the same `patch`, as one logical
    /// operation. See [`EntityEngine::bulk_create`] for the single-event,
    /// single-row-group shape.
    pub async fn bulk_update(
        &self,
        ns: &Namespace,
        ids: &[EntityId],
        patch: &Document,
        opts: &UpdateOptions,
    ) -> Result<Vec<Document>> {
        let actor = opts.actor.clone().unwrap_or_else(EntityId::system_actor);
        let now = Timestamp::now();

        let mut docs = Vec::with_capacity(ids.len());
        let mut all_links = Vec::new();
        for id in ids {
            let current = self.get(ns, id, &GetOptions::default()).await?.ok_or_else(|| Error::not_found(id.clone()))?;
            let actual_version = current_version(&current).unwrap_or(Version::INITIAL);
            occ::check_version(id, opts.expected_version, actual_version)?;

            let (patched, links) = update_ops::apply(current, patch)?;
            let new_refs: Vec<(String, EntityId)> =
                links.iter().filter(|l| l.linked).map(|l| (l.predicate.clone(), l.target.clone())).collect();
            self.ensure_references_exist(&new_refs, opts.auto_create_refs, &actor).await?;
            let stamped = document::stamp_updated(patched, &actor, now);

            docs.push(stamped);
            all_links.push((id.clone(), links));
        }

        let event = Event {
            id: EventId::from_seq(0),
            ts: now,
            op: Op::BulkUpdate,
            target: ids.first().map(EventTarget::format_entity).unwrap_or_else(|| format!("{ns}:bulk")),
            before: None,
            after: None,
            entity_ids: Some(ids.to_vec()),
            actor,
            compressed: false,
        };
        let appended = self.append(ns, event).await?;
        let seq = appended.id.sequence();
        let rows: Vec<BulkRow> =
            ids.iter().zip(docs.iter()).map(|(id, doc)| BulkRow { id: id.clone(), state: Some(doc.clone()) }).collect();
        self.pending.write_row_group(ns, seq, seq, &rows).await?;

        for (id, doc) in ids.iter().zip(docs.iter()) {
            self.cache.invalidate(id);
            self.cache.put(id.clone(), Some(doc.clone()));
        }
        for (id, links) in &all_links {
            for link in links {
                self.relationships.apply_forward_change(id, &link.predicate, &link.target, link.linked);
            }
        }
        Ok(docs)
    }

    /// Delete every entity in `ids` as one logical operation. See
    /// [`EntityEngine::bulk_create`] for the single-event, single-row-group
    /// shape.
    pub async fn bulk_delete(&self, ns: &Namespace, ids: &[EntityId], opts: &DeleteOptions) -> Result<()> {
        let actor = opts.actor.clone().unwrap_or_else(EntityId::system_actor);
        let now = Timestamp::now();

        let mut after_states = Vec::with_capacity(ids.len());
        for id in ids {
            let current = self
                .get(ns, id, &GetOptions { include_deleted: true, ..GetOptions::default() })
                .await?
                .ok_or_else(|| Error::not_found(id.clone()))?;
            let actual_version = current_version(&current).unwrap_or(Version::INITIAL);
            occ::check_version(id, opts.expected_version, actual_version)?;
            let after =
                if opts.hard { None } else { Some(document::stamp_soft_deleted(current, &actor, now)) };
            after_states.push(after);
        }

        let event = Event {
            id: EventId::from_seq(0),
            ts: now,
            op: Op::BulkDelete,
            target: ids.first().map(EventTarget::format_entity).unwrap_or_else(|| format!("{ns}:bulk")),
            before: None,
            after: None,
            entity_ids: Some(ids.to_vec()),
            actor,
            compressed: false,
        };
        let appended = self.append(ns, event).await?;
        let seq = appended.id.sequence();
        let rows: Vec<BulkRow> = ids
            .iter()
            .zip(after_states.iter())
            .map(|(id, after)| BulkRow { id: id.clone(), state: after.clone() })
            .collect();
        self.pending.write_row_group(ns, seq, seq, &rows).await?;

        for (id, after) in ids.iter().zip(after_states.into_iter()) {
            self.cache.invalidate(id);
            self.cache.put(id.clone(), after);
            if opts.hard {
                self.relationships.remove_source(id);
            }
        }
        Ok(())
    }
}

/// Lets [`parquedb_concurrency::Transaction`] buffer commands against this
/// engine: optimistic apply goes straight to the cache, commit durably
/// appends the buffered events in order, rollback restores the pre-image
/// (§4.9).
#[async_trait]
impl TransactionHost for EntityEngine {
    async fn apply_staged(&self, ns: &Namespace, event: &Event) -> Result<Option<Document>> {
        let EventTarget::Entity(id) = event.parsed_target().map_err(|e| Error::validation(e.to_string()))? else {
            return Err(Error::validation("transactions only stage entity-targeted events"));
        };
        let pre_image = self.get(ns, &id, &GetOptions { include_deleted: true, ..GetOptions::default() }).await?;
        self.cache.invalidate(&id);
        self.cache.put(id.clone(), event.after.clone());
        if let Some(after) = &event.after {
            self.index_references(&id, after);
        }
        Ok(pre_image)
    }

    async fn commit_events(&self, ns: &Namespace, events: Vec<Event>) -> Result<()> {
        for event in events {
            self.append(ns, event).await?;
        }
        Ok(())
    }

    async fn restore(&self, id: &EntityId, pre_image: Option<Document>) -> Result<()> {
        self.cache.put(id.clone(), pre_image);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_blobstore::MemoryStore;
    use std::collections::BTreeMap;

    fn ns() -> Namespace {
        Namespace::new("posts").unwrap()
    }

    fn engine() -> EntityEngine {
        EntityEngine::new(Arc::new(MemoryStore::new()))
    }

    fn doc(title: &str) -> Document {
        let mut d = BTreeMap::new();
        d.insert("title".to_string(), Value::String(title.into()));
        d
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let engine = engine();
        let created = engine.create(&ns(), doc("hello"), &CreateOptions::default()).await.unwrap();
        let id = EntityId::parse(created.get("$id").unwrap().as_str().unwrap()).unwrap();
        assert_eq!(current_version(&created).unwrap().get(), 1);

        let fetched = engine.get(&ns(), &id, &GetOptions::default()).await.unwrap().unwrap();
        assert_eq!(fetched.get("title"), Some(&Value::String("hello".into())));
    }

    #[tokio::test]
    async fn update_bumps_version_and_applies_set() {
        let engine = engine();
        let created = engine.create(&ns(), doc("hello"), &CreateOptions::default()).await.unwrap();
        let id = EntityId::parse(created.get("$id").unwrap().as_str().unwrap()).unwrap();

        let mut set = BTreeMap::new();
        set.insert("title".to_string(), Value::String("updated".into()));
        let mut patch = Document::new();
        patch.insert("$set".to_string(), Value::Map(set));

        let updated = engine.update(&ns(), &id, &patch, &UpdateOptions::default()).await.unwrap();
        assert_eq!(updated.get("title"), Some(&Value::String("updated".into())));
        assert_eq!(current_version(&updated).unwrap().get(), 2);
    }

    #[tokio::test]
    async fn update_with_stale_expected_version_conflicts() {
        let engine = engine();
        let created = engine.create(&ns(), doc("hello"), &CreateOptions::default()).await.unwrap();
        let id = EntityId::parse(created.get("$id").unwrap().as_str().unwrap()).unwrap();

        let opts = UpdateOptions { expected_version: Some(Version::new(99)), ..Default::default() };
        let err = engine.update(&ns(), &id, &Document::new(), &opts).await.unwrap_err();
        assert_eq!(err.kind(), parquedb_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn soft_delete_hides_entity_by_default() {
        let engine = engine();
        let created = engine.create(&ns(), doc("hello"), &CreateOptions::default()).await.unwrap();
        let id = EntityId::parse(created.get("$id").unwrap().as_str().unwrap()).unwrap();

        engine.delete(&ns(), &id, &DeleteOptions::default()).await.unwrap();
        assert!(engine.get(&ns(), &id, &GetOptions::default()).await.unwrap().is_none());
        assert!(engine
            .get(&ns(), &id, &GetOptions { include_deleted: true, ..Default::default() })
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn hard_delete_removes_state_and_cascades_relationships() {
        let engine = engine();
        let post = engine.create(&ns(), doc("hello"), &CreateOptions::default()).await.unwrap();
        let post_id = EntityId::parse(post.get("$id").unwrap().as_str().unwrap()).unwrap();
        let user = engine.create(&Namespace::new("users").unwrap(), doc("ada"), &CreateOptions::default()).await.unwrap();
        let user_id = EntityId::parse(user.get("$id").unwrap().as_str().unwrap()).unwrap();

        let mut link = BTreeMap::new();
        link.insert("author".to_string(), Value::Reference(user_id.clone()));
        let mut patch = Document::new();
        patch.insert("$link".to_string(), Value::Map(link));
        engine.update(&ns(), &post_id, &patch, &UpdateOptions::default()).await.unwrap();
        assert_eq!(
            engine.relationships().related(&user_id, crate::relationships::Direction::Backward, "author"),
            vec![post_id.clone()]
        );

        engine.delete(&ns(), &post_id, &DeleteOptions { hard: true, ..Default::default() }).await.unwrap();
        assert!(engine
            .get(&ns(), &post_id, &GetOptions { include_deleted: true, ..Default::default() })
            .await
            .unwrap()
            .is_none());
        assert!(engine.relationships().related(&user_id, crate::relationships::Direction::Backward, "author").is_empty());
    }

    #[tokio::test]
    async fn find_filters_and_sorts_matching_entities() {
        let engine = engine();
        engine.create(&ns(), doc("b"), &CreateOptions::default()).await.unwrap();
        engine.create(&ns(), doc("a"), &CreateOptions::default()).await.unwrap();
        engine.create(&ns(), doc("c"), &CreateOptions::default()).await.unwrap();

        let mut sort = Document::new();
        sort.insert("title".to_string(), Value::Int(1));
        let opts = FindOptions { sort: Some(sort), ..Default::default() };
        let found = engine.find(&ns(), &opts).await.unwrap();
        let titles: Vec<&str> = found.iter().map(|d| d.get("title").unwrap().as_str().unwrap()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn bulk_create_creates_every_item_and_reports_count() {
        let engine = engine();
        let items = vec![doc("1"), doc("2"), doc("3")];
        let created = engine.bulk_create(&ns(), items, &CreateOptions::default()).await.unwrap();
        assert_eq!(created.len(), 3);
        assert_eq!(engine.count(&ns(), &FindOptions::default()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn bulk_create_writes_exactly_one_event_and_one_row_group() {
        let engine = engine();
        let items = vec![doc("1"), doc("2"), doc("3")];
        engine.bulk_create(&ns(), items, &CreateOptions::default()).await.unwrap();

        let log = engine.log_for(&ns());
        let bulk_events: Vec<_> = log.get_events_by_namespace(&ns()).into_iter().filter(|e| e.op.is_bulk()).collect();
        assert_eq!(bulk_events.len(), 1);
        assert_eq!(bulk_events[0].entity_ids.as_ref().unwrap().len(), 3);
        assert_eq!(engine.pending.groups_for(&ns()).len(), 1);
    }

    #[tokio::test]
    async fn bulk_update_applies_patch_to_every_entity_via_one_event() {
        let engine = engine();
        let items = vec![doc("1"), doc("2")];
        let created = engine.bulk_create(&ns(), items, &CreateOptions::default()).await.unwrap();
        let ids: Vec<EntityId> = created
            .iter()
            .map(|d| EntityId::parse(d.get("$id").unwrap().as_str().unwrap()).unwrap())
            .collect();

        let mut set = BTreeMap::new();
        set.insert("title".to_string(), Value::String("bulk-updated".into()));
        let mut patch = Document::new();
        patch.insert("$set".to_string(), Value::Map(set));
        let updated = engine.bulk_update(&ns(), &ids, &patch, &UpdateOptions::default()).await.unwrap();
        assert_eq!(updated.len(), 2);
        for doc in &updated {
            assert_eq!(doc.get("title"), Some(&Value::String("bulk-updated".into())));
        }

        for id in &ids {
            let fetched = engine.get(&ns(), id, &GetOptions::default()).await.unwrap().unwrap();
            assert_eq!(fetched.get("title"), Some(&Value::String("bulk-updated".into())));
        }
    }

    #[tokio::test]
    async fn bulk_delete_soft_deletes_every_entity_via_one_event() {
        let engine = engine();
        let items = vec![doc("1"), doc("2")];
        let created = engine.bulk_create(&ns(), items, &CreateOptions::default()).await.unwrap();
        let ids: Vec<EntityId> = created
            .iter()
            .map(|d| EntityId::parse(d.get("$id").unwrap().as_str().unwrap()).unwrap())
            .collect();

        engine.bulk_delete(&ns(), &ids, &DeleteOptions::default()).await.unwrap();
        for id in &ids {
            assert!(engine.get(&ns(), id, &GetOptions::default()).await.unwrap().is_none());
            let tombstone =
                engine.get(&ns(), id, &GetOptions { include_deleted: true, ..Default::default() }).await.unwrap();
            assert!(tombstone.is_some());
        }
    }

    #[tokio::test]
    async fn create_with_missing_reference_fails_without_auto_create() {
        let engine = engine();
        let missing = EntityId::parse("users/ghost").unwrap();
        let mut doc = doc("hello");
        doc.insert("author".to_string(), Value::Reference(missing));
        let err = engine.create(&ns(), doc, &CreateOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), parquedb_core::ErrorKind::ReferenceNotFound);
    }

    #[tokio::test]
    async fn create_with_missing_reference_auto_creates_stub() {
        let engine = engine();
        let missing = EntityId::parse("users/ghost").unwrap();
        let mut post = doc("hello");
        post.insert("author".to_string(), Value::Reference(missing.clone()));
        let opts = CreateOptions { auto_create_refs: true, ..Default::default() };
        engine.create(&ns(), post, &opts).await.unwrap();

        let stub = engine.get(missing.namespace(), &missing, &GetOptions::default()).await.unwrap();
        assert!(stub.is_some());
    }

    #[tokio::test]
    async fn aggregate_runs_lookup_against_another_namespace() {
        let engine = engine();
        let user = engine.create(&Namespace::new("users").unwrap(), doc("ada"), &CreateOptions::default()).await.unwrap();
        let user_id = user.get("$id").cloned().unwrap();
        let mut post = doc("hello");
        post.insert("authorId".to_string(), user_id);
        engine.create(&ns(), post, &CreateOptions::default()).await.unwrap();

        let mut lookup_spec = BTreeMap::new();
        lookup_spec.insert("from".to_string(), Value::String("users".into()));
        lookup_spec.insert("localField".to_string(), Value::String("authorId".into()));
        lookup_spec.insert("foreignField".to_string(), Value::String("$id".into()));
        lookup_spec.insert("as".to_string(), Value::String("author".into()));
        let mut stage = Document::new();
        stage.insert("$lookup".to_string(), Value::Map(lookup_spec));

        let result = engine.aggregate(&ns(), &[stage]).await.unwrap();
        assert_eq!(result.len(), 1);
        assert!(matches!(result[0].get("author"), Some(Value::Array(a)) if a.len() == 1));
    }
}
