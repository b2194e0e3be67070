//! ParqueDB: an embedded, event-sourced document database backed by
//! pluggable blob storage (§1). This crate wires the blob store, durability
//! layers, concurrency protocol, and entity engine into a single handle.

use parquedb_blobstore::{BlobStore, LocalFsStore, MemoryStore};
use parquedb_core::{Namespace, Result};
use parquedb_durability::{CompactionConfig, EventLogConfig, SnapshotConfig, WalConfig};
use parquedb_engine::entity_engine::EngineConfig;
use parquedb_engine::EntityEngine;
use std::path::Path;
use std::sync::Arc;

pub use parquedb_api::Collection;
pub use parquedb_core::{Document, EntityId, Error, ErrorKind, Value, Version};
pub use parquedb_engine::entity_engine::{CreateOptions, DeleteOptions, FindOptions, GetOptions, UpdateOptions};

/// Aggregates every sub-layer's tunables behind one config struct, each
/// defaulted per the component it configures (§4.3/§4.4/§4.6/§9c).
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseConfig {
    pub event_log: EventLogConfig,
    pub wal: WalConfig,
    pub snapshot: SnapshotConfig,
    pub compaction: CompactionConfig,
    /// `0` selects the engine's default LRU capacity.
    pub cache_capacity: usize,
}

/// The top-level handle: one blob store, one entity engine multiplexing
/// every namespace's event log, and a `collection` accessor mirroring the
/// teacher's per-keyspace handle pattern.
pub struct Database {
    engine: Arc<EntityEngine>,
}

impl Database {
    /// Open a database over an arbitrary [`BlobStore`] with default config.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_config(store, DatabaseConfig::default())
    }

    /// Open a database over an arbitrary [`BlobStore`] with explicit config.
    pub fn with_config(store: Arc<dyn BlobStore>, config: DatabaseConfig) -> Self {
        let engine_config = EngineConfig {
            event_log: config.event_log,
            wal: config.wal,
            snapshot: config.snapshot,
            cache_capacity: config.cache_capacity,
        };
        Database { engine: Arc::new(EntityEngine::with_config(store, engine_config)) }
    }

    /// Open a database rooted at a directory on the local filesystem.
    pub fn open_local(root: impl AsRef<Path>) -> Result<Self> {
        let store: Arc<dyn BlobStore> = Arc::new(LocalFsStore::open(root)?);
        Ok(Self::new(store))
    }

    /// Open an in-memory database, mainly for tests and embedding scenarios
    /// that don't need persistence across process restarts.
    pub fn open_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// A handle scoped to one namespace.
    pub fn collection(&self, ns: &str) -> Result<Collection> {
        let namespace = Namespace::new(ns).map_err(|e| Error::validation(e.to_string()))?;
        Ok(Collection::new(namespace, self.engine.clone()))
    }

    /// The underlying engine, for callers that need the full C6 surface
    /// (e.g. cross-namespace transactions via `parquedb_concurrency`).
    pub fn engine(&self) -> &Arc<EntityEngine> {
        &self.engine
    }
}
