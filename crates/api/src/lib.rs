//! The thin per-namespace facade over the entity engine (§6). Deliberately
//! minimal: full command-surface schema parsing and a generic query string
//! language are out of scope, so this exposes typed methods matching the
//! engine's own operations rather than re-deriving a query DSL.

use parquedb_core::{Document, EntityId, Namespace, Result};
use parquedb_engine::entity_engine::{CreateOptions, DeleteOptions, EntityEngine, FindOptions, GetOptions, UpdateOptions};
use std::sync::Arc;

/// A handle scoped to one namespace, so callers don't pass `ns` on every
/// call (§6's per-collection `db.collection("posts")` ergonomic).
#[derive(Clone)]
pub struct Collection {
    ns: Namespace,
    engine: Arc<EntityEngine>,
}

impl Collection {
    /// Build a collection handle over `ns`, backed by `engine`.
    pub fn new(ns: Namespace, engine: Arc<EntityEngine>) -> Self {
        Collection { ns, engine }
    }

    /// The namespace this handle is scoped to.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    pub async fn get(&self, id: &EntityId, opts: &GetOptions) -> Result<Option<Document>> {
        self.engine.get(&self.ns, id, opts).await
    }

    pub async fn create(&self, data: Document, opts: &CreateOptions) -> Result<Document> {
        self.engine.create(&self.ns, data, opts).await
    }

    pub async fn update(&self, id: &EntityId, patch: &Document, opts: &UpdateOptions) -> Result<Document> {
        self.engine.update(&self.ns, id, patch, opts).await
    }

    pub async fn delete(&self, id: &EntityId, opts: &DeleteOptions) -> Result<()> {
        self.engine.delete(&self.ns, id, opts).await
    }

    pub async fn find(&self, opts: &FindOptions) -> Result<Vec<Document>> {
        self.engine.find(&self.ns, opts).await
    }

    pub async fn find_one(&self, opts: &FindOptions) -> Result<Option<Document>> {
        self.engine.find_one(&self.ns, opts).await
    }

    pub async fn count(&self, opts: &FindOptions) -> Result<usize> {
        self.engine.count(&self.ns, opts).await
    }

    pub async fn exists(&self, opts: &FindOptions) -> Result<bool> {
        self.engine.exists(&self.ns, opts).await
    }

    pub async fn aggregate(&self, pipeline: &[Document]) -> Result<Vec<Document>> {
        self.engine.aggregate(&self.ns, pipeline).await
    }

    pub async fn bulk_create(&self, items: Vec<Document>, opts: &CreateOptions) -> Result<Vec<Document>> {
        self.engine.bulk_create(&self.ns, items, opts).await
    }

    pub async fn bulk_update(&self, ids: &[EntityId], patch: &Document, opts: &UpdateOptions) -> Result<Vec<Document>> {
        self.engine.bulk_update(&self.ns, ids, patch, opts).await
    }

    pub async fn bulk_delete(&self, ids: &[EntityId], opts: &DeleteOptions) -> Result<()> {
        self.engine.bulk_delete(&self.ns, ids, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_blobstore::MemoryStore;

    fn collection(name: &str) -> Collection {
        let engine = Arc::new(EntityEngine::new(Arc::new(MemoryStore::new())));
        Collection::new(Namespace::new(name).unwrap(), engine)
    }

    #[tokio::test]
    async fn create_then_find_round_trips_through_the_facade() {
        let posts = collection("posts");
        let mut doc = Document::new();
        doc.insert("title".to_string(), parquedb_core::Value::String("hi".into()));
        posts.create(doc, &CreateOptions::default()).await.unwrap();

        let found = posts.find(&FindOptions::default()).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
