//! The reconstructed-entity LRU used by [`crate::entity_engine::EntityEngine`]
//! (§4.6: "An LRU of reconstructed entities sized ≈ 1 000 entries").

use parking_lot::Mutex;
use parquedb_core::{limits, EntityId, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};

type Document = BTreeMap<String, Value>;

struct Inner {
    capacity: usize,
    entries: HashMap<EntityId, Option<Document>>,
    order: VecDeque<EntityId>,
}

impl Inner {
    fn touch(&mut self, id: &EntityId) {
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }

    fn evict_if_needed(&mut self) {
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

/// Caches reconstructed entity state (`Some(doc)`) or a confirmed absence
/// (`None`) by id. Cache hits must never mask a write by the same
/// instance: callers invalidate before appending, then let the next read
/// repopulate (§4.6 "invalidate first, then append").
pub struct EntityCache {
    inner: Mutex<Inner>,
}

impl EntityCache {
    /// Build a cache with the default ~1 000 entry capacity.
    pub fn new() -> Self {
        Self::with_capacity(limits::DEFAULT_ENTITY_CACHE_CAPACITY)
    }

    /// Build a cache with an explicit capacity, mainly for tests.
    pub fn with_capacity(capacity: usize) -> Self {
        EntityCache {
            inner: Mutex::new(Inner { capacity, entries: HashMap::new(), order: VecDeque::new() }),
        }
    }

    /// Look up a cached reconstruction, promoting it to most-recently-used.
    pub fn get(&self, id: &EntityId) -> Option<Option<Document>> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(id) {
            inner.touch(id);
            inner.entries.get(id).cloned()
        } else {
            None
        }
    }

    /// Populate or refresh a cache entry.
    pub fn put(&self, id: EntityId, state: Option<Document>) {
        let mut inner = self.inner.lock();
        if inner.entries.insert(id.clone(), state).is_none() {
            inner.order.push_back(id);
        } else {
            inner.touch(&id);
        }
        inner.evict_if_needed();
    }

    /// Drop a cache entry, e.g. immediately before appending a mutation.
    pub fn invalidate(&self, id: &EntityId) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(id).is_some() {
            if let Some(pos) = inner.order.iter().position(|k| k == id) {
                inner.order.remove(pos);
            }
        }
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_core::Namespace;

    fn id(local: &str) -> EntityId {
        EntityId::new(Namespace::new("posts").unwrap(), local).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = EntityCache::with_capacity(2);
        cache.put(id("1"), Some(Document::new()));
        assert!(cache.get(&id("1")).is_some());
    }

    #[test]
    fn evicts_least_recently_used_beyond_capacity() {
        let cache = EntityCache::with_capacity(2);
        cache.put(id("1"), None);
        cache.put(id("2"), None);
        cache.get(&id("1")); // promote 1, making 2 the LRU victim
        cache.put(id("3"), None);
        assert!(cache.get(&id("1")).is_some());
        assert!(cache.get(&id("2")).is_none());
        assert!(cache.get(&id("3")).is_some());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = EntityCache::with_capacity(4);
        cache.put(id("1"), Some(Document::new()));
        cache.invalidate(&id("1"));
        assert!(cache.get(&id("1")).is_none());
    }
}
