//! C7: the relationship index.
//!
//! Forward relations live on the source entity's own document field
//! (maintained by [`crate::update_ops::apply`]'s `$link`/`$unlink`
//! handling) — this module only materializes what forward storage can't
//! answer in O(1): backward scans (`<-predicate`) and the explicit fuzzy
//! relation (`~>`/`<~`) that has no canonical source side (§4.7, §9's
//! arena-keyed-by-endpoints design note).

use dashmap::DashMap;
use parquedb_core::EntityId;

/// The direction a `getRelated` query is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read the source entity's own forward field.
    Forward,
    /// Reverse-scan: who points at this entity via `predicate`.
    Backward,
    /// Fuzzy, source-agnostic edge in the "from points at to" direction.
    FuzzyOut,
    /// Fuzzy, source-agnostic edge in the "to points at from" direction.
    FuzzyIn,
}

/// Parse a raw predicate into its direction and base name: `"author"` is
/// forward, `"<-author"` backward, `"~>author"` fuzzy-out, `"<~author"`
/// fuzzy-in.
pub fn parse_predicate(raw: &str) -> (Direction, &str) {
    if let Some(rest) = raw.strip_prefix("<-") {
        (Direction::Backward, rest)
    } else if let Some(rest) = raw.strip_prefix("~>") {
        (Direction::FuzzyOut, rest)
    } else if let Some(rest) = raw.strip_prefix("<~") {
        (Direction::FuzzyIn, rest)
    } else {
        (Direction::Forward, raw)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct EdgeKey {
    anchor: EntityId,
    predicate: String,
}

/// A materialized, arena-style edge index: no owning pointers across
/// entities (§9), just id pairs keyed by endpoint.
#[derive(Default)]
pub struct RelationshipIndex {
    /// `(to, predicate) -> [from, ...]`, keeping insertion order for
    /// array-relation stability.
    backward: DashMap<EdgeKey, Vec<EntityId>>,
    /// `(from, predicate) -> [to, ...]` for fuzzy edges, which have no
    /// forward-document backing of their own.
    fuzzy_forward: DashMap<EdgeKey, Vec<EntityId>>,
    /// `(to, predicate) -> [from, ...]` for the same fuzzy edges, reversed.
    fuzzy_backward: DashMap<EdgeKey, Vec<EntityId>>,
}

impl RelationshipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or retract) the backward edge implied by a forward
    /// `$link`/`$unlink` on `from` (§4.7: "a link update emits an event...
    /// classification ensures these events never collide with entity
    /// events").
    pub fn apply_forward_change(&self, from: &EntityId, predicate: &str, to: &EntityId, linked: bool) {
        let key = EdgeKey { anchor: to.clone(), predicate: predicate.to_string() };
        let mut entry = self.backward.entry(key).or_default();
        let already = entry.iter().any(|e| e == from);
        if linked && !already {
            entry.push(from.clone());
        } else if !linked {
            entry.retain(|e| e != from);
        }
    }

    /// Link (or unlink) a fuzzy edge explicitly, idempotently, in both
    /// directions (§4.7 "Link and unlink are idempotent").
    pub fn apply_fuzzy_change(&self, from: &EntityId, predicate: &str, to: &EntityId, linked: bool) {
        upsert_edge(&self.fuzzy_forward, from, predicate, to, linked);
        upsert_edge(&self.fuzzy_backward, to, predicate, from, linked);
    }

    /// Edges recorded for `(anchor, direction, predicate)`.
    pub fn related(&self, anchor: &EntityId, direction: Direction, predicate: &str) -> Vec<EntityId> {
        let key = EdgeKey { anchor: anchor.clone(), predicate: predicate.to_string() };
        match direction {
            Direction::Forward => Vec::new(), // the engine reads the document field directly
            Direction::Backward => self.backward.get(&key).map(|v| v.clone()).unwrap_or_default(),
            Direction::FuzzyOut => self.fuzzy_forward.get(&key).map(|v| v.clone()).unwrap_or_default(),
            Direction::FuzzyIn => self.fuzzy_backward.get(&key).map(|v| v.clone()).unwrap_or_default(),
        }
    }

    /// Hard-delete cascade: drop every edge sourced from `id`, in any
    /// direction it originates. Edges where `id` is only the target are
    /// left dangling (§4.7 "the engine does not cascade" on target
    /// deletion) — callers must tolerate a `null` hydration there.
    pub fn remove_source(&self, id: &EntityId) {
        self.backward.retain(|_, froms| {
            froms.retain(|f| f != id);
            true
        });
        self.fuzzy_forward.retain(|key, _| key.anchor != *id);
        self.fuzzy_backward.retain(|_, froms| {
            froms.retain(|f| f != id);
            true
        });
    }
}

fn upsert_edge(map: &DashMap<EdgeKey, Vec<EntityId>>, anchor: &EntityId, predicate: &str, other: &EntityId, linked: bool) {
    let key = EdgeKey { anchor: anchor.clone(), predicate: predicate.to_string() };
    let mut entry = map.entry(key).or_default();
    let already = entry.iter().any(|e| e == other);
    if linked && !already {
        entry.push(other.clone());
    } else if !linked {
        entry.retain(|e| e != other);
    }
}
