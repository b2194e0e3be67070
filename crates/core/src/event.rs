//! The immutable event record (§3) and its target classification (§4.3's
//! "direct or relationship" addressing).

use crate::contract::entity_id::{EntityId, EntityIdError};
use crate::contract::timestamp::Timestamp;
use crate::value::Document;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monotonically increasing, namespace-scoped event sequence number.
///
/// Rendered as a zero-padded decimal string so lexicographic and numeric
/// ordering agree — the "ULID-like ordering preserved" requirement of §3
/// without pulling in wall-clock randomness that would make ordering
/// non-deterministic in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw sequence number.
    pub fn from_seq(seq: u64) -> Self {
        EventId(seq)
    }

    /// The underlying sequence number.
    pub fn sequence(self) -> u64 {
        self.0
    }

    /// The next id in sequence.
    pub fn next(self) -> Self {
        EventId(self.0 + 1)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}", self.0)
    }
}

/// The kind of mutation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Op {
    /// A single entity was created.
    Create,
    /// A single entity was updated.
    Update,
    /// A single entity was deleted (soft or hard).
    Delete,
    /// Many entities were created in one logical operation.
    BulkCreate,
    /// Many entities were updated in one logical operation.
    BulkUpdate,
    /// Many entities were deleted in one logical operation.
    BulkDelete,
}

impl Op {
    /// `true` for the `BULK_*` variants.
    pub fn is_bulk(self) -> bool {
        matches!(self, Op::BulkCreate | Op::BulkUpdate | Op::BulkDelete)
    }
}

/// What an event mutated: a single entity, or a relationship edge between
/// two entities (§3, §4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTarget {
    /// A mutation on the entity itself.
    Entity(EntityId),
    /// A mutation on a relationship edge owned by `from`.
    Relationship {
        /// The source entity.
        from: EntityId,
        /// The relation name on the source side.
        predicate: String,
        /// The destination entity.
        to: EntityId,
    },
}

/// Why a raw target string failed to classify.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventTargetError {
    /// Fewer than two `:`-separated segments.
    #[error("event target {0:?} has no recognizable ns:local or from:predicate:to shape")]
    Malformed(String),
    /// The entity-id portion failed to parse.
    #[error("event target entity id invalid: {0}")]
    EntityId(#[from] EntityIdError),
}

impl EventTarget {
    /// Render the `ns:local` wire form for an entity target.
    pub fn format_entity(id: &EntityId) -> String {
        format!("{}:{}", id.namespace(), id.local_id())
    }

    /// Render the `from:predicate:to` wire form for a relationship target.
    pub fn format_relationship(from: &EntityId, predicate: &str, to: &EntityId) -> String {
        format!("{from}:{predicate}:{to}")
    }

    /// Classify a raw target string. Exactly two `:`-segments is an entity
    /// target; three or more is a relationship target (§3: "classification
    /// is unambiguous").
    pub fn parse(target: &str) -> Result<Self, EventTargetError> {
        let parts: Vec<&str> = target.split(':').collect();
        match parts.len() {
            2 => {
                let id = EntityId::parse(&format!("{}/{}", parts[0], parts[1]))?;
                Ok(EventTarget::Entity(id))
            }
            n if n >= 3 => {
                let from = EntityId::parse(parts[0])?;
                let predicate = parts[1].to_string();
                let to = EntityId::parse(&parts[2..].join(":"))?;
                Ok(EventTarget::Relationship { from, predicate, to })
            }
            _ => Err(EventTargetError::Malformed(target.to_string())),
        }
    }

    /// The raw wire-form string for this target.
    pub fn to_wire(&self) -> String {
        match self {
            EventTarget::Entity(id) => Self::format_entity(id),
            EventTarget::Relationship { from, predicate, to } => {
                Self::format_relationship(from, predicate, to)
            }
        }
    }

    /// The namespace this target is primarily filed under: the entity's own
    /// namespace, or the source entity's namespace for a relationship.
    pub fn namespace(&self) -> &crate::contract::namespace::Namespace {
        match self {
            EventTarget::Entity(id) => id.namespace(),
            EventTarget::Relationship { from, .. } => from.namespace(),
        }
    }

    /// The entities this target touches: one for an entity target, two for
    /// a relationship target. Used by `getEvents(entityId)` to decide
    /// whether an event addresses a given entity, directly or via a
    /// relationship it participates in.
    pub fn touches(&self, id: &EntityId) -> bool {
        match self {
            EventTarget::Entity(e) => e == id,
            EventTarget::Relationship { from, to, .. } => from == id || to == id,
        }
    }
}

/// An immutable record of a single mutation (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic, namespace-scoped id.
    pub id: EventId,
    /// Milliseconds since epoch.
    pub ts: Timestamp,
    /// The kind of mutation.
    pub op: Op,
    /// Raw `ns:local` or `from:predicate:to` wire-form target.
    pub target: String,
    /// Pre-image; absent on `CREATE`.
    pub before: Option<Document>,
    /// Post-image; `None` on a hard delete.
    pub after: Option<Document>,
    /// Present only for `BULK_*` ops.
    pub entity_ids: Option<Vec<EntityId>>,
    /// Who performed the mutation.
    pub actor: EntityId,
    /// Whether `before`/`after` are stored compressed (§4.3 audit flag).
    pub compressed: bool,
}

impl Event {
    /// Parse [`Event::target`] into its classified form.
    pub fn parsed_target(&self) -> Result<EventTarget, EventTargetError> {
        EventTarget::parse(&self.target)
    }

    /// `true` if this event's target addresses `id`, directly, as a
    /// relationship endpoint, or (for `BULK_*` ops) as one of `entity_ids`.
    pub fn touches(&self, id: &EntityId) -> bool {
        if let Some(ids) = &self.entity_ids {
            return ids.contains(id);
        }
        self.parsed_target().map(|t| t.touches(id)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::namespace::Namespace;

    fn eid(ns: &str, local: &str) -> EntityId {
        EntityId::new(Namespace::new(ns).unwrap(), local).unwrap()
    }

    #[test]
    fn event_id_zero_pads_for_stable_ordering() {
        let a = EventId::from_seq(1);
        let b = EventId::from_seq(2);
        let c = EventId::from_seq(10);
        assert!(a.to_string() < b.to_string());
        assert!(b.to_string() < c.to_string());
    }

    #[test]
    fn classifies_entity_target() {
        let target = EventTarget::format_entity(&eid("posts", "abc"));
        assert_eq!(target, "posts:abc");
        let parsed = EventTarget::parse(&target).unwrap();
        assert_eq!(parsed, EventTarget::Entity(eid("posts", "abc")));
    }

    #[test]
    fn classifies_relationship_target() {
        let from = eid("posts", "1");
        let to = eid("users", "2");
        let target = EventTarget::format_relationship(&from, "author", &to);
        assert_eq!(target, "posts/1:author:users/2");
        let parsed = EventTarget::parse(&target).unwrap();
        assert_eq!(
            parsed,
            EventTarget::Relationship {
                from: from.clone(),
                predicate: "author".to_string(),
                to: to.clone(),
            }
        );
    }

    #[test]
    fn relationship_touches_either_endpoint() {
        let from = eid("posts", "1");
        let to = eid("users", "2");
        let target = EventTarget::Relationship {
            from: from.clone(),
            predicate: "author".to_string(),
            to: to.clone(),
        };
        assert!(target.touches(&from));
        assert!(target.touches(&to));
        assert!(!target.touches(&eid("posts", "3")));
    }

    #[test]
    fn rejects_single_segment_target() {
        assert!(matches!(
            EventTarget::parse("posts").unwrap_err(),
            EventTargetError::Malformed(_)
        ));
    }

    #[test]
    fn bulk_event_touches_every_listed_entity_id() {
        let bulk = Event {
            id: EventId::from_seq(1),
            ts: Timestamp::from_millis(1),
            op: Op::BulkCreate,
            target: EventTarget::format_entity(&eid("posts", "1")),
            before: None,
            after: None,
            entity_ids: Some(vec![eid("posts", "1"), eid("posts", "2"), eid("posts", "3")]),
            actor: eid("users", "admin"),
            compressed: false,
        };
        assert!(bulk.touches(&eid("posts", "2")));
        assert!(bulk.touches(&eid("posts", "3")));
        assert!(!bulk.touches(&eid("posts", "4")));
    }

    #[test]
    fn op_is_bulk_classification() {
        assert!(Op::BulkCreate.is_bulk());
        assert!(Op::BulkUpdate.is_bulk());
        assert!(Op::BulkDelete.is_bulk());
        assert!(!Op::Create.is_bulk());
        assert!(!Op::Update.is_bulk());
        assert!(!Op::Delete.is_bulk());
    }
}
