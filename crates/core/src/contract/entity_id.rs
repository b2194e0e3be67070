//! Stable entity identifier: `ns/local`.

use super::namespace::{Namespace, NamespaceError};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A stable identifier for an entity: a validated [`Namespace`] plus a
/// locally-unique identifier within it.
///
/// The wire form is `ns/local`; `local` may be a ULID-like string, a
/// sequence number rendered as text, or a user-chosen field value. Only
/// `ns` is validated here — `local` uniqueness and shape are the entity
/// engine's responsibility (it may be a user-supplied field value).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    ns: Namespace,
    local: String,
}

/// Why a candidate entity id string failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityIdError {
    /// Missing the `/` separator.
    #[error("entity id {0:?} is missing the '/' separator")]
    MissingSeparator(String),
    /// The `local` half was empty.
    #[error("entity id {0:?} has an empty local id")]
    EmptyLocal(String),
    /// The `ns` half failed namespace validation.
    #[error("entity id namespace invalid: {0}")]
    Namespace(#[from] NamespaceError),
}

impl EntityId {
    /// Build an id from an already-validated namespace and a local id.
    pub fn new(ns: Namespace, local: impl Into<String>) -> Result<Self, EntityIdError> {
        let local = local.into();
        if local.is_empty() {
            return Err(EntityIdError::EmptyLocal(local));
        }
        Ok(EntityId { ns, local })
    }

    /// Parse `"ns/local"`, validating the namespace half.
    pub fn parse(s: &str) -> Result<Self, EntityIdError> {
        let (ns, local) = s
            .split_once('/')
            .ok_or_else(|| EntityIdError::MissingSeparator(s.to_string()))?;
        if local.is_empty() {
            return Err(EntityIdError::EmptyLocal(s.to_string()));
        }
        let ns = Namespace::new(ns)?;
        Ok(EntityId {
            ns,
            local: local.to_string(),
        })
    }

    /// The default actor recorded when a caller performs a mutation
    /// without naming one (§4.6: `createdBy = updatedBy = actor ??
    /// "system/anonymous"`).
    pub fn system_actor() -> Self {
        EntityId { ns: Namespace::new_unchecked("system"), local: "anonymous".to_string() }
    }

    /// The namespace half.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// The locally-unique half.
    pub fn local_id(&self) -> &str {
        &self.local
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ns, self.local)
    }
}

impl Serialize for EntityId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EntityId::parse(&s).map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_id() {
        let id = EntityId::parse("posts/abc123").unwrap();
        assert_eq!(id.namespace().as_str(), "posts");
        assert_eq!(id.local_id(), "abc123");
        assert_eq!(id.to_string(), "posts/abc123");
    }

    #[test]
    fn local_id_may_itself_contain_slashes() {
        let id = EntityId::parse("posts/a/b/c").unwrap();
        assert_eq!(id.local_id(), "a/b/c");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(
            EntityId::parse("posts").unwrap_err(),
            EntityIdError::MissingSeparator(_)
        ));
    }

    #[test]
    fn rejects_empty_local() {
        assert!(matches!(
            EntityId::parse("posts/").unwrap_err(),
            EntityIdError::EmptyLocal(_)
        ));
    }

    #[test]
    fn rejects_reserved_namespace() {
        assert!(matches!(
            EntityId::parse("system/abc").unwrap_err(),
            EntityIdError::Namespace(NamespaceError::Reserved(_))
        ));
    }

    #[test]
    fn serde_round_trips_through_plain_string() {
        let id = EntityId::parse("posts/abc123").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"posts/abc123\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn system_actor_is_a_stable_well_known_id() {
        assert_eq!(EntityId::system_actor().to_string(), "system/anonymous");
    }

    #[test]
    fn ord_sorts_by_namespace_then_local() {
        let a = EntityId::parse("posts/1").unwrap();
        let b = EntityId::parse("posts/2").unwrap();
        let c = EntityId::parse("users/0").unwrap();
        assert!(a < b);
        assert!(b < c);
    }
}
