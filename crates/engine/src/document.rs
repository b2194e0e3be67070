//! Reserved field names and audit-field bookkeeping for a materialized
//! entity document (§4.6).

use parquedb_core::{Document, EntityId, Timestamp, Value};

/// The entity's own id, mirrored into the document so callers reading a
/// returned document see `$id` without a side channel.
pub const FIELD_ID: &str = "$id";
/// The collection's declared entity type, if any.
pub const FIELD_TYPE: &str = "$type";
/// Monotonic version, starting at 1 (§8 invariant 1).
pub const FIELD_VERSION: &str = "version";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_UPDATED_AT: &str = "updatedAt";
pub const FIELD_CREATED_BY: &str = "createdBy";
pub const FIELD_UPDATED_BY: &str = "updatedBy";
pub const FIELD_DELETED_AT: &str = "deletedAt";
pub const FIELD_DELETED_BY: &str = "deletedBy";

/// Fields projections always include regardless of include/exclude rules
/// (§4.8 "Projections always include `$id, $type, name`").
pub const ALWAYS_PROJECTED_FIELDS: &[&str] = &["$id", "$type", "name"];

/// Stamp `$id`, `createdAt`/`updatedAt`, `createdBy`/`updatedBy`, and
/// `version = 1` onto a freshly-created document.
pub fn stamp_created(mut doc: Document, id: &EntityId, actor: &EntityId, now: Timestamp) -> Document {
    doc.insert(FIELD_ID.to_string(), Value::String(id.to_string()));
    doc.insert(FIELD_CREATED_AT.to_string(), Value::Date(now));
    doc.insert(FIELD_UPDATED_AT.to_string(), Value::Date(now));
    doc.insert(FIELD_CREATED_BY.to_string(), Value::Reference(actor.clone()));
    doc.insert(FIELD_UPDATED_BY.to_string(), Value::Reference(actor.clone()));
    doc.insert(FIELD_VERSION.to_string(), Value::Int(1));
    doc
}

/// Stamp `updatedAt`/`updatedBy` and bump `version` on a mutated document.
pub fn stamp_updated(mut doc: Document, actor: &EntityId, now: Timestamp) -> Document {
    doc.insert(FIELD_UPDATED_AT.to_string(), Value::Date(now));
    doc.insert(FIELD_UPDATED_BY.to_string(), Value::Reference(actor.clone()));
    let next = current_version(&doc).map(|v| v.next()).unwrap_or(parquedb_core::Version::INITIAL);
    doc.insert(FIELD_VERSION.to_string(), Value::Int(next.get() as i64));
    doc
}

/// Stamp `deletedAt`/`deletedBy` and bump `version` on a soft-deleted
/// document; the document's other fields are preserved (§4.6).
pub fn stamp_soft_deleted(mut doc: Document, actor: &EntityId, now: Timestamp) -> Document {
    doc.insert(FIELD_DELETED_AT.to_string(), Value::Date(now));
    doc.insert(FIELD_DELETED_BY.to_string(), Value::Reference(actor.clone()));
    stamp_updated(doc, actor, now)
}

/// The document's current `version`, if present and well-formed.
pub fn current_version(doc: &Document) -> Option<parquedb_core::Version> {
    match doc.get(FIELD_VERSION)? {
        Value::Int(v) if *v >= 0 => Some(parquedb_core::Version::new(*v as u64)),
        _ => None,
    }
}

/// `true` if the document carries a `deletedAt` stamp.
pub fn is_soft_deleted(doc: &Document) -> bool {
    doc.get(FIELD_DELETED_AT).is_some()
}
