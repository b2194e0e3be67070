//! The dynamic document value model.
//!
//! User fields are arbitrary typed values — scalars, lists, maps, dates,
//! byte strings, and entity references (§3). We model that as an explicit
//! [`Value`] enum rather than reusing `serde_json::Value` as the on-disk
//! representation, per the design note in §9: JSON's number/string model
//! cannot distinguish an integer from a float, a date from a string, or a
//! reference from a plain id, and those distinctions matter for filtering
//! and for the relationship index.

use crate::contract::entity_id::EntityId;
use crate::contract::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single document field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Absence of a value, distinct from a missing field.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes (e.g. opaque blobs, content hashes).
    Bytes(Vec<u8>),
    /// Millisecond timestamp, compared numerically (§4.8: "date comparisons
    /// coerce to millisecond integers").
    Date(Timestamp),
    /// An ordered list of values.
    Array(Vec<Value>),
    /// A nested document. `BTreeMap` (not `HashMap`) so serialization is
    /// deterministic given the same input, which the event log's
    /// compression/audit accessor depends on (§4.3).
    Map(BTreeMap<String, Value>),
    /// A reference to another entity, consumed by the relationship index
    /// (§4.7) when resolving `$link`/auto-create targets.
    Reference(EntityId),
}

impl Value {
    /// `true` for [`Value::Null`] only — used by `$exists` semantics, which
    /// distinguish "missing field" from "field present with null value" at
    /// the document level, not here.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// View as an `i64` if this is an [`Value::Int`], widening [`Value::Date`].
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Date(ts) => Some(ts.as_millis()),
            _ => None,
        }
    }

    /// View as an `f64`, widening [`Value::Int`].
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Date(ts) => Some(ts.as_millis() as f64),
            _ => None,
        }
    }

    /// View as a `&str` if this is a [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// View as a slice if this is a [`Value::Array`].
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// View as a map if this is a [`Value::Map`].
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Size used by `$size`: array length, map key count, or string length
    /// in chars; `None` for scalars.
    pub fn size(&self) -> Option<usize> {
        match self {
            Value::Array(a) => Some(a.len()),
            Value::Map(m) => Some(m.len()),
            Value::String(s) => Some(s.chars().count()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Value::Date(ts) => write!(f, "date({ts})"),
            Value::Array(a) => write!(f, "array[{}]", a.len()),
            Value::Map(m) => write!(f, "map{{{}}}", m.len()),
            Value::Reference(id) => write!(f, "ref({id})"),
        }
    }
}

/// A document: an ordered-by-key map of field name to [`Value`].
///
/// `BTreeMap` keeps iteration order deterministic so serialized event
/// payloads are byte-stable given the same logical content (§4.3).
pub type Document = BTreeMap<String, Value>;

/// Traverse `doc` by a dot-notation path (`"address.city"`,
/// `"tags.0"`), descending into maps by key and arrays by numeric index.
///
/// Returns `None` if any segment is missing or type-mismatched, which the
/// filter evaluator (§4.8) treats as "field absent" for `$exists` purposes.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = match current {
            Value::Map(m) => m.get(segment)?,
            Value::Array(a) => {
                let idx: usize = segment.parse().ok()?;
                a.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}
