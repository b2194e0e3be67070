//! Collection namespace identifier.
//!
//! A namespace scopes a collection of entities (`"posts"`, `"users"`, ...).
//! It is the `ns` half of an [`EntityId`](super::entity_id::EntityId) and is
//! validated once at construction so downstream code never has to
//! re-check the shape of a namespace string.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a namespace segment.
pub const MAX_NAMESPACE_LENGTH: usize = 128;

/// Names a collection may not take, checked case-insensitively on an exact
/// match (so `"system"` and `"System"` are both reserved, but
/// `"systemic"` is fine).
pub const RESERVED_NAMESPACES: &[&str] = &[
    "system",
    "admin",
    "root",
    "null",
    "undefined",
    "true",
    "false",
    "internal",
    "__proto__",
    "constructor",
    "prototype",
    "config",
    "settings",
    "metadata",
    "_internal",
    "_system",
];

static NAMESPACE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").unwrap());

/// A validated collection namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

/// Why a candidate namespace string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    /// Empty string.
    #[error("namespace cannot be empty")]
    Empty,
    /// Exceeds [`MAX_NAMESPACE_LENGTH`].
    #[error("namespace too long: {length} chars (max {MAX_NAMESPACE_LENGTH})")]
    TooLong {
        /// Length of the rejected namespace.
        length: usize,
    },
    /// Contains a character outside `[A-Za-z0-9_-]` or has a bad first
    /// character.
    #[error("namespace {0:?} does not match [A-Za-z0-9][A-Za-z0-9_-]{{0,127}}")]
    InvalidShape(String),
    /// Matches an entry in [`RESERVED_NAMESPACES`].
    #[error("namespace {0:?} is reserved")]
    Reserved(String),
}

impl Namespace {
    /// Validate and wrap a namespace string.
    pub fn new(ns: impl Into<String>) -> Result<Self, NamespaceError> {
        let ns = ns.into();
        if ns.is_empty() {
            return Err(NamespaceError::Empty);
        }
        if ns.len() > MAX_NAMESPACE_LENGTH {
            return Err(NamespaceError::TooLong { length: ns.len() });
        }
        if !NAMESPACE_PATTERN.is_match(&ns) {
            return Err(NamespaceError::InvalidShape(ns));
        }
        let lower = ns.to_ascii_lowercase();
        if RESERVED_NAMESPACES.contains(&lower.as_str()) {
            return Err(NamespaceError::Reserved(ns));
        }
        Ok(Namespace(ns))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a namespace without the reserved-name check, for the engine's
    /// internal `system` actor identity (§4.6 default actor
    /// `system/anonymous`). Not exposed to user-supplied namespaces.
    pub fn new_unchecked(ns: impl Into<String>) -> Self {
        Namespace(ns.into())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = NamespaceError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Namespace::new(value)
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.0
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
