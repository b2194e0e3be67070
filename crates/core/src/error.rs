//! The unified error type (§7).
//!
//! Every public operation in the workspace returns [`Result<T>`]. Errors are
//! always a structural [`Error`] variant, never an opaque string — callers
//! that want to branch on the failure kind can match, and callers that just
//! want a message can `.to_string()` it.

use crate::contract::entity_id::EntityId;
use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// A coarse classification of [`Error`], useful for logging/metrics without
/// matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input or state failed validation.
    Validation,
    /// The requested entity does not exist (or is soft-deleted and the
    /// caller did not ask for deleted entities).
    NotFound,
    /// An optimistic-concurrency check failed.
    Conflict,
    /// A conditional write lost its race.
    ConditionalWrite,
    /// An operator or filter tree was malformed.
    InvalidQuery,
    /// A link target is missing and auto-create was not requested.
    ReferenceNotFound,
    /// The storage backend failed.
    Backend,
    /// The operation's deadline expired.
    Deadline,
}

/// The structural error type returned by every ParqueDB operation (§7).
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid namespace, filter, patch, or input type.
    #[error("validation error: {message}")]
    ValidationError {
        /// What was invalid.
        message: String,
    },

    /// `get`/`update` of an absent or soft-deleted entity without
    /// `includeDeleted`.
    #[error("not found: {entity_id}")]
    NotFound {
        /// The entity that was not found.
        entity_id: EntityId,
    },

    /// `expectedVersion` did not match the reconstructed state's version
    /// (§4.6 OCC policy). Retryable by the caller.
    #[error("version conflict on {entity_id}: expected {expected}, got {actual}")]
    VersionConflict {
        /// The entity in conflict.
        entity_id: EntityId,
        /// The version the caller expected.
        expected: u64,
        /// The version actually found.
        actual: u64,
    },

    /// `writeConditional` lost a compare-and-swap race (§4.1). Retryable
    /// after reloading the current tag.
    #[error("etag mismatch at {path}: expected {expected_etag:?}, actual {actual_etag:?}")]
    ETagMismatch {
        /// The path being written.
        path: String,
        /// The tag the caller expected (`None` means "must not exist").
        expected_etag: Option<String>,
        /// The tag actually present.
        actual_etag: Option<String>,
    },

    /// Exclusive create found an existing object (§4.1 `ifNoneMatch: "*"`).
    #[error("already exists: {path}")]
    AlreadyExists {
        /// The path that already had content.
        path: String,
    },

    /// An unknown `$`-prefixed operator, or a malformed predicate tree
    /// (§4.8).
    #[error("invalid filter: {message}")]
    InvalidFilter {
        /// What was wrong with the filter.
        message: String,
    },

    /// An update document used an unrecognized or malformed operator
    /// (§4.6).
    #[error("invalid update: {message}")]
    InvalidUpdate {
        /// What was wrong with the update.
        message: String,
    },

    /// A `$link`/auto-create target does not exist and `autoCreate` was not
    /// requested (§4.7).
    #[error("reference not found: {entity_id}")]
    ReferenceNotFound {
        /// The missing target.
        entity_id: EntityId,
    },

    /// The underlying blob store failed. The original error kind is
    /// preserved in the message per §7's "propagate with original kind
    /// preserved" policy.
    #[error("backend error: {message}")]
    BackendError {
        /// Description of the underlying failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation exceeded its configured deadline; any partially
    /// buffered append was rolled back (§5).
    #[error("deadline exceeded after {elapsed_ms}ms")]
    Deadline {
        /// How long the operation ran before its deadline fired.
        elapsed_ms: u64,
    },
}

impl Error {
    /// Build a [`Error::ValidationError`].
    pub fn validation(message: impl Into<String>) -> Self {
        Error::ValidationError { message: message.into() }
    }

    /// Build a [`Error::NotFound`].
    pub fn not_found(entity_id: EntityId) -> Self {
        Error::NotFound { entity_id }
    }

    /// Build a [`Error::VersionConflict`].
    pub fn version_conflict(entity_id: EntityId, expected: u64, actual: u64) -> Self {
        Error::VersionConflict { entity_id, expected, actual }
    }

    /// Build a [`Error::InvalidFilter`].
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Error::InvalidFilter { message: message.into() }
    }

    /// Build a [`Error::InvalidUpdate`].
    pub fn invalid_update(message: impl Into<String>) -> Self {
        Error::InvalidUpdate { message: message.into() }
    }

    /// Build a [`Error::ReferenceNotFound`].
    pub fn reference_not_found(entity_id: EntityId) -> Self {
        Error::ReferenceNotFound { entity_id }
    }

    /// Build a [`Error::BackendError`] with no further source.
    pub fn backend(message: impl Into<String>) -> Self {
        Error::BackendError { message: message.into(), source: None }
    }

    /// Build a [`Error::BackendError`] wrapping an underlying error.
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::BackendError { message: message.into(), source: Some(Box::new(source)) }
    }

    /// This error's coarse [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ValidationError { .. } => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::VersionConflict { .. } => ErrorKind::Conflict,
            Error::ETagMismatch { .. } | Error::AlreadyExists { .. } => ErrorKind::ConditionalWrite,
            Error::InvalidFilter { .. } | Error::InvalidUpdate { .. } => ErrorKind::InvalidQuery,
            Error::ReferenceNotFound { .. } => ErrorKind::ReferenceNotFound,
            Error::BackendError { .. } => ErrorKind::Backend,
            Error::Deadline { .. } => ErrorKind::Deadline,
        }
    }

    /// §7: "Retrying is never automatic... except inside the compactor,
    /// which retries `ETagMismatch`". This flags the errors safe to retry
    /// after reloading state; callers decide the policy themselves.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::VersionConflict { .. } | Error::ETagMismatch { .. } | Error::AlreadyExists { .. }
        )
    }

    /// `true` for the two "doesn't exist" variants.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::ReferenceNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::namespace::Namespace;

    fn eid() -> EntityId {
        EntityId::new(Namespace::new("posts").unwrap(), "1").unwrap()
    }

    #[test]
    fn kind_classification_covers_every_variant() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::not_found(eid()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::version_conflict(eid(), 1, 2).kind(), ErrorKind::Conflict);
        assert_eq!(
            Error::ETagMismatch { path: "p".into(), expected_etag: None, actual_etag: None }.kind(),
            ErrorKind::ConditionalWrite
        );
        assert_eq!(
            Error::AlreadyExists { path: "p".into() }.kind(),
            ErrorKind::ConditionalWrite
        );
        assert_eq!(Error::invalid_filter("x").kind(), ErrorKind::InvalidQuery);
        assert_eq!(Error::invalid_update("x").kind(), ErrorKind::InvalidQuery);
        assert_eq!(Error::reference_not_found(eid()).kind(), ErrorKind::ReferenceNotFound);
        assert_eq!(Error::backend("x").kind(), ErrorKind::Backend);
        assert_eq!(Error::Deadline { elapsed_ms: 10 }.kind(), ErrorKind::Deadline);
    }

    #[test]
    fn retryable_errors_are_version_and_conditional_write_conflicts() {
        assert!(Error::version_conflict(eid(), 1, 2).is_retryable());
        assert!(Error::ETagMismatch { path: "p".into(), expected_etag: None, actual_etag: None }
            .is_retryable());
        assert!(Error::AlreadyExists { path: "p".into() }.is_retryable());
        assert!(!Error::validation("x").is_retryable());
        assert!(!Error::not_found(eid()).is_retryable());
    }

    #[test]
    fn not_found_covers_reference_not_found_too() {
        assert!(Error::not_found(eid()).is_not_found());
        assert!(Error::reference_not_found(eid()).is_not_found());
        assert!(!Error::validation("x").is_not_found());
    }

    #[test]
    fn display_messages_are_informative() {
        let e = Error::version_conflict(eid(), 1, 2);
        let msg = e.to_string();
        assert!(msg.contains("version conflict"));
        assert!(msg.contains("posts/1"));
    }
}
