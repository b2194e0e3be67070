//! Optimistic concurrency control: compare a caller's `expectedVersion`
//! against the reconstructed state's version (§4.6).

use parquedb_core::{EntityId, Error, Result, Version};

/// `Ok(())` if `expected` is absent or matches `actual`; otherwise
/// `Err(Error::VersionConflict)`. A failed check must produce no event
/// (§4.6 "a failed check produces no event").
pub fn check_version(id: &EntityId, expected: Option<Version>, actual: Version) -> Result<()> {
    match expected {
        None => Ok(()),
        Some(expected) if expected == actual => Ok(()),
        Some(expected) => Err(Error::version_conflict(id.clone(), expected.get(), actual.get())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_core::Namespace;

    fn id() -> EntityId {
        EntityId::new(Namespace::new("posts").unwrap(), "1").unwrap()
    }

    #[test]
    fn passes_when_no_expectation_given() {
        assert!(check_version(&id(), None, Version::new(5)).is_ok());
    }

    #[test]
    fn passes_when_expectation_matches() {
        assert!(check_version(&id(), Some(Version::new(5)), Version::new(5)).is_ok());
    }

    #[test]
    fn fails_with_version_conflict_on_mismatch() {
        let err = check_version(&id(), Some(Version::new(1)), Version::new(2)).unwrap_err();
        assert!(matches!(err, Error::VersionConflict { expected: 1, actual: 2, .. }));
    }
}
