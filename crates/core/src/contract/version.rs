//! Entity version numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An entity's version. Starts at 1 on creation and increases by exactly 1
/// on each accepted mutation (§3, §8 invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version assigned on `create`.
    pub const INITIAL: Version = Version(1);

    /// Wrap a raw version number.
    pub fn new(v: u64) -> Self {
        Version(v)
    }

    /// The raw version number.
    pub fn get(self) -> u64 {
        self.0
    }

    /// The version after one more accepted mutation.
    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Version(value)
    }
}

impl From<Version> for u64 {
    fn from(value: Version) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_version_is_one() {
        assert_eq!(Version::INITIAL.get(), 1);
    }

    #[test]
    fn next_increments_by_one() {
        assert_eq!(Version::INITIAL.next().get(), 2);
        assert_eq!(Version::new(41).next(), Version::new(42));
    }
}
