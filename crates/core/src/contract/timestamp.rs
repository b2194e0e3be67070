//! Millisecond timestamps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
///
/// Kept as a thin newtype (rather than a bare `i64`) so `before(...)` /
/// `in_range(...)` comparisons read clearly at call sites and so the
/// half-open range semantics of [`Timestamp::in_half_open_range`] live in
/// one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Wrap a raw millisecond value.
    pub fn from_millis(ms: i64) -> Self {
        Timestamp(ms)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis() as i64;
        Timestamp(ms)
    }

    /// The raw millisecond value.
    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// `self ∈ [from, to)`, the half-open convention used by
    /// `getEventsByTimeRange`.
    pub fn in_half_open_range(self, from: Timestamp, to: Timestamp) -> bool {
        self >= from && self < to
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Timestamp(value)
    }
}

impl From<Timestamp> for i64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_open_range_excludes_upper_bound() {
        let from = Timestamp::from_millis(10);
        let to = Timestamp::from_millis(20);
        assert!(!Timestamp::from_millis(9).in_half_open_range(from, to));
        assert!(Timestamp::from_millis(10).in_half_open_range(from, to));
        assert!(Timestamp::from_millis(19).in_half_open_range(from, to));
        assert!(!Timestamp::from_millis(20).in_half_open_range(from, to));
    }

    #[test]
    fn now_is_monotonic_with_explicit_values() {
        let t = Timestamp::now();
        assert!(t.as_millis() > 0);
    }
}
