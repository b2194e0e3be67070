//! Defaultable knobs for the event log, WAL, and compactor.

use parquedb_core::limits;

/// C3 event log knobs.
#[derive(Debug, Clone, Copy)]
pub struct EventLogConfig {
    /// Soft cap of live event count before rotation.
    pub max_events: usize,
    /// Rotate events older than this, in milliseconds.
    pub max_age_ms: i64,
    /// If true, rotated events move to the archive; otherwise they're dropped.
    pub archive_on_rotation: bool,
    /// Hard cap on the archive; oldest entries are pruned first.
    pub max_archived_events: usize,
    /// Inline threshold above which before/after payloads are compressed.
    pub compression_threshold_bytes: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        EventLogConfig {
            max_events: limits::DEFAULT_MAX_EVENTS,
            max_age_ms: limits::DEFAULT_MAX_AGE_MS,
            archive_on_rotation: limits::DEFAULT_ARCHIVE_ON_ROTATION,
            max_archived_events: limits::DEFAULT_MAX_ARCHIVED_EVENTS,
            compression_threshold_bytes: limits::COMPRESSION_THRESHOLD_BYTES,
        }
    }
}

/// C4 WAL auto-flush thresholds.
#[derive(Debug, Clone, Copy)]
pub struct WalConfig {
    /// Flush a namespace's buffer once it holds at least this many events.
    pub auto_flush_event_count: usize,
    /// Flush a namespace's buffer once it holds at least this many bytes.
    pub auto_flush_bytes: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            auto_flush_event_count: limits::WAL_AUTO_FLUSH_EVENT_COUNT,
            auto_flush_bytes: limits::WAL_AUTO_FLUSH_BYTES,
        }
    }
}

/// C5 snapshot creation policy.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotConfig {
    /// Write a new snapshot once this many events have been replayed since
    /// the last one.
    pub event_threshold: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig { event_threshold: limits::SNAPSHOT_EVENT_THRESHOLD }
    }
}

/// C11 compactor lease/retry knobs.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    /// How long the namespace lease sentinel is valid for.
    pub lease_ms: i64,
    /// How many times to retry an `ETagMismatch` on the lease or canonical
    /// publish before giving up.
    pub max_retries: u32,
    /// Base of the jittered exponential backoff between retries.
    pub backoff_base_ms: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        CompactionConfig {
            lease_ms: limits::COMPACTION_LEASE_MS,
            max_retries: limits::COMPACTION_MAX_RETRIES,
            backoff_base_ms: limits::COMPACTION_BACKOFF_BASE_MS,
        }
    }
}
