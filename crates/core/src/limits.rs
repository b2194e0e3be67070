//! Default knobs shared across crates.
//!
//! Centralizing these (rather than scattering magic numbers through
//! `durability`/`engine`) makes the defaults named in spec sections easy to
//! audit against §4.3/§4.4/§4.5/§4.6/§9.

/// §4.3 — soft cap on live event count before rotation.
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

/// §4.3 — rotate events older than this (7 days, in milliseconds).
pub const DEFAULT_MAX_AGE_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// §4.3 — rotated events are dropped rather than archived by default.
pub const DEFAULT_ARCHIVE_ON_ROTATION: bool = false;

/// §4.3 — hard cap on archived events; oldest pruned first.
pub const DEFAULT_MAX_ARCHIVED_EVENTS: usize = 50_000;

/// §4.3 — events whose `before`/`after` payload exceeds this size are
/// stored compressed.
pub const COMPRESSION_THRESHOLD_BYTES: usize = 64 * 1024;

/// §4.4 — namespace WAL buffer auto-flushes at this event count.
pub const WAL_AUTO_FLUSH_EVENT_COUNT: usize = 100;

/// §4.4 — namespace WAL buffer auto-flushes at this byte size.
pub const WAL_AUTO_FLUSH_BYTES: usize = 64 * 1024;

/// §4.5 — reconstruction writes a snapshot once this many events have been
/// replayed since the last checkpoint.
pub const SNAPSHOT_EVENT_THRESHOLD: usize = 50;

/// §4.6 — entity reconstruction LRU cache size.
pub const DEFAULT_ENTITY_CACHE_CAPACITY: usize = 1_000;

/// §9(c) — compaction lease duration, in milliseconds.
pub const COMPACTION_LEASE_MS: i64 = 30_000;

/// §9(c) — compactor `ETagMismatch` retry budget.
pub const COMPACTION_MAX_RETRIES: u32 = 5;

/// §7 — error kind `BackendError` is retried by the compactor alone; all
/// other callers see it surfaced immediately.
pub const COMPACTION_BACKOFF_BASE_MS: u64 = 50;
