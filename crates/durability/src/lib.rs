//! Durable storage for ParqueDB: the event log, the WAL + pending layer,
//! the snapshot store, and the compactor that folds them together.

pub mod codec;
pub mod compaction;
pub mod config;
pub mod event_log;
pub mod pending;
pub mod reconstruct;
pub mod snapshot;
pub mod wal;

pub use compaction::{CompactionReport, Compactor, NamespaceLease};
pub use config::{CompactionConfig, EventLogConfig, SnapshotConfig, WalConfig};
pub use event_log::{AppendMark, EventLog, RotationReport};
pub use pending::{BulkRow, PendingRowGroup, PendingStore};
pub use reconstruct::{reconstruct, Reconstruction};
pub use snapshot::SnapshotStore;
pub use wal::{Wal, WalRow};
