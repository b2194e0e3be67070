//! C9: the command path and buffered transactions.
//!
//! This crate is deliberately engine-agnostic: it owns the *protocol*
//! (buffer, commit, rollback, per-entity OCC, the undo log) and is driven
//! by a [`TransactionHost`] the entity engine implements, rather than
//! knowing how to apply an update operator itself.

pub mod occ;
pub mod transaction;

pub use occ::check_version;
pub use transaction::{StagedCommand, Transaction, TransactionHost, TransactionState};
