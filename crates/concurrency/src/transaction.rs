//! Buffered command transactions (§4.9).

use async_trait::async_trait;
use parquedb_core::{Document, EntityId, Event, Namespace, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// What a [`Transaction`] must be able to ask its owning engine to do.
/// Keeping this as a trait lets the concurrency crate own the
/// buffer/commit/rollback protocol without depending on the entity
/// engine's update-operator machinery.
#[async_trait]
pub trait TransactionHost: Send + Sync {
    /// Apply `event` to live state immediately (optimistic execution
    /// inside an open transaction) and return the entity's pre-image, so
    /// the transaction can restore it on rollback.
    async fn apply_staged(&self, ns: &Namespace, event: &Event) -> Result<Option<Document>>;

    /// Durably append the transaction's buffered events, in order, as one
    /// atomic commit.
    async fn commit_events(&self, ns: &Namespace, events: Vec<Event>) -> Result<()>;

    /// Restore `id`'s live state to `pre_image`, undoing an optimistic
    /// apply that is being rolled back.
    async fn restore(&self, id: &EntityId, pre_image: Option<Document>) -> Result<()>;
}

/// One buffered mutation: the event that was optimistically applied, plus
/// the pre-image needed to undo it.
#[derive(Debug, Clone)]
pub struct StagedCommand {
    /// The entity this command mutated.
    pub entity_id: EntityId,
    /// The event, as it will be durably appended on commit.
    pub event: Event,
    /// The entity's state immediately before this command, for rollback.
    pub pre_image: Option<Document>,
}

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting staged commands.
    Open,
    /// `commit` succeeded; no further commands may be staged.
    Committed,
    /// `rollback` ran; no further commands may be staged.
    RolledBack,
}

/// A transaction buffers commands locally and, on `commit`, appends them
/// to the log as one atomic batch; on `rollback`, it restores pre-images
/// from its undo log and discards the buffer (§4.9). Transactions offer
/// per-entity OCC but no cross-entity serializability: two committed
/// transactions may interleave per-entity with last-writer-wins by
/// version.
pub struct Transaction<H: TransactionHost> {
    host: std::sync::Arc<H>,
    ns: Namespace,
    state: Mutex<TransactionState>,
    buffer: Mutex<Vec<StagedCommand>>,
}

impl<H: TransactionHost> Transaction<H> {
    /// Open a new transaction scoped to `ns` against `host`.
    pub fn new(host: std::sync::Arc<H>, ns: Namespace) -> Self {
        Transaction { host, ns, state: Mutex::new(TransactionState::Open), buffer: Mutex::new(Vec::new()) }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    fn require_open(&self) -> Result<()> {
        if *self.state.lock() != TransactionState::Open {
            return Err(parquedb_core::Error::validation("transaction is already closed"));
        }
        Ok(())
    }

    /// Stage one command: apply it optimistically via the host and record
    /// its pre-image for rollback. The event is not yet durable.
    pub async fn stage(&self, entity_id: EntityId, event: Event) -> Result<()> {
        self.require_open()?;
        let pre_image = self.host.apply_staged(&self.ns, &event).await?;
        self.buffer.lock().push(StagedCommand { entity_id, event, pre_image });
        Ok(())
    }

    /// Number of commands staged so far.
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// `true` if no commands have been staged.
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Durably append every staged event as one atomic commit. Closes the
    /// transaction; a new one may be opened on the same host afterward.
    pub async fn commit(self) -> Result<usize> {
        self.require_open()?;
        let events: Vec<Event> = self.buffer.lock().drain(..).map(|c| c.event).collect();
        let count = events.len();
        self.host.commit_events(&self.ns, events).await?;
        *self.state.lock() = TransactionState::Committed;
        debug!(ns = %self.ns, commands = count, "transaction committed");
        Ok(count)
    }

    /// Restore every staged command's pre-image, most recent first, and
    /// discard the buffer. Closes the transaction.
    pub async fn rollback(self) -> Result<()> {
        self.require_open()?;
        let staged: Vec<StagedCommand> = self.buffer.lock().drain(..).collect();
        for command in staged.into_iter().rev() {
            if let Err(e) = self.host.restore(&command.entity_id, command.pre_image).await {
                warn!(entity = %command.entity_id, error = %e, "rollback failed to restore pre-image");
                return Err(e);
            }
        }
        *self.state.lock() = TransactionState::RolledBack;
        debug!(ns = %self.ns, "transaction rolled back");
        Ok(())
    }
}
