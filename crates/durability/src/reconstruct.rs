//! `getEntityFromEvents`: the read-merge fold across snapshot, pending
//! row-groups, WAL, and the in-memory buffer (§4.4).

use crate::codec::event_batch;
use crate::event_log::EventLog;
use crate::pending::PendingStore;
use crate::snapshot::SnapshotStore;
use crate::wal::Wal;
use parquedb_core::{Document, EntityId, Event, Namespace, Op, Result, Timestamp};
use std::sync::Arc;

/// The result of folding an entity's history into its current state.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    /// The entity's state, or `None` if it was never created or was
    /// hard-deleted.
    pub state: Option<Document>,
    /// How many events were replayed on top of the starting point
    /// (snapshot, or genesis for an `asOf` query).
    pub events_replayed: usize,
    /// The snapshot sequence reconstruction started from, if any.
    pub snapshot_seq: Option<u64>,
}

fn apply_event(state: Option<Document>, event: &Event) -> Option<Document> {
    match event.op {
        Op::Create => event.after.clone(),
        Op::Update => match (state, &event.after) {
            (Some(mut current), Some(after)) => {
                for (k, v) in after {
                    current.insert(k.clone(), v.clone());
                }
                Some(current)
            }
            (_, after) => after.clone(),
        },
        Op::Delete => event.after.clone(),
        Op::BulkCreate | Op::BulkUpdate | Op::BulkDelete => {
            unreachable!("bulk events are resolved via resolve_event, not apply_event")
        }
    }
}

/// Resolve one event's effect on `id`'s state. `BULK_*` events carry no
/// payload of their own (§4.4) — their per-entity post-image lives in the
/// pending row-group written alongside them, keyed by the event's own
/// sequence number, so it is looked up there instead of replayed from
/// `event.after`.
async fn resolve_event(
    pending: &PendingStore,
    ns: &Namespace,
    id: &EntityId,
    state: Option<Document>,
    event: &Event,
) -> Result<Option<Document>> {
    if event.op.is_bulk() {
        let found = pending.state_at_seq(ns, event.id.sequence(), id).await?;
        return Ok(found.unwrap_or(state));
    }
    Ok(apply_event(state, event))
}

/// Fold an entity's full history on-the-fly (WAL rows + live buffer only),
/// keeping events with `ts <= as_of` when given. Used both by the
/// fast-path reconstruction below (via the `None` case acting as "replay
/// everything after the snapshot") and by `asOf` time-travel queries,
/// which must ignore the snapshot/pending shortcuts entirely since neither
/// retains enough history to bound by timestamp (§9 open question (b)).
async fn fold_history(
    pending: &PendingStore,
    wal: &Wal,
    log: &EventLog,
    ns: &Namespace,
    id: &EntityId,
    after_seq: u64,
    as_of: Option<Timestamp>,
) -> Result<(Option<Document>, usize, u64)> {
    let mut state = None;
    let mut replayed = 0usize;
    let mut last_seq = after_seq;

    for row in wal.rows_for(ns) {
        if row.last_seq <= after_seq {
            continue;
        }
        let bytes_result = fetch_wal_blob(wal, &row.path).await;
        let events = bytes_result?;
        for event in events {
            if event.id.sequence() <= after_seq {
                continue;
            }
            if !event.touches(id) {
                continue;
            }
            if let Some(cutoff) = as_of {
                if event.ts > cutoff {
                    continue;
                }
            }
            state = resolve_event(pending, ns, id, state, &event).await?;
            replayed += 1;
            last_seq = last_seq.max(event.id.sequence());
        }
    }

    for event in log.get_events(id) {
        if event.id.sequence() <= after_seq {
            continue;
        }
        if let Some(cutoff) = as_of {
            if event.ts > cutoff {
                continue;
            }
        }
        state = resolve_event(pending, ns, id, state, &event).await?;
        replayed += 1;
        last_seq = last_seq.max(event.id.sequence());
    }

    Ok((state, replayed, last_seq))
}

async fn fetch_wal_blob(wal: &Wal, path: &str) -> Result<Vec<Event>> {
    let bytes = wal_blob_bytes(wal, path).await?;
    event_batch::decode(&bytes)
}

async fn wal_blob_bytes(wal: &Wal, path: &str) -> Result<Vec<u8>> {
    wal.store().read(path).await
}

/// Reconstruct `id`'s state in `ns`, per the four-step fold order of §4.4:
/// newest snapshot, pending row-groups, WAL, then the live buffer. Writes
/// a fresh snapshot if the replay crossed the configured threshold.
pub async fn reconstruct(
    snapshots: &Arc<SnapshotStore>,
    pending: &PendingStore,
    wal: &Wal,
    log: &EventLog,
    ns: &Namespace,
    id: &EntityId,
    as_of: Option<Timestamp>,
) -> Result<Reconstruction> {
    if as_of.is_some() {
        let (state, replayed, _) = fold_history(pending, wal, log, ns, id, 0, as_of).await?;
        return Ok(Reconstruction { state, events_replayed: replayed, snapshot_seq: None });
    }

    let snapshot = snapshots.get_latest_snapshot(id, u64::MAX).await?;
    let (mut state, start_seq) = match &snapshot {
        Some((seq, state)) => (state.clone(), *seq),
        None => (None, 0),
    };

    if let Some(pending_state) = pending.find_latest(ns, id).await? {
        state = pending_state;
    }

    let (folded_state, replayed, last_seq) = fold_history(pending, wal, log, ns, id, start_seq, None).await?;
    if replayed > 0 {
        state = folded_state;
    }

    if snapshots.should_snapshot(replayed, snapshot.is_some()) {
        snapshots.create_snapshot(id, last_seq.max(start_seq), state.clone()).await?;
    }

    Ok(Reconstruction { state, events_replayed: replayed, snapshot_seq: snapshot.map(|(s, _)| s) })
}
