//! C3: the append-only, single-writer-per-instance event log.

use crate::config::EventLogConfig;
use parking_lot::Mutex;
use parquedb_core::{EntityId, Event, EventId, Namespace, Op, Timestamp};
use std::collections::BinaryHeap;
use tracing::{debug, trace};

/// Counts returned by [`EventLog::rotate`]/[`EventLog::archive_events`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Events moved from the live buffer to the archive.
    pub archived_count: usize,
    /// Events dropped outright (archiving disabled).
    pub dropped_count: usize,
    /// Archived events pruned to respect `maxArchivedEvents`.
    pub pruned_count: usize,
    /// The oldest live event's timestamp after rotation, if any remain.
    pub oldest_event_ts: Option<Timestamp>,
    /// The newest archived event's timestamp, if the archive is non-empty.
    pub newest_archived_ts: Option<Timestamp>,
}

struct Inner {
    live: Vec<Event>,
    archive: Vec<Event>,
    next_seq: u64,
    /// Saved append marks for deadline rollback: a stack of `(live_len,
    /// next_seq)` pairs pushed before a suspendable append begins.
    marks: Vec<(usize, u64)>,
}

/// The in-memory event buffer for one namespace-scoped log instance.
///
/// A full deployment runs one [`EventLog`] per namespace; the durability
/// layer above multiplexes namespaces into per-namespace instances rather
/// than interleaving them in a single buffer, so sequence numbers stay
/// namespace-local per §3.
pub struct EventLog {
    config: EventLogConfig,
    inner: Mutex<Inner>,
}

impl EventLog {
    /// Create an empty log starting sequence numbers at 1.
    pub fn new(config: EventLogConfig) -> Self {
        EventLog {
            config,
            inner: Mutex::new(Inner { live: Vec::new(), archive: Vec::new(), next_seq: 1, marks: Vec::new() }),
        }
    }

    /// Mark the current append position, for later rollback on deadline
    /// expiry (§5 cancellation). The returned token must be passed to
    /// [`EventLog::rollback_to`] or discarded on success.
    pub fn mark(&self) -> AppendMark {
        let inner = self.inner.lock();
        AppendMark { live_len: inner.live.len(), next_seq: inner.next_seq }
    }

    /// Undo every append since `mark`: truncates the buffer and resets the
    /// sequence counter by the same amount, so a half-durable append never
    /// leaks a sequence gap (§5).
    pub fn rollback_to(&self, mark: AppendMark) {
        let mut inner = self.inner.lock();
        inner.live.truncate(mark.live_len);
        inner.next_seq = mark.next_seq;
    }

    /// Append one event, assigning the next sequence number. Appends are
    /// serialized by the inner mutex so the id assignment and buffer
    /// mutation are atomic as a pair (§5).
    pub fn append(&self, mut event: Event) -> Event {
        let assigned_id;
        {
            let mut inner = self.inner.lock();
            assigned_id = EventId::from_seq(inner.next_seq);
            inner.next_seq += 1;
            event.id = assigned_id;
            inner.live.push(event.clone());
        }
        trace!(event_id = %assigned_id, op = ?event.op, "appended event");
        event
    }

    /// Every event whose target addresses `id`, directly or via a
    /// relationship it participates in, sorted by id.
    pub fn get_events(&self, id: &EntityId) -> Vec<Event> {
        let inner = self.inner.lock();
        let mut out: Vec<Event> = inner.live.iter().filter(|e| e.touches(id)).cloned().collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Every live event filed under `ns`, sorted by id.
    pub fn get_events_by_namespace(&self, ns: &Namespace) -> Vec<Event> {
        let inner = self.inner.lock();
        let mut out: Vec<Event> = inner
            .live
            .iter()
            .filter(|e| e.parsed_target().map(|t| t.namespace() == ns).unwrap_or(false))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Every live event with the given op, sorted by id.
    pub fn get_events_by_op(&self, op: Op) -> Vec<Event> {
        let inner = self.inner.lock();
        let mut out: Vec<Event> = inner.live.iter().filter(|e| e.op == op).cloned().collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Every live event with `from <= ts < to` (half-open), sorted by id.
    pub fn get_events_by_time_range(&self, from: Timestamp, to: Timestamp) -> Vec<Event> {
        let inner = self.inner.lock();
        let mut out: Vec<Event> =
            inner.live.iter().filter(|e| e.ts.in_half_open_range(from, to)).cloned().collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// The next sequence number that will be assigned.
    pub fn next_seq(&self) -> u64 {
        self.inner.lock().next_seq
    }

    /// Current count of live (unrotated) events.
    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Remove every live event with `id.sequence() <= up_to_seq`. Used by
    /// the WAL layer after a successful flush to keep the buffer from
    /// double-counting flushed events during rotation accounting.
    pub fn drop_up_to(&self, up_to_seq: u64) {
        let mut inner = self.inner.lock();
        inner.live.retain(|e| e.id.sequence() > up_to_seq);
    }

    /// Run the rotation algorithm (§4.3): compute overflow by count/age,
    /// archive or drop it, then prune the archive to its cap.
    pub fn rotate(&self) -> RotationReport {
        let mut inner = self.inner.lock();
        let now = Timestamp::now();
        let cutoff = Timestamp::from_millis(now.as_millis() - self.config.max_age_ms);

        let overflow_count = inner.live.len().saturating_sub(self.config.max_events);
        let mut split_at = inner.live.len().saturating_sub(overflow_count);
        // Also fold in age-based overflow: anything older than `cutoff`
        // rotates regardless of count.
        while split_at > 0 && inner.live[split_at - 1].ts < cutoff {
            split_at -= 1;
        }

        let overflow: Vec<Event> = inner.live.drain(..split_at).collect();
        let mut report = RotationReport::default();

        if !overflow.is_empty() {
            if self.config.archive_on_rotation {
                let mut sorted = overflow;
                sorted.sort_by_key(|e| e.ts);
                report.archived_count = sorted.len();
                inner.archive.extend(sorted);
            } else {
                report.dropped_count = overflow.len();
            }
        }

        report.pruned_count = prune_archive(&mut inner.archive, self.config.max_archived_events);
        report.oldest_event_ts = inner.live.first().map(|e| e.ts);
        report.newest_archived_ts = inner.archive.last().map(|e| e.ts);

        debug!(
            archived = report.archived_count,
            dropped = report.dropped_count,
            pruned = report.pruned_count,
            "rotated event log"
        );
        report
    }

    /// Explicit archival entry point (§4.3: "invoked on each append and on
    /// `archiveEvents(options)`"); identical algorithm to the implicit
    /// rotation run after every append.
    pub fn archive_events(&self) -> RotationReport {
        self.rotate()
    }

    /// Archived events, oldest first.
    pub fn archived(&self) -> Vec<Event> {
        self.inner.lock().archive.clone()
    }
}

/// A saved position for [`EventLog::rollback_to`].
#[derive(Debug, Clone, Copy)]
pub struct AppendMark {
    live_len: usize,
    next_seq: u64,
}

/// Keep only the most recent `cap` events (by `ts`), returning how many
/// were pruned. Uses a min-heap over timestamps so large archives don't
/// pay a full sort on every prune.
fn prune_archive(archive: &mut Vec<Event>, cap: usize) -> usize {
    if archive.len() <= cap {
        return 0;
    }
    let overflow = archive.len() - cap;
    // Min-heap (via Reverse) keyed by ts holding the `overflow` oldest
    // events seen so far; anything that doesn't make the heap survives.
    use std::cmp::Reverse;
    let mut oldest: BinaryHeap<Reverse<(Timestamp, usize)>> = BinaryHeap::with_capacity(overflow + 1);
    for (idx, ev) in archive.iter().enumerate() {
        oldest.push(Reverse((ev.ts, idx)));
        if oldest.len() > overflow {
            oldest.pop();
        }
    }
    let drop_indices: std::collections::HashSet<usize> =
        oldest.into_iter().map(|Reverse((_, idx))| idx).collect();
    let mut kept = Vec::with_capacity(cap);
    for (idx, ev) in archive.drain(..).enumerate() {
        if !drop_indices.contains(&idx) {
            kept.push(ev);
        }
    }
    kept.sort_by_key(|e| e.ts);
    *archive = kept;
    overflow
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_core::contract::namespace::Namespace;
    use parquedb_core::Value;
    use std::collections::BTreeMap;

    fn actor() -> EntityId {
        EntityId::new(Namespace::new("users").unwrap(), "admin").unwrap()
    }

    fn make_event(seq_placeholder: u64, ns: &str, local: &str, op: Op, ts: i64) -> Event {
        Event {
            id: EventId::from_seq(seq_placeholder),
            ts: Timestamp::from_millis(ts),
            op,
            target: format!("{ns}:{local}"),
            before: None,
            after: Some(BTreeMap::from([("name".to_string(), Value::String("x".into()))])),
            entity_ids: None,
            actor: actor(),
            compressed: false,
        }
    }

    #[test]
    fn append_assigns_monotonic_ids() {
        let log = EventLog::new(EventLogConfig::default());
        let e1 = log.append(make_event(0, "posts", "1", Op::Create, 100));
        let e2 = log.append(make_event(0, "posts", "2", Op::Create, 200));
        assert_eq!(e1.id.sequence(), 1);
        assert_eq!(e2.id.sequence(), 2);
    }

    #[test]
    fn get_events_filters_by_entity_and_sorts() {
        let log = EventLog::new(EventLogConfig::default());
        let id = EntityId::parse("posts/1").unwrap();
        log.append(make_event(0, "posts", "2", Op::Create, 100));
        log.append(make_event(0, "posts", "1", Op::Create, 200));
        log.append(make_event(0, "posts", "1", Op::Update, 300));
        let events = log.get_events(&id);
        assert_eq!(events.len(), 2);
        assert!(events[0].id < events[1].id);
    }

    #[test]
    fn get_events_by_time_range_is_half_open() {
        let log = EventLog::new(EventLogConfig::default());
        log.append(make_event(0, "posts", "1", Op::Create, 100));
        log.append(make_event(0, "posts", "2", Op::Create, 200));
        log.append(make_event(0, "posts", "3", Op::Create, 300));
        let events = log.get_events_by_time_range(Timestamp::from_millis(100), Timestamp::from_millis(300));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn rollback_undoes_appends_since_mark() {
        let log = EventLog::new(EventLogConfig::default());
        log.append(make_event(0, "posts", "1", Op::Create, 100));
        let mark = log.mark();
        log.append(make_event(0, "posts", "2", Op::Create, 200));
        assert_eq!(log.live_count(), 2);
        log.rollback_to(mark);
        assert_eq!(log.live_count(), 1);
        assert_eq!(log.next_seq(), 2);
    }

    #[test]
    fn rotation_drops_overflow_when_archiving_disabled() {
        let config = EventLogConfig { max_events: 2, ..EventLogConfig::default() };
        let log = EventLog::new(config);
        for i in 0..5 {
            log.append(make_event(0, "posts", &i.to_string(), Op::Create, 100 + i));
        }
        let report = log.rotate();
        assert_eq!(report.dropped_count, 3);
        assert_eq!(log.live_count(), 2);
        assert!(log.archived().is_empty());
    }

    #[test]
    fn rotation_archives_overflow_when_enabled() {
        let config = EventLogConfig { max_events: 2, archive_on_rotation: true, ..EventLogConfig::default() };
        let log = EventLog::new(config);
        for i in 0..5 {
            log.append(make_event(0, "posts", &i.to_string(), Op::Create, 100 + i));
        }
        let report = log.rotate();
        assert_eq!(report.archived_count, 3);
        assert_eq!(log.archived().len(), 3);
    }

    #[test]
    fn archive_pruning_keeps_most_recent_cap() {
        let config = EventLogConfig {
            max_events: 0,
            archive_on_rotation: true,
            max_archived_events: 3,
            ..EventLogConfig::default()
        };
        let log = EventLog::new(config);
        for i in 0..10 {
            log.append(make_event(0, "posts", &i.to_string(), Op::Create, 100 + i));
        }
        log.rotate();
        let archived = log.archived();
        assert_eq!(archived.len(), 3);
        let timestamps: Vec<i64> = archived.iter().map(|e| e.ts.as_millis()).collect();
        assert_eq!(timestamps, vec![107, 108, 109]);
    }
}
