//! ChangeLog - the in-memory pending-change queue.
//!
//! The log owns every local change from the moment it is enqueued until the
//! server has acknowledged it. It never reorders changes and never drops one
//! on its own: removal only happens through [`ChangeLog::acknowledge`] or
//! [`ChangeLog::commit`].

use crate::{
    error::Result, ChangeLogSnapshot, Error, NewChange, PendingChange, Seq, SnapshotMetadata,
    SyncCursor,
};
use std::collections::{BTreeMap, BTreeSet};

/// The pending changes handed out for one sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Drained {
    /// Pending changes in sequence order
    pub changes: Vec<PendingChange>,
    /// Highest sequence number included, if any
    pub through: Option<Seq>,
}

impl Drained {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn seqs(&self) -> Vec<Seq> {
        self.changes.iter().map(|c| c.seq).collect()
    }

    /// Whether `seq` was enqueued before this drain was taken.
    pub fn covers(&self, seq: Seq) -> bool {
        self.through.is_some_and(|through| seq <= through)
    }
}

/// Ordered queue of pending local changes plus the last committed cursor.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    /// Next sequence number to assign
    next_seq: Seq,
    /// Pending changes keyed by sequence number
    pending: BTreeMap<Seq, PendingChange>,
    /// Last fully committed sync point
    cursor: SyncCursor,
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeLog {
    /// Create an empty log. Sequence numbers start at 1.
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            pending: BTreeMap::new(),
            cursor: SyncCursor::initial(),
        }
    }

    /// Append a change and return it with its assigned sequence number.
    pub fn enqueue(&mut self, change: NewChange) -> PendingChange {
        let seq = self.next_seq;
        self.next_seq += 1;

        let pending = PendingChange::from_new(seq, change);
        self.pending.insert(seq, pending.clone());
        pending
    }

    /// Return every pending change in sequence order without removing any.
    pub fn drain(&self) -> Drained {
        let changes: Vec<_> = self.pending.values().cloned().collect();
        let through = changes.last().map(|c| c.seq);
        Drained { changes, through }
    }

    /// Remove the given changes, all or nothing.
    ///
    /// Duplicate sequence numbers are tolerated. If any number is not pending,
    /// nothing is removed.
    pub fn acknowledge(&mut self, seqs: &[Seq]) -> Result<usize> {
        let unique: BTreeSet<Seq> = seqs.iter().copied().collect();
        if let Some(missing) = unique.iter().find(|s| !self.pending.contains_key(s)) {
            return Err(Error::UnknownSequence(*missing));
        }

        for seq in &unique {
            self.pending.remove(seq);
        }
        Ok(unique.len())
    }

    /// Acknowledge `seqs` and move the cursor in one step.
    pub fn commit(&mut self, seqs: &[Seq], cursor: SyncCursor) -> Result<usize> {
        let removed = self.acknowledge(seqs)?;
        self.cursor = cursor;
        Ok(removed)
    }

    /// Note a failed upload on each listed change. Unknown numbers are ignored.
    pub fn record_failure(&mut self, seqs: &[Seq], error: &str) {
        for seq in seqs {
            if let Some(change) = self.pending.get_mut(seq) {
                change.attempts = change.attempts.saturating_add(1);
                change.last_error = Some(error.to_string());
            }
        }
    }

    pub fn get(&self, seq: Seq) -> Option<&PendingChange> {
        self.pending.get(&seq)
    }

    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    pub fn set_cursor(&mut self, cursor: SyncCursor) {
        self.cursor = cursor;
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Export the log as a snapshot.
    pub fn export_state(&self) -> ChangeLogSnapshot {
        let mut snapshot = ChangeLogSnapshot::new(self.next_seq, self.cursor.clone());
        for change in self.pending.values() {
            snapshot.add_pending(change.clone());
        }
        snapshot
    }

    /// Replace the log's contents with a snapshot.
    pub fn import_state(&mut self, snapshot: ChangeLogSnapshot) -> Result<()> {
        snapshot.validate()?;

        self.next_seq = snapshot.next_seq;
        self.cursor = snapshot.cursor;
        self.pending = snapshot
            .pending
            .into_iter()
            .map(|change| (change.seq, change))
            .collect();
        Ok(())
    }

    /// Build a log straight from a snapshot.
    pub fn from_snapshot(snapshot: ChangeLogSnapshot) -> Result<Self> {
        let mut log = Self::new();
        log.import_state(snapshot)?;
        Ok(log)
    }

    /// Get snapshot metadata without full export.
    pub fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            format_version: crate::SNAPSHOT_FORMAT_VERSION,
            next_seq: self.next_seq,
            pending_count: self.pending.len(),
            has_cursor: !self.cursor.is_initial(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edit(id: &str, ts: u64) -> NewChange {
        NewChange::update(id, "notes", json!({"body": ts}), 1, ts)
    }

    #[test]
    fn enqueue_assigns_increasing_seqs() {
        let mut log = ChangeLog::new();
        let a = log.enqueue(edit("e1", 1));
        let b = log.enqueue(edit("e2", 2));
        let c = log.enqueue(edit("e1", 3));

        assert_eq!((a.seq, b.seq, c.seq), (1, 2, 3));
        assert_eq!(log.pending_count(), 3);
    }

    #[test]
    fn drain_preserves_enqueue_order() {
        let mut log = ChangeLog::new();
        log.enqueue(edit("e1", 1));
        log.enqueue(edit("e1", 2));

        let drained = log.drain();
        assert_eq!(drained.seqs(), vec![1, 2]);
        assert_eq!(drained.through, Some(2));
        assert_eq!(drained.changes[0].modified_at, 1);
        assert_eq!(drained.changes[1].modified_at, 2);

        // Draining does not consume
        assert_eq!(log.pending_count(), 2);

        log.acknowledge(&[1, 2]).unwrap();
        assert!(log.drain().is_empty());
        assert_eq!(log.drain().through, None);
    }

    #[test]
    fn drain_covers_only_earlier_changes() {
        let mut log = ChangeLog::new();
        assert!(!log.drain().covers(1));

        log.enqueue(edit("e1", 1));
        log.enqueue(edit("e2", 2));
        let drained = log.drain();
        log.enqueue(edit("e1", 3));

        assert!(drained.covers(1));
        assert!(drained.covers(2));
        assert!(!drained.covers(3));
    }

    #[test]
    fn acknowledge_is_all_or_nothing() {
        let mut log = ChangeLog::new();
        log.enqueue(edit("e1", 1));
        log.enqueue(edit("e2", 2));

        let result = log.acknowledge(&[1, 9]);
        assert_eq!(result, Err(Error::UnknownSequence(9)));
        assert_eq!(log.pending_count(), 2);

        assert_eq!(log.acknowledge(&[2, 2]).unwrap(), 1);
        assert_eq!(log.drain().seqs(), vec![1]);
    }

    #[test]
    fn seqs_are_not_reused_after_acknowledge() {
        let mut log = ChangeLog::new();
        log.enqueue(edit("e1", 1));
        log.acknowledge(&[1]).unwrap();

        let next = log.enqueue(edit("e1", 2));
        assert_eq!(next.seq, 2);
    }

    #[test]
    fn commit_moves_cursor_only_on_success() {
        let mut log = ChangeLog::new();
        log.enqueue(edit("e1", 1));

        assert!(log.commit(&[5], SyncCursor::new("c1")).is_err());
        assert!(log.cursor().is_initial());

        log.commit(&[1], SyncCursor::new("c1")).unwrap();
        assert_eq!(log.cursor().token(), Some("c1"));
        assert!(log.is_empty());
    }

    #[test]
    fn record_failure_keeps_changes() {
        let mut log = ChangeLog::new();
        log.enqueue(edit("e1", 1));

        log.record_failure(&[1, 42], "network unavailable");
        log.record_failure(&[1], "timeout");

        let change = log.get(1).unwrap();
        assert_eq!(change.attempts, 2);
        assert_eq!(change.last_error.as_deref(), Some("timeout"));
        assert_eq!(log.pending_count(), 1);
    }

    #[test]
    fn export_import_roundtrip() {
        let mut log = ChangeLog::new();
        log.enqueue(edit("e1", 1));
        log.enqueue(edit("e2", 2));
        log.acknowledge(&[1]).unwrap();
        log.set_cursor(SyncCursor::new("c7"));

        let json = log.export_state().to_json().unwrap();
        let restored =
            ChangeLog::from_snapshot(ChangeLogSnapshot::from_json(&json).unwrap()).unwrap();

        assert_eq!(restored.drain(), log.drain());
        assert_eq!(restored.cursor(), log.cursor());

        // Numbering continues where the original left off
        let mut restored = restored;
        assert_eq!(restored.enqueue(edit("e3", 3)).seq, 3);
    }

    #[test]
    fn snapshot_metadata() {
        let mut log = ChangeLog::new();
        log.enqueue(edit("e1", 1));

        let meta = log.snapshot_metadata();
        assert_eq!(meta.next_seq, 2);
        assert_eq!(meta.pending_count, 1);
        assert!(!meta.has_cursor);
    }
}
