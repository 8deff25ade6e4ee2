//! Snapshot types for persisting and restoring a change log.
//!
//! A snapshot is the whole durable state of a [`crate::ChangeLog`]: the
//! pending changes, the next sequence number and the committed cursor. It is
//! what an in-memory store writes out to survive a restart.

use crate::{error::Result, Error, PendingChange, Seq, SyncCursor};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Next sequence number the log will assign
    pub next_seq: Seq,
    /// Last committed cursor
    pub cursor: SyncCursor,
    /// Pending changes in sequence order
    pub pending: Vec<PendingChange>,
}

impl ChangeLogSnapshot {
    /// Create a snapshot with no pending changes.
    pub fn new(next_seq: Seq, cursor: SyncCursor) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            next_seq,
            cursor,
            pending: Vec::new(),
        }
    }

    pub fn add_pending(&mut self, change: PendingChange) {
        self.pending.push(change);
    }

    /// Check the ordering invariants a log relies on.
    ///
    /// Sequence numbers must be strictly increasing and below `next_seq`, so a
    /// restored log can neither reorder changes nor hand out a used number.
    pub fn validate(&self) -> Result<()> {
        if self.next_seq == 0 {
            return Err(Error::InvalidSnapshot("next sequence number is 0".into()));
        }

        let mut previous: Option<Seq> = None;
        for change in &self.pending {
            if previous.is_some_and(|p| change.seq <= p) {
                return Err(Error::InvalidSnapshot(format!(
                    "pending changes out of order at seq {}",
                    change.seq
                )));
            }
            if change.seq >= self.next_seq {
                return Err(Error::InvalidSnapshot(format!(
                    "seq {} is not below next seq {}",
                    change.seq, self.next_seq
                )));
            }
            previous = Some(change.seq);
        }

        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub next_seq: Seq,
    pub pending_count: usize,
    /// Whether the log has completed at least one sync
    pub has_cursor: bool,
}

impl From<&ChangeLogSnapshot> for SnapshotMetadata {
    fn from(snapshot: &ChangeLogSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            next_seq: snapshot.next_seq,
            pending_count: snapshot.pending.len(),
            has_cursor: !snapshot.cursor.is_initial(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewChange;
    use serde_json::json;

    fn pending(seq: Seq) -> PendingChange {
        PendingChange::from_new(
            seq,
            NewChange::update("note-1", "notes", json!({"body": seq}), 1, seq * 10),
        )
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = ChangeLogSnapshot::new(1, SyncCursor::initial());
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert!(snapshot.pending.is_empty());
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn json_roundtrip() {
        let mut snapshot = ChangeLogSnapshot::new(4, SyncCursor::new("c-9"));
        snapshot.add_pending(pending(1));
        snapshot.add_pending(pending(3));

        let json = snapshot.to_json().unwrap();
        let restored = ChangeLogSnapshot::from_json(&json).unwrap();

        assert_eq!(snapshot, restored);
        assert!(json.contains("nextSeq"));
    }

    #[test]
    fn rejects_out_of_order_pending() {
        let mut snapshot = ChangeLogSnapshot::new(4, SyncCursor::initial());
        snapshot.add_pending(pending(3));
        snapshot.add_pending(pending(2));

        assert!(matches!(snapshot.validate(), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn rejects_seq_at_or_above_next() {
        let mut snapshot = ChangeLogSnapshot::new(2, SyncCursor::initial());
        snapshot.add_pending(pending(2));

        assert!(matches!(snapshot.validate(), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn future_format_version_rejected() {
        let json = r#"{"formatVersion":99,"nextSeq":1,"cursor":null,"pending":[]}"#;
        let result = ChangeLogSnapshot::from_json(json);

        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn invalid_json_rejected() {
        assert!(matches!(
            ChangeLogSnapshot::from_json("not json"),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn metadata_from_snapshot() {
        let mut snapshot = ChangeLogSnapshot::new(3, SyncCursor::new("c"));
        snapshot.add_pending(pending(2));

        let meta = SnapshotMetadata::from(&snapshot);
        assert_eq!(meta.next_seq, 3);
        assert_eq!(meta.pending_count, 1);
        assert!(meta.has_cursor);
    }
}
