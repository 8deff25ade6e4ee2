//! The server-side view of a syncable entity.

use crate::{error::Result, Error, RecordId, RecordType, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// A record as known by the remote store.
///
/// The `version` is assigned by the server and only ever moves forward. The
/// payload is opaque to the engine; a new revision is a new `SyncRecord`, never
/// an in-place edit of an uploaded one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    /// Stable identifier of the logical entity
    pub id: RecordId,
    /// Registered record type (see [`crate::Schema`])
    pub record_type: RecordType,
    /// Server-assigned revision, monotonic per entity
    pub version: Version,
    /// The data payload
    pub payload: serde_json::Value,
    /// Server timestamp of this revision (milliseconds since epoch)
    pub modified_at: Timestamp,
    /// Tombstone flag
    pub deleted: bool,
}

impl SyncRecord {
    /// Create a live record revision.
    pub fn new(
        id: impl Into<RecordId>,
        record_type: impl Into<RecordType>,
        version: Version,
        payload: serde_json::Value,
        modified_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            version,
            payload,
            modified_at,
            deleted: false,
        }
    }

    /// Create a tombstone revision.
    pub fn tombstone(
        id: impl Into<RecordId>,
        record_type: impl Into<RecordType>,
        version: Version,
        modified_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            version,
            payload: serde_json::Value::Null,
            modified_at,
            deleted: true,
        }
    }

    /// Check if record is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Replace this revision with a newer one of the same entity.
    ///
    /// Fails if `next` names another entity or carries a lower version.
    /// An equal version is accepted so replaying a fetch is harmless.
    pub fn advance_to(&mut self, next: SyncRecord) -> Result<()> {
        if next.id != self.id {
            return Err(Error::IdentifierMismatch {
                expected: self.id.clone(),
                actual: next.id,
            });
        }
        if next.version < self.version {
            return Err(Error::VersionRegression {
                id: self.id.clone(),
                current: self.version,
                attempted: next.version,
            });
        }
        *self = next;
        Ok(())
    }
}
