//! Local change types.
//!
//! Local mutations are not synced as records but as changes: each one is
//! queued with a sequence number and replayed to the server in that order.

use crate::{RecordId, RecordType, Seq, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a change does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    /// Stable lowercase name, as stored on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }

    /// Parse the stored name back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ChangeKind::Create),
            "update" => Some(ChangeKind::Update),
            "delete" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation as reported by a data-mutation site, before it is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChange {
    /// Entity the change applies to
    pub record_id: RecordId,
    /// Registered record type
    pub record_type: RecordType,
    /// Operation kind
    pub kind: ChangeKind,
    /// Full replacement payload; absent for deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Server version the edit was based on, if the entity was known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_version: Option<Version>,
    /// Local mutation timestamp
    pub modified_at: Timestamp,
}

impl NewChange {
    /// A locally created entity.
    pub fn create(
        record_id: impl Into<RecordId>,
        record_type: impl Into<RecordType>,
        payload: serde_json::Value,
        modified_at: Timestamp,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            record_type: record_type.into(),
            kind: ChangeKind::Create,
            payload: Some(payload),
            base_version: None,
            modified_at,
        }
    }

    /// A local edit of an entity last seen at `base_version`.
    pub fn update(
        record_id: impl Into<RecordId>,
        record_type: impl Into<RecordType>,
        payload: serde_json::Value,
        base_version: Version,
        modified_at: Timestamp,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            record_type: record_type.into(),
            kind: ChangeKind::Update,
            payload: Some(payload),
            base_version: Some(base_version),
            modified_at,
        }
    }

    /// A local delete of an entity last seen at `base_version`.
    pub fn delete(
        record_id: impl Into<RecordId>,
        record_type: impl Into<RecordType>,
        base_version: Version,
        modified_at: Timestamp,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            record_type: record_type.into(),
            kind: ChangeKind::Delete,
            payload: None,
            base_version: Some(base_version),
            modified_at,
        }
    }
}

/// Key under which the server deduplicates uploads.
///
/// Re-sending a change with the same key must not apply it twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyKey {
    pub record_id: RecordId,
    pub seq: Seq,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.record_id, self.seq)
    }
}

/// A queued change, owned by the change log until acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    /// Local sequence number, strictly increasing in enqueue order
    pub seq: Seq,
    pub record_id: RecordId,
    pub record_type: RecordType,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_version: Option<Version>,
    pub modified_at: Timestamp,
    /// Failed upload attempts so far
    #[serde(default)]
    pub attempts: u32,
    /// Last upload error, for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingChange {
    /// Queue `change` under sequence number `seq`.
    pub fn from_new(seq: Seq, change: NewChange) -> Self {
        Self {
            seq,
            record_id: change.record_id,
            record_type: change.record_type,
            kind: change.kind,
            payload: change.payload,
            base_version: change.base_version,
            modified_at: change.modified_at,
            attempts: 0,
            last_error: None,
        }
    }

    /// The upload deduplication key: (entity identifier, local sequence number).
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey {
            record_id: self.record_id.clone(),
            seq: self.seq,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Delete
    }

    /// Build the wire form of this change.
    ///
    /// `payload` replaces the queued payload, e.g. with a merge result.
    pub fn to_outbound(&self, payload: Option<serde_json::Value>) -> OutboundChange {
        OutboundChange {
            key: self.idempotency_key(),
            record_type: self.record_type.clone(),
            kind: self.kind,
            payload: payload.or_else(|| self.payload.clone()),
            base_version: self.base_version,
            modified_at: self.modified_at,
        }
    }
}

/// A change as handed to the transport for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundChange {
    pub key: IdempotencyKey,
    pub record_type: RecordType,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_version: Option<Version>,
    pub modified_at: Timestamp,
}

impl OutboundChange {
    pub fn record_id(&self) -> &RecordId {
        &self.key.record_id
    }
}
