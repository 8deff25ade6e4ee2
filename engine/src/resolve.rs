//! Conflict resolution between pending local changes and remote records.
//!
//! Resolution is a pure function of its inputs: the same pending changes and
//! the same remote records always yield the same decisions, so a retried cycle
//! settles conflicts exactly the way the failed attempt would have.
//!
//! # Rules
//!
//! For one entity, with its latest pending change and the newest remote
//! revision:
//!
//! 1. No remote revision, or one the local edit already built on: local applies
//! 2. A remote revision that is the local change itself, applied by the server
//!    but never acknowledged, supersedes it without a conflict
//! 3. Deletes win over concurrent updates, whichever side deleted
//! 4. Mergeable types with object payloads on both sides are merged per key
//! 5. Otherwise the [`ResolvePolicy`] picks a side; last-writer-wins compares
//!    `modified_at` and gives exact ties to the server copy

use crate::{
    schema::MergeCapability, OutboundChange, PendingChange, RecordId, RecordType, Schema, Seq,
    SyncRecord, Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// How competing edits are settled once deletes and merges are ruled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolvePolicy {
    /// Later `modified_at` wins; ties go to the server copy (default)
    #[default]
    LastWriterWins,
    /// Server data is authoritative
    RemoteWins,
    /// Device data is authoritative
    LocalWins,
}

impl std::str::FromStr for ResolvePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "lastwriterwins" | "lww" => Ok(ResolvePolicy::LastWriterWins),
            "remotewins" => Ok(ResolvePolicy::RemoteWins),
            "localwins" => Ok(ResolvePolicy::LocalWins),
            other => Err(format!("unknown resolve policy: {other}")),
        }
    }
}

/// Outcome for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Push the local change
    ApplyLocal,
    /// Keep the remote record; the local change is superseded
    ApplyRemote,
    /// Push and keep this merged payload
    Merge(Value),
}

/// Why two sides were found competing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    /// Both sides edited; one was picked
    ConcurrentEdit,
    /// One side deleted and the delete won
    DeleteWins,
    /// Both sides edited and were merged
    Merged,
    /// Neither side could be preferred on its merits
    Ambiguous,
}

/// A recorded conflict, reported back to the host in the cycle result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub record_id: RecordId,
    pub record_type: RecordType,
    /// Latest local change involved
    pub local_seq: Seq,
    pub local_modified_at: Timestamp,
    pub remote_version: Version,
    pub remote_modified_at: Timestamp,
    pub kind: ConflictKind,
    pub resolution: Resolution,
}

/// The resolution for one entity plus the conflict it produced, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub resolution: Resolution,
    pub conflict: Option<Conflict>,
}

impl Decision {
    fn clean(resolution: Resolution) -> Self {
        Self {
            resolution,
            conflict: None,
        }
    }
}

/// What one cycle should do with a batch of pending changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResolution {
    /// Changes to upload, in sequence order
    pub outbound: Vec<OutboundChange>,
    /// Pending changes the server copy overrode; acknowledged without upload
    pub superseded: Vec<Seq>,
    /// Remote records to apply locally, in identifier order
    pub accepted_remote: Vec<SyncRecord>,
    /// Conflicts, in identifier order
    pub conflicts: Vec<Conflict>,
}

impl BatchResolution {
    /// Sequence numbers of everything that will be uploaded.
    pub fn outbound_seqs(&self) -> Vec<Seq> {
        self.outbound.iter().map(|c| c.key.seq).collect()
    }

    /// Pending changes a receipt acknowledging `acked` settles.
    ///
    /// Per entity, every outbound change up to the last acknowledged one is
    /// settled: the server already holds a later state of that entity, and
    /// uploading an earlier change afterwards would roll it back. Changes
    /// after the last acknowledged one stay pending. Superseded changes are
    /// always settled.
    pub fn settled_by(&self, acked: &[Seq]) -> Vec<Seq> {
        let acked: BTreeSet<Seq> = acked.iter().copied().collect();
        let mut by_entity: BTreeMap<&str, Vec<Seq>> = BTreeMap::new();
        for change in &self.outbound {
            by_entity
                .entry(change.key.record_id.as_str())
                .or_default()
                .push(change.key.seq);
        }

        let mut settled = self.superseded.clone();
        for seqs in by_entity.into_values() {
            if let Some(last) = seqs.iter().rposition(|seq| acked.contains(seq)) {
                settled.extend_from_slice(&seqs[..=last]);
            }
        }
        settled.sort_unstable();
        settled
    }
}

/// Settles local changes against remote records.
pub struct Resolver<'a> {
    schema: &'a Schema,
    policy: ResolvePolicy,
}

impl<'a> Resolver<'a> {
    pub fn new(schema: &'a Schema, policy: ResolvePolicy) -> Self {
        Self { schema, policy }
    }

    /// Decide one entity: `local` is its latest pending change.
    pub fn resolve(&self, local: &PendingChange, remote: Option<&SyncRecord>) -> Decision {
        let Some(remote) = remote else {
            return Decision::clean(Resolution::ApplyLocal);
        };

        // The remote revision is one this edit already saw
        if local.base_version.is_some_and(|base| base >= remote.version) {
            return Decision::clean(Resolution::ApplyLocal);
        }

        if is_own_write(local, remote) {
            return Decision::clean(Resolution::ApplyRemote);
        }

        let (resolution, kind) = match (local.is_delete(), remote.deleted) {
            (true, true) => return Decision::clean(Resolution::ApplyRemote),
            (true, false) => (Resolution::ApplyLocal, ConflictKind::DeleteWins),
            (false, true) => (Resolution::ApplyRemote, ConflictKind::DeleteWins),
            (false, false) => self.resolve_edits(local, remote),
        };

        Decision {
            conflict: Some(Conflict {
                record_id: local.record_id.clone(),
                record_type: local.record_type.clone(),
                local_seq: local.seq,
                local_modified_at: local.modified_at,
                remote_version: remote.version,
                remote_modified_at: remote.modified_at,
                kind,
                resolution: resolution.clone(),
            }),
            resolution,
        }
    }

    fn resolve_edits(&self, local: &PendingChange, remote: &SyncRecord) -> (Resolution, ConflictKind) {
        if self.schema.merge_capability(&local.record_type) == MergeCapability::ShallowObject {
            if let Some(merged) = merge_shallow(local, remote) {
                return (Resolution::Merge(merged), ConflictKind::Merged);
            }
        }

        match self.policy {
            ResolvePolicy::LocalWins => (Resolution::ApplyLocal, ConflictKind::ConcurrentEdit),
            ResolvePolicy::RemoteWins => (Resolution::ApplyRemote, ConflictKind::ConcurrentEdit),
            ResolvePolicy::LastWriterWins => match local.modified_at.cmp(&remote.modified_at) {
                Ordering::Greater => (Resolution::ApplyLocal, ConflictKind::ConcurrentEdit),
                Ordering::Less => (Resolution::ApplyRemote, ConflictKind::ConcurrentEdit),
                Ordering::Equal => (Resolution::ApplyRemote, ConflictKind::Ambiguous),
            },
        }
    }

    /// Resolve every drained change against the fetched remote records.
    ///
    /// Changes are grouped per entity; the latest change decides for the
    /// whole group so that same-entity changes are pushed or dropped together.
    /// Remote records without a local counterpart are accepted as they are.
    pub fn resolve_batch(&self, changes: &[PendingChange], remote: &[SyncRecord]) -> BatchResolution {
        let mut newest_remote: BTreeMap<&str, &SyncRecord> = BTreeMap::new();
        for record in remote {
            newest_remote
                .entry(record.id.as_str())
                .and_modify(|seen| {
                    if record.version > seen.version {
                        *seen = record;
                    }
                })
                .or_insert(record);
        }

        let mut by_entity: BTreeMap<&str, Vec<&PendingChange>> = BTreeMap::new();
        for change in changes {
            by_entity.entry(change.record_id.as_str()).or_default().push(change);
        }

        let mut batch = BatchResolution::default();

        for (id, mut group) in by_entity {
            group.sort_by_key(|c| c.seq);
            let Some((latest, earlier)) = group.split_last() else {
                continue;
            };
            let remote = newest_remote.remove(id);
            let decision = self.resolve(latest, remote);

            match decision.resolution {
                Resolution::ApplyLocal => {
                    batch.outbound.extend(group.iter().map(|c| c.to_outbound(None)));
                }
                Resolution::ApplyRemote => {
                    batch.superseded.extend(group.iter().map(|c| c.seq));
                    batch.accepted_remote.extend(remote.cloned());
                }
                Resolution::Merge(merged) => {
                    batch.outbound.extend(earlier.iter().map(|c| c.to_outbound(None)));
                    batch.outbound.push(latest.to_outbound(Some(merged.clone())));
                    if let Some(remote) = remote {
                        let mut record = remote.clone();
                        record.payload = merged;
                        record.modified_at = record.modified_at.max(latest.modified_at);
                        batch.accepted_remote.push(record);
                    }
                }
            }
            batch.conflicts.extend(decision.conflict);
        }

        batch.accepted_remote.extend(newest_remote.into_values().cloned());
        batch.accepted_remote.sort_by(|a, b| a.id.cmp(&b.id));
        batch.outbound.sort_by_key(|c| c.key.seq);
        batch.superseded.sort_unstable();
        batch
    }
}

/// Whether `remote` is the revision the server made out of `local`.
fn is_own_write(local: &PendingChange, remote: &SyncRecord) -> bool {
    if local.record_type != remote.record_type || local.modified_at != remote.modified_at {
        return false;
    }
    match (local.is_delete(), remote.deleted) {
        (true, true) => true,
        (false, false) => local.payload.as_ref() == Some(&remote.payload),
        _ => false,
    }
}

/// Key-by-key union of two object payloads, one level deep.
///
/// Local keys override remote ones when the local edit is at least as new;
/// otherwise local keys only fill gaps. `None` if either side is not an object.
fn merge_shallow(local: &PendingChange, remote: &SyncRecord) -> Option<Value> {
    let local_fields = local.payload.as_ref()?.as_object()?;
    let mut merged = remote.payload.as_object()?.clone();
    let local_newer = local.modified_at >= remote.modified_at;

    for (key, value) in local_fields {
        if local_newer {
            merged.insert(key.clone(), value.clone());
        } else {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Some(Value::Object(merged))
}
