//! # Tidesync Engine
//!
//! The deterministic core of a background sync worker for offline-capable apps.
//!
//! This crate holds everything about a sync cycle that can be decided without
//! touching a disk or a socket: the record and change model, the in-memory
//! change log, conflict resolution, backoff math and the cycle result the host
//! application eventually sees. The async side (durable storage, transport,
//! retries, scheduling) lives in `tidesync-worker`.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Testable**: Pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`SyncRecord`] is the server's view of one logical entity: a stable ID, a
//! server-assigned version that never decreases, an opaque JSON payload, a
//! timestamp and a tombstone flag.
//!
//! ### Pending changes
//!
//! Local mutations are recorded as [`PendingChange`]s in a [`ChangeLog`]. Each
//! change receives a local sequence number at enqueue time; the log hands
//! changes out in sequence order and only forgets them once they are
//! acknowledged, all or nothing.
//!
//! ### Resolution
//!
//! The [`Resolver`] decides, for every entity touched on both sides, whether
//! the local change or the remote record wins:
//! - deletes win over concurrent updates
//! - record types that declare [`MergeCapability::ShallowObject`] are merged
//! - everything else is last-writer-wins on timestamps
//!
//! ## Quick Start
//!
//! ```rust
//! use tidesync_engine::{
//!     ChangeLog, NewChange, ResolvePolicy, Resolver, Schema, SyncRecord,
//! };
//! use serde_json::json;
//!
//! let schema = Schema::permissive();
//! let mut log = ChangeLog::new();
//!
//! // A local edit made at t=1000
//! log.enqueue(NewChange::update("note-1", "notes", json!({"body": "draft"}), 3, 1000));
//!
//! // The server has a newer copy, written at t=2000
//! let remote = SyncRecord::new("note-1", "notes", 4, json!({"body": "final"}), 2000);
//!
//! let drained = log.drain();
//! let batch = Resolver::new(&schema, ResolvePolicy::LastWriterWins)
//!     .resolve_batch(&drained.changes, &[remote]);
//!
//! assert!(batch.outbound.is_empty());
//! assert_eq!(batch.superseded, vec![1]);
//! assert_eq!(batch.conflicts.len(), 1);
//! ```
//!
//! ## Persistence
//!
//! [`ChangeLog::export_state`] and [`ChangeLog::import_state`] move the log
//! through a [`ChangeLogSnapshot`], which serializes to JSON with a stable
//! layout.

pub mod backoff;
pub mod change;
pub mod cursor;
pub mod cycle;
pub mod error;
pub mod log;
pub mod record;
pub mod resolve;
pub mod schema;
pub mod snapshot;

// Re-export main types at crate root
pub use backoff::BackoffPolicy;
pub use change::{ChangeKind, IdempotencyKey, NewChange, OutboundChange, PendingChange};
pub use cursor::SyncCursor;
pub use cycle::{CycleResult, FailureReason, Outcome};
pub use error::Error;
pub use log::{ChangeLog, Drained};
pub use record::SyncRecord;
pub use resolve::{
    BatchResolution, Conflict, ConflictKind, Decision, Resolution, ResolvePolicy, Resolver,
};
pub use schema::{FieldDef, FieldType, MergeCapability, Schema, TypeSchema};
pub use snapshot::{ChangeLogSnapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type RecordId = String;
pub type RecordType = String;
pub type Version = u64;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
/// Local sequence number assigned to a pending change.
pub type Seq = u64;
