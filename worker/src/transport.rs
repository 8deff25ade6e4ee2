//! The network boundary.
//!
//! The worker never speaks a wire protocol itself; the host injects a
//! [`Transport`] that knows how to reach its server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tidesync_engine::{IdempotencyKey, OutboundChange, SyncCursor, SyncRecord};

/// One page of remote changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchPage {
    /// Remote record revisions after the requested cursor
    pub records: Vec<SyncRecord>,
    /// Cursor covering everything up to and including this page
    pub cursor: SyncCursor,
    /// Whether another page follows
    pub has_more: bool,
}

/// The server's confirmation of an upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckReceipt {
    /// Keys of the changes now durably stored remotely
    pub accepted: Vec<IdempotencyKey>,
    /// Cursor past the uploaded writes, if nothing else was written since the
    /// client's last fetch. Lets the client skip re-fetching its own changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<SyncCursor>,
}

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Network unavailable: {0}")]
    Unavailable(String),

    #[error("Server responded with status {status}")]
    Server { status: u16 },

    #[error("Credentials rejected")]
    AuthRejected,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Transport timed out")]
    Timeout,
}

/// Client side of the sync protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch remote changes written after `cursor`.
    async fn fetch_changes_since(&self, cursor: &SyncCursor) -> Result<FetchPage, TransportError>;

    /// Upload changes. The server must deduplicate on each change's key.
    async fn push_changes(&self, changes: Vec<OutboundChange>)
        -> Result<AckReceipt, TransportError>;
}
