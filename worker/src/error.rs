//! Unified error handling for the worker.

use crate::store::StorageError;
use crate::transport::TransportError;
use tidesync_engine::FailureReason;

/// Why a sync attempt failed.
///
/// The host never sees this type directly: every error is folded into a
/// [`tidesync_engine::CycleResult`] with the matching [`FailureReason`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Server error (status {status})")]
    ServerError { status: u16 },

    #[error("Authentication rejected")]
    AuthRejected,

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Stable reason code for this error.
    pub fn reason(&self) -> FailureReason {
        match self {
            SyncError::StorageUnavailable(_) => FailureReason::StorageUnavailable,
            SyncError::NetworkUnavailable(_) => FailureReason::NetworkUnavailable,
            SyncError::ServerError { .. } => FailureReason::ServerError,
            SyncError::AuthRejected => FailureReason::AuthRejected,
            SyncError::MalformedData(_) => FailureReason::MalformedData,
            SyncError::Timeout => FailureReason::Timeout,
            SyncError::Cancelled => FailureReason::Cancelled,
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        self.reason().is_transient()
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::StorageUnavailable(err.to_string())
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::StorageUnavailable(err.to_string())
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(msg) => SyncError::NetworkUnavailable(msg),
            TransportError::AuthRejected => SyncError::AuthRejected,
            TransportError::Server { status: 401 | 403 } => SyncError::AuthRejected,
            TransportError::Server { status }
                if status == 408 || status == 429 || (500..600).contains(&status) =>
            {
                SyncError::ServerError { status }
            }
            TransportError::Server { status } => {
                SyncError::MalformedData(format!("server refused request with status {status}"))
            }
            TransportError::Rejected(msg) => SyncError::MalformedData(msg),
            TransportError::Timeout => SyncError::Timeout,
        }
    }
}

impl From<tidesync_engine::Error> for SyncError {
    fn from(err: tidesync_engine::Error) -> Self {
        SyncError::MalformedData(err.to_string())
    }
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, SyncError>;
