//! The result of one sync cycle, as reported to the host application.

use crate::Conflict;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// Everything fetched, pushed and committed
    Success,
    /// Some pushed changes were not acknowledged; they stay pending
    Partial,
    /// The cycle gave up; see [`CycleResult::failure`]
    Failed,
    /// A periodic trigger arrived too soon after the last successful cycle
    Skipped,
}

/// Stable reason codes for failed cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    StorageUnavailable,
    NetworkUnavailable,
    ServerError,
    AuthRejected,
    MalformedData,
    Timeout,
    Cancelled,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::StorageUnavailable => "storage_unavailable",
            FailureReason::NetworkUnavailable => "network_unavailable",
            FailureReason::ServerError => "server_error",
            FailureReason::AuthRejected => "auth_rejected",
            FailureReason::MalformedData => "malformed_data",
            FailureReason::Timeout => "timeout",
            FailureReason::Cancelled => "cancelled",
        }
    }

    /// Transient failures are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureReason::NetworkUnavailable | FailureReason::ServerError | FailureReason::Timeout
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one triggered sync, retries included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleResult {
    pub outcome: Outcome,
    /// Remote records applied plus local changes acknowledged
    pub applied: usize,
    pub conflicts: Vec<Conflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Human-readable detail for `failure`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Attempts made, the first one included
    pub attempts: u32,
    /// Delays slept between attempts
    pub backoff: Vec<Duration>,
    /// Local changes uploaded
    pub pushed: usize,
    /// Remote records received
    pub fetched: usize,
}

impl CycleResult {
    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            applied: 0,
            conflicts: Vec::new(),
            failure: None,
            message: None,
            attempts: 1,
            backoff: Vec::new(),
            pushed: 0,
            fetched: 0,
        }
    }

    pub fn success() -> Self {
        Self::with_outcome(Outcome::Success)
    }

    pub fn partial() -> Self {
        Self::with_outcome(Outcome::Partial)
    }

    pub fn failed(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            failure: Some(reason),
            message: Some(message.into()),
            ..Self::with_outcome(Outcome::Failed)
        }
    }

    /// A trigger that did not run a cycle at all.
    pub fn skipped() -> Self {
        Self {
            attempts: 0,
            ..Self::with_outcome(Outcome::Skipped)
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_carries_reason() {
        let result = CycleResult::failed(FailureReason::AuthRejected, "401");
        assert!(result.is_failed());
        assert_eq!(result.failure, Some(FailureReason::AuthRejected));
        assert_eq!(result.message.as_deref(), Some("401"));
    }

    #[test]
    fn skipped_made_no_attempt() {
        let result = CycleResult::skipped();
        assert_eq!(result.outcome, Outcome::Skipped);
        assert_eq!(result.attempts, 0);
    }

    #[test]
    fn transient_reasons() {
        assert!(FailureReason::NetworkUnavailable.is_transient());
        assert!(FailureReason::ServerError.is_transient());
        assert!(FailureReason::Timeout.is_transient());
        assert!(!FailureReason::AuthRejected.is_transient());
        assert!(!FailureReason::MalformedData.is_transient());
        assert!(!FailureReason::StorageUnavailable.is_transient());
        assert!(!FailureReason::Cancelled.is_transient());
    }

    #[test]
    fn reason_codes_are_snake_case() {
        assert_eq!(FailureReason::NetworkUnavailable.to_string(), "network_unavailable");
        assert_eq!(
            serde_json::to_string(&FailureReason::StorageUnavailable).unwrap(),
            "\"storage_unavailable\""
        );
    }
}
