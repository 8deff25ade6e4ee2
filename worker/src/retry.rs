//! Retry with exponential backoff around a sync cycle.

use crate::engine::CancelSignal;
use crate::error::SyncError;
use crate::events::{emit, EventSender, SyncEvent};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tidesync_engine::{BackoffPolicy, CycleResult, FailureReason};
use tracing::{info, warn};

/// Re-runs a failing cycle while its errors are transient and the attempt
/// budget lasts.
pub struct RetryController {
    policy: BackoffPolicy,
    cancel: CancelSignal,
    events: EventSender,
}

impl RetryController {
    pub fn new(policy: BackoffPolicy, cancel: CancelSignal, events: EventSender) -> Self {
        Self {
            policy,
            cancel,
            events,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Run `cycle` until it succeeds, fails permanently or runs out of
    /// attempts. Never returns an error; failures are folded into the result.
    pub async fn run<F, Fut>(&self, mut cycle: F) -> CycleResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CycleResult, SyncError>>,
    {
        let mut backoff = Vec::new();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match cycle().await {
                Ok(mut result) => {
                    result.attempts = attempts;
                    result.backoff = backoff;
                    return result;
                }
                Err(err) => err,
            };

            if !err.is_transient() || !self.policy.should_retry(attempts) {
                if err.is_transient() {
                    warn!(attempts, error = %err, "Retry budget exhausted");
                }
                return Self::give_up(&err, attempts, backoff);
            }

            let delay = self.policy.delay(attempts, self.jitter());
            info!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying sync cycle"
            );
            emit(
                &self.events,
                SyncEvent::RetryScheduled {
                    attempt: attempts,
                    delay,
                },
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Self::give_up(&SyncError::Cancelled, attempts, backoff);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            backoff.push(delay);
        }
    }

    fn jitter(&self) -> Duration {
        let bound = u64::try_from(self.policy.jitter_bound().as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(0..bound))
    }

    fn give_up(err: &SyncError, attempts: u32, backoff: Vec<Duration>) -> CycleResult {
        let reason: FailureReason = err.reason();
        let mut result = CycleResult::failed(reason, err.to_string());
        result.attempts = attempts;
        result.backoff = backoff;
        result
    }
}
