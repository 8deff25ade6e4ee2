//! Backoff behaviour of a full worker.

mod common;

use common::{harness_with, note, test_config};
use std::sync::Arc;
use std::time::Duration;
use tidesync_engine::{BackoffPolicy, FailureReason, NewChange, Outcome};
use tidesync_worker::{MemoryChangeLog, SyncEvent, TransportError};

fn config_with(backoff: BackoffPolicy) -> tidesync_worker::Config {
    tidesync_worker::Config {
        backoff,
        ..test_config()
    }
}

#[tokio::test]
async fn test_unavailable_push_recovers_with_growing_delays() {
    let config = config_with(BackoffPolicy::new(
        Duration::from_millis(10),
        Duration::from_secs(1),
        5,
    ));
    let h = harness_with(&config, Arc::new(MemoryChangeLog::new()));
    let mut events = h.worker.subscribe();
    h.server
        .fail_next_push(3, TransportError::Unavailable("no route".into()));
    h.worker
        .enqueue(NewChange::create("n1", "notes", note("one"), 1000))
        .await
        .unwrap();

    let result = h.worker.run_cycle().await;

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.attempts, 4);
    assert_eq!(result.backoff.len(), 3);
    assert!(result.backoff.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(h.server.applications("n1", 1), 1);
    assert_eq!(h.worker.pending_count().await.unwrap(), 0);

    let mut scheduled = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::RetryScheduled { attempt, delay } = event {
            scheduled.push((attempt, delay));
        }
    }
    let attempts: Vec<u32> = scheduled.iter().map(|(a, _)| *a).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    let delays: Vec<Duration> = scheduled.iter().map(|(_, d)| *d).collect();
    assert_eq!(delays, result.backoff);
}

#[tokio::test]
async fn test_delays_stay_within_bounds() {
    let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(25), 4);
    let h = harness_with(&config_with(policy), Arc::new(MemoryChangeLog::new()));
    h.server
        .fail_next_fetch(10, TransportError::Server { status: 502 });

    let result = h.worker.run_cycle().await;

    assert_eq!(result.failure, Some(FailureReason::ServerError));
    assert_eq!(result.attempts, 4);
    assert_eq!(result.backoff.len(), 3);
    assert!(result.backoff[0] >= Duration::from_millis(10));
    assert!(result.backoff[0] < Duration::from_millis(15));
    assert!(result.backoff[1] >= Duration::from_millis(20));
    assert_eq!(result.backoff[2], Duration::from_millis(25));
}

#[tokio::test]
async fn test_retry_budget_is_per_trigger() {
    let policy = BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(50), 2);
    let h = harness_with(&config_with(policy), Arc::new(MemoryChangeLog::new()));
    h.server
        .fail_next_fetch(3, TransportError::Unavailable("flaky".into()));

    let first = h.worker.run_cycle().await;
    assert_eq!(first.failure, Some(FailureReason::NetworkUnavailable));
    assert_eq!(first.attempts, 2);

    let second = h.worker.run_cycle().await;
    assert!(second.is_success());
    assert_eq!(second.attempts, 2);
    assert_eq!(h.server.fetch_calls(), 4);
}

#[tokio::test]
async fn test_server_errors_are_classified() {
    let h = harness_with(&test_config(), Arc::new(MemoryChangeLog::new()));

    h.server
        .fail_next_fetch(1, TransportError::Server { status: 503 });
    let transient = h.worker.run_cycle().await;
    assert!(transient.is_success());
    assert_eq!(transient.attempts, 2);

    h.server
        .fail_next_fetch(1, TransportError::Server { status: 400 });
    let permanent = h.worker.run_cycle().await;
    assert_eq!(permanent.failure, Some(FailureReason::MalformedData));
    assert_eq!(permanent.attempts, 1);

    h.server.fail_next_fetch(1, TransportError::Server { status: 401 });
    let auth = h.worker.run_cycle().await;
    assert_eq!(auth.failure, Some(FailureReason::AuthRejected));
}
