//! Sync progress notifications.

use crate::engine::EngineState;
use std::time::Duration;
use tidesync_engine::{CycleResult, Seq};
use tokio::sync::broadcast;

/// Capacity of the event channel. Slow receivers lose the oldest events.
pub const EVENT_CAPACITY: usize = 256;

/// Something the host may want to show or log.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A local change was durably queued
    Queued { seq: Seq },
    /// A trigger started a cycle
    CycleStarted,
    /// The engine moved to another stage
    StateChanged(EngineState),
    /// A transient failure will be retried after `delay`
    RetryScheduled { attempt: u32, delay: Duration },
    /// A trigger finished, successfully or not
    CycleFinished(CycleResult),
}

pub type EventSender = broadcast::Sender<SyncEvent>;

pub fn channel() -> EventSender {
    broadcast::channel(EVENT_CAPACITY).0
}

/// Publish an event. Having no subscribers is not an error.
pub(crate) fn emit(events: &EventSender, event: SyncEvent) {
    let _ = events.send(event);
}
