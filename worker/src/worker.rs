//! The host-facing sync worker.
//!
//! [`SyncWorker`] wires a store, a transport and a record sink to the sync
//! engine and the retry controller, and serializes triggers so that only one
//! cycle is ever in flight.

use crate::config::Config;
use crate::db::SqliteChangeLog;
use crate::engine::{cancel_pair, CancelHandle, EngineOptions, EngineState, SyncEngine};
use crate::error::{Result, SyncError};
use crate::events::{self, emit, EventSender, SyncEvent};
use crate::retry::RetryController;
use crate::sink::RecordSink;
use crate::store::ChangeLogStore;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidesync_engine::{CycleResult, NewChange, PendingChange, Schema};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, Instrument};

/// What asked for a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    /// Timer or OS background task; subject to the minimum interval
    Periodic,
    /// User or app request; always runs
    Manual,
}

#[derive(Debug, Default)]
struct Gate {
    last_result: Option<CycleResult>,
    last_success_at: Option<Instant>,
}

/// Background sync worker.
pub struct SyncWorker {
    engine: SyncEngine,
    retry: RetryController,
    store: Arc<dyn ChangeLogStore>,
    schema: Arc<Schema>,
    min_interval: Duration,
    gate: Mutex<Gate>,
    /// Number of cycles started so far
    started: AtomicU64,
    events: EventSender,
    cancel: CancelHandle,
}

impl SyncWorker {
    pub fn new(
        config: &Config,
        schema: Schema,
        store: Arc<dyn ChangeLogStore>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let schema = Arc::new(schema);
        let events = events::channel();
        let (cancel, signal) = cancel_pair();

        let options = EngineOptions {
            policy: config.resolve_policy,
            request_timeout: config.request_timeout,
            push_batch_size: config.push_batch_size,
        };
        let engine = SyncEngine::new(
            store.clone(),
            transport,
            sink,
            schema.clone(),
            options,
            events.clone(),
            signal.clone(),
        );
        let retry = RetryController::new(config.backoff, signal, events.clone());

        Self {
            engine,
            retry,
            store,
            schema,
            min_interval: config.min_interval,
            gate: Mutex::new(Gate::default()),
            started: AtomicU64::new(0),
            events,
            cancel,
        }
    }

    /// Build a worker over the SQLite change log at `config.database_url`.
    pub async fn open(
        config: &Config,
        schema: Schema,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        let store = SqliteChangeLog::open(&config.database_url).await?;
        info!(database_url = %config.database_url, "Sync worker ready");
        Ok(Self::new(config, schema, Arc::new(store), transport, sink))
    }

    /// Run a cycle now. Same as `trigger(Trigger::Manual)`.
    pub async fn run_cycle(&self) -> CycleResult {
        self.trigger(Trigger::Manual).await
    }

    /// Run a cycle unless one that started after this call already finished,
    /// or a periodic trigger arrives too soon after the last success.
    pub async fn trigger(&self, trigger: Trigger) -> CycleResult {
        let seen = self.started.load(Ordering::SeqCst);
        let mut gate = self.gate.lock().await;

        if self.started.load(Ordering::SeqCst) != seen {
            if let Some(result) = &gate.last_result {
                debug!(?trigger, "Coalesced into a cycle that finished while waiting");
                return result.clone();
            }
        }

        if trigger == Trigger::Periodic {
            if let Some(at) = gate.last_success_at {
                if at.elapsed() < self.min_interval {
                    debug!(since_ms = at.elapsed().as_millis() as u64, "Periodic sync skipped");
                    return CycleResult::skipped();
                }
            }
        }

        self.started.fetch_add(1, Ordering::SeqCst);
        emit(&self.events, SyncEvent::CycleStarted);

        let span = tracing::info_span!(
            "sync_cycle",
            cycle_id = %uuid::Uuid::new_v4(),
            trigger = ?trigger
        );
        let result = self
            .retry
            .run(|| self.engine.run_cycle())
            .instrument(span)
            .await;

        info!(
            outcome = ?result.outcome,
            applied = result.applied,
            conflicts = result.conflicts.len(),
            attempts = result.attempts,
            failure = ?result.failure,
            "Sync finished"
        );

        if result.is_success() {
            gate.last_success_at = Some(Instant::now());
        }
        gate.last_result = Some(result.clone());
        emit(&self.events, SyncEvent::CycleFinished(result.clone()));
        result
    }

    /// Validate and durably queue a local change. Safe to call while a cycle
    /// runs; the change goes out with the next one.
    pub async fn enqueue(&self, change: NewChange) -> Result<PendingChange> {
        self.schema
            .validate_change(&change)
            .map_err(|e| SyncError::MalformedData(e.to_string()))?;

        let pending = self.store.enqueue(change).await?;
        debug!(
            seq = pending.seq,
            record_id = %pending.record_id,
            kind = %pending.kind,
            "Change queued"
        );
        emit(&self.events, SyncEvent::Queued { seq: pending.seq });
        Ok(pending)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.store.pending_count().await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.engine.state()
    }

    /// Abort the running cycle and refuse new ones until [`Self::resume`].
    pub fn cancel(&self) {
        info!("Sync cancelled");
        self.cancel.cancel();
    }

    pub fn resume(&self) {
        self.cancel.reset();
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Trigger a periodic sync every `every` until the task is aborted.
    pub fn spawn_periodic(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                worker.trigger(Trigger::Periodic).await;
            }
        })
    }
}
