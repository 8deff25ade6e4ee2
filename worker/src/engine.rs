//! Sync Engine - runs one fetch, resolve, push and commit cycle.
//!
//! The engine is a small state machine:
//!
//! ```text
//! Idle -> Fetching -> Resolving -> Pushing -> Committing -> Idle
//!            \___________\___________\___________\-> Failed -> Idle
//! ```
//!
//! Nothing is written to the change log before every network call of the
//! cycle has finished. The commit then removes the acknowledged changes and
//! moves the cursor in one transaction, so an interrupted cycle leaves the
//! store exactly as it found it.

use crate::error::{Result, SyncError};
use crate::events::{emit, EventSender, SyncEvent};
use crate::sink::RecordSink;
use crate::store::ChangeLogStore;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tidesync_engine::{
    CycleResult, IdempotencyKey, OutboundChange, ResolvePolicy, Resolver, Schema, Seq,
    SyncCursor, SyncRecord,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Stage of the cycle currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    #[default]
    Idle,
    Fetching,
    Resolving,
    Pushing,
    Committing,
    Failed,
}

/// Owner side of a cancellation flag.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

/// Observer side of a cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

/// Create a linked cancel handle and signal, not yet cancelled.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    /// Clear a previous cancellation.
    pub fn reset(&self) {
        self.0.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal(self.0.subscribe())
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Tunables for a single cycle.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub policy: ResolvePolicy,
    pub request_timeout: Duration,
    pub push_batch_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            policy: ResolvePolicy::LastWriterWins,
            request_timeout: Duration::from_secs(10),
            push_batch_size: 100,
        }
    }
}

/// What the push stage achieved.
struct PushOutcome {
    acked: Vec<Seq>,
    /// Fast-forward cursor, only if every push call offered one
    cursor: Option<SyncCursor>,
}

/// Runs sync cycles against one store, transport and sink.
pub struct SyncEngine {
    store: Arc<dyn ChangeLogStore>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn RecordSink>,
    schema: Arc<Schema>,
    options: EngineOptions,
    state: watch::Sender<EngineState>,
    events: EventSender,
    cancel: CancelSignal,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn ChangeLogStore>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn RecordSink>,
        schema: Arc<Schema>,
        options: EngineOptions,
        events: EventSender,
        cancel: CancelSignal,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            store,
            transport,
            sink,
            schema,
            options,
            state,
            events,
            cancel,
        }
    }

    /// Watch the engine's stage.
    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
        emit(&self.events, SyncEvent::StateChanged(state));
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Run one cycle. The result's outcome is `Success` or `Partial`;
    /// every failure comes back as an error for the retry controller.
    pub async fn run_cycle(&self) -> Result<CycleResult> {
        match self.cycle().await {
            Ok(result) => {
                self.set_state(EngineState::Idle);
                Ok(result)
            }
            Err(err) => {
                warn!(error = %err, reason = %err.reason(), "Sync cycle failed");
                self.set_state(EngineState::Failed);
                self.set_state(EngineState::Idle);
                Err(err)
            }
        }
    }

    async fn cycle(&self) -> Result<CycleResult> {
        self.check_cancelled()?;

        // Fetching
        self.set_state(EngineState::Fetching);
        let cursor = self.store.read_cursor().await?;
        let (remote, fetched_cursor) = self.fetch_all(&cursor).await?;
        for record in &remote {
            self.schema.validate_record(record).map_err(|e| {
                SyncError::MalformedData(format!("remote record '{}': {e}", record.id))
            })?;
        }
        self.check_cancelled()?;

        // Resolving
        self.set_state(EngineState::Resolving);
        let drained = self.store.drain().await?;
        for change in &drained.changes {
            self.schema.validate_pending(change).map_err(|e| {
                SyncError::MalformedData(format!("pending change {}: {e}", change.seq))
            })?;
        }
        let batch = Resolver::new(&self.schema, self.options.policy)
            .resolve_batch(&drained.changes, &remote);
        debug!(
            pending = drained.changes.len(),
            outbound = batch.outbound.len(),
            superseded = batch.superseded.len(),
            conflicts = batch.conflicts.len(),
            "Resolved pending changes"
        );
        self.check_cancelled()?;

        // Pushing
        self.set_state(EngineState::Pushing);
        let push = self.push_all(&batch.outbound).await?;
        self.check_cancelled()?;

        // Committing
        self.set_state(EngineState::Committing);
        let complete = push.acked.len() == batch.outbound.len();
        let settled = batch.settled_by(&push.acked);
        if let Some(stray) = settled.iter().find(|seq| !drained.covers(**seq)) {
            return Err(SyncError::MalformedData(format!(
                "change {stray} settled but was not drained this cycle"
            )));
        }
        if !batch.accepted_remote.is_empty() {
            self.sink.apply_remote(&batch.accepted_remote).await?;
        }

        let mut result = if complete {
            let next_cursor = push.cursor.unwrap_or(fetched_cursor);
            self.store.commit(&settled, &next_cursor).await?;
            info!(
                acknowledged = settled.len(),
                applied_remote = batch.accepted_remote.len(),
                cursor = %next_cursor,
                "Sync cycle committed"
            );
            CycleResult::success()
        } else {
            // Keep the old cursor so the server's copy of anything applied
            // but not acknowledged is fetched again
            self.store.commit(&settled, &cursor).await?;
            warn!(
                acknowledged = push.acked.len(),
                settled = settled.len(),
                missing = batch.outbound.len() - push.acked.len(),
                "Server receipt incomplete"
            );
            CycleResult::partial()
        };

        result.applied = batch.accepted_remote.len() + settled.len();
        result.conflicts = batch.conflicts;
        result.pushed = batch.outbound.len();
        result.fetched = remote.len();
        Ok(result)
    }

    /// Fetch every page after `cursor`.
    async fn fetch_all(&self, cursor: &SyncCursor) -> Result<(Vec<SyncRecord>, SyncCursor)> {
        let mut records = Vec::new();
        let mut cursor = cursor.clone();

        loop {
            let page = self
                .network("fetch", self.transport.fetch_changes_since(&cursor))
                .await?;
            records.extend(page.records);

            if !page.has_more {
                cursor = page.cursor;
                break;
            }
            if page.cursor == cursor {
                return Err(SyncError::MalformedData(format!(
                    "server reported more changes without advancing past cursor {cursor}"
                )));
            }
            cursor = page.cursor;
        }

        debug!(fetched = records.len(), cursor = %cursor, "Fetched remote changes");
        Ok((records, cursor))
    }

    /// Upload `outbound` in batches and collect what the server confirmed.
    async fn push_all(&self, outbound: &[OutboundChange]) -> Result<PushOutcome> {
        let mut acked = Vec::new();
        let mut cursor = None;
        let mut every_batch_fast_forwards = true;

        for chunk in outbound.chunks(self.options.push_batch_size.max(1)) {
            let receipt = match self
                .network("push", self.transport.push_changes(chunk.to_vec()))
                .await
            {
                Ok(receipt) => receipt,
                Err(err) => {
                    self.note_push_failure(chunk, &err).await;
                    return Err(err);
                }
            };

            let accepted: HashSet<&IdempotencyKey> = receipt.accepted.iter().collect();
            for change in chunk {
                if accepted.contains(&change.key) {
                    acked.push(change.key.seq);
                } else {
                    debug!(key = %change.key, "Change not acknowledged");
                }
            }

            match receipt.cursor {
                Some(next) => cursor = Some(next),
                None => every_batch_fast_forwards = false,
            }
        }

        Ok(PushOutcome {
            acked,
            cursor: cursor.filter(|_| every_batch_fast_forwards),
        })
    }

    /// Best-effort bookkeeping on changes whose upload failed.
    async fn note_push_failure(&self, chunk: &[OutboundChange], err: &SyncError) {
        if matches!(err, SyncError::Cancelled) {
            return;
        }
        let seqs: Vec<Seq> = chunk.iter().map(|c| c.key.seq).collect();
        if let Err(store_err) = self.store.record_failure(&seqs, &err.to_string()).await {
            warn!(error = %store_err, "Could not record push failure");
        }
    }

    /// Run a network call under the request deadline and the cancel signal.
    async fn network<T, F>(&self, what: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, crate::transport::TransportError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            outcome = tokio::time::timeout(self.options.request_timeout, call) => match outcome {
                Ok(response) => response.map_err(SyncError::from),
                Err(_) => Err(SyncError::NetworkUnavailable(format!(
                    "{what} timed out after {:?}",
                    self.options.request_timeout
                ))),
            },
        }
    }
}
