//! Shared fixtures for the worker integration tests.
//!
//! [`FakeServer`] is an in-process sync server. It keeps every record
//! revision in an append-only log (the cursor is the log position), applies
//! each idempotency key at most once and can be told to fail, stall, lose
//! changes or lose acknowledgements.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tidesync_engine::{
    BackoffPolicy, ChangeKind, FieldDef, FieldType, IdempotencyKey, OutboundChange, RecordId,
    Schema, SyncCursor, SyncRecord, Timestamp, TypeSchema,
};
use tidesync_worker::{
    AckReceipt, ChangeLogStore, Config, FetchPage, MemorySink, RecordSink, SyncWorker,
    Transport, TransportError,
};

#[derive(Debug, Default)]
struct ServerState {
    log: Vec<SyncRecord>,
    records: BTreeMap<RecordId, SyncRecord>,
    /// Times each key changed server state
    applied: HashMap<IdempotencyKey, u32>,
    /// Times each key was received
    deliveries: HashMap<IdempotencyKey, u32>,
    /// Log length at the end of the last completed fetch
    fetched_through: Option<usize>,
    page_size: Option<usize>,
    push_failures: VecDeque<TransportError>,
    fetch_failures: VecDeque<TransportError>,
    dropped_acks: HashSet<RecordId>,
    /// Keys received but neither applied nor acknowledged, once each
    lost: HashSet<IdempotencyKey>,
    push_delay: Duration,
    push_calls: usize,
    fetch_calls: usize,
    pushed_batches: Vec<Vec<OutboundChange>>,
}

#[derive(Debug, Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ServerState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_page_size(&self, size: usize) {
        self.with_state(|s| s.page_size = Some(size));
    }

    /// Fail the next `n` push calls with `err`.
    pub fn fail_next_push(&self, n: usize, err: TransportError) {
        self.with_state(|s| s.push_failures.extend(std::iter::repeat(err).take(n)));
    }

    pub fn fail_next_fetch(&self, n: usize, err: TransportError) {
        self.with_state(|s| s.fetch_failures.extend(std::iter::repeat(err).take(n)));
    }

    /// Apply the next change to `id` but leave it out of the receipt, once.
    pub fn drop_ack_for(&self, id: &str) {
        self.with_state(|s| s.dropped_acks.insert(id.to_string()));
    }

    /// Drop the change with this key on arrival, once.
    pub fn lose_change(&self, record_id: &str, seq: u64) {
        let key = IdempotencyKey {
            record_id: record_id.to_string(),
            seq,
        };
        self.with_state(|s| s.lost.insert(key));
    }

    pub fn set_push_delay(&self, delay: Duration) {
        self.with_state(|s| s.push_delay = delay);
    }

    /// A write made by another device.
    pub fn remote_write(
        &self,
        id: &str,
        record_type: &str,
        payload: serde_json::Value,
        modified_at: Timestamp,
    ) -> SyncRecord {
        self.with_state(|s| {
            let version = next_version(s, id);
            let record = SyncRecord::new(id, record_type, version, payload, modified_at);
            append(s, record.clone());
            record
        })
    }

    pub fn remote_delete(&self, id: &str, record_type: &str, modified_at: Timestamp) -> SyncRecord {
        self.with_state(|s| {
            let version = next_version(s, id);
            let record = SyncRecord::tombstone(id, record_type, version, modified_at);
            append(s, record.clone());
            record
        })
    }

    pub fn record(&self, id: &str) -> Option<SyncRecord> {
        self.with_state(|s| s.records.get(id).cloned())
    }

    /// How many times the change with this key changed server state.
    pub fn applications(&self, record_id: &str, seq: u64) -> u32 {
        let key = IdempotencyKey {
            record_id: record_id.to_string(),
            seq,
        };
        self.with_state(|s| s.applied.get(&key).copied().unwrap_or(0))
    }

    /// How many times the change with this key was uploaded.
    pub fn deliveries(&self, record_id: &str, seq: u64) -> u32 {
        let key = IdempotencyKey {
            record_id: record_id.to_string(),
            seq,
        };
        self.with_state(|s| s.deliveries.get(&key).copied().unwrap_or(0))
    }

    pub fn total_applications(&self) -> u32 {
        self.with_state(|s| s.applied.values().sum())
    }

    pub fn push_calls(&self) -> usize {
        self.with_state(|s| s.push_calls)
    }

    pub fn fetch_calls(&self) -> usize {
        self.with_state(|s| s.fetch_calls)
    }

    pub fn pushed_batches(&self) -> Vec<Vec<OutboundChange>> {
        self.with_state(|s| s.pushed_batches.clone())
    }

    pub fn log_len(&self) -> usize {
        self.with_state(|s| s.log.len())
    }
}

fn next_version(state: &ServerState, id: &str) -> u64 {
    state.records.get(id).map(|r| r.version + 1).unwrap_or(1)
}

fn append(state: &mut ServerState, record: SyncRecord) {
    state.records.insert(record.id.clone(), record.clone());
    state.log.push(record);
}

#[async_trait]
impl Transport for FakeServer {
    async fn fetch_changes_since(&self, cursor: &SyncCursor) -> Result<FetchPage, TransportError> {
        self.with_state(|s| {
            s.fetch_calls += 1;
            if let Some(err) = s.fetch_failures.pop_front() {
                return Err(err);
            }

            let start = match cursor.token() {
                None => 0,
                Some(token) => token
                    .parse::<usize>()
                    .map_err(|_| TransportError::Rejected(format!("bad cursor {token}")))?,
            };
            let start = start.min(s.log.len());
            let end = match s.page_size {
                Some(size) => (start + size).min(s.log.len()),
                None => s.log.len(),
            };
            let has_more = end < s.log.len();
            if !has_more {
                s.fetched_through = Some(end);
            }

            Ok(FetchPage {
                records: s.log[start..end].to_vec(),
                cursor: SyncCursor::new(end.to_string()),
                has_more,
            })
        })
    }

    async fn push_changes(
        &self,
        changes: Vec<OutboundChange>,
    ) -> Result<AckReceipt, TransportError> {
        let delay = self.with_state(|s| {
            s.push_calls += 1;
            s.push_delay
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.with_state(|s| {
            if let Some(err) = s.push_failures.pop_front() {
                return Err(err);
            }
            s.pushed_batches.push(changes.clone());

            let before = s.log.len();
            let mut accepted = Vec::new();
            for change in changes {
                *s.deliveries.entry(change.key.clone()).or_insert(0) += 1;
                if s.lost.remove(&change.key) {
                    continue;
                }
                if !s.applied.contains_key(&change.key) {
                    let version = next_version(s, change.record_id());
                    let record = match change.kind {
                        ChangeKind::Delete => SyncRecord::tombstone(
                            change.key.record_id.clone(),
                            change.record_type.clone(),
                            version,
                            change.modified_at,
                        ),
                        ChangeKind::Create | ChangeKind::Update => SyncRecord::new(
                            change.key.record_id.clone(),
                            change.record_type.clone(),
                            version,
                            change.payload.clone().unwrap_or(serde_json::Value::Null),
                            change.modified_at,
                        ),
                    };
                    append(s, record);
                    s.applied.insert(change.key.clone(), 1);
                }
                if !s.dropped_acks.remove(change.record_id()) {
                    accepted.push(change.key);
                }
            }

            let cursor = if s.fetched_through == Some(before) {
                s.fetched_through = Some(s.log.len());
                Some(SyncCursor::new(s.log.len().to_string()))
            } else {
                None
            };
            Ok(AckReceipt { accepted, cursor })
        })
    }
}

/// A record sink that can be switched off.
#[derive(Debug, Default)]
pub struct FlakySink {
    pub inner: MemorySink,
    pub failing: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl RecordSink for FlakySink {
    async fn apply_remote(&self, records: &[SyncRecord]) -> tidesync_worker::StoreResult<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(tidesync_worker::StorageError::Unavailable(
                "sink offline".into(),
            ));
        }
        self.inner.apply_remote(records).await
    }
}

/// Configuration with millisecond-scale retries.
pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(200), 5),
        request_timeout: Duration::from_secs(2),
        min_interval: Duration::from_secs(10),
        push_batch_size: 100,
        ..Config::default()
    }
}

/// Notes must have a title; profiles merge field by field.
pub fn test_schema() -> Schema {
    Schema::new()
        .with_type(TypeSchema::new(
            "notes",
            vec![
                FieldDef::required("title", FieldType::String),
                FieldDef::optional("body", FieldType::String),
            ],
        ))
        .with_type(TypeSchema::new("profiles", vec![]).mergeable())
}

pub struct Harness {
    pub server: Arc<FakeServer>,
    pub sink: Arc<MemorySink>,
    pub worker: SyncWorker,
}

pub fn harness_with(config: &Config, store: Arc<dyn ChangeLogStore>) -> Harness {
    let server = FakeServer::new();
    let sink = Arc::new(MemorySink::new());
    let worker = SyncWorker::new(config, test_schema(), store, server.clone(), sink.clone());
    Harness {
        server,
        sink,
        worker,
    }
}

pub fn harness() -> Harness {
    harness_with(
        &test_config(),
        Arc::new(tidesync_worker::MemoryChangeLog::new()),
    )
}

pub fn note(title: &str) -> serde_json::Value {
    serde_json::json!({ "title": title })
}
