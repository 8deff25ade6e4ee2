//! # Tidesync Worker
//!
//! The async half of tidesync: a background sync worker that keeps a device's
//! local changes flowing to a server and the server's changes flowing back.
//!
//! The host application provides three things:
//! - a [`Transport`] that can fetch remote changes and push local ones,
//! - a [`RecordSink`] where accepted remote records are stored,
//! - a [`Schema`](tidesync_engine::Schema) describing its record types.
//!
//! and gets back a [`SyncWorker`] to which it hands local mutations and sync
//! triggers. Pending changes live in a durable [`ChangeLogStore`] (SQLite by
//! default) until the server has acknowledged them, so nothing is lost when
//! the app is killed mid-sync.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidesync_engine::{NewChange, Schema};
//! use tidesync_worker::{Config, MemorySink, SyncWorker, Transport};
//! # async fn demo(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//! tidesync_worker::telemetry::init_tracing("tidesync_worker=info");
//!
//! let config = Config::from_env()?;
//! let sink = Arc::new(MemorySink::new());
//! let worker = SyncWorker::open(&config, Schema::permissive(), transport, sink).await?;
//!
//! let note = serde_json::json!({"body": "hi"});
//! worker.enqueue(NewChange::create("note-1", "notes", note, 1000)).await?;
//! let result = worker.run_cycle().await;
//! println!("{:?}", result.outcome);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod retry;
pub mod sink;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod worker;

pub use config::{Config, ConfigError};
pub use db::SqliteChangeLog;
pub use engine::{cancel_pair, CancelHandle, CancelSignal, EngineOptions, EngineState, SyncEngine};
pub use error::{Result, SyncError};
pub use events::SyncEvent;
pub use retry::RetryController;
pub use sink::{MemorySink, RecordSink};
pub use store::{ChangeLogStore, MemoryChangeLog, StorageError, StoreResult};
pub use transport::{AckReceipt, FetchPage, Transport, TransportError};
pub use worker::{SyncWorker, Trigger};
