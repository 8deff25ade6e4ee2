//! The Change Log Store: durable pending changes plus the sync cursor.
//!
//! [`ChangeLogStore`] is the seam the sync engine persists through. Two
//! implementations ship with the worker: [`crate::db::SqliteChangeLog`] for
//! devices and [`MemoryChangeLog`] for embedding and tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tidesync_engine::{
    ChangeLog, ChangeLogSnapshot, Drained, NewChange, PendingChange, Seq, SyncCursor,
};
use tokio::sync::Mutex;

/// Errors raised by a change log store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Change log unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt change log entry: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Engine(#[from] tidesync_engine::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// Durable storage for pending local changes and the last committed cursor.
///
/// Every method is atomic on its own. `commit` is the one place where the
/// removal of acknowledged changes and the cursor move happen together.
#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// Durably append a change; the returned change carries its sequence number.
    async fn enqueue(&self, change: NewChange) -> StoreResult<PendingChange>;

    /// All pending changes in sequence order. Removes nothing.
    async fn drain(&self) -> StoreResult<Drained>;

    /// Remove the listed changes, all or nothing.
    async fn acknowledge(&self, seqs: &[Seq]) -> StoreResult<()>;

    async fn read_cursor(&self) -> StoreResult<SyncCursor>;

    async fn write_cursor(&self, cursor: &SyncCursor) -> StoreResult<()>;

    /// Acknowledge `seqs` and store `cursor` in a single transaction.
    async fn commit(&self, seqs: &[Seq], cursor: &SyncCursor) -> StoreResult<()>;

    /// Bump the attempt counter and remember `error` on each listed change.
    async fn record_failure(&self, seqs: &[Seq], error: &str) -> StoreResult<()>;

    async fn pending_count(&self) -> StoreResult<usize>;
}

/// In-memory change log.
///
/// State survives only as long as the value, or through [`Self::snapshot`]
/// and [`Self::restore`]. Storage outages can be simulated with
/// [`Self::set_available`].
#[derive(Debug)]
pub struct MemoryChangeLog {
    log: Mutex<ChangeLog>,
    available: AtomicBool,
}

impl Default for MemoryChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(ChangeLog::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Rebuild a store from a snapshot taken earlier.
    pub fn from_snapshot(snapshot: ChangeLogSnapshot) -> StoreResult<Self> {
        Ok(Self {
            log: Mutex::new(ChangeLog::from_snapshot(snapshot)?),
            available: AtomicBool::new(true),
        })
    }

    pub async fn snapshot(&self) -> ChangeLogSnapshot {
        self.log.lock().await.export_state()
    }

    pub async fn restore(&self, snapshot: ChangeLogSnapshot) -> StoreResult<()> {
        self.log.lock().await.import_state(snapshot)?;
        Ok(())
    }

    /// Make every subsequent call fail with [`StorageError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory change log offline".into()))
        }
    }
}

#[async_trait]
impl ChangeLogStore for MemoryChangeLog {
    async fn enqueue(&self, change: NewChange) -> StoreResult<PendingChange> {
        self.check_available()?;
        Ok(self.log.lock().await.enqueue(change))
    }

    async fn drain(&self) -> StoreResult<Drained> {
        self.check_available()?;
        Ok(self.log.lock().await.drain())
    }

    async fn acknowledge(&self, seqs: &[Seq]) -> StoreResult<()> {
        self.check_available()?;
        self.log.lock().await.acknowledge(seqs)?;
        Ok(())
    }

    async fn read_cursor(&self) -> StoreResult<SyncCursor> {
        self.check_available()?;
        Ok(self.log.lock().await.cursor().clone())
    }

    async fn write_cursor(&self, cursor: &SyncCursor) -> StoreResult<()> {
        self.check_available()?;
        self.log.lock().await.set_cursor(cursor.clone());
        Ok(())
    }

    async fn commit(&self, seqs: &[Seq], cursor: &SyncCursor) -> StoreResult<()> {
        self.check_available()?;
        self.log.lock().await.commit(seqs, cursor.clone())?;
        Ok(())
    }

    async fn record_failure(&self, seqs: &[Seq], error: &str) -> StoreResult<()> {
        self.check_available()?;
        self.log.lock().await.record_failure(seqs, error);
        Ok(())
    }

    async fn pending_count(&self) -> StoreResult<usize> {
        self.check_available()?;
        Ok(self.log.lock().await.pending_count())
    }
}
