//! SQLite-backed change log.

use super::pool::{create_pool, run_migrations, Pool};
use crate::store::{ChangeLogStore, StorageError, StoreResult};
use async_trait::async_trait;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::BTreeSet;
use tidesync_engine::{ChangeKind, Drained, NewChange, PendingChange, Seq, SyncCursor};

/// A stored change row from the database.
#[derive(Debug)]
struct StoredChange {
    seq: i64,
    record_id: String,
    record_type: String,
    kind: String,
    payload: Option<String>,
    base_version: Option<i64>,
    modified_at: i64,
    attempts: i64,
    last_error: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for StoredChange {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredChange {
            seq: row.try_get("seq")?,
            record_id: row.try_get("record_id")?,
            record_type: row.try_get("record_type")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            base_version: row.try_get("base_version")?,
            modified_at: row.try_get("modified_at")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

impl StoredChange {
    /// Convert database row to a pending change.
    fn into_pending(self) -> StoreResult<PendingChange> {
        let kind = ChangeKind::parse(&self.kind).ok_or_else(|| {
            StorageError::Corrupt(format!("seq {}: unknown kind '{}'", self.seq, self.kind))
        })?;
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(|e| StorageError::Corrupt(format!("seq {}: {e}", self.seq)))?;

        Ok(PendingChange {
            seq: self.seq as Seq,
            record_id: self.record_id,
            record_type: self.record_type,
            kind,
            payload,
            base_version: self.base_version.map(|v| v as u64),
            modified_at: self.modified_at as u64,
            attempts: self.attempts as u32,
            last_error: self.last_error,
        })
    }
}

/// Durable change log in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteChangeLog {
    pool: Pool,
}

impl SqliteChangeLog {
    /// Connect to `database_url` and bring the schema up to date.
    pub async fn open(database_url: &str) -> StoreResult<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        tracing::debug!(database_url, "Change log opened");
        Ok(Self { pool })
    }

    /// Use an existing pool. Migrations are expected to have run.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Delete every listed change or none of them.
async fn delete_acknowledged(tx: &mut Transaction<'_, Sqlite>, seqs: &[Seq]) -> StoreResult<()> {
    let unique: BTreeSet<Seq> = seqs.iter().copied().collect();
    for seq in unique {
        let result = sqlx::query("DELETE FROM pending_changes WHERE seq = ?")
            .bind(seq as i64)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(tidesync_engine::Error::UnknownSequence(seq).into());
        }
    }
    Ok(())
}

async fn upsert_cursor(tx: &mut Transaction<'_, Sqlite>, cursor: &SyncCursor) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_state (id, cursor, updated_at)
        VALUES (1, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            cursor = excluded.cursor,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(cursor.token())
    .bind(chrono::Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ChangeLogStore for SqliteChangeLog {
    async fn enqueue(&self, change: NewChange) -> StoreResult<PendingChange> {
        let payload = change.payload.as_ref().map(|p| p.to_string());

        let (seq,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO pending_changes (
                record_id, record_type, kind, payload, base_version, modified_at, enqueued_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING seq
            "#,
        )
        .bind(&change.record_id)
        .bind(&change.record_type)
        .bind(change.kind.as_str())
        .bind(payload)
        .bind(change.base_version.map(|v| v as i64))
        .bind(change.modified_at as i64)
        .bind(chrono::Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(PendingChange::from_new(seq as Seq, change))
    }

    async fn drain(&self) -> StoreResult<Drained> {
        let rows = sqlx::query_as::<_, StoredChange>(
            r#"
            SELECT seq, record_id, record_type, kind, payload, base_version,
                   modified_at, attempts, last_error
            FROM pending_changes
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let changes = rows
            .into_iter()
            .map(StoredChange::into_pending)
            .collect::<StoreResult<Vec<_>>>()?;
        let through = changes.last().map(|c| c.seq);
        Ok(Drained { changes, through })
    }

    async fn acknowledge(&self, seqs: &[Seq]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        delete_acknowledged(&mut tx, seqs).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn read_cursor(&self) -> StoreResult<SyncCursor> {
        let row = sqlx::query("SELECT cursor FROM sync_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(SyncCursor::from_token(row.try_get("cursor")?)),
            None => Ok(SyncCursor::initial()),
        }
    }

    async fn write_cursor(&self, cursor: &SyncCursor) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        upsert_cursor(&mut tx, cursor).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit(&self, seqs: &[Seq], cursor: &SyncCursor) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        delete_acknowledged(&mut tx, seqs).await?;
        upsert_cursor(&mut tx, cursor).await?;
        tx.commit().await?;

        tracing::debug!(acknowledged = seqs.len(), cursor = %cursor, "Change log committed");
        Ok(())
    }

    async fn record_failure(&self, seqs: &[Seq], error: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for seq in seqs {
            sqlx::query(
                r#"
                UPDATE pending_changes
                SET attempts = attempts + 1, last_error = ?
                WHERE seq = ?
                "#,
            )
            .bind(error)
            .bind(*seq as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn pending_count(&self) -> StoreResult<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_changes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
