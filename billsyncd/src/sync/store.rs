use std::{
    fs,
    path::{Path, PathBuf},
};

use sqlx::{
    Row, SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteRow},
};
use thiserror::Error;

use super::now_unix;
use super::queue::{MAX_RETRY_COUNT, QueueItem, SyncAction, TargetTable};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid sync action: {0}")]
    InvalidAction(String),
    #[error("invalid target table: {0}")]
    InvalidTable(String),
    #[error("queue item not found after insert")]
    MissingItem,
}

fn parse_action(value: &str) -> Result<SyncAction, StoreError> {
    match value {
        "insert" => Ok(SyncAction::Insert),
        "update" => Ok(SyncAction::Update),
        "delete" => Ok(SyncAction::Delete),
        other => Err(StoreError::InvalidAction(other.to_string())),
    }
}

fn parse_table(value: &str) -> Result<TargetTable, StoreError> {
    match value {
        "invoices" => Ok(TargetTable::Invoices),
        "invoice_items" => Ok(TargetTable::InvoiceItems),
        "customers" => Ok(TargetTable::Customers),
        "payments" => Ok(TargetTable::Payments),
        other => Err(StoreError::InvalidTable(other.to_string())),
    }
}

// A locally persisted domain row. The body is an opaque snapshot; only
// the synced flag is interpreted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub table_name: TargetTable,
    pub row_id: String,
    pub body: String,
    pub synced: bool,
    pub updated_at: i64,
}

pub struct SyncStore {
    pool: SqlitePool,
}

impl SyncStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_at(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        Self::new_at(&default_db_path()?).await
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    // Domain write and queue append commit in one transaction, so a
    // concurrent drain never observes one without the other.
    pub async fn record_mutation(
        &self,
        table: TargetTable,
        row_id: &str,
        action: SyncAction,
        payload: &str,
    ) -> Result<QueueItem, StoreError> {
        let now = now_unix();
        let mut tx = self.pool.begin().await?;

        match action {
            SyncAction::Insert | SyncAction::Update => {
                sqlx::query(
                    "INSERT INTO records (table_name, row_id, body, synced, updated_at)
                     VALUES (?1, ?2, ?3, 0, ?4)
                     ON CONFLICT(table_name, row_id) DO UPDATE SET
                        body = excluded.body,
                        synced = 0,
                        updated_at = excluded.updated_at",
                )
                .bind(table.as_str())
                .bind(row_id)
                .bind(payload)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            SyncAction::Delete => {
                sqlx::query("DELETE FROM records WHERE table_name = ?1 AND row_id = ?2")
                    .bind(table.as_str())
                    .bind(row_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let result = sqlx::query(
            "INSERT INTO sync_queue (target_table, target_row_id, action, payload, retry_count, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        )
        .bind(table.as_str())
        .bind(row_id)
        .bind(action.as_str())
        .bind(payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        tx.commit().await?;

        self.get_queue_item(id).await?.ok_or(StoreError::MissingItem)
    }

    // Bare queue append without the domain-row write; the mutation path
    // goes through record_mutation.
    pub async fn enqueue(
        &self,
        table: TargetTable,
        row_id: &str,
        action: SyncAction,
        payload: &str,
    ) -> Result<QueueItem, StoreError> {
        let result = sqlx::query(
            "INSERT INTO sync_queue (target_table, target_row_id, action, payload, retry_count, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        )
        .bind(table.as_str())
        .bind(row_id)
        .bind(action.as_str())
        .bind(payload)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;

        self.get_queue_item(result.last_insert_rowid())
            .await?
            .ok_or(StoreError::MissingItem)
    }

    pub async fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>, StoreError> {
        let row = sqlx::query(
            "SELECT id, target_table, target_row_id, action, payload, retry_count, last_error, created_at
             FROM sync_queue WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| map_queue_row(&row)).transpose()
    }

    // Items past the retry ceiling stay in the table but are never
    // returned here.
    pub async fn list_due(&self) -> Result<Vec<QueueItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, target_table, target_row_id, action, payload, retry_count, last_error, created_at
             FROM sync_queue
             WHERE retry_count <= ?1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(MAX_RETRY_COUNT)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_queue_row(&row)?);
        }
        Ok(out)
    }

    // Idempotent; removing an id that is already gone is not an error.
    pub async fn remove(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_failure(&self, id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_queue SET retry_count = retry_count + 1, last_error = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Maintenance only; the dispatcher never purges on its own.
    pub async fn purge_dormant(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE retry_count > ?1")
            .bind(MAX_RETRY_COUNT)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn pending_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM sync_queue WHERE retry_count <= ?1")
            .bind(MAX_RETRY_COUNT)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("cnt")?)
    }

    pub async fn dormant_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM sync_queue WHERE retry_count > ?1")
            .bind(MAX_RETRY_COUNT)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("cnt")?)
    }

    // A missing row (deleted mutations) is a no-op.
    pub async fn mark_record_synced(
        &self,
        table: TargetTable,
        row_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE records SET synced = 1, updated_at = ?3 WHERE table_name = ?1 AND row_id = ?2",
        )
        .bind(table.as_str())
        .bind(row_id)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_record(
        &self,
        table: TargetTable,
        row_id: &str,
    ) -> Result<Option<RecordRow>, StoreError> {
        let row = sqlx::query(
            "SELECT body, synced, updated_at FROM records WHERE table_name = ?1 AND row_id = ?2",
        )
        .bind(table.as_str())
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let synced: i64 = row.try_get("synced")?;
        Ok(Some(RecordRow {
            table_name: table,
            row_id: row_id.to_string(),
            body: row.try_get("body")?,
            synced: synced != 0,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

fn map_queue_row(row: &SqliteRow) -> Result<QueueItem, StoreError> {
    let table: String = row.try_get("target_table")?;
    let action: String = row.try_get("action")?;
    Ok(QueueItem {
        id: row.try_get("id")?,
        target_table: parse_table(&table)?,
        target_row_id: row.try_get("target_row_id")?,
        action: parse_action(&action)?,
        payload: row.try_get("payload")?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("billsync");
    path.push("queue.db");
    Ok(path)
}
