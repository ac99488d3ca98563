//! # Refresh Queue Repository
//!
//! Write-through persistence for queue items. The queue keeps its working set
//! in memory; this repository is what survives a restart.

use crate::{ItemState, MediaType, QueueItem, QueueItemId, QueueStatus, RefreshError, Result};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait RefreshQueueRepository: Send + Sync {
    /// Insert a new item or overwrite the stored copy
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn upsert(&self, item: &QueueItem) -> Result<()>;

    /// Delete a single item; deleting an absent item is not an error
    async fn delete(&self, id: &QueueItemId) -> Result<()>;

    /// Delete several items, returning how many rows went away
    async fn delete_many(&self, ids: &[QueueItemId]) -> Result<u64>;

    /// Every stored item, oldest first
    async fn load_all(&self) -> Result<Vec<QueueItem>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteRefreshQueueRepository {
    pool: SqlitePool,
}

impl SqliteRefreshQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `refresh_queue` table if it doesn't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS refresh_queue (
                id TEXT PRIMARY KEY NOT NULL,
                path TEXT NOT NULL,
                media_type TEXT NOT NULL,
                status TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                scheduled_at INTEGER NOT NULL,
                last_attempt_at INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                started_at INTEGER,
                resolved_at INTEGER,
                library_item_id TEXT,
                last_error TEXT,
                CONSTRAINT refresh_queue_status_check CHECK (
                    status IN ('pending', 'processing', 'success', 'failed')
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RefreshError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_refresh_queue_path_status
            ON refresh_queue(path, status)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RefreshError::Database(e.to_string()))?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct QueueItemRow {
    id: String,
    path: String,
    media_type: String,
    status: String,
    added_at: i64,
    scheduled_at: i64,
    last_attempt_at: Option<i64>,
    retry_count: i64,
    max_retries: i64,
    started_at: Option<i64>,
    resolved_at: Option<i64>,
    library_item_id: Option<String>,
    last_error: Option<String>,
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = RefreshError;

    fn try_from(row: QueueItemRow) -> Result<Self> {
        let status: QueueStatus = row.status.parse()?;
        let state = match status {
            QueueStatus::Pending => ItemState::Pending,
            QueueStatus::Processing => ItemState::Processing {
                started_at: row
                    .started_at
                    .or(row.last_attempt_at)
                    .unwrap_or(row.added_at),
            },
            QueueStatus::Success => ItemState::Success {
                resolved_at: row.resolved_at.ok_or_else(|| {
                    RefreshError::Database(format!("Item {} is success without resolved_at", row.id))
                })?,
                library_item_id: row.library_item_id.unwrap_or_default(),
            },
            QueueStatus::Failed => ItemState::Failed {
                last_error: row.last_error.ok_or_else(|| {
                    RefreshError::Database(format!("Item {} is failed without last_error", row.id))
                })?,
            },
        };

        Ok(QueueItem {
            id: QueueItemId::from_string(&row.id)?,
            path: row.path,
            media_type: row.media_type.parse::<MediaType>()?,
            added_at: row.added_at,
            scheduled_at: row.scheduled_at,
            last_attempt_at: row.last_attempt_at,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            state,
        })
    }
}

#[async_trait]
impl RefreshQueueRepository for SqliteRefreshQueueRepository {
    async fn upsert(&self, item: &QueueItem) -> Result<()> {
        let (started_at, resolved_at, library_item_id, last_error) = match &item.state {
            ItemState::Pending => (None, None, None, None),
            ItemState::Processing { started_at } => (Some(*started_at), None, None, None),
            ItemState::Success {
                resolved_at,
                library_item_id,
            } => (None, Some(*resolved_at), Some(library_item_id.as_str()), None),
            ItemState::Failed { last_error } => (None, None, None, Some(last_error.as_str())),
        };

        sqlx::query(
            r#"
            INSERT INTO refresh_queue (
                id, path, media_type, status, added_at, scheduled_at,
                last_attempt_at, retry_count, max_retries,
                started_at, resolved_at, library_item_id, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                media_type = excluded.media_type,
                scheduled_at = excluded.scheduled_at,
                last_attempt_at = excluded.last_attempt_at,
                retry_count = excluded.retry_count,
                max_retries = excluded.max_retries,
                started_at = excluded.started_at,
                resolved_at = excluded.resolved_at,
                library_item_id = excluded.library_item_id,
                last_error = excluded.last_error
            "#,
        )
        .bind(item.id.as_str())
        .bind(&item.path)
        .bind(item.media_type.as_str())
        .bind(item.status().as_str())
        .bind(item.added_at)
        .bind(item.scheduled_at)
        .bind(item.last_attempt_at)
        .bind(item.retry_count as i64)
        .bind(item.max_retries as i64)
        .bind(started_at)
        .bind(resolved_at)
        .bind(library_item_id)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| RefreshError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: &QueueItemId) -> Result<()> {
        sqlx::query("DELETE FROM refresh_queue WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| RefreshError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete_many(&self, ids: &[QueueItemId]) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RefreshError::Database(e.to_string()))?;

        let mut removed = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM refresh_queue WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| RefreshError::Database(e.to_string()))?;
            removed += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| RefreshError::Database(e.to_string()))?;

        Ok(removed)
    }

    async fn load_all(&self) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            r#"
            SELECT id, path, media_type, status, added_at, scheduled_at,
                   last_attempt_at, retry_count, max_retries,
                   started_at, resolved_at, library_item_id, last_error
            FROM refresh_queue
            ORDER BY added_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RefreshError::Database(e.to_string()))?;

        rows.into_iter()
            .map(QueueItem::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

// ============================================================================
// Tests
// ============================================================================
