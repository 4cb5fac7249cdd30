//! SqliteQueueStore - SQLite を正本とする QueueStore
//!
//! # スキーマ
//! - `outgoing_queue` 1 テーブル
//! - 優先度は整数 rank（urgent = 1）で持ち、`ORDER BY priority DESC` で並べる
//! - dedup 用のタグは `dedup_key` 列に文字列で保存（payload を解析しない）
//!
//! # 重複について
//! `dedup_key` に一意制約は付けない。check-then-insert の競合で重複が
//! 生まれることは許容している。

use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use super::sqlite::{apply_schema, from_millis, to_millis};
use crate::domain::{
    DedupTag, NewQueueItem, Payload, Priority, QueueItem, QueueItemId, RecipientId, StoreError,
};
use crate::ports::{AdminFilter, AdminPage, Clock, PageRequest, QueueStore};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS outgoing_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_user_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        dedup_key TEXT,
        priority INTEGER NOT NULL DEFAULT 0,
        deliver_after INTEGER,
        delivered INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        delivered_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_outgoing_queue_due
        ON outgoing_queue (delivered, priority, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_outgoing_queue_dedup
        ON outgoing_queue (target_user_id, dedup_key, created_at)",
];

const COLUMNS: &str =
    "id, target_user_id, payload, priority, deliver_after, delivered, created_at, delivered_at";

#[derive(Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Create the queue table and its indexes if missing.
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        apply_schema(&self.pool, &SCHEMA).await
    }

    fn now(&self) -> DateTime<Utc> {
        // stored precision
        self.clock.now().trunc_subsecs(3)
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        // id is assigned by SQLite below
        let mut record = item.into_record(QueueItemId::new(0), self.now());
        record.deliver_after = record.deliver_after.map(|at| at.trunc_subsecs(3));

        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::Corrupt(format!("payload not serializable: {e}")))?;
        let dedup_key = record.payload.dedup_tag().map(|tag| tag.key());

        let result = sqlx::query(
            "INSERT INTO outgoing_queue
                (target_user_id, kind, payload, dedup_key, priority, deliver_after, delivered, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(record.recipient.get())
        .bind(record.payload.kind())
        .bind(payload)
        .bind(dedup_key)
        .bind(record.priority.rank())
        .bind(record.deliver_after.map(to_millis))
        .bind(to_millis(record.created_at))
        .execute(&self.pool)
        .await?;

        record.id = QueueItemId::new(result.last_insert_rowid());
        Ok(record)
    }

    async fn select_due(
        &self,
        limit: usize,
        recipient: Option<RecipientId>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "SELECT {COLUMNS} FROM outgoing_queue
             WHERE delivered = 0
               AND (deliver_after IS NULL OR deliver_after <= ?1)
               AND (?2 IS NULL OR target_user_id = ?2)
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT ?3"
        ))
        .bind(to_millis(self.now()))
        .bind(recipient.map(|r| r.get()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueRow::into_item).collect()
    }

    async fn mark_delivered(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, StoreError> {
        let now = to_millis(self.now());
        let mut tx = self.pool.begin().await?;
        let mut updated = Vec::new();
        for id in ids {
            let result = sqlx::query(
                "UPDATE outgoing_queue SET delivered = 1, delivered_at = ?
                 WHERE id = ? AND delivered = 0",
            )
            .bind(now)
            .bind(id.get())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                updated.push(*id);
            }
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn exists_with_tag(
        &self,
        recipient: RecipientId,
        tag: &DedupTag,
        created: Range<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(
                SELECT 1 FROM outgoing_queue
                WHERE target_user_id = ? AND dedup_key = ?
                  AND created_at >= ? AND created_at < ?
             )",
        )
        .bind(recipient.get())
        .bind(tag.key())
        .bind(to_millis(created.start))
        .bind(to_millis(created.end))
        .fetch_one(&self.pool)
        .await?;
        Ok(found != 0)
    }

    async fn admin_list(
        &self,
        filter: &AdminFilter,
        page: PageRequest,
    ) -> Result<AdminPage, StoreError> {
        const WHERE: &str = "WHERE (?1 IS NULL OR target_user_id = ?1)
               AND (?2 IS NULL OR delivered = ?2)
               AND (?3 IS NULL OR priority = ?3)";
        let recipient = filter.recipient.map(|r| r.get());
        let delivered = filter.delivered.map(i64::from);
        let priority = filter.priority.map(Priority::rank);

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM outgoing_queue {WHERE}"
        ))
        .bind(recipient)
        .bind(delivered)
        .bind(priority)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "SELECT {COLUMNS} FROM outgoing_queue {WHERE}
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT ?4 OFFSET ?5"
        ))
        .bind(recipient)
        .bind(delivered)
        .bind(priority)
        .bind(i64::from(page.size))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(AdminPage {
            page: page.page,
            size: page.size,
            total: u64::try_from(total).unwrap_or(0),
            items: rows
                .into_iter()
                .map(QueueRow::into_item)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn admin_delete(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = Vec::new();
        for id in ids {
            let result = sqlx::query("DELETE FROM outgoing_queue WHERE id = ?")
                .bind(id.get())
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                deleted.push(*id);
            }
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM outgoing_queue WHERE delivered = 0")
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct QueueRow {
    id: i64,
    target_user_id: i64,
    payload: String,
    priority: i64,
    deliver_after: Option<i64>,
    delivered: bool,
    created_at: i64,
    delivered_at: Option<i64>,
}

impl QueueRow {
    fn into_item(self) -> Result<QueueItem, StoreError> {
        let payload: Payload = serde_json::from_str(&self.payload).map_err(|e| {
            StoreError::Corrupt(format!("invalid payload for queue item {}: {e}", self.id))
        })?;
        let priority = Priority::from_rank(self.priority).ok_or_else(|| {
            StoreError::Corrupt(format!("invalid priority rank {} in database", self.priority))
        })?;

        Ok(QueueItem {
            id: QueueItemId::new(self.id),
            recipient: RecipientId::new(self.target_user_id),
            payload,
            priority,
            deliver_after: self.deliver_after.map(from_millis).transpose()?,
            delivered: self.delivered,
            created_at: from_millis(self.created_at)?,
            delivered_at: self.delivered_at.map(from_millis).transpose()?,
        })
    }
}
