//! QueueService - enqueue と管理者向け操作
//!
//! CRUD 層（メッセージ・お知らせの作成）と管理画面から呼ばれる入口。
//! 権限チェックは呼び出し側の責務。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    ClassId, CourierError, NewQueueItem, Payload, Priority, QueueItemId, RecipientId,
};
use crate::ports::{AdminFilter, AdminPage, Directory, PageRequest, QueueStore};

/// Largest admin page.
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
}

pub struct QueueService {
    store: Arc<dyn QueueStore>,
    directory: Arc<dyn Directory>,
}

impl QueueService {
    pub fn new(store: Arc<dyn QueueStore>, directory: Arc<dyn Directory>) -> Self {
        Self { store, directory }
    }

    pub async fn enqueue(
        &self,
        recipient: RecipientId,
        payload: Payload,
        priority: Priority,
        deliver_after: Option<DateTime<Utc>>,
    ) -> Result<QueueItemId, CourierError> {
        let mut item = NewQueueItem::new(recipient, payload, priority);
        item.deliver_after = deliver_after;
        let record = self.store.insert(item).await?;
        tracing::info!(
            item_id = %record.id,
            recipient = %recipient,
            kind = record.payload.kind(),
            priority = %priority,
            "enqueued"
        );
        Ok(record.id)
    }

    /// One item per recipient enrolled in `class`.
    ///
    /// An unknown or empty class is `NotFound`. Inserts are independent: a
    /// failure stops the fan-out but keeps what was already inserted.
    pub async fn enqueue_for_class(
        &self,
        class: ClassId,
        payload: Payload,
        priority: Priority,
    ) -> Result<Vec<QueueItemId>, CourierError> {
        let recipients = self.directory.enrolled(class).await?;
        if recipients.is_empty() {
            return Err(CourierError::not_found("class", class));
        }
        let mut ids = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            ids.push(self.enqueue(recipient, payload.clone(), priority, None).await?);
        }
        Ok(ids)
    }

    pub async fn list_admin(
        &self,
        filter: &AdminFilter,
        page: u32,
        size: u32,
    ) -> Result<AdminPage, CourierError> {
        if page == 0 {
            return Err(CourierError::validation("page starts at 1"));
        }
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(CourierError::validation(format!(
                "page size must be within 1..={MAX_PAGE_SIZE}"
            )));
        }
        Ok(self.store.admin_list(filter, PageRequest { page, size }).await?)
    }

    pub async fn mark_delivered_admin(
        &self,
        ids: &[QueueItemId],
    ) -> Result<Vec<QueueItemId>, CourierError> {
        require_ids(ids)?;
        let updated = self.store.mark_delivered(ids).await?;
        tracing::info!(requested = ids.len(), updated = updated.len(), "marked delivered by operator");
        Ok(updated)
    }

    pub async fn delete(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, CourierError> {
        require_ids(ids)?;
        let deleted = self.store.admin_delete(ids).await?;
        tracing::info!(requested = ids.len(), deleted = deleted.len(), "deleted by operator");
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<QueueStats, CourierError> {
        Ok(QueueStats {
            pending: self.store.count_pending().await?,
        })
    }
}

/// Missing ids are a client error.
pub(crate) fn require_ids(ids: &[QueueItemId]) -> Result<(), CourierError> {
    if ids.is_empty() {
        return Err(CourierError::validation("ids must be a non-empty list"));
    }
    Ok(())
}
