//! InMemoryQueueStore - 開発用・テスト用の queue 正本
//!
//! # 実装詳細
//! - `BTreeMap<QueueItemId, QueueItem>` を tokio の Mutex で保護
//! - 1 メソッド = 1 ロック区間（SQLite 実装の 1 トランザクションに相当）
//! - id は 1 から単調増加

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{DedupTag, NewQueueItem, QueueItem, QueueItemId, RecipientId, StoreError};
use crate::ports::{AdminFilter, AdminPage, Clock, PageRequest, QueueStore};

struct InMemoryState {
    items: BTreeMap<QueueItemId, QueueItem>,
    next_id: i64,
}

impl InMemoryState {
    fn allocate_id(&mut self) -> QueueItemId {
        let id = QueueItemId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Items accepted by `keep`, in dispatch order.
    fn ordered<F>(&self, keep: F) -> Vec<&QueueItem>
    where
        F: Fn(&QueueItem) -> bool,
    {
        let mut items: Vec<&QueueItem> = self.items.values().filter(|i| keep(i)).collect();
        items.sort_by(|a, b| QueueItem::dispatch_order(a, b));
        items
    }
}

pub struct InMemoryQueueStore {
    state: Arc<Mutex<InMemoryState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState {
                items: BTreeMap::new(),
                next_id: 1,
            })),
            clock,
        }
    }

    /// Snapshot of one item, delivered or not (for testing)
    #[cfg(test)]
    pub async fn get(&self, id: QueueItemId) -> Option<QueueItem> {
        self.state.lock().await.items.get(&id).cloned()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let record = item.into_record(id, self.clock.now());
        state.items.insert(id, record.clone());
        Ok(record)
    }

    async fn select_due(
        &self,
        limit: usize,
        recipient: Option<RecipientId>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let due = state.ordered(|item| {
            item.is_due(now) && recipient.is_none_or(|r| r == item.recipient)
        });
        Ok(due.into_iter().take(limit).cloned().collect())
    }

    async fn mark_delivered(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut updated = Vec::new();
        for id in ids {
            if let Some(item) = state.items.get_mut(id)
                && item.mark_delivered(now)
            {
                updated.push(*id);
            }
        }
        Ok(updated)
    }

    async fn exists_with_tag(
        &self,
        recipient: RecipientId,
        tag: &DedupTag,
        created: Range<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.items.values().any(|item| {
            item.recipient == recipient
                && created.contains(&item.created_at)
                && item.payload.dedup_tag().as_ref() == Some(tag)
        }))
    }

    async fn admin_list(
        &self,
        filter: &AdminFilter,
        page: PageRequest,
    ) -> Result<AdminPage, StoreError> {
        let state = self.state.lock().await;
        let matching = state.ordered(|item| filter.accepts(item));
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset())
            .take(page.size as usize)
            .cloned()
            .collect();
        Ok(AdminPage {
            page: page.page,
            size: page.size,
            total,
            items,
        })
    }

    async fn admin_delete(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter(|id| state.items.remove(*id).is_some())
            .copied()
            .collect())
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.items.values().filter(|i| !i.delivered).count() as u64)
    }
}

/// Store whose inserts fail for one recipient; everything else is delegated.
#[cfg(test)]
pub(crate) struct RejectingStore {
    pub inner: Arc<InMemoryQueueStore>,
    pub reject: RecipientId,
}

#[cfg(test)]
#[async_trait]
impl QueueStore for RejectingStore {
    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, StoreError> {
        if item.recipient == self.reject {
            return Err(StoreError::Backend(format!("insert rejected for {}", item.recipient)));
        }
        self.inner.insert(item).await
    }

    async fn select_due(
        &self,
        limit: usize,
        recipient: Option<RecipientId>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        self.inner.select_due(limit, recipient).await
    }

    async fn mark_delivered(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, StoreError> {
        self.inner.mark_delivered(ids).await
    }

    async fn exists_with_tag(
        &self,
        recipient: RecipientId,
        tag: &DedupTag,
        created: Range<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        self.inner.exists_with_tag(recipient, tag, created).await
    }

    async fn admin_list(
        &self,
        filter: &AdminFilter,
        page: PageRequest,
    ) -> Result<AdminPage, StoreError> {
        self.inner.admin_list(filter, page).await
    }

    async fn admin_delete(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, StoreError> {
        self.inner.admin_delete(ids).await
    }

    async fn count_pending(&self) -> Result<u64, StoreError> {
        self.inner.count_pending().await
    }
}
