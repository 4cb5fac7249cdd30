//! QueueStore port - outgoing queue の正本（source of truth）
//!
//! # 設計原則
//! - 1 回の呼び出し = 1 トランザクション（producer の 1 パス全体ではない）
//! - `select_due` と `admin_list` は同じ順序契約に従う
//!   （urgent → normal、同じ優先度内では created_at の古い順）
//! - `exists_with_tag` → `insert` はアトミックではない（重複は許容された競合）

use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{DedupTag, NewQueueItem, Priority, QueueItem, QueueItemId, RecipientId, StoreError};

/// Filters for the administrative listing. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminFilter {
    pub recipient: Option<RecipientId>,
    pub delivered: Option<bool>,
    pub priority: Option<Priority>,
}

impl AdminFilter {
    pub fn accepts(&self, item: &QueueItem) -> bool {
        self.recipient.is_none_or(|r| r == item.recipient)
            && self.delivered.is_none_or(|d| d == item.delivered)
            && self.priority.is_none_or(|p| p == item.priority)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn offset(self) -> usize {
        self.page.saturating_sub(1) as usize * self.size as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminPage {
    pub page: u32,
    pub size: u32,
    pub total: u64,
    pub items: Vec<QueueItem>,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append an item; the store assigns id and `created_at`.
    async fn insert(&self, item: NewQueueItem) -> Result<QueueItem, StoreError>;

    /// Undelivered, currently eligible items in dispatch order.
    async fn select_due(
        &self,
        limit: usize,
        recipient: Option<RecipientId>,
    ) -> Result<Vec<QueueItem>, StoreError>;

    /// Mark items delivered. Returns only the ids that transitioned; unknown
    /// or already-delivered ids are ignored.
    async fn mark_delivered(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, StoreError>;

    /// Is there an item for `recipient` tagged `tag` created within `created`?
    async fn exists_with_tag(
        &self,
        recipient: RecipientId,
        tag: &DedupTag,
        created: Range<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    async fn admin_list(
        &self,
        filter: &AdminFilter,
        page: PageRequest,
    ) -> Result<AdminPage, StoreError>;

    /// Delete items. Returns the ids that existed.
    async fn admin_delete(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, StoreError>;

    /// Number of undelivered items, due or not.
    async fn count_pending(&self) -> Result<u64, StoreError>;
}
