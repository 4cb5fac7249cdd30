//! Directory port - 外部のエンティティ層（users / classes / windows / memos / quotes）
//!
//! queue サブシステムは読み取りのみ。書き込みは CRUD 層の責務。

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{
    BroadcastSource, ClassId, OpenWindow, QuoteId, RecipientId, ReminderSource, StoreError,
};

#[async_trait]
pub trait Directory: Send + Sync {
    /// Class a student belongs to, if any.
    async fn class_of(&self, student: RecipientId) -> Result<Option<ClassId>, StoreError>;

    /// Recipients enrolled in a class, in id order.
    async fn enrolled(&self, class: ClassId) -> Result<Vec<RecipientId>, StoreError>;

    async fn open_windows(&self, class: ClassId) -> Result<Vec<OpenWindow>, StoreError>;

    /// Memos whose remind date is `date`.
    async fn reminders_due(&self, date: NaiveDate) -> Result<Vec<ReminderSource>, StoreError>;

    /// Active broadcasts that carry a scheduled time.
    async fn active_broadcasts(&self) -> Result<Vec<BroadcastSource>, StoreError>;

    async fn broadcast(&self, id: QuoteId) -> Result<Option<BroadcastSource>, StoreError>;
}
