//! InMemoryDirectory - テスト用の Directory
//!
//! 学生・窓口・メモ・名言を HashMap に保持するだけの実装。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::domain::{
    BroadcastSource, ClassId, OpenWindow, QuoteId, RecipientId, ReminderSource, StoreError,
};
use crate::ports::Directory;

#[derive(Default)]
struct DirectoryState {
    students: BTreeMap<RecipientId, ClassId>,
    windows: Vec<OpenWindow>,
    memos: Vec<ReminderSource>,
    quotes: HashMap<QuoteId, BroadcastSource>,
}

#[derive(Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enroll(&self, student: RecipientId, class: ClassId) {
        self.state.write().await.students.insert(student, class);
    }

    pub async fn add_window(&self, window: OpenWindow) {
        self.state.write().await.windows.push(window);
    }

    pub async fn add_memo(&self, memo: ReminderSource) {
        self.state.write().await.memos.push(memo);
    }

    /// Insert or replace a broadcast.
    pub async fn put_broadcast(&self, quote: BroadcastSource) {
        self.state.write().await.quotes.insert(quote.id, quote);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn class_of(&self, student: RecipientId) -> Result<Option<ClassId>, StoreError> {
        Ok(self.state.read().await.students.get(&student).copied())
    }

    async fn enrolled(&self, class: ClassId) -> Result<Vec<RecipientId>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .students
            .iter()
            .filter(|(_, c)| **c == class)
            .map(|(student, _)| *student)
            .collect())
    }

    async fn open_windows(&self, class: ClassId) -> Result<Vec<OpenWindow>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .windows
            .iter()
            .filter(|w| w.class_id == class)
            .cloned()
            .collect())
    }

    async fn reminders_due(&self, date: NaiveDate) -> Result<Vec<ReminderSource>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .memos
            .iter()
            .filter(|m| m.remind_date == date)
            .cloned()
            .collect())
    }

    async fn active_broadcasts(&self) -> Result<Vec<BroadcastSource>, StoreError> {
        let state = self.state.read().await;
        let mut quotes: Vec<_> = state
            .quotes
            .values()
            .filter(|q| q.active && q.broadcast_time.is_some())
            .cloned()
            .collect();
        quotes.sort_by_key(|q| q.id);
        Ok(quotes)
    }

    async fn broadcast(&self, id: QuoteId) -> Result<Option<BroadcastSource>, StoreError> {
        Ok(self.state.read().await.quotes.get(&id).cloned())
    }
}
