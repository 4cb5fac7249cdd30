//! PollService / AckService - 端末側の 2 つの呼び出し
//!
//! # poll
//! - 一定間隔（1 秒未満）で `select_due` を繰り返し、見つかるか timeout で返す
//! - 読むだけ。mark delivered はしない（端末が ack する）
//! - 呼び出しごとに独立した future。共有ロックは持たない
//! - future を drop すれば即キャンセル
//!
//! # ack
//! - `mark_delivered` の薄いラッパー。実際に更新された id だけを返す

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::queue_service::require_ids;
use crate::domain::payload::iso_in;
use crate::domain::{CourierError, Priority, QueueItem, QueueItemId, RecipientId};
use crate::ports::{LocalZone, QueueStore};

/// Long-poll tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub cadence: Duration,
    pub batch_size: usize,
    pub max_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            cadence: Duration::from_millis(800),
            batch_size: 10,
            max_timeout: Duration::from_secs(60),
        }
    }
}

/// Item as handed to a consumer device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireItem {
    pub id: QueueItemId,
    pub target_user_id: RecipientId,
    pub priority: Priority,
    pub payload: Value,
    pub deliver_after: Option<String>,
    pub created_at: String,
}

impl WireItem {
    fn from_item(item: QueueItem, zone: LocalZone) -> Result<Self, CourierError> {
        let offset = zone.offset();
        Ok(Self {
            id: item.id,
            target_user_id: item.recipient,
            priority: item.priority,
            payload: item.payload.normalized(offset)?,
            deliver_after: item.deliver_after.map(|at| iso_in(at, offset)),
            created_at: iso_in(item.created_at, offset),
        })
    }
}

pub struct PollService {
    store: Arc<dyn QueueStore>,
    zone: LocalZone,
    settings: PollSettings,
}

impl PollService {
    pub fn new(store: Arc<dyn QueueStore>, zone: LocalZone, settings: PollSettings) -> Self {
        Self {
            store,
            zone,
            settings,
        }
    }

    /// Wait up to `timeout` (capped at the configured maximum) for due items.
    pub async fn poll(
        &self,
        recipient: RecipientId,
        timeout: Duration,
    ) -> Result<Vec<WireItem>, CourierError> {
        let timeout = timeout.min(self.settings.max_timeout);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let due = self
                .store
                .select_due(self.settings.batch_size, Some(recipient))
                .await?;
            if !due.is_empty() {
                tracing::debug!(recipient = %recipient, count = due.len(), "poll answered");
                return due
                    .into_iter()
                    .map(|item| WireItem::from_item(item, self.zone))
                    .collect();
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.settings.cadence.min(deadline - now)).await;
        }
    }
}

pub struct AckService {
    store: Arc<dyn QueueStore>,
}

impl AckService {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Returns exactly the ids that existed and were still undelivered.
    pub async fn ack(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItemId>, CourierError> {
        require_ids(ids)?;
        let acked = self.store.mark_delivered(ids).await?;
        tracing::debug!(requested = ids.len(), acked = acked.len(), "ack");
        Ok(acked)
    }
}
