//! Queue item record: priority + payload + delivery state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::CourierError;
use super::ids::{QueueItemId, RecipientId};
use super::payload::Payload;

/// Delivery priority.
///
/// Ordering matters: `Urgent > Normal`, so sorting by priority descending
/// puts urgent items first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::Urgent => "urgent",
        }
    }

    /// Numeric rank persisted by backends that sort in SQL.
    pub fn rank(self) -> i64 {
        match self {
            Priority::Normal => 0,
            Priority::Urgent => 1,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Priority::Normal),
            1 => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Priority::Normal),
            "urgent" => Ok(Priority::Urgent),
            other => Err(CourierError::validation(format!(
                "unknown priority '{other}' (expected normal or urgent)"
            ))),
        }
    }
}

/// Request to append a queue item. The store assigns id and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub recipient: RecipientId,
    pub payload: Payload,
    pub priority: Priority,
    pub deliver_after: Option<DateTime<Utc>>,
}

impl NewQueueItem {
    pub fn new(recipient: RecipientId, payload: Payload, priority: Priority) -> Self {
        Self {
            recipient,
            payload,
            priority,
            deliver_after: None,
        }
    }

    pub fn deliver_after(mut self, at: DateTime<Utc>) -> Self {
        self.deliver_after = Some(at);
        self
    }

    /// Materialize the record at insert time.
    ///
    /// Urgent items are always eligible immediately: any requested delay is
    /// replaced by `now`.
    pub fn into_record(self, id: QueueItemId, now: DateTime<Utc>) -> QueueItem {
        let deliver_after = match self.priority {
            Priority::Urgent => Some(now),
            Priority::Normal => self.deliver_after,
        };
        QueueItem {
            id,
            recipient: self.recipient,
            payload: self.payload,
            priority: self.priority,
            deliver_after,
            delivered: false,
            created_at: now,
            delivered_at: None,
        }
    }
}

/// One unit of pending or delivered outgoing work for a recipient.
///
/// Design:
/// - payload is immutable after insert
/// - `delivered` is write-once; `delivered_at` is set in the same transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub recipient: RecipientId,
    pub payload: Payload,
    pub priority: Priority,
    pub deliver_after: Option<DateTime<Utc>>,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Undelivered and eligible at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.delivered && self.deliver_after.is_none_or(|at| at <= now)
    }

    /// Mark as delivered. Returns false if already terminal.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> bool {
        if self.delivered {
            return false;
        }
        self.delivered = true;
        self.delivered_at = Some(now);
        true
    }

    /// Global ordering contract: urgent before normal, then oldest first.
    /// Ties on `created_at` fall back to id so the order is total.
    pub fn dispatch_order(a: &QueueItem, b: &QueueItem) -> std::cmp::Ordering {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    }
}
