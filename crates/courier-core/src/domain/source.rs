//! Producer sources read from the directory (memos, daily quotes).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{ClassId, MemoId, QuoteId, RecipientId};
use super::window::TimeOfDay;

/// A memo that should remind its student on `remind_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSource {
    pub id: MemoId,
    pub student_id: RecipientId,
    pub remind_date: NaiveDate,
    pub content: String,
}

/// A daily broadcast to every recipient enrolled in `class_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastSource {
    pub id: QuoteId,
    pub class_id: ClassId,
    /// Local minute the broadcast fires at. `None` means manual only.
    pub broadcast_time: Option<TimeOfDay>,
    pub content: String,
    pub voice_url: Option<String>,
    pub active: bool,
}

impl BroadcastSource {
    /// Scheduled for this local minute?
    pub fn fires_at(&self, minute: TimeOfDay) -> bool {
        self.active && self.broadcast_time == Some(minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(time: Option<&str>, active: bool) -> BroadcastSource {
        BroadcastSource {
            id: QuoteId::new(1),
            class_id: ClassId::new(1),
            broadcast_time: time.map(|t| t.parse().unwrap()),
            content: "stay curious".into(),
            voice_url: None,
            active,
        }
    }

    #[test]
    fn fires_only_on_its_minute_when_active() {
        let seven = "07:30".parse().unwrap();
        let eight = "08:00".parse().unwrap();

        assert!(quote(Some("07:30"), true).fires_at(seven));
        assert!(!quote(Some("07:30"), true).fires_at(eight));
        assert!(!quote(Some("07:30"), false).fires_at(seven));
        assert!(!quote(None, true).fires_at(seven));
    }
}
