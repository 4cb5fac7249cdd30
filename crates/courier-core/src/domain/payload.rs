//! Payload - queue item が運ぶドキュメント
//!
//! producer ごとに 1 variant の tagged union。wire 上は `"type"` タグ付きの
//! JSON オブジェクトになる（`message`, `notice`, `memo_reminder`,
//! `daily_quote`）。`admin_raw` だけは注入された document をそのまま出す。

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::CourierError;
use super::ids::{ClassId, MemoId, QuoteId, RecipientId, WindowId};

/// A left message addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelivery {
    pub message_id: i64,
    pub sender_id: RecipientId,
    pub sender_name: String,
    pub receiver_id: RecipientId,
    pub timestamp: Option<DateTime<Utc>>,
    pub content: String,
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeDelivery {
    pub notice_id: i64,
    pub creator_id: RecipientId,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One memo surfaced inside one open window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoReminder {
    pub memo_id: MemoId,
    pub window_id: WindowId,
    pub content: String,
}

/// One scheduled daily broadcast for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyQuote {
    pub quote_id: QuoteId,
    pub class_id: ClassId,
    pub content: String,
    pub voice_url: Option<String>,
    pub date: NaiveDate,
}

/// Free-form document injected by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminRaw {
    pub document: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Message(MessageDelivery),
    Notice(NoticeDelivery),
    MemoReminder(MemoReminder),
    DailyQuote(DailyQuote),
    AdminRaw(AdminRaw),
}

/// Dedup key a producer checks before fanning out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupTag {
    MemoReminder { memo_id: MemoId, window_id: WindowId },
    DailyQuote { quote_id: QuoteId, date: NaiveDate },
}

impl DedupTag {
    /// Stable textual form, stored next to the payload so backends can
    /// match tags without parsing documents.
    pub fn key(&self) -> String {
        match self {
            DedupTag::MemoReminder { memo_id, window_id } => {
                format!("memo_reminder:{}:{}", memo_id.get(), window_id.get())
            }
            DedupTag::DailyQuote { quote_id, date } => {
                format!("daily_quote:{}:{}", quote_id.get(), date)
            }
        }
    }
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Message(_) => "message",
            Payload::Notice(_) => "notice",
            Payload::MemoReminder(_) => "memo_reminder",
            Payload::DailyQuote(_) => "daily_quote",
            Payload::AdminRaw(_) => "admin_raw",
        }
    }

    pub fn dedup_tag(&self) -> Option<DedupTag> {
        match self {
            Payload::MemoReminder(m) => Some(DedupTag::MemoReminder {
                memo_id: m.memo_id,
                window_id: m.window_id,
            }),
            Payload::DailyQuote(q) => Some(DedupTag::DailyQuote {
                quote_id: q.quote_id,
                date: q.date,
            }),
            _ => None,
        }
    }

    /// Parse a stored or client-supplied document.
    ///
    /// Documents without a known `"type"` tag are kept as `AdminRaw` so
    /// operator injections are never rejected for shape alone.
    pub fn from_document(document: Value) -> Result<Self, CourierError> {
        if !document.is_object() {
            return Err(CourierError::validation("payload must be a JSON object"));
        }
        match serde_json::from_value::<Payload>(document.clone()) {
            Ok(payload) => Ok(payload),
            Err(_) => Ok(Payload::AdminRaw(AdminRaw { document })),
        }
    }

    /// Wire form handed to consumers.
    ///
    /// Typed timestamps are rendered zone-qualified in `offset`. Free text is
    /// never touched, and an `AdminRaw` document goes out exactly as injected
    /// so its own `"type"` survives.
    pub fn normalized(&self, offset: FixedOffset) -> Result<Value, CourierError> {
        let timestamp = match self {
            Payload::AdminRaw(raw) => return Ok(raw.document.clone()),
            Payload::Message(m) => m.timestamp,
            Payload::Notice(n) => n.timestamp,
            Payload::MemoReminder(_) | Payload::DailyQuote(_) => None,
        };
        let mut value = serde_json::to_value(self)
            .map_err(|e| CourierError::validation(format!("payload not serializable: {e}")))?;
        if let (Some(at), Some(fields)) = (timestamp, value.as_object_mut()) {
            fields.insert("timestamp".into(), Value::String(iso_in(at, offset)));
        }
        Ok(value)
    }
}

/// `2026-10-18T08:00:00+08:00` style rendering used on every outgoing timestamp.
pub fn iso_in(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    instant.with_timezone(&offset).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn shanghai() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn variants_use_snake_case_type_tag() {
        let payload = Payload::MemoReminder(MemoReminder {
            memo_id: MemoId::new(5),
            window_id: WindowId::new(2),
            content: "bring homework".into(),
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "memo_reminder");
        assert_eq!(value["memo_id"], 5);
        assert_eq!(value["window_id"], 2);
    }

    #[test]
    fn from_document_parses_known_types() {
        let doc = json!({
            "type": "notice",
            "notice_id": 1,
            "creator_id": 9,
            "content": "sports day",
            "timestamp": null
        });
        let payload = Payload::from_document(doc).unwrap();
        assert_eq!(payload.kind(), "notice");
    }

    #[test]
    fn from_document_keeps_unknown_shapes_as_admin_raw() {
        let doc = json!({"type": "message", "content": "hi"});
        let payload = Payload::from_document(doc.clone()).unwrap();
        assert_eq!(payload, Payload::AdminRaw(AdminRaw { document: doc }));
    }

    #[test]
    fn from_document_rejects_non_objects() {
        let err = Payload::from_document(json!([1, 2])).unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));
    }

    #[test]
    fn dedup_tag_only_for_producer_variants() {
        let quote = Payload::DailyQuote(DailyQuote {
            quote_id: QuoteId::new(3),
            class_id: ClassId::new(1),
            content: "carpe diem".into(),
            voice_url: None,
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
        });
        assert_eq!(
            quote.dedup_tag().map(|t| t.key()),
            Some("daily_quote:3:2026-10-19".to_string())
        );

        let raw = Payload::AdminRaw(AdminRaw { document: json!({}) });
        assert_eq!(raw.dedup_tag(), None);
    }

    #[test]
    fn normalized_qualifies_every_timestamp() {
        let payload = Payload::Message(MessageDelivery {
            message_id: 1,
            sender_id: RecipientId::new(2),
            sender_name: "Ms. Lin".into(),
            receiver_id: RecipientId::new(42),
            timestamp: Some(Utc.with_ymd_and_hms(2026, 10, 19, 0, 30, 0).unwrap()),
            content: "hi".into(),
            audio_url: None,
        });

        let wire = payload.normalized(shanghai()).unwrap();
        assert_eq!(wire["timestamp"], "2026-10-19T08:30:00+08:00");
        assert_eq!(wire["content"], "hi");
        assert_eq!(wire["audio_url"], Value::Null);
    }

    #[test]
    fn normalized_leaves_free_text_alone() {
        let payload = Payload::Message(MessageDelivery {
            message_id: 1,
            sender_id: RecipientId::new(2),
            sender_name: "2026-10-19 07:15:00".into(),
            receiver_id: RecipientId::new(42),
            timestamp: None,
            content: "2026-10-19T07:15:00Z".into(),
            audio_url: None,
        });

        let wire = payload.normalized(shanghai()).unwrap();
        assert_eq!(wire["content"], "2026-10-19T07:15:00Z");
        assert_eq!(wire["sender_name"], "2026-10-19 07:15:00");
        assert_eq!(wire["timestamp"], Value::Null);
    }

    #[test]
    fn admin_raw_goes_out_as_injected() {
        let doc = json!({
            "type": "message",
            "content": "hi",
            "nested": [{"at": "2026-10-19 07:15:00"}],
            "count": 3
        });
        let payload = Payload::from_document(doc.clone()).unwrap();

        let wire = payload.normalized(shanghai()).unwrap();
        assert_eq!(wire, doc);
        assert_eq!(wire["type"], "message");
    }
}
