//! Domain model (IDs, payloads, queue items, open windows, sources, errors).

pub mod errors;
pub mod ids;
pub mod item;
pub mod payload;
pub mod source;
pub mod window;

pub use self::errors::{CourierError, StoreError};
pub use self::ids::{ClassId, MemoId, QueueItemId, QuoteId, RecipientId, WindowId};
pub use self::item::{NewQueueItem, Priority, QueueItem};
pub use self::payload::{
    AdminRaw, DailyQuote, DedupTag, MemoReminder, MessageDelivery, NoticeDelivery, Payload,
};
pub use self::source::{BroadcastSource, ReminderSource};
pub use self::window::{DaySet, OpenWindow, TimeOfDay, is_open};
