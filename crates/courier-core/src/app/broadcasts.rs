//! BroadcastProducer - 毎日の名言をクラス全員に配る
//!
//! - `run_once`: broadcast_time がいまのローカル分と一致するものだけ展開
//! - `trigger_once`: 分の一致を見ずに即時展開（運用テスト用）
//!
//! どちらも (受信者, 名言, 今日) で重複を防ぐ。受信者ごとの失敗は
//! その受信者だけに閉じる。

use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use super::reminders::ProducerReport;
use crate::domain::{
    BroadcastSource, CourierError, DailyQuote, DedupTag, NewQueueItem, Payload, Priority,
    QuoteId, RecipientId, TimeOfDay,
};
use crate::ports::{Clock, Directory, LocalZone, QueueStore};

pub struct BroadcastProducer {
    store: Arc<dyn QueueStore>,
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    zone: LocalZone,
}

struct Today {
    now: DateTime<Utc>,
    date: NaiveDate,
    bounds: Range<DateTime<Utc>>,
}

impl BroadcastProducer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        directory: Arc<dyn Directory>,
        clock: Arc<dyn Clock>,
        zone: LocalZone,
    ) -> Self {
        Self {
            store,
            directory,
            clock,
            zone,
        }
    }

    fn today(&self) -> Today {
        let now = self.clock.now();
        let date = self.zone.localize(now).date_naive();
        let (start, end) = self.zone.day_bounds(date);
        Today {
            now,
            date,
            bounds: start..end,
        }
    }

    /// Scheduled pass for the current local minute.
    pub async fn run_once(&self) -> Result<ProducerReport, CourierError> {
        let today = self.today();
        let minute = TimeOfDay::of(self.zone.localize(today.now).time());

        let mut report = ProducerReport::default();
        for quote in self.directory.active_broadcasts().await? {
            if !quote.fires_at(minute) {
                continue;
            }
            report.sources += 1;
            if let Err(error) = self.fan_out(&quote, &today, &mut report).await {
                report.failures += 1;
                tracing::warn!(source = %quote.id, %error, "broadcast skipped");
            }
        }

        if report.sources > 0 {
            tracing::info!(%minute, ?report, "broadcast pass finished");
        }
        Ok(report)
    }

    /// Fan out one broadcast now, ignoring its scheduled minute.
    ///
    /// Unknown or inactive broadcasts are `NotFound`.
    pub async fn trigger_once(&self, id: QuoteId) -> Result<ProducerReport, CourierError> {
        let quote = self
            .directory
            .broadcast(id)
            .await?
            .filter(|q| q.active)
            .ok_or_else(|| CourierError::not_found("broadcast", id))?;

        let mut report = ProducerReport {
            sources: 1,
            ..ProducerReport::default()
        };
        self.fan_out(&quote, &self.today(), &mut report).await?;
        tracing::info!(source = %id, ?report, "broadcast triggered manually");
        Ok(report)
    }

    async fn fan_out(
        &self,
        quote: &BroadcastSource,
        today: &Today,
        report: &mut ProducerReport,
    ) -> Result<(), CourierError> {
        let recipients = self.directory.enrolled(quote.class_id).await?;
        for recipient in recipients {
            match self.deliver_to(quote, recipient, today).await {
                Ok(true) => report.enqueued += 1,
                Ok(false) => report.duplicates += 1,
                Err(error) => {
                    report.failures += 1;
                    tracing::warn!(source = %quote.id, %recipient, %error, "broadcast recipient skipped");
                }
            }
        }
        Ok(())
    }

    /// Returns false when today's item already exists.
    async fn deliver_to(
        &self,
        quote: &BroadcastSource,
        recipient: RecipientId,
        today: &Today,
    ) -> Result<bool, CourierError> {
        let tag = DedupTag::DailyQuote {
            quote_id: quote.id,
            date: today.date,
        };
        if self
            .store
            .exists_with_tag(recipient, &tag, today.bounds.clone())
            .await?
        {
            return Ok(false);
        }

        let payload = Payload::DailyQuote(DailyQuote {
            quote_id: quote.id,
            class_id: quote.class_id,
            content: quote.content.clone(),
            voice_url: quote.voice_url.clone(),
            date: today.date,
        });
        let item = NewQueueItem::new(recipient, payload, Priority::Normal).deliver_after(today.now);
        self.store.insert(item).await?;
        Ok(true)
    }
}
