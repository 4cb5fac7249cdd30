//! ReminderProducer - 今日のメモを open window ごとに queue へ展開する
//!
//! # フロー（1 パス）
//! 1. remind_date == 今日（ローカル）のメモを取得
//! 2. 学生のクラスと open window を解決
//! 3. window ごとに「いま窓の中」かつ「今日の曜日が許可」なら候補
//! 4. (学生, メモ, window) を今日すでに積んでいなければ insert
//!
//! 1 メモの失敗はそのメモだけに閉じる（warn して次へ）。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::Serialize;

use crate::domain::{
    CourierError, DedupTag, MemoReminder, NewQueueItem, Payload, Priority, RecipientId,
    ReminderSource,
};
use crate::ports::{Clock, Directory, LocalZone, QueueStore};

/// Outcome of one producer pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerReport {
    /// Sources examined.
    pub sources: usize,
    pub enqueued: usize,
    /// Candidates already present today.
    pub duplicates: usize,
    /// Candidates that failed and were skipped.
    pub failures: usize,
}

pub struct ReminderProducer {
    store: Arc<dyn QueueStore>,
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    zone: LocalZone,
}

/// Frozen view of "now" shared by a whole pass.
struct PassClock {
    now: DateTime<Utc>,
    local: NaiveDateTime,
    today: std::ops::Range<DateTime<Utc>>,
}

impl ReminderProducer {
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

    pub async fn run_once(&self) -> Result<ProducerReport, CourierError> {
        let now = self.clock.now();
        let local = self.zone.localize(now).naive_local();
        let (start, end) = self.zone.day_bounds(local.date());
        let pass = PassClock {
            now,
            local,
            today: start..end,
        };

        let memos = self.directory.reminders_due(local.date()).await?;
        let mut report = ProducerReport {
            sources: memos.len(),
            ..ProducerReport::default()
        };
        let mut seen = HashSet::new();

        for memo in &memos {
            if let Err(error) = self.expand(memo, &pass, &mut seen, &mut report).await {
                report.failures += 1;
                tracing::warn!(source = %memo.id, recipient = %memo.student_id, %error, "memo reminder skipped");
            }
        }

        if report.enqueued > 0 || report.failures > 0 {
            tracing::info!(?report, "reminder pass finished");
        }
        Ok(report)
    }

    async fn expand(
        &self,
        memo: &ReminderSource,
        pass: &PassClock,
        seen: &mut HashSet<(RecipientId, DedupTag)>,
        report: &mut ProducerReport,
    ) -> Result<(), CourierError> {
        let Some(class) = self.directory.class_of(memo.student_id).await? else {
            tracing::debug!(source = %memo.id, recipient = %memo.student_id, "student has no class");
            return Ok(());
        };

        let weekday = pass.local.weekday();
        for window in self.directory.open_windows(class).await? {
            if !(window.matches(pass.local) && window.days.admits(weekday)) {
                continue;
            }
            let tag = DedupTag::MemoReminder {
                memo_id: memo.id,
                window_id: window.id,
            };
            if !seen.insert((memo.student_id, tag.clone())) {
                report.duplicates += 1;
                continue;
            }
            if self
                .store
                .exists_with_tag(memo.student_id, &tag, pass.today.clone())
                .await?
            {
                report.duplicates += 1;
                continue;
            }

            let payload = Payload::MemoReminder(MemoReminder {
                memo_id: memo.id,
                window_id: window.id,
                content: memo.content.clone(),
            });
            let item = NewQueueItem::new(memo.student_id, payload, Priority::Normal)
                .deliver_after(pass.now);
            let record = self.store.insert(item).await?;
            report.enqueued += 1;
            tracing::debug!(
                item_id = %record.id,
                source = %memo.id,
                window = %window.id,
                recipient = %memo.student_id,
                "memo reminder enqueued"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClassId, MemoId, OpenWindow, WindowId};
    use crate::impls::inmem_store::RejectingStore;
    use crate::impls::{InMemoryDirectory, InMemoryQueueStore};
    use crate::ports::FixedClock;
    use chrono::{Duration, FixedOffset, NaiveDate, TimeZone};

    fn zone() -> LocalZone {
        LocalZone::new(FixedOffset::east_opt(8 * 3600).unwrap())
    }

    fn local(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        zone()
            .offset()
            .with_ymd_and_hms(2026, 10, day, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn memo(id: i64, day: u32) -> ReminderSource {
        ReminderSource {
            id: MemoId::new(id),
            student_id: RecipientId::new(1),
            remind_date: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
            content: "bring homework".into(),
        }
    }

    fn window(id: i64, start: &str, end: &str, days: &[&str]) -> OpenWindow {
        OpenWindow::parse(WindowId::new(id), ClassId::new(10), start, end, days).unwrap()
    }

    struct Fixture {
        clock: FixedClock,
        store: Arc<InMemoryQueueStore>,
        directory: Arc<InMemoryDirectory>,
        producer: ReminderProducer,
    }

    async fn fixture(now: DateTime<Utc>) -> Fixture {
        let clock = FixedClock::new(now);
        let store = Arc::new(InMemoryQueueStore::new(Arc::new(clock.clone())));
        let directory = Arc::new(InMemoryDirectory::new());
        directory.enroll(RecipientId::new(1), ClassId::new(10)).await;
        let producer = ReminderProducer::new(
            store.clone(),
            directory.clone(),
            Arc::new(clock.clone()),
            zone(),
        );
        Fixture {
            clock,
            store,
            directory,
            producer,
        }
    }

    #[tokio::test]
    async fn rerun_in_the_same_minute_is_idempotent() {
        // Monday 19:30 local
        let f = fixture(local(19, 19, 30)).await;
        f.directory.add_window(window(1, "19:00", "21:00", &[])).await;
        f.directory.add_memo(memo(5, 19)).await;

        let first = f.producer.run_once().await.unwrap();
        let second = f.producer.run_once().await.unwrap();

        assert_eq!(first.enqueued, 1);
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn a_new_day_produces_a_new_item() {
        let f = fixture(local(19, 19, 30)).await;
        f.directory.add_window(window(1, "19:00", "21:00", &[])).await;
        f.directory.add_memo(memo(5, 19)).await;
        f.directory.add_memo(memo(5, 20)).await;

        f.producer.run_once().await.unwrap();
        f.clock.advance(Duration::days(1));
        let next = f.producer.run_once().await.unwrap();

        assert_eq!(next.enqueued, 1);
        assert_eq!(f.store.len().await, 2);
    }

    #[tokio::test]
    async fn fans_out_one_item_per_matching_window() {
        let f = fixture(local(19, 19, 30)).await;
        f.directory.add_window(window(1, "19:00", "21:00", &[])).await;
        f.directory.add_window(window(2, "00:00", "00:00", &["Mon"])).await;
        f.directory.add_window(window(3, "08:00", "09:00", &[])).await;
        f.directory.add_memo(memo(5, 19)).await;

        let report = f.producer.run_once().await.unwrap();
        assert_eq!(report.enqueued, 2);

        let due = f.store.select_due(10, Some(RecipientId::new(1))).await.unwrap();
        let windows: Vec<_> = due
            .iter()
            .filter_map(|i| match &i.payload {
                Payload::MemoReminder(m) => Some(m.window_id),
                _ => None,
            })
            .collect();
        assert_eq!(windows, vec![WindowId::new(1), WindowId::new(2)]);
    }

    #[tokio::test]
    async fn early_segment_requires_today_to_be_permitted() {
        // Tuesday 05:00 local; the Monday-only window is open via yesterday,
        // but reminders also need today's weekday.
        let f = fixture(local(20, 5, 0)).await;
        f.directory.add_window(window(1, "22:00", "06:00", &["Mon"])).await;
        f.directory.add_memo(memo(5, 20)).await;

        let report = f.producer.run_once().await.unwrap();
        assert_eq!(report.enqueued, 0);
    }

    #[tokio::test]
    async fn memos_for_other_days_and_classless_students_are_ignored() {
        let f = fixture(local(19, 19, 30)).await;
        f.directory.add_window(window(1, "19:00", "21:00", &[])).await;
        f.directory.add_memo(memo(5, 20)).await;
        f.directory
            .add_memo(ReminderSource {
                student_id: RecipientId::new(99),
                ..memo(6, 19)
            })
            .await;

        let report = f.producer.run_once().await.unwrap();
        assert_eq!(report.sources, 1);
        assert_eq!(report.enqueued, 0);
        assert_eq!(report.failures, 0);
    }

    #[tokio::test]
    async fn one_failing_memo_does_not_stop_the_pass() {
        let f = fixture(local(19, 19, 30)).await;
        f.directory.enroll(RecipientId::new(2), ClassId::new(10)).await;
        f.directory.add_window(window(1, "19:00", "21:00", &[])).await;
        f.directory.add_memo(memo(5, 19)).await;
        f.directory
            .add_memo(ReminderSource {
                student_id: RecipientId::new(2),
                ..memo(6, 19)
            })
            .await;
        let producer = ReminderProducer::new(
            Arc::new(RejectingStore {
                inner: f.store.clone(),
                reject: RecipientId::new(1),
            }),
            f.directory.clone(),
            Arc::new(f.clock.clone()),
            zone(),
        );

        let report = producer.run_once().await.unwrap();

        assert_eq!(report.sources, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(report.enqueued, 1);
        let due = f.store.select_due(10, None).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].recipient, RecipientId::new(2));
    }

    /// Two producers that both check before either inserts create a
    /// duplicate: the dedup check is best-effort, not atomic.
    #[tokio::test]
    async fn interleaved_check_then_insert_can_duplicate() {
        let f = fixture(local(19, 19, 30)).await;
        let tag = DedupTag::MemoReminder {
            memo_id: MemoId::new(5),
            window_id: WindowId::new(1),
        };
        let (start, end) = zone().day_bounds(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        let recipient = RecipientId::new(1);

        let a_sees = f.store.exists_with_tag(recipient, &tag, start..end).await.unwrap();
        let b_sees = f.store.exists_with_tag(recipient, &tag, start..end).await.unwrap();
        assert!(!a_sees && !b_sees);

        for _ in 0..2 {
            let payload = Payload::MemoReminder(MemoReminder {
                memo_id: MemoId::new(5),
                window_id: WindowId::new(1),
                content: "bring homework".into(),
            });
            f.store
                .insert(NewQueueItem::new(recipient, payload, Priority::Normal))
                .await
                .unwrap();
        }
        assert_eq!(f.store.len().await, 2);
    }
}
