//! AccessGate - 学生がいまシステムを使えるかの判定
//!
//! クラスの open window を読み、学校のローカル時刻で `is_open` を評価する。
//! 学生・クラス・窓口のいずれかが無ければ閉（fail-closed）。

use std::sync::Arc;

use chrono::Datelike;
use serde::Serialize;

use crate::domain::window::weekday_name;
use crate::domain::{ClassId, CourierError, OpenWindow, RecipientId, is_open};
use crate::ports::{Clock, Directory, LocalZone};

/// Diagnostic view of one access decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessReport {
    pub student: RecipientId,
    pub class: Option<ClassId>,
    pub local_now: String,
    pub weekday: &'static str,
    pub windows: Vec<WindowVerdict>,
    pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowVerdict {
    pub window: OpenWindow,
    pub open: bool,
}

pub struct AccessGate {
    directory: Arc<dyn Directory>,
    clock: Arc<dyn Clock>,
    zone: LocalZone,
}

impl AccessGate {
    pub fn new(directory: Arc<dyn Directory>, clock: Arc<dyn Clock>, zone: LocalZone) -> Self {
        Self {
            directory,
            clock,
            zone,
        }
    }

    pub async fn is_allowed(&self, student: RecipientId) -> Result<bool, CourierError> {
        let Some(class) = self.directory.class_of(student).await? else {
            return Ok(false);
        };
        let windows = self.directory.open_windows(class).await?;
        let now = self.zone.localize(self.clock.now()).naive_local();
        Ok(is_open(&windows, now))
    }

    pub async fn explain(&self, student: RecipientId) -> Result<AccessReport, CourierError> {
        let local = self.zone.localize(self.clock.now());
        let now = local.naive_local();
        let class = self.directory.class_of(student).await?;
        let windows = match class {
            Some(class) => self.directory.open_windows(class).await?,
            None => Vec::new(),
        };

        let windows: Vec<WindowVerdict> = windows
            .into_iter()
            .map(|window| WindowVerdict {
                open: window.matches(now),
                window,
            })
            .collect();

        Ok(AccessReport {
            student,
            class,
            local_now: local.to_rfc3339(),
            weekday: weekday_name(now.weekday()),
            allowed: windows.iter().any(|v| v.open),
            windows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WindowId;
    use crate::impls::InMemoryDirectory;
    use crate::ports::FixedClock;
    use chrono::{FixedOffset, TimeZone, Utc};

    fn zone() -> LocalZone {
        LocalZone::new(FixedOffset::east_opt(8 * 3600).unwrap())
    }

    async fn gate(local_hour: u32) -> AccessGate {
        // Monday 2026-10-19 at `local_hour`:00 in +08:00
        let instant = zone()
            .offset()
            .with_ymd_and_hms(2026, 10, 19, local_hour, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let directory = Arc::new(InMemoryDirectory::new());
        directory.enroll(RecipientId::new(1), ClassId::new(10)).await;
        directory.enroll(RecipientId::new(2), ClassId::new(11)).await;
        directory
            .add_window(
                OpenWindow::parse(WindowId::new(1), ClassId::new(10), "22:00", "06:00", &["Mon"])
                    .unwrap(),
            )
            .await;
        AccessGate::new(directory, Arc::new(FixedClock::new(instant)), zone())
    }

    #[tokio::test]
    async fn open_inside_the_local_window() {
        let gate = gate(23).await;
        assert!(gate.is_allowed(RecipientId::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn closed_outside_the_local_window() {
        let gate = gate(12).await;
        assert!(!gate.is_allowed(RecipientId::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn class_without_windows_and_unknown_students_are_closed() {
        let gate = gate(23).await;
        assert!(!gate.is_allowed(RecipientId::new(2)).await.unwrap());
        assert!(!gate.is_allowed(RecipientId::new(99)).await.unwrap());
    }

    #[tokio::test]
    async fn explain_reports_each_window() {
        let gate = gate(23).await;
        let report = gate.explain(RecipientId::new(1)).await.unwrap();
        assert_eq!(report.class, Some(ClassId::new(10)));
        assert_eq!(report.weekday, "Mon");
        assert_eq!(report.local_now, "2026-10-19T23:00:00+08:00");
        assert_eq!(report.windows.len(), 1);
        assert!(report.windows[0].open);
        assert!(report.allowed);
    }
}
