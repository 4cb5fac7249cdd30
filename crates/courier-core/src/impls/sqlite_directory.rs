//! SqliteDirectory - エンティティ層のテーブルを読むだけの Directory
//!
//! テーブルの所有者は CRUD 層。ここではスタンドアロン実行用に最小限の
//! スキーマ bootstrap だけを持つ。
//!
//! 壊れた行（不正な時刻・曜日・日付）はその行だけを warn して読み飛ばす。
//! 窓口が減る方向なので fail-closed になる。

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;

use super::sqlite::apply_schema;
use crate::domain::{
    BroadcastSource, ClassId, CourierError, MemoId, OpenWindow, QuoteId, RecipientId,
    ReminderSource, StoreError, TimeOfDay, WindowId,
};
use crate::ports::Directory;

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL,
        role TEXT NOT NULL,
        class_id INTEGER,
        is_active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS open_windows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        class_id INTEGER,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        days_json TEXT
    )",
    "CREATE TABLE IF NOT EXISTS memos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        student_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        remind_date TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS daily_quotes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        class_id INTEGER,
        content TEXT NOT NULL,
        voice_url TEXT,
        broadcast_time TEXT,
        active INTEGER NOT NULL DEFAULT 1
    )",
];

#[derive(Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        apply_schema(&self.pool, &SCHEMA).await
    }
}

const QUOTE_COLUMNS: &str = "id, class_id, content, voice_url, broadcast_time, active";

#[async_trait]
impl Directory for SqliteDirectory {
    async fn class_of(&self, student: RecipientId) -> Result<Option<ClassId>, StoreError> {
        let class = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT class_id FROM users WHERE id = ? AND role = 'student'",
        )
        .bind(student.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(class.flatten().map(ClassId::new))
    }

    async fn enrolled(&self, class: ClassId) -> Result<Vec<RecipientId>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users
             WHERE class_id = ? AND role = 'student' AND is_active = 1
             ORDER BY id ASC",
        )
        .bind(class.get())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(RecipientId::new).collect())
    }

    async fn open_windows(&self, class: ClassId) -> Result<Vec<OpenWindow>, StoreError> {
        let rows = sqlx::query_as::<_, WindowRow>(
            "SELECT id, class_id, start_time, end_time, days_json
             FROM open_windows WHERE class_id = ? ORDER BY id ASC",
        )
        .bind(class.get())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(WindowRow::into_window).collect())
    }

    async fn reminders_due(&self, date: NaiveDate) -> Result<Vec<ReminderSource>, StoreError> {
        let rows = sqlx::query_as::<_, MemoRow>(
            "SELECT id, student_id, content, remind_date
             FROM memos WHERE remind_date = ? ORDER BY id ASC",
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(MemoRow::into_source).collect())
    }

    async fn active_broadcasts(&self) -> Result<Vec<BroadcastSource>, StoreError> {
        let rows = sqlx::query_as::<_, QuoteRow>(&format!(
            "SELECT {QUOTE_COLUMNS} FROM daily_quotes
             WHERE active = 1 AND broadcast_time IS NOT NULL
             ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(QuoteRow::into_source).collect())
    }

    async fn broadcast(&self, id: QuoteId) -> Result<Option<BroadcastSource>, StoreError> {
        let row = sqlx::query_as::<_, QuoteRow>(&format!(
            "SELECT {QUOTE_COLUMNS} FROM daily_quotes WHERE id = ?"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(QuoteRow::into_source))
    }
}

fn skip_row(table: &'static str, id: i64, error: &CourierError) {
    tracing::warn!(table, id, %error, "skipping malformed row");
}

#[derive(sqlx::FromRow)]
struct WindowRow {
    id: i64,
    class_id: i64,
    start_time: String,
    end_time: String,
    days_json: Option<String>,
}

impl WindowRow {
    fn into_window(self) -> Option<OpenWindow> {
        let days: Vec<String> = match self.days_json.as_deref().map(serde_json::from_str) {
            None => Vec::new(),
            Some(Ok(days)) => days,
            Some(Err(e)) => {
                skip_row("open_windows", self.id, &CourierError::validation(e.to_string()));
                return None;
            }
        };
        OpenWindow::parse(
            WindowId::new(self.id),
            ClassId::new(self.class_id),
            &self.start_time,
            &self.end_time,
            &days,
        )
        .inspect_err(|e| skip_row("open_windows", self.id, e))
        .ok()
    }
}

#[derive(sqlx::FromRow)]
struct MemoRow {
    id: i64,
    student_id: i64,
    content: String,
    remind_date: String,
}

impl MemoRow {
    fn into_source(self) -> Option<ReminderSource> {
        let remind_date = self
            .remind_date
            .parse::<NaiveDate>()
            .map_err(|e| CourierError::validation(e.to_string()))
            .inspect_err(|e| skip_row("memos", self.id, e))
            .ok()?;
        Some(ReminderSource {
            id: MemoId::new(self.id),
            student_id: RecipientId::new(self.student_id),
            remind_date,
            content: self.content,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QuoteRow {
    id: i64,
    class_id: Option<i64>,
    content: String,
    voice_url: Option<String>,
    broadcast_time: Option<String>,
    active: bool,
}

impl QuoteRow {
    fn into_source(self) -> Option<BroadcastSource> {
        let Some(class_id) = self.class_id else {
            skip_row("daily_quotes", self.id, &CourierError::validation("no class"));
            return None;
        };
        let broadcast_time = match self.broadcast_time.as_deref().map(str::parse::<TimeOfDay>) {
            None => None,
            Some(Ok(time)) => Some(time),
            Some(Err(e)) => {
                skip_row("daily_quotes", self.id, &e);
                return None;
            }
        };
        Some(BroadcastSource {
            id: QuoteId::new(self.id),
            class_id: ClassId::new(class_id),
            broadcast_time,
            content: self.content,
            voice_url: self.voice_url,
            active: self.active,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::impls::sqlite::connect;

    async fn setup() -> (SqlitePool, SqliteDirectory) {
        let pool = connect("sqlite::memory:").await.unwrap();
        let directory = SqliteDirectory::new(pool.clone());
        directory.bootstrap().await.unwrap();
        (pool, directory)
    }

    #[tokio::test]
    async fn resolves_class_and_enrollment() {
        let (pool, directory) = setup().await;
        student(&pool, 1, 10).await;
        student(&pool, 2, 10).await;
        student(&pool, 3, 11).await;

        assert_eq!(
            directory.class_of(RecipientId::new(1)).await.unwrap(),
            Some(ClassId::new(10))
        );
        assert_eq!(directory.class_of(RecipientId::new(99)).await.unwrap(), None);
        assert_eq!(
            directory.enrolled(ClassId::new(10)).await.unwrap(),
            vec![RecipientId::new(1), RecipientId::new(2)]
        );
    }

    #[tokio::test]
    async fn malformed_windows_are_skipped() {
        let (pool, directory) = setup().await;
        window(&pool, 10, "22:00", "06:00", Some(r#"["Mon"]"#)).await;
        window(&pool, 10, "25:00", "06:00", None).await;
        window(&pool, 10, "08:00", "09:00", Some(r#"["Funday"]"#)).await;
        window(&pool, 10, "08:00", "09:00", Some("not json")).await;

        let windows = directory.open_windows(ClassId::new(10)).await.unwrap();
        assert_eq!(windows.len(), 1);
        assert!(windows[0].crosses_midnight());
    }

    #[tokio::test]
    async fn reminders_match_on_date() {
        let (pool, directory) = setup().await;
        memo(&pool, 1, "2026-10-19", "bring homework").await;
        memo(&pool, 1, "2026-10-20", "field trip").await;

        let due = directory
            .reminders_due(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap())
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].content, "bring homework");
    }

    #[tokio::test]
    async fn active_broadcasts_exclude_inactive_and_unscheduled() {
        let (pool, directory) = setup().await;
        quote(&pool, 10, Some("07:30"), true).await;
        quote(&pool, 10, Some("07:30"), false).await;
        quote(&pool, 10, None, true).await;

        let active = directory.active_broadcasts().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, QuoteId::new(1));

        let inactive = directory.broadcast(QuoteId::new(2)).await.unwrap().unwrap();
        assert!(!inactive.active);
        assert!(directory.broadcast(QuoteId::new(9)).await.unwrap().is_none());
    }
}
