//! SQLite 共通部分 - 接続プールと時刻の列表現

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::domain::StoreError;

/// Open a pool for `url`.
///
/// In-memory databases live and die with their connection, so they get a
/// single connection that is never recycled.
pub async fn connect(url: &str) -> Result<SqlitePool, StoreError> {
    let options = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    let pool = options.connect(url).await?;
    tracing::debug!(url, "sqlite pool opened");
    Ok(pool)
}

/// Run bootstrap statements one by one.
pub(crate) async fn apply_schema(pool: &SqlitePool, statements: &[&str]) -> Result<(), StoreError> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Timestamps are stored as integer milliseconds since the epoch (UTC).
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}
