//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryQueueStore / InMemoryDirectory**: 開発用・テスト用
//! - **SqliteQueueStore / SqliteDirectory**: 本番用（sqlx + SQLite）
//! - **LogSink / HttpSink**: 配送先

pub mod inmem_directory;
pub mod inmem_store;
pub mod sinks;
pub mod sqlite;
pub mod sqlite_directory;
pub mod sqlite_store;

// 主要な型を再エクスポート
pub use self::inmem_directory::InMemoryDirectory;
pub use self::inmem_store::InMemoryQueueStore;
pub use self::sinks::{HttpSink, LogSink};
pub use self::sqlite::connect;
pub use self::sqlite_directory::SqliteDirectory;
pub use self::sqlite_store::SqliteQueueStore;
