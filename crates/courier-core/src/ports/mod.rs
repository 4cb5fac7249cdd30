//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。queue の永続化、外部エンティティ層、
//! 配送先、時刻をそれぞれ trait で隠蔽する。
//!
//! # 設計原則
//! - QueueStore が source of truth（正本）
//! - Directory は読み取り専用（CRUD 層が所有）
//! - 時刻は必ず Clock 経由

pub mod clock;
pub mod directory;
pub mod queue_store;
pub mod sink;

pub use self::clock::{Clock, FixedClock, LocalZone, SystemClock};
pub use self::directory::Directory;
pub use self::queue_store::{AdminFilter, AdminPage, PageRequest, QueueStore};
pub use self::sink::DeliverySink;
