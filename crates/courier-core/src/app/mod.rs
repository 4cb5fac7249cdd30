//! App - アプリケーション層
//!
//! ports を組み合わせてキューの振る舞いを実装する。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **QueueService**: enqueue と管理者向け操作
//! - **AccessGate**: 利用可能時間帯の判定
//! - **ReminderProducer / BroadcastProducer**: 定期的に item を生成
//! - **DeliveryWorker**: due な item を sink へ配送
//! - **PollService / AckService**: 端末からの long-poll と ack
//! - **Supervisor**: 定期ジョブの起動と停止

pub mod access;
pub mod broadcasts;
pub mod builder;
pub mod delivery;
pub mod poll;
pub mod queue_service;
pub mod reminders;
pub mod supervisor;

// 主要な型を再エクスポート
pub use self::access::{AccessGate, AccessReport, WindowVerdict};
pub use self::broadcasts::BroadcastProducer;
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::delivery::{
    DeliveryConfig, DeliveryMode, DeliveryReport, DeliverySettings, DeliveryStatus,
    DeliveryWorker,
};
pub use self::poll::{AckService, PollService, PollSettings, WireItem};
pub use self::queue_service::{MAX_PAGE_SIZE, QueueService, QueueStats};
pub use self::reminders::{ProducerReport, ReminderProducer};
pub use self::supervisor::{Jobs, Supervisor};
