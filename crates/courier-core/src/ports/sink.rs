//! DeliverySink port - 配送先（ログ / HTTP callback）

use async_trait::async_trait;

use crate::domain::{CourierError, QueueItem};

/// 1 件の queue item を配送する
///
/// # 契約
/// - `Ok(())` のときだけ worker が mark delivered する
/// - 失敗は `CourierError::Delivery`（item は due のまま次の tick で再試行）
/// - 1 回の呼び出しは有界時間で終わること
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, item: &QueueItem) -> Result<(), CourierError>;
}
