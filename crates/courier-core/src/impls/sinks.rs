//! DeliverySink 実装
//!
//! - **LogSink**: 配送 = ログに記録すること。常に成功
//! - **HttpSink**: callback URL に JSON を POST。2xx のみ成功

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{CourierError, QueueItem, QueueItemId, RecipientId};
use crate::ports::{DeliverySink, LocalZone};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, item: &QueueItem) -> Result<(), CourierError> {
        tracing::info!(
            item_id = %item.id,
            recipient = %item.recipient,
            kind = item.payload.kind(),
            priority = %item.priority,
            "delivered to log"
        );
        Ok(())
    }
}

/// Body POSTed to the callback.
#[derive(Debug, Serialize)]
struct CallbackBody {
    queue_id: QueueItemId,
    target_user_id: RecipientId,
    payload: Value,
}

pub struct HttpSink {
    client: reqwest::Client,
    callback_url: String,
    zone: LocalZone,
}

impl HttpSink {
    /// `timeout` bounds each request end to end.
    pub fn new(
        callback_url: impl Into<String>,
        timeout: Duration,
        zone: LocalZone,
    ) -> Result<Self, CourierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CourierError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            callback_url: callback_url.into(),
            zone,
        })
    }
}

#[async_trait]
impl DeliverySink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, item: &QueueItem) -> Result<(), CourierError> {
        let body = CallbackBody {
            queue_id: item.id,
            target_user_id: item.recipient,
            payload: item.payload.normalized(self.zone.offset())?,
        };

        let response = self
            .client
            .post(&self.callback_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CourierError::Delivery(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(item_id = %item.id, status = status.as_u16(), "callback accepted");
            Ok(())
        } else {
            Err(CourierError::Delivery(format!(
                "callback answered HTTP {}",
                status.as_u16()
            )))
        }
    }
}
