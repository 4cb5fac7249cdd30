//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! - store / directory は必須。無ければ build() が失敗する（Fail-fast）
//! - clock は省略時 SystemClock
//! - 設定値は build() 時に検証し、不正なら起動させない

use std::sync::Arc;
use std::time::Duration;

use super::access::AccessGate;
use super::broadcasts::BroadcastProducer;
use super::delivery::{DeliveryConfig, DeliverySettings, DeliveryWorker};
use super::poll::{AckService, PollService, PollSettings};
use super::queue_service::QueueService;
use super::reminders::ReminderProducer;
use super::supervisor::{Jobs, Supervisor};
use crate::config::Config;
use crate::domain::CourierError;
use crate::ports::{Clock, Directory, LocalZone, QueueStore, SystemClock};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .store(store)
///     .directory(directory)
///     .zone(LocalZone::new(offset))
///     .build()?;
/// let supervisor = app.supervise(true).await;
/// ```
pub struct AppBuilder {
    store: Option<Arc<dyn QueueStore>>,
    directory: Option<Arc<dyn Directory>>,
    clock: Arc<dyn Clock>,
    zone: LocalZone,
    delivery: DeliveryConfig,
    poll: PollSettings,
    reminder_interval: Duration,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("queue store was not provided")]
    MissingStore,

    #[error("directory was not provided")]
    MissingDirectory,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<CourierError> for BuildError {
    fn from(e: CourierError) -> Self {
        BuildError::InvalidConfig(e.to_string())
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            directory: None,
            clock: Arc::new(SystemClock),
            zone: LocalZone::default(),
            delivery: DeliveryConfig::default(),
            poll: PollSettings::default(),
            reminder_interval: Duration::from_secs(30),
        }
    }

    /// Take zone, delivery, poll and scheduler settings from a loaded config.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        Ok(Self::new()
            .zone(config.zone()?)
            .delivery(config.delivery_config()?)
            .poll(config.poll_settings())
            .reminder_interval(config.reminder_interval()))
    }

    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn zone(mut self, zone: LocalZone) -> Self {
        self.zone = zone;
        self
    }

    pub fn delivery(mut self, config: DeliveryConfig) -> Self {
        self.delivery = config;
        self
    }

    pub fn poll(mut self, settings: PollSettings) -> Self {
        self.poll = settings;
        self
    }

    pub fn reminder_interval(mut self, interval: Duration) -> Self {
        self.reminder_interval = interval;
        self
    }

    /// # 検証
    /// - store / directory が設定されているか
    /// - delivery 設定が妥当か（http なら callback 必須など）
    /// - poll / reminder の間隔が 0 でないか
    pub fn build(self) -> Result<App, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let directory = self.directory.ok_or(BuildError::MissingDirectory)?;
        if self.poll.cadence.is_zero() || self.poll.batch_size == 0 {
            return Err(BuildError::InvalidConfig(
                "poll cadence and batch size must be positive".into(),
            ));
        }
        if self.reminder_interval.is_zero() {
            return Err(BuildError::InvalidConfig(
                "reminder interval must be positive".into(),
            ));
        }
        let settings = DeliverySettings::new(self.delivery)?;

        let clock = self.clock;
        let zone = self.zone;
        Ok(App {
            queue: Arc::new(QueueService::new(store.clone(), directory.clone())),
            access: Arc::new(AccessGate::new(directory.clone(), clock.clone(), zone)),
            reminders: Arc::new(ReminderProducer::new(
                store.clone(),
                directory.clone(),
                clock.clone(),
                zone,
            )),
            broadcasts: Arc::new(BroadcastProducer::new(
                store.clone(),
                directory,
                clock.clone(),
                zone,
            )),
            delivery: Arc::new(DeliveryWorker::new(store.clone(), settings, zone)),
            poll: Arc::new(PollService::new(store.clone(), zone, self.poll)),
            ack: Arc::new(AckService::new(store)),
            reminder_interval: self.reminder_interval,
            clock,
            zone,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wired services. Clone the `Arc`s to hand them to request handlers.
pub struct App {
    pub queue: Arc<QueueService>,
    pub access: Arc<AccessGate>,
    pub reminders: Arc<ReminderProducer>,
    pub broadcasts: Arc<BroadcastProducer>,
    pub delivery: Arc<DeliveryWorker>,
    pub poll: Arc<PollService>,
    pub ack: Arc<AckService>,
    reminder_interval: Duration,
    clock: Arc<dyn Clock>,
    zone: LocalZone,
}

impl App {
    pub fn settings(&self) -> &DeliverySettings {
        self.delivery.settings()
    }

    pub fn zone(&self) -> LocalZone {
        self.zone
    }

    /// Start the periodic jobs.
    pub async fn supervise(&self, start_delivery: bool) -> Supervisor {
        let jobs = Jobs {
            reminders: Arc::clone(&self.reminders),
            reminder_interval: self.reminder_interval,
            broadcasts: Arc::clone(&self.broadcasts),
            delivery: Arc::clone(&self.delivery),
            clock: Arc::clone(&self.clock),
            zone: self.zone,
        };
        Supervisor::spawn(jobs, start_delivery).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::delivery::DeliveryMode;
    use crate::domain::{Payload, Priority, RecipientId};
    use crate::impls::{InMemoryDirectory, InMemoryQueueStore};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 1, 0, 0).unwrap()))
    }

    fn wired() -> AppBuilder {
        AppBuilder::new()
            .store(Arc::new(InMemoryQueueStore::new(clock())))
            .directory(Arc::new(InMemoryDirectory::new()))
            .clock(clock())
    }

    #[test]
    fn test_build_success() {
        assert!(wired().build().is_ok());
    }

    #[test]
    fn test_build_missing_store() {
        let app = AppBuilder::new()
            .directory(Arc::new(InMemoryDirectory::new()))
            .build();
        assert!(matches!(app, Err(BuildError::MissingStore)));
    }

    #[test]
    fn test_build_missing_directory() {
        let app = AppBuilder::new()
            .store(Arc::new(InMemoryQueueStore::new(clock())))
            .build();
        assert!(matches!(app, Err(BuildError::MissingDirectory)));
    }

    #[test]
    fn test_build_rejects_http_without_callback() {
        let app = wired()
            .delivery(DeliveryConfig {
                mode: DeliveryMode::Http,
                ..DeliveryConfig::default()
            })
            .build();
        assert!(matches!(app, Err(BuildError::InvalidConfig(_))));
    }

    #[test]
    fn test_build_rejects_zero_reminder_interval() {
        let app = wired().reminder_interval(Duration::ZERO).build();
        assert!(matches!(app, Err(BuildError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_config_uses_configured_zone() {
        let app = AppBuilder::from_config(&Config::default())
            .unwrap()
            .store(Arc::new(InMemoryQueueStore::new(clock())))
            .directory(Arc::new(InMemoryDirectory::new()))
            .build()
            .unwrap();
        assert_eq!(app.zone().offset().local_minus_utc(), 8 * 3600);
        assert!(!app.settings().status().running);
    }

    #[tokio::test]
    async fn test_wired_services_share_the_store() {
        let app = wired().build().unwrap();
        let payload =
            Payload::from_document(serde_json::json!({ "type": "message", "content": "hi" }))
                .unwrap();
        let id = app
            .queue
            .enqueue(RecipientId::new(42), payload, Priority::Urgent, None)
            .await
            .unwrap();

        let items = app
            .poll
            .poll(RecipientId::new(42), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(app.ack.ack(&[id]).await.unwrap(), vec![id]);
        assert_eq!(app.queue.stats().await.unwrap().pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_reports_running_delivery() {
        let app = wired().build().unwrap();
        let supervisor = app.supervise(true).await;
        assert!(app.settings().status().running);
        supervisor.shutdown_and_join().await;
        assert!(!app.settings().status().running);
    }
}
