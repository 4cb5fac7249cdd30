//! DeliveryWorker - due な item を優先度順に sink へ流す
//!
//! # 設計
//! - 配送設定（mode / callback / 間隔）は `DeliverySettings` が持つ
//!   `watch` チャネルの値。setter は `configure` の 1 箇所だけ
//! - worker は tick ごとに最新の設定を読む
//! - 成功した item ごとに即 mark delivered（1 item = 1 commit）
//! - 失敗した item は due のまま次の tick で再試行（backoff なし）

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};

use crate::domain::CourierError;
use crate::impls::{HttpSink, LogSink};
use crate::ports::{DeliverySink, LocalZone, QueueStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Log,
    Http,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::Log => "log",
            DeliveryMode::Http => "http",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(DeliveryMode::Log),
            "http" => Ok(DeliveryMode::Http),
            other => Err(CourierError::Config(format!(
                "unknown delivery mode '{other}' (expected log or http)"
            ))),
        }
    }
}

/// Runtime-mutable delivery configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub callback_url: Option<String>,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub batch_size: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Log,
            callback_url: None,
            poll_interval: Duration::from_secs(5),
            http_timeout: Duration::from_secs(5),
            batch_size: 50,
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<(), CourierError> {
        if self.poll_interval.is_zero() {
            return Err(CourierError::Config("poll interval must be positive".into()));
        }
        if self.http_timeout.is_zero() {
            return Err(CourierError::Config("http timeout must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(CourierError::Config("batch size must be positive".into()));
        }
        match (&self.mode, self.callback_url.as_deref()) {
            (DeliveryMode::Http, None) => Err(CourierError::Config(
                "http delivery requires a callback url".into(),
            )),
            (_, Some(url)) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                Err(CourierError::Config(format!(
                    "callback url must be an absolute http(s) url: {url}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Snapshot returned by the status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryStatus {
    pub running: bool,
    pub mode: DeliveryMode,
    pub callback_url: Option<String>,
    pub poll_interval_secs: u64,
}

/// Owner of the delivery configuration.
///
/// Cheap to clone; clones share the same value.
#[derive(Clone)]
pub struct DeliverySettings {
    config: Arc<watch::Sender<DeliveryConfig>>,
    running: Arc<AtomicBool>,
}

impl DeliverySettings {
    pub fn new(config: DeliveryConfig) -> Result<Self, CourierError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(watch::Sender::new(config)),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn current(&self) -> DeliveryConfig {
        self.config.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeliveryConfig> {
        self.config.subscribe()
    }

    /// Replace mode, callback and interval. Invalid input leaves the current
    /// configuration untouched.
    pub fn configure(
        &self,
        mode: DeliveryMode,
        callback_url: Option<String>,
        poll_interval: Duration,
    ) -> Result<DeliveryConfig, CourierError> {
        let next = DeliveryConfig {
            mode,
            callback_url,
            poll_interval,
            ..self.current()
        };
        next.validate()?;
        self.config.send_replace(next.clone());
        tracing::info!(mode = %next.mode, callback = ?next.callback_url, interval = ?next.poll_interval, "delivery reconfigured");
        Ok(next)
    }

    pub fn status(&self) -> DeliveryStatus {
        let config = self.current();
        DeliveryStatus {
            running: self.running.load(Ordering::SeqCst),
            mode: config.mode,
            callback_url: config.callback_url,
            poll_interval_secs: config.poll_interval.as_secs(),
        }
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct DeliveryWorker {
    store: Arc<dyn QueueStore>,
    settings: DeliverySettings,
    zone: LocalZone,
    /// Sink built for the config it was built from.
    sink: Mutex<Option<(DeliveryConfig, Arc<dyn DeliverySink>)>>,
}

impl DeliveryWorker {
    pub fn new(store: Arc<dyn QueueStore>, settings: DeliverySettings, zone: LocalZone) -> Self {
        Self {
            store,
            settings,
            zone,
            sink: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    async fn sink_for(&self, config: &DeliveryConfig) -> Result<Arc<dyn DeliverySink>, CourierError> {
        let mut cached = self.sink.lock().await;
        if let Some((built_for, sink)) = cached.as_ref()
            && built_for == config
        {
            return Ok(Arc::clone(sink));
        }
        let sink: Arc<dyn DeliverySink> = match (config.mode, config.callback_url.as_deref()) {
            (DeliveryMode::Http, Some(url)) => {
                Arc::new(HttpSink::new(url, config.http_timeout, self.zone)?)
            }
            (DeliveryMode::Http, None) => {
                return Err(CourierError::Config(
                    "http delivery requires a callback url".into(),
                ));
            }
            (DeliveryMode::Log, _) => Arc::new(LogSink),
        };
        *cached = Some((config.clone(), Arc::clone(&sink)));
        Ok(sink)
    }

    /// One tick: deliver up to one batch of due items.
    pub async fn deliver_once(&self) -> Result<DeliveryReport, CourierError> {
        let config = self.settings.current();
        let sink = self.sink_for(&config).await?;
        let due = self.store.select_due(config.batch_size, None).await?;

        let mut report = DeliveryReport {
            attempted: due.len(),
            ..DeliveryReport::default()
        };
        for item in &due {
            let delivered = match sink.deliver(item).await {
                Ok(()) => self.store.mark_delivered(&[item.id]).await.map_err(CourierError::from),
                Err(error) => Err(error),
            };
            match delivered {
                Ok(_) => report.delivered += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(item_id = %item.id, sink = sink.name(), %error, "delivery failed, item stays due");
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(sink = sink.name(), ?report, "delivery tick finished");
        }
        Ok(report)
    }
}
