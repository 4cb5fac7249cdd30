//! Supervisor - 定期ジョブ（reminder / broadcast / delivery）の起動と停止
//!
//! - 各ジョブは独立した tokio task。ジョブ間のロックは無い
//! - `shutdown_tx` に true を送ると全ジョブが止まる
//! - delivery だけは個別に start / stop できる（自分専用の停止チャネルを持つ）
//! - 1 tick の失敗はログに残して次の tick へ

use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::broadcasts::BroadcastProducer;
use super::delivery::{DeliverySettings, DeliveryWorker};
use super::reminders::ReminderProducer;
use crate::ports::{Clock, LocalZone};

/// Worker group handle.
/// - `shutdown_and_join()` で全ジョブの終了を待てる
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    delivery: Arc<DeliveryWorker>,
    delivery_task: Mutex<Option<DeliveryTask>>,
}

struct DeliveryTask {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Everything the periodic jobs need.
pub struct Jobs {
    pub reminders: Arc<ReminderProducer>,
    pub reminder_interval: Duration,
    pub broadcasts: Arc<BroadcastProducer>,
    pub delivery: Arc<DeliveryWorker>,
    pub clock: Arc<dyn Clock>,
    pub zone: LocalZone,
}

impl Supervisor {
    /// Spawn the reminder and broadcast loops, plus delivery when
    /// `start_delivery` is set.
    pub async fn spawn(jobs: Jobs, start_delivery: bool) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reminders = {
            let producer = Arc::clone(&jobs.reminders);
            let interval = jobs.reminder_interval;
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move { reminder_loop(producer, interval, &mut rx).await })
        };
        let broadcasts = {
            let producer = Arc::clone(&jobs.broadcasts);
            let clock = Arc::clone(&jobs.clock);
            let zone = jobs.zone;
            let mut rx = shutdown_rx.clone();
            tokio::spawn(async move { broadcast_loop(producer, clock, zone, &mut rx).await })
        };

        let supervisor = Self {
            shutdown_tx,
            joins: vec![reminders, broadcasts],
            delivery: jobs.delivery,
            delivery_task: Mutex::new(None),
        };
        if start_delivery {
            supervisor.start_delivery().await;
        }
        supervisor
    }

    pub fn settings(&self) -> &DeliverySettings {
        self.delivery.settings()
    }

    /// Start the delivery loop. No-op when already running.
    pub async fn start_delivery(&self) -> bool {
        let mut task = self.delivery_task.lock().await;
        if task.is_some() {
            return false;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let worker = Arc::clone(&self.delivery);
        let join = tokio::spawn(async move {
            delivery_loop(worker, &mut stop_rx, &mut shutdown_rx).await;
        });
        *task = Some(DeliveryTask { stop_tx, join });
        self.settings().set_running(true);
        tracing::info!("delivery worker started");
        true
    }

    /// Stop the delivery loop and wait for its current tick to finish.
    pub async fn stop_delivery(&self) -> bool {
        let Some(task) = self.delivery_task.lock().await.take() else {
            return false;
        };
        // ignore send error: the loop may already be gone
        let _ = task.stop_tx.send(true);
        let _ = task.join.await;
        self.settings().set_running(false);
        tracing::info!("delivery worker stopped");
        true
    }

    /// Request shutdown for all jobs.
    /// In-flight ticks are not cancelled; loops stop before the next one.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all jobs.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.stop_delivery().await;
        for j in self.joins {
            let _ = j.await;
        }
    }
}

/// Sleep for `period` unless `stop` flips first. Returns true when stopping.
async fn wait_or_stop(period: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
        _ = tokio::time::sleep(period) => false,
    }
}

async fn reminder_loop(
    producer: Arc<ReminderProducer>,
    interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if let Err(error) = producer.run_once().await {
            tracing::warn!(%error, "reminder pass failed");
        }
        if wait_or_stop(interval, shutdown_rx).await {
            break;
        }
    }
}

/// Time left until the next local minute boundary (at least 1ms).
fn until_next_minute(clock: &dyn Clock, zone: LocalZone) -> Duration {
    let local = zone.localize(clock.now());
    let elapsed_ms = u64::from(local.second()) * 1000 + u64::from(local.nanosecond() / 1_000_000);
    Duration::from_millis(60_000u64.saturating_sub(elapsed_ms).max(1))
}

async fn broadcast_loop(
    producer: Arc<BroadcastProducer>,
    clock: Arc<dyn Clock>,
    zone: LocalZone,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if let Err(error) = producer.run_once().await {
            tracing::warn!(%error, "broadcast pass failed");
        }
        if wait_or_stop(until_next_minute(clock.as_ref(), zone), shutdown_rx).await {
            break;
        }
    }
}

async fn delivery_loop(
    worker: Arc<DeliveryWorker>,
    stop_rx: &mut watch::Receiver<bool>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut config_rx = worker.settings().subscribe();
    loop {
        if *stop_rx.borrow() || *shutdown_rx.borrow() {
            break;
        }
        if let Err(error) = worker.deliver_once().await {
            tracing::warn!(%error, "delivery tick failed");
        }

        // the interval is re-read every tick; a reconfiguration cuts the wait short
        let interval = config_rx.borrow_and_update().poll_interval;
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = config_rx.changed() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdminRaw, NewQueueItem, Payload, Priority, RecipientId};
    use crate::app::delivery::DeliveryConfig;
    use crate::impls::{InMemoryDirectory, InMemoryQueueStore};
    use crate::ports::{FixedClock, QueueStore};
    use chrono::{TimeZone, Utc};

    fn jobs(clock: FixedClock, store: Arc<InMemoryQueueStore>) -> Jobs {
        let directory = Arc::new(InMemoryDirectory::new());
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let zone = LocalZone::default();
        let settings = DeliverySettings::new(DeliveryConfig {
            poll_interval: Duration::from_secs(1),
            ..DeliveryConfig::default()
        })
        .unwrap();
        Jobs {
            reminders: Arc::new(ReminderProducer::new(
                store.clone(),
                directory.clone(),
                clock.clone(),
                zone,
            )),
            reminder_interval: Duration::from_secs(30),
            broadcasts: Arc::new(BroadcastProducer::new(
                store.clone(),
                directory,
                clock.clone(),
                zone,
            )),
            delivery: Arc::new(DeliveryWorker::new(store, settings, zone)),
            clock,
            zone,
        }
    }

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 1, 0, 30).unwrap())
    }

    async fn enqueue(store: &InMemoryQueueStore) {
        let payload = Payload::AdminRaw(AdminRaw {
            document: serde_json::json!({}),
        });
        store
            .insert(NewQueueItem::new(RecipientId::new(1), payload, Priority::Normal))
            .await
            .unwrap();
    }

    #[test]
    fn next_minute_boundary() {
        let clock = clock();
        assert_eq!(until_next_minute(&clock, LocalZone::default()), Duration::from_secs(30));
        clock.set(Utc.with_ymd_and_hms(2026, 10, 19, 1, 1, 0).unwrap());
        assert_eq!(until_next_minute(&clock, LocalZone::default()), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_runs_until_stopped() {
        let store = Arc::new(InMemoryQueueStore::new(Arc::new(clock())));
        let supervisor = Supervisor::spawn(jobs(clock(), store.clone()), true).await;
        assert!(supervisor.settings().status().running);

        enqueue(&store).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.count_pending().await.unwrap(), 0);

        assert!(supervisor.stop_delivery().await);
        assert!(!supervisor.settings().status().running);
        enqueue(&store).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.count_pending().await.unwrap(), 1);

        assert!(supervisor.start_delivery().await);
        assert!(!supervisor.start_delivery().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.count_pending().await.unwrap(), 0);

        supervisor.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_can_stay_stopped_at_startup() {
        let store = Arc::new(InMemoryQueueStore::new(Arc::new(clock())));
        let supervisor = Supervisor::spawn(jobs(clock(), store.clone()), false).await;
        assert!(!supervisor.settings().status().running);

        enqueue(&store).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.count_pending().await.unwrap(), 1);

        supervisor.shutdown_and_join().await;
    }
}
