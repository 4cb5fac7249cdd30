//! courier - outgoing message queue の運用 CLI
//!
//! `serve` で定期ジョブを回し、それ以外のサブコマンドは 1 回呼んで JSON を
//! stdout に出す。ログは stderr。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use courier_core::app::{App, AppBuilder};
use courier_core::config::Config;
use courier_core::domain::{ClassId, CourierError, Payload, Priority, QueueItemId, QuoteId, RecipientId};
use courier_core::impls::{SqliteDirectory, SqliteQueueStore, connect};
use courier_core::ports::{AdminFilter, Clock, SystemClock};

/// Courier - deferred, prioritized delivery to student devices
#[derive(Parser)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, short, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run reminder, broadcast and delivery jobs until Ctrl-C
    Serve,

    /// Queue one payload for a recipient, or for every student of a class
    Enqueue {
        #[arg(long, conflicts_with = "class", required_unless_present = "class")]
        recipient: Option<i64>,
        #[arg(long)]
        class: Option<i64>,
        /// JSON object
        #[arg(long)]
        payload: String,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// RFC 3339 instant; ignored for urgent items
        #[arg(long)]
        deliver_after: Option<DateTime<Utc>>,
    },

    /// Long-poll due items for a recipient
    Poll {
        #[arg(long)]
        recipient: i64,
        /// Seconds to wait
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Acknowledge delivered items
    Ack { ids: Vec<i64> },

    /// Administrative listing
    List {
        #[arg(long)]
        recipient: Option<i64>,
        #[arg(long)]
        delivered: Option<bool>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        size: u32,
    },

    /// Force items to delivered
    MarkDelivered { ids: Vec<i64> },

    /// Delete items
    Delete { ids: Vec<i64> },

    /// Run one delivery tick
    DeliverOnce,

    /// Run one reminder pass
    RemindOnce,

    /// Fan a daily quote out now
    BroadcastOnce { quote: i64 },

    /// Explain the access decision for a student
    Access { student: i64 },

    /// Pending item count
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            // bad input exits 2; store, delivery and config failures exit 1
            if is_client_failure(&error) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn is_client_failure(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<CourierError>()
        .is_some_and(CourierError::is_client_error)
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let app = open(&config).await?;

    match cli.command {
        Commands::Serve => serve(&app, config.delivery.autostart).await,
        Commands::Enqueue {
            recipient,
            class,
            payload,
            priority,
            deliver_after,
        } => {
            let document = serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let payload = Payload::from_document(document)?;
            let ids = match (recipient, class) {
                (Some(recipient), _) => vec![
                    app.queue
                        .enqueue(RecipientId::new(recipient), payload, priority, deliver_after)
                        .await?,
                ],
                (None, Some(class)) => {
                    app.queue
                        .enqueue_for_class(ClassId::new(class), payload, priority)
                        .await?
                }
                (None, None) => anyhow::bail!("either --recipient or --class is required"),
            };
            print_json(&ids)
        }
        Commands::Poll { recipient, timeout } => {
            let items = app
                .poll
                .poll(RecipientId::new(recipient), Duration::from_secs(timeout))
                .await?;
            print_json(&items)
        }
        Commands::Ack { ids } => print_json(&app.ack.ack(&item_ids(ids)).await?),
        Commands::List {
            recipient,
            delivered,
            priority,
            page,
            size,
        } => {
            let filter = AdminFilter {
                recipient: recipient.map(RecipientId::new),
                delivered,
                priority,
            };
            print_json(&app.queue.list_admin(&filter, page, size).await?)
        }
        Commands::MarkDelivered { ids } => {
            print_json(&app.queue.mark_delivered_admin(&item_ids(ids)).await?)
        }
        Commands::Delete { ids } => print_json(&app.queue.delete(&item_ids(ids)).await?),
        Commands::DeliverOnce => print_json(&app.delivery.deliver_once().await?),
        Commands::RemindOnce => print_json(&app.reminders.run_once().await?),
        Commands::BroadcastOnce { quote } => {
            print_json(&app.broadcasts.trigger_once(QuoteId::new(quote)).await?)
        }
        Commands::Access { student } => {
            print_json(&app.access.explain(RecipientId::new(student)).await?)
        }
        Commands::Stats => print_json(&app.queue.stats().await?),
    }
}

/// Connect SQLite, create tables, wire the app.
async fn open(config: &Config) -> Result<App> {
    let pool = connect(&config.database.url)
        .await
        .with_context(|| format!("failed to open {}", config.database.url))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = SqliteQueueStore::new(pool.clone(), clock.clone());
    store.bootstrap().await?;
    let directory = SqliteDirectory::new(pool);
    directory.bootstrap().await?;

    let app = AppBuilder::from_config(config)?
        .store(Arc::new(store))
        .directory(Arc::new(directory))
        .clock(clock)
        .build()?;
    Ok(app)
}

async fn serve(app: &App, start_delivery: bool) -> Result<()> {
    let supervisor = app.supervise(start_delivery).await;
    let status = app.settings().status();
    tracing::info!(
        running = status.running,
        mode = %status.mode,
        callback = ?status.callback_url,
        "courier serving; Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutting down");
    supervisor.shutdown_and_join().await;
    Ok(())
}

fn item_ids(ids: Vec<i64>) -> Vec<QueueItemId> {
    ids.into_iter().map(QueueItemId::new).collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
