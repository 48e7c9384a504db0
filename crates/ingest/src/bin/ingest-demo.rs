//! ingest-demo: the whole pipeline in one process.
//!
//! Plans a date onto in-memory queues, drains every queue through a worker
//! into a local-filesystem (or in-memory) raw store, then plans and drains
//! again to show that already-stored pages are skipped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use indexmap::IndexMap;
use tokio::sync::Notify;
use tracing::info;

use rawlake_core::config::{load_dotenv, BatchFailureMode, Config, WriteMode};
use rawlake_ingest::{
    run_consumer, ConsumerSettings, ConsumerStats, Fetcher, Planner, Worker, WorkerOptions,
};
use rawlake_queue::{MemoryBroker, MemoryQueue};
use rawlake_storage::backend::{LocalBackend, StorageBackend};
use rawlake_storage::RawStore;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreKind {
    Local,
    Memory,
}

// ── CLI ─────────────────────────────────────────────────────────────

/// Run planner, queues and workers together against a local store.
#[derive(Parser, Debug)]
#[command(name = "ingest-demo", version, about)]
struct Cli {
    /// Ingestion date (YYYY-MM-DD). Defaults to today in UTC.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Where pages are written.
    #[arg(long, value_enum, default_value = "local")]
    store: StoreKind,

    /// Root directory for the local store. Defaults to DATA_DIR.
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// Visibility timeout of the in-memory queues, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    visibility_timeout_ms: u64,

    /// Rounds of planning + draining. The second round should only skip.
    #[arg(long, default_value_t = 2)]
    rounds: u32,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;
    config.log_summary();

    let date = cli.date.unwrap_or_else(|| Utc::now().date_naive());
    let visibility = Duration::from_millis(cli.visibility_timeout_ms);

    let backend = match cli.store {
        StoreKind::Local => {
            let dir = cli.data_dir.unwrap_or_else(|| config.storage.data_dir.clone());
            StorageBackend::Local(LocalBackend::new(&dir)?)
        }
        StoreKind::Memory => StorageBackend::memory(),
    };
    // The local filesystem has no conditional create.
    let write_mode = match cli.store {
        StoreKind::Local => WriteMode::Overwrite,
        StoreKind::Memory => config.storage.write_mode,
    };
    let store = Arc::new(
        RawStore::new(backend, write_mode)
            .with_prefix(config.storage.prefix.as_deref().unwrap_or(""))?,
    );

    let mut broker = MemoryBroker::new();
    let mut queue_urls = IndexMap::new();
    let mut queues: Vec<(String, Arc<MemoryQueue>)> = Vec::new();
    for source in &config.planner.sources {
        let url = format!("memory://rawlake/{source}");
        let queue = broker.declare(url.clone(), visibility, config.queue.max_receive_count);
        queue_urls.insert(source.clone(), url);
        queues.push((source.clone(), queue));
    }

    let planner = Planner::new(Arc::new(broker), queue_urls, config.planner.pages());
    let worker = Worker::new(
        store.clone(),
        Arc::new(Fetcher::from_config(&config.fetch)),
        WorkerOptions {
            qps_sleep: config.worker.qps_sleep(),
            // Isolate failures so one bad page does not hold up the demo.
            failure_mode: BatchFailureMode::ReportItemFailures,
        },
    );

    for round in 1..=cli.rounds {
        let report = planner.plan(date).await?;
        info!(round, planned = report.planned, "planned");

        let mut results: IndexMap<String, ConsumerStats> = IndexMap::new();
        for (source, queue) in &queues {
            let settings = ConsumerSettings {
                name: source.clone(),
                batch_size: config.queue.batch_size,
                batch_window: Duration::from_millis(config.queue.batch_window_ms.min(200)),
                poll_interval: Duration::from_millis(config.queue.poll_interval_ms.min(50)),
            };
            let stats = drain(worker.clone(), queue.clone(), settings).await?;
            results.insert(source.clone(), stats);
        }

        println!("round {round} ({date}):");
        for ((source, stats), (_, queue)) in results.iter().zip(&queues) {
            println!(
                "  {source:<10} received={:<3} acked={:<3} failed={:<3} dead_letters={}",
                stats.received,
                stats.acked,
                stats.failed,
                queue.dead_letters().len()
            );
        }
    }

    println!("store: {}", store.label());
    Ok(())
}

/// Consume until the queue holds nothing, then stop the consumer.
async fn drain(
    worker: Worker,
    queue: Arc<MemoryQueue>,
    settings: ConsumerSettings,
) -> anyhow::Result<ConsumerStats> {
    let shutdown = Arc::new(Notify::new());
    let handle = tokio::spawn(run_consumer(worker, queue.clone(), settings, shutdown.clone()));

    while !queue.is_empty() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    shutdown.notify_one();

    handle.await.context("consumer task panicked")
}
