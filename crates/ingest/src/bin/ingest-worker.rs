//! ingest-worker: long-running SQS consumers feeding the raw store.
//!
//! Spawns one consumer per configured source queue. Each consumer polls,
//! micro-batches, fetches and stores pages, and acknowledges what the batch
//! report marks complete. Ctrl-C drains buffered messages and exits.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info};

use rawlake_core::config::{load_dotenv, Config};
use rawlake_ingest::{run_consumer, ConsumerSettings, Fetcher, Worker, WorkerOptions};
use rawlake_queue::sqs::sqs_client;
use rawlake_queue::{QueueConsumer, SqsConsumer};
use rawlake_storage::RawStore;

// ── CLI ─────────────────────────────────────────────────────────────

/// Consume work units from the per-source queues and store raw pages.
#[derive(Parser, Debug)]
#[command(name = "ingest-worker", version, about)]
struct Cli {
    /// Consume only this source's queue (repeatable).
    #[arg(long = "source")]
    sources: Vec<String>,
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

    let queues: Vec<(String, String)> = config
        .queue
        .queue_urls
        .iter()
        .filter(|(source, _)| cli.sources.is_empty() || cli.sources.contains(source))
        .map(|(source, url)| (source.clone(), url.clone()))
        .collect();
    if queues.is_empty() {
        bail!("no source queues to consume (check QUEUE_URLS_JSON and --source)");
    }

    let store = RawStore::from_config(&config.aws, &config.storage).context("failed to open raw store")?;
    let fetcher = Fetcher::from_config(&config.fetch);
    let worker = Worker::new(
        Arc::new(store),
        Arc::new(fetcher),
        WorkerOptions::from_config(&config.worker),
    );

    let client = sqs_client(&config.aws);
    let mut shutdowns = Vec::with_capacity(queues.len());
    let mut handles = Vec::with_capacity(queues.len());

    for (source, queue_url) in queues {
        let consumer = SqsConsumer::new(
            client.clone(),
            queue_url,
            config.queue.dlq_urls.get(&source).cloned(),
            &config.queue,
        );
        match consumer.health_check().await {
            Ok(health) => info!(source = %source, %health, "queue reachable"),
            Err(e) => error!(source = %source, "queue health check failed: {}", e),
        }

        let shutdown = Arc::new(Notify::new());
        shutdowns.push(shutdown.clone());
        let settings = ConsumerSettings::from_config(source, &config.queue);
        handles.push(tokio::spawn(run_consumer(
            worker.clone(),
            Arc::new(consumer),
            settings,
            shutdown,
        )));
    }

    info!(consumers = handles.len(), "ingest-worker running");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    for shutdown in &shutdowns {
        shutdown.notify_one();
    }
    for handle in handles {
        match handle.await {
            Ok(stats) => info!(?stats, "consumer finished"),
            Err(e) => error!("consumer task failed: {}", e),
        }
    }

    info!("ingest-worker exited cleanly");
    Ok(())
}
