//! planner: enqueue one work unit per `(source, page)` for a date.
//!
//! Reads queue URLs and the source/page range from the environment and sends
//! to SQS. Prints the plan report as JSON on success.

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::info;

use rawlake_core::config::{load_dotenv, Config};
use rawlake_ingest::Planner;
use rawlake_queue::sqs::sqs_client;
use rawlake_queue::SqsSender;

// ── CLI ─────────────────────────────────────────────────────────────

/// Plan one ingestion date onto the per-source queues.
#[derive(Parser, Debug)]
#[command(name = "planner", version, about)]
struct Cli {
    /// Ingestion date (YYYY-MM-DD). Defaults to today in UTC.
    #[arg(long, env = "PLANNER_DATE")]
    date: Option<NaiveDate>,

    /// Plan only this source (repeatable). Defaults to the configured sources.
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

    if config.queue.queue_urls.is_empty() {
        bail!("QUEUE_URLS_JSON is empty; nothing to plan");
    }

    let sources = if cli.sources.is_empty() {
        config.planner.sources.clone()
    } else {
        cli.sources
    };
    let date = cli.date.unwrap_or_else(|| Utc::now().date_naive());

    let sender = Arc::new(SqsSender::new(sqs_client(&config.aws)));
    let planner = Planner::for_sources(sender, &config.queue.queue_urls, &sources, config.planner.pages())?;

    let report = planner.plan(date).await?;
    info!(date = %report.date, planned = report.planned, "planner finished");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
