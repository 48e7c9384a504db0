//! Planner → in-memory queues → worker → store, end to end.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::Notify;

use rawlake_core::config::{BatchFailureMode, WriteMode};
use rawlake_core::{key_for, WorkUnit};
use rawlake_ingest::{
    run_consumer, ConsumerSettings, FetchError, Fetcher, IngestError, PageFetcher, Planner, Worker,
    WorkerOptions,
};
use rawlake_queue::{decode_work_unit, MemoryBroker, MemoryQueue, QueueConsumer};
use rawlake_storage::{DurableStore, LocalBackend, RawStore, StorageBackend};

const SOURCES: [&str; 4] = ["api-a", "api-b", "api-c", "api-d"];

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Synthetic fetcher that counts calls and fails permanently for sources
/// starting with `broken`.
#[derive(Default)]
struct TrackingFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl PageFetcher for TrackingFetcher {
    async fn fetch(&self, unit: &WorkUnit) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if unit.source().starts_with("broken") {
            return Err(FetchError::Permanent {
                reason: "HTTP 400".into(),
            });
        }
        Fetcher::synthetic().fetch(unit).await
    }
}

struct Harness {
    queues: Vec<(String, Arc<MemoryQueue>)>,
    planner: Planner,
    store: Arc<RawStore>,
    fetcher: Arc<TrackingFetcher>,
}

impl Harness {
    fn new(sources: &[&str], visibility: Duration, max_receive_count: u32) -> Self {
        let mut broker = MemoryBroker::new();
        let mut urls = IndexMap::new();
        let mut queues = Vec::new();
        for source in sources {
            let url = format!("memory://{source}");
            queues.push((source.to_string(), broker.declare(url.clone(), visibility, max_receive_count)));
            urls.insert(source.to_string(), url);
        }

        Self {
            queues,
            planner: Planner::new(Arc::new(broker), urls, 1..=10),
            store: Arc::new(RawStore::in_memory(WriteMode::Overwrite)),
            fetcher: Arc::new(TrackingFetcher::default()),
        }
    }

    fn worker(&self, failure_mode: BatchFailureMode) -> Worker {
        Worker::new(
            self.store.clone(),
            self.fetcher.clone(),
            WorkerOptions {
                qps_sleep: Duration::ZERO,
                failure_mode,
            },
        )
    }

    fn queue(&self, source: &str) -> Arc<MemoryQueue> {
        self.queues
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, q)| q.clone())
            .unwrap()
    }

    fn fetch_calls(&self) -> usize {
        self.fetcher.calls.load(Ordering::SeqCst)
    }
}

fn settings(name: &str, batch_size: usize) -> ConsumerSettings {
    ConsumerSettings {
        name: name.to_string(),
        batch_size,
        batch_window: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
    }
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Run a consumer until its queue is empty.
async fn drain(worker: Worker, queue: Arc<MemoryQueue>, batch_size: usize) -> rawlake_ingest::ConsumerStats {
    let shutdown = Arc::new(Notify::new());
    let handle = tokio::spawn(run_consumer(
        worker,
        queue.clone(),
        settings(queue.url(), batch_size),
        shutdown.clone(),
    ));
    wait_for(|| {
        let queue = queue.clone();
        async move { queue.is_empty() }
    })
    .await;
    shutdown.notify_one();
    handle.await.unwrap()
}

#[tokio::test]
async fn planner_enqueues_ten_pages_per_source() {
    let harness = Harness::new(&SOURCES, Duration::from_secs(30), 5);

    let report = harness.planner.plan(date()).await.unwrap();
    assert_eq!(report.planned, 40);
    assert_eq!(report.per_source.len(), 4);
    assert!(report.per_source.values().all(|&n| n == 10));

    for (source, queue) in &harness.queues {
        let messages = queue.poll_batch(100).await.unwrap();
        assert_eq!(messages.len(), 10);
        for (expected_page, msg) in (1..=10).zip(&messages) {
            let unit = decode_work_unit(msg).unwrap();
            assert_eq!(unit.source(), source);
            assert_eq!(unit.date(), date());
            assert_eq!(unit.page(), expected_page);
        }
    }
}

#[tokio::test]
async fn replanning_is_absorbed_by_existence_check() {
    let harness = Harness::new(&SOURCES, Duration::from_secs(30), 5);
    let worker = harness.worker(BatchFailureMode::AbortBatch);

    harness.planner.plan(date()).await.unwrap();
    for (_, queue) in &harness.queues {
        let stats = drain(worker.clone(), queue.clone(), 2).await;
        assert_eq!(stats.received, 10);
        assert_eq!(stats.acked, 10);
        assert_eq!(stats.failed, 0);
    }
    assert_eq!(harness.fetch_calls(), 40);

    for source in SOURCES {
        for page in 1..=10 {
            let unit = WorkUnit::new(source, date(), page).unwrap();
            assert!(harness.store.exists(&key_for(&unit)).await.unwrap());
        }
    }

    harness.planner.plan(date()).await.unwrap();
    for (_, queue) in &harness.queues {
        let stats = drain(worker.clone(), queue.clone(), 2).await;
        assert_eq!(stats.acked, 10);
    }
    assert_eq!(harness.fetch_calls(), 40, "second run must not fetch");
}

#[tokio::test]
async fn aborted_batch_is_redelivered_whole() {
    let harness = Harness::new(&["api-a"], Duration::from_millis(50), 0);
    let queue = harness.queue("api-a");
    let worker = harness.worker(BatchFailureMode::AbortBatch);

    queue.push(r#"{"endpoint":"api-a","ingestion_date":"2024-01-01","page":1}"#);
    queue.push(r#"{"endpoint":"broken-a","ingestion_date":"2024-01-01","page":1}"#);
    queue.push(r#"{"endpoint":"api-a","ingestion_date":"2024-01-01","page":2}"#);

    let batch = queue.poll_batch(3).await.unwrap();
    let report = worker.handle_batch(&batch).await;
    assert!(report.aborted);
    assert!(report.completed.is_empty());
    assert!(matches!(report.failed[0].error, IngestError::Fetch { .. }));
    assert_eq!(report.stored, 1);
    assert_eq!(harness.fetch_calls(), 2);

    // Nothing was acknowledged: all three come back after the timeout.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let redelivered = queue.poll_batch(3).await.unwrap();
    assert_eq!(redelivered.len(), 3);
    assert!(redelivered.iter().all(|m| m.receive_count == 2));

    // The page stored before the failure is now skipped.
    let report = worker.handle_batch(&redelivered[..1]).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(harness.fetch_calls(), 2);
}

#[tokio::test]
async fn poison_message_reaches_dead_letters() {
    let harness = Harness::new(&["api-a"], Duration::from_millis(100), 3);
    let queue = harness.queue("api-a");
    let worker = harness.worker(BatchFailureMode::ReportItemFailures);

    let poison = queue.push(r#"{"endpoint":"broken-a","ingestion_date":"2024-01-01","page":7}"#);
    queue.push(r#"{"endpoint":"api-a","ingestion_date":"2024-01-01","page":1}"#);
    queue.push("not json");

    let stats = drain(worker, queue.clone(), 2).await;

    let dead: Vec<String> = queue.dead_letters().into_iter().map(|m| m.id).collect();
    assert_eq!(dead.len(), 2);
    assert!(dead.contains(&poison));
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.failed, 6);
    assert_eq!(queue.dlq_depth().await.unwrap(), Some(2));

    let stored = WorkUnit::new("api-a", date(), 1).unwrap();
    assert!(harness.store.exists(&key_for(&stored)).await.unwrap());
    // The malformed body never reached the fetcher.
    assert_eq!(harness.fetch_calls(), 4);
}

#[tokio::test]
async fn shutdown_before_any_message_returns_empty_stats() {
    let harness = Harness::new(&["api-a"], Duration::from_secs(30), 5);
    let shutdown = Arc::new(Notify::new());
    shutdown.notify_one();

    let stats = run_consumer(
        harness.worker(BatchFailureMode::AbortBatch),
        harness.queue("api-a"),
        settings("api-a", 2),
        shutdown,
    )
    .await;

    assert_eq!(stats, rawlake_ingest::ConsumerStats::default());
}

#[tokio::test]
async fn local_store_receives_partitioned_objects() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = StorageBackend::Local(LocalBackend::new(tmp.path()).unwrap());
    let store = Arc::new(RawStore::new(backend, WriteMode::Overwrite));
    let worker = Worker::new(
        store.clone(),
        Arc::new(Fetcher::synthetic()),
        WorkerOptions {
            qps_sleep: Duration::ZERO,
            failure_mode: BatchFailureMode::AbortBatch,
        },
    );

    let mut broker = MemoryBroker::new();
    let queue = broker.declare("memory://api-b", Duration::from_secs(30), 5);
    let mut urls = IndexMap::new();
    urls.insert("api-b".to_string(), "memory://api-b".to_string());
    Planner::new(Arc::new(broker), urls, 1..=3).plan(date()).await.unwrap();

    let stats = drain(worker, queue, 2).await;
    assert_eq!(stats.acked, 3);

    for page in 1..=3 {
        let file = tmp
            .path()
            .join(format!("raw/source=api-b/ingestion_date=2024-01-01/page={page:06}.json.gz"));
        assert!(file.is_file(), "missing {}", file.display());
    }
    let unit = WorkUnit::new("api-b", date(), 2).unwrap();
    let stored = store.get(&key_for(&unit)).await.unwrap();
    assert_eq!(stored.document["page"], 2);
}
