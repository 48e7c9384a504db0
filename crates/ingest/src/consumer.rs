//! Queue consumer loop.
//!
//! Polls a queue, accumulates deliveries into micro-batches, hands each batch
//! to the [`Worker`] and acknowledges what the batch report marks complete.
//! Unacknowledged messages return after the visibility timeout and reach the
//! dead-letter sink once they exceed the queue's receive limit.
//!
//! A partial batch is handled when its window closes even if a long poll is
//! still outstanding; the poll keeps running and its messages join the next
//! batch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use rawlake_core::config::QueueConfig;
use rawlake_queue::{MicroBatcher, QueueConsumer, QueueError, QueueMessage};

use crate::worker::{BatchReport, Worker};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Label used in logs, usually the source name.
    pub name: String,
    pub batch_size: usize,
    pub batch_window: Duration,
    pub poll_interval: Duration,
}

impl ConsumerSettings {
    pub fn from_config(name: impl Into<String>, queue: &QueueConfig) -> Self {
        Self {
            name: name.into(),
            batch_size: queue.batch_size,
            batch_window: queue.batch_window(),
            poll_interval: queue.poll_interval(),
        }
    }
}

/// Running totals for one consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub batches: u64,
    pub acked: u64,
    pub failed: u64,
    pub aborted_batches: u64,
}

/// Consume until `shutdown` is notified. Messages already buffered when the
/// signal arrives are processed before returning.
pub async fn run_consumer(
    worker: Worker,
    consumer: Arc<dyn QueueConsumer>,
    settings: ConsumerSettings,
    shutdown: Arc<Notify>,
) -> ConsumerStats {
    let mut batcher = MicroBatcher::new(settings.batch_size, settings.batch_window);
    let mut stats = ConsumerStats::default();
    let max_messages = settings.batch_size.clamp(1, u32::MAX as usize) as u32;

    info!(
        consumer = %settings.name,
        batch_size = settings.batch_size,
        batch_window_ms = settings.batch_window.as_millis() as u64,
        poll_interval_ms = settings.poll_interval.as_millis() as u64,
        "Queue consumer started"
    );

    let mut poll = next_poll(consumer.as_ref(), max_messages, Duration::ZERO);
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = batcher.window_closed() => {
                debug!(
                    consumer = %settings.name,
                    buffered = batcher.len(),
                    "Batch window closed during poll"
                );
            }
            polled = &mut poll => {
                match polled {
                    Ok(messages) => {
                        stats.received += messages.len() as u64;
                        batcher.push(messages);
                    }
                    Err(e) => {
                        warn!(
                            consumer = %settings.name,
                            "Queue poll error: {}, retrying in {:?}", e, settings.poll_interval
                        );
                    }
                }
                poll = next_poll(consumer.as_ref(), max_messages, settings.poll_interval);
            }
        }

        while let Some(batch) = batcher.next_batch() {
            process_batch(&worker, consumer.as_ref(), &batch, &settings, &mut stats).await;
        }
    }
    drop(poll);

    while !batcher.is_empty() {
        let batch = batcher.take_batch();
        process_batch(&worker, consumer.as_ref(), &batch, &settings, &mut stats).await;
    }

    info!(
        consumer = %settings.name,
        received = stats.received,
        batches = stats.batches,
        acked = stats.acked,
        failed = stats.failed,
        "Queue consumer stopped"
    );
    stats
}

type PollFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<QueueMessage>, QueueError>> + Send + 'a>>;

/// Poll after `delay`. Kept alive across batch windows, so a long poll is
/// never cut short by a flush.
fn next_poll(consumer: &dyn QueueConsumer, max_messages: u32, delay: Duration) -> PollFuture<'_> {
    Box::pin(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        consumer.poll_batch(max_messages).await
    })
}

/// Run one batch through the worker and acknowledge per its report.
async fn process_batch(
    worker: &Worker,
    consumer: &dyn QueueConsumer,
    messages: &[QueueMessage],
    settings: &ConsumerSettings,
    stats: &mut ConsumerStats,
) -> BatchReport {
    let batch_start = Instant::now();
    let report = worker.handle_batch(messages).await;

    let mut acked = 0u64;
    for msg in messages.iter().filter(|m| report.completed.contains(&m.id)) {
        match consumer.ack(&msg.receipt_handle).await {
            Ok(()) => acked += 1,
            Err(e) => warn!(message_id = %msg.id, "Failed to ack: {}", e),
        }
    }

    stats.batches += 1;
    stats.acked += acked;
    stats.failed += report.failed.len() as u64;
    if report.aborted {
        stats.aborted_batches += 1;
    }

    let elapsed = batch_start.elapsed();
    if report.is_success() {
        info!(
            consumer = %settings.name,
            messages = messages.len(),
            stored = report.stored,
            skipped = report.skipped,
            acked,
            elapsed_ms = elapsed.as_millis() as u64,
            "Queue batch processed"
        );
    } else {
        warn!(
            consumer = %settings.name,
            messages = messages.len(),
            stored = report.stored,
            skipped = report.skipped,
            failed = report.failed.len(),
            aborted = report.aborted,
            acked,
            elapsed_ms = elapsed.as_millis() as u64,
            "Queue batch left unacknowledged messages"
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use rawlake_core::config::{BatchFailureMode, WriteMode};
    use rawlake_core::{key_for, WorkUnit};
    use rawlake_queue::QueueHealth;
    use rawlake_storage::{DurableStore, RawStore};

    use crate::fetch::Fetcher;
    use crate::worker::WorkerOptions;

    const LONG_POLL: Duration = Duration::from_secs(20);

    /// Hands out one message, then long-polls empty like an idle SQS queue.
    #[derive(Default)]
    struct LongPollQueue {
        polls: AtomicUsize,
        acked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueueConsumer for LongPollQueue {
        async fn poll_batch(&self, _max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
            if self.polls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(vec![QueueMessage {
                    id: "m-1".into(),
                    body: r#"{"endpoint":"api-a","ingestion_date":"2024-01-01","page":1}"#.into(),
                    receipt_handle: "r-1".into(),
                    timestamp: Utc::now(),
                    receive_count: 1,
                }]);
            }
            tokio::time::sleep(LONG_POLL).await;
            Ok(Vec::new())
        }

        async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
            self.acked.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }

        async fn nack(&self, _receipt_handle: &str) -> Result<(), QueueError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<QueueHealth, QueueError> {
            Ok(QueueHealth {
                connected: true,
                approximate_message_count: None,
                provider: "long-poll".into(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_is_handled_when_window_closes_mid_poll() {
        let store = Arc::new(RawStore::in_memory(WriteMode::Overwrite));
        let worker = Worker::new(
            store.clone(),
            Arc::new(Fetcher::synthetic()),
            WorkerOptions {
                qps_sleep: Duration::ZERO,
                failure_mode: BatchFailureMode::AbortBatch,
            },
        );
        let queue = Arc::new(LongPollQueue::default());
        let shutdown = Arc::new(Notify::new());
        let settings = ConsumerSettings {
            name: "api-a".into(),
            batch_size: 10,
            batch_window: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        };

        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(run_consumer(worker, queue.clone(), settings, shutdown.clone()));

        let unit = WorkUnit::new("api-a", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 1).unwrap();
        let key = key_for(&unit);
        while !store.exists(&key).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stored_after = start.elapsed();

        assert!(stored_after >= Duration::from_millis(100), "{stored_after:?}");
        assert!(stored_after < Duration::from_millis(500), "{stored_after:?}");
        // The second poll is still outstanding.
        assert_eq!(queue.polls.load(Ordering::SeqCst), 2);
        assert_eq!(*queue.acked.lock().unwrap(), vec!["r-1".to_string()]);

        shutdown.notify_one();
        let stats = handle.await.unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_does_not_wait_for_window() {
        let store = Arc::new(RawStore::in_memory(WriteMode::Overwrite));
        let worker = Worker::new(
            store.clone(),
            Arc::new(Fetcher::synthetic()),
            WorkerOptions {
                qps_sleep: Duration::ZERO,
                failure_mode: BatchFailureMode::AbortBatch,
            },
        );
        let queue = Arc::new(LongPollQueue::default());
        let shutdown = Arc::new(Notify::new());
        let settings = ConsumerSettings {
            name: "api-a".into(),
            batch_size: 1,
            batch_window: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
        };

        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(run_consumer(worker, queue.clone(), settings, shutdown.clone()));

        while queue.acked.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));

        shutdown.notify_one();
        assert_eq!(handle.await.unwrap().acked, 1);
    }
}
