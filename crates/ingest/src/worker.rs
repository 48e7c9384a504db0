//! Per-message ingestion: decode, check, throttle, fetch, store.
//!
//! ```text
//! Received -> KeyComputed -> Skip
//!                         -> Proceed -> Fetched -> Stored
//!                            (Proceed | Fetched) -> Failed
//! ```
//!
//! The existence check and the write are separate calls. Two deliveries of
//! the same unit can both pass the check and both fetch; with reproducible
//! content the duplicate write is harmless.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use rawlake_core::config::{BatchFailureMode, WorkerConfig};
use rawlake_core::{key_for, StorageKey, WorkUnit};
use rawlake_queue::{decode_work_unit, QueueMessage};
use rawlake_storage::DurableStore;

use crate::error::IngestError;
use crate::fetch::PageFetcher;

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Pause before every fetch.
    pub qps_sleep: Duration,
    pub failure_mode: BatchFailureMode,
}

impl WorkerOptions {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            qps_sleep: config.qps_sleep(),
            failure_mode: config.failure_mode,
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            qps_sleep: Duration::from_millis(50),
            failure_mode: BatchFailureMode::AbortBatch,
        }
    }
}

/// Terminal success states of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Key already present; nothing fetched.
    Skipped { key: StorageKey },
    Stored { key: StorageKey, content_hash: String },
}

impl MessageOutcome {
    pub fn key(&self) -> &StorageKey {
        match self {
            MessageOutcome::Skipped { key } | MessageOutcome::Stored { key, .. } => key,
        }
    }
}

#[derive(Debug)]
pub struct ItemFailure {
    pub message_id: String,
    pub error: IngestError,
}

/// What happened to a delivered batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Message ids safe to acknowledge.
    pub completed: Vec<String>,
    pub failed: Vec<ItemFailure>,
    /// A failure stopped the batch; nothing is acknowledged.
    pub aborted: bool,
    pub stored: usize,
    pub skipped: usize,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Processes delivered messages against a store and a fetcher.
///
/// Cheap to clone; clones share the store and fetcher.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn DurableStore>,
    fetcher: Arc<dyn PageFetcher>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(store: Arc<dyn DurableStore>, fetcher: Arc<dyn PageFetcher>, options: WorkerOptions) -> Self {
        Self {
            store,
            fetcher,
            options,
        }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub async fn process_message(&self, msg: &QueueMessage) -> Result<MessageOutcome, IngestError> {
        let unit = decode_work_unit(msg)?;
        self.process_unit(&unit).await
    }

    pub async fn process_unit(&self, unit: &WorkUnit) -> Result<MessageOutcome, IngestError> {
        let key = key_for(unit);

        if self.store.exists(&key).await? {
            info!(key = %key, "Skipping existing object");
            return Ok(MessageOutcome::Skipped { key });
        }

        if !self.options.qps_sleep.is_zero() {
            tokio::time::sleep(self.options.qps_sleep).await;
        }

        let document = self.fetcher.fetch(unit).await.map_err(|source| IngestError::Fetch {
            unit: unit.to_string(),
            source,
        })?;

        let receipt = self.store.put(&key, &document).await?;
        info!(
            key = %key,
            content_hash = %receipt.content_hash,
            size_bytes = receipt.size_bytes,
            created = receipt.created,
            "Stored object"
        );

        Ok(MessageOutcome::Stored {
            key,
            content_hash: receipt.content_hash,
        })
    }

    /// Process a batch sequentially according to the failure mode.
    pub async fn handle_batch(&self, messages: &[QueueMessage]) -> BatchReport {
        let mut report = BatchReport::default();

        for msg in messages {
            match self.process_message(msg).await {
                Ok(outcome) => {
                    debug!(message_id = %msg.id, key = %outcome.key(), "Message complete");
                    match outcome {
                        MessageOutcome::Skipped { .. } => report.skipped += 1,
                        MessageOutcome::Stored { .. } => report.stored += 1,
                    }
                    report.completed.push(msg.id.clone());
                }
                Err(error) => {
                    warn!(
                        message_id = %msg.id,
                        receive_count = msg.receive_count,
                        redelivery = msg.is_redelivery(),
                        error = %error,
                        "Message failed"
                    );
                    report.failed.push(ItemFailure {
                        message_id: msg.id.clone(),
                        error,
                    });
                    if self.options.failure_mode == BatchFailureMode::AbortBatch {
                        report.aborted = true;
                        report.completed.clear();
                        break;
                    }
                }
            }
        }

        report
    }
}
