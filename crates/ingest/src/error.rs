use thiserror::Error;

use rawlake_core::CoreError;
use rawlake_queue::QueueError;
use rawlake_storage::StorageError;

/// Classified fetch failure, after any retries.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt failed with a retryable condition.
    #[error("transient failure after {attempts} attempt(s): {reason}")]
    Transient { attempts: u32, reason: String },

    /// A failure retrying cannot fix; surfaced after a single attempt.
    #[error("permanent failure: {reason}")]
    Permanent { reason: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Why a single message could not be ingested.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Malformed message: {0}")]
    Parse(String),

    #[error("Fetch failed for {unit}: {source}")]
    Fetch {
        unit: String,
        #[source]
        source: FetchError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(QueueError),
}

impl From<QueueError> for IngestError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Parse(msg) => IngestError::Parse(msg),
            other => IngestError::Queue(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("No queue URL configured for source '{0}'")]
    MissingQueue(String),

    #[error("Invalid work unit: {0}")]
    InvalidUnit(#[from] CoreError),

    #[error("Could not encode {source_name} page {page}: {error}")]
    Encode {
        source_name: String,
        page: u32,
        #[source]
        error: QueueError,
    },

    #[error("Send failed for {source_name} page {page}: {error}")]
    Send {
        source_name: String,
        page: u32,
        #[source]
        error: QueueError,
    },
}
