//! The receive side of a work queue.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// One delivery of a queued work unit.
///
/// `receipt_handle` and `receive_count` describe this delivery, not the
/// message: a redelivered message carries a new handle and a higher count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    /// JSON-encoded work unit.
    pub body: String,
    /// Token to ack or nack this delivery; stale after redelivery.
    pub receipt_handle: String,
    /// Enqueue time as reported by the queue.
    pub timestamp: DateTime<Utc>,
    /// Receives so far, this one included.
    pub receive_count: u32,
}

impl QueueMessage {
    /// Whether an earlier delivery of this message went unacknowledged.
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Reachability and depth of a queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub connected: bool,
    /// Visible messages, when the provider reports it.
    pub approximate_message_count: Option<u64>,
    /// "sqs" or "memory".
    pub provider: String,
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.connected { "connected" } else { "unreachable" };
        match self.approximate_message_count {
            Some(n) => write!(f, "{} {state}, ~{n} visible", self.provider),
            None => write!(f, "{} {state}", self.provider),
        }
    }
}

/// Receive side of an at-least-once queue.
///
/// A delivery that is never acked becomes visible again when its visibility
/// timeout lapses. After the queue's receive limit it moves to the
/// dead-letter sink instead.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Receive up to `max_messages`. May wait out a provider long poll;
    /// an empty vec means nothing arrived in that time.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete the delivered message.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Make the delivered message visible again right away.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<QueueHealth, QueueError>;

    /// Messages parked in the dead-letter sink, if the provider exposes one.
    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        Ok(None)
    }
}
