//! In-process queue with SQS-like delivery semantics.
//!
//! [`MemoryQueue`] keeps messages in send order and hides each received
//! message for the visibility timeout. Unacknowledged messages reappear,
//! their receive count grows on every delivery, and once a message has been
//! received `max_receive_count` times the next receive attempt moves it to
//! the dead-letter list instead of delivering it again.
//!
//! Timing uses `tokio::time::Instant`, so tests can drive visibility expiry
//! with a paused clock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;
use crate::sender::{QueueSender, SentMessage};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    body: String,
    sent_at: DateTime<Utc>,
    receive_count: u32,
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
}

impl Entry {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }

    fn to_message(&self) -> QueueMessage {
        QueueMessage {
            id: self.id.clone(),
            body: self.body.clone(),
            receipt_handle: self.receipt_handle.clone().unwrap_or_default(),
            timestamp: self.sent_at,
            receive_count: self.receive_count,
        }
    }
}

#[derive(Default)]
struct State {
    entries: VecDeque<Entry>,
    dead_letters: Vec<QueueMessage>,
}

/// A single in-memory queue plus its dead-letter sink.
pub struct MemoryQueue {
    url: String,
    visibility_timeout: Duration,
    /// Zero disables redrive.
    max_receive_count: u32,
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new(url: impl Into<String>, visibility_timeout: Duration, max_receive_count: u32) -> Self {
        Self {
            url: url.into(),
            visibility_timeout,
            max_receive_count,
            state: Mutex::new(State::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a body and return its message id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock().entries.push_back(Entry {
            id: id.clone(),
            body: body.into(),
            sent_at: Utc::now(),
            receive_count: 0,
            receipt_handle: None,
            invisible_until: None,
        });
        id
    }

    /// Messages still owned by the queue (visible or in flight).
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages currently hidden by an outstanding delivery.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.lock().entries.iter().filter(|e| !e.is_visible(now)).count()
    }

    /// Snapshot of the dead-letter sink.
    pub fn dead_letters(&self) -> Vec<QueueMessage> {
        self.lock().dead_letters.clone()
    }

    /// Bodies of every message still in the queue, in send order.
    pub fn bodies(&self) -> Vec<String> {
        self.lock().entries.iter().map(|e| e.body.clone()).collect()
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();
        let State {
            entries,
            dead_letters,
        } = &mut *state;

        let mut delivered = Vec::new();
        let mut index = 0;
        while index < entries.len() && delivered.len() < max_messages as usize {
            if !entries[index].is_visible(now) {
                index += 1;
                continue;
            }

            if self.max_receive_count > 0 && entries[index].receive_count >= self.max_receive_count {
                if let Some(entry) = entries.remove(index) {
                    warn!(
                        queue_url = %self.url,
                        message_id = %entry.id,
                        receive_count = entry.receive_count,
                        "Redriving message to dead-letter sink"
                    );
                    dead_letters.push(entry.to_message());
                }
                continue;
            }

            let entry = &mut entries[index];
            entry.receive_count += 1;
            entry.receipt_handle = Some(Uuid::new_v4().to_string());
            entry.invisible_until = Some(now + self.visibility_timeout);
            delivered.push(entry.to_message());
            index += 1;
        }

        debug!(queue_url = %self.url, count = delivered.len(), "Delivered in-memory messages");
        Ok(delivered)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let position = state
            .entries
            .iter()
            .position(|e| e.receipt_handle.as_deref() == Some(receipt_handle));

        match position {
            Some(i) => {
                state.entries.remove(i);
                Ok(())
            }
            None => Err(QueueError::Ack(format!(
                "receipt handle {receipt_handle} is unknown or superseded"
            ))),
        }
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                QueueError::Provider(format!("receipt handle {receipt_handle} is unknown or superseded"))
            })?;
        entry.invisible_until = None;
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: Some(self.len() as u64),
            provider: "memory".to_string(),
        })
    }

    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        Ok(Some(self.lock().dead_letters.len() as u64))
    }
}

#[async_trait]
impl QueueSender for MemoryQueue {
    async fn send(&self, queue_url: &str, body: String) -> Result<SentMessage, QueueError> {
        if queue_url != self.url {
            return Err(QueueError::NotFound(queue_url.to_string()));
        }
        Ok(SentMessage {
            message_id: self.push(body),
            body_md5: None,
        })
    }
}

/// Routes sends to registered [`MemoryQueue`]s by URL.
#[derive(Default)]
pub struct MemoryBroker {
    queues: HashMap<String, Arc<MemoryQueue>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a queue, returning a handle for consumers.
    pub fn declare(
        &mut self,
        url: impl Into<String>,
        visibility_timeout: Duration,
        max_receive_count: u32,
    ) -> Arc<MemoryQueue> {
        let queue = Arc::new(MemoryQueue::new(url, visibility_timeout, max_receive_count));
        self.queues.insert(queue.url().to_string(), queue.clone());
        queue
    }

    pub fn queue(&self, url: &str) -> Option<Arc<MemoryQueue>> {
        self.queues.get(url).cloned()
    }
}

#[async_trait]
impl QueueSender for MemoryBroker {
    async fn send(&self, queue_url: &str, body: String) -> Result<SentMessage, QueueError> {
        let queue = self
            .queues
            .get(queue_url)
            .ok_or_else(|| QueueError::NotFound(queue_url.to_string()))?;
        queue.send(queue_url, body).await
    }
}
