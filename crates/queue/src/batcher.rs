//! Size-or-deadline batching of queue deliveries.
//!
//! The first message pushed into an empty batcher opens a window of
//! `window` length. A batch is ready once it holds `max_size` messages or
//! the window has closed. [`MicroBatcher::window_closed`] lets a consumer
//! race the window against a long poll, so a partial batch never waits on
//! the queue.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::consumer::QueueMessage;

pub struct MicroBatcher {
    pending: Vec<QueueMessage>,
    max_size: usize,
    window: Duration,
    opened_at: Option<Instant>,
}

impl MicroBatcher {
    /// `max_size` of zero is treated as one.
    pub fn new(max_size: usize, window: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            pending: Vec::with_capacity(max_size),
            max_size,
            window,
            opened_at: None,
        }
    }

    pub fn push(&mut self, messages: Vec<QueueMessage>) {
        if messages.is_empty() {
            return;
        }
        if self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
        }
        self.pending.extend(messages);
    }

    /// When the open window closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|opened| opened + self.window)
    }

    /// Resolves when the open window closes; never resolves while empty.
    ///
    /// The returned future holds no borrow of the batcher.
    pub fn window_closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self.deadline();
        async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.pending.len() >= self.max_size
            || self.deadline().is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Next batch if one is ready.
    pub fn next_batch(&mut self) -> Option<Vec<QueueMessage>> {
        self.is_ready().then(|| self.take_batch())
    }

    /// Up to `max_size` messages regardless of readiness. Overflow stays
    /// buffered and opens a fresh window.
    pub fn take_batch(&mut self) -> Vec<QueueMessage> {
        if self.pending.len() <= self.max_size {
            self.opened_at = None;
            return std::mem::take(&mut self.pending);
        }
        let overflow = self.pending.split_off(self.max_size);
        self.opened_at = Some(Instant::now());
        std::mem::replace(&mut self.pending, overflow)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
