//! Queue producer trait.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::QueueError;

/// Provider receipt for a sent message.
#[derive(Debug, Clone, Serialize)]
pub struct SentMessage {
    pub message_id: String,
    /// MD5 of the body as computed by the provider, when it reports one.
    pub body_md5: Option<String>,
}

/// Capability to enqueue a message body on a named queue.
#[async_trait]
pub trait QueueSender: Send + Sync {
    async fn send(&self, queue_url: &str, body: String) -> Result<SentMessage, QueueError>;
}
