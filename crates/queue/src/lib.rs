pub mod batcher;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod parser;
pub mod sender;
pub mod sqs;

pub use batcher::MicroBatcher;
pub use consumer::{QueueConsumer, QueueHealth, QueueMessage};
pub use error::QueueError;
pub use memory::{MemoryBroker, MemoryQueue};
pub use parser::{decode_work_unit, encode_work_unit};
pub use sender::{QueueSender, SentMessage};
pub use sqs::{SqsConsumer, SqsSender};
