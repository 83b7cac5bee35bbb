//! Durable mail queue.
//!
//! Submitted mails are pushed here and drained by the dispatch coordinator.
//! Every backend is FIFO per queue instance.

mod factory;
mod memory_backend;
mod redis_backend;

pub use factory::create_mail_queue;
pub use memory_backend::MemoryMailQueue;
pub use redis_backend::RedisMailQueue;

use async_trait::async_trait;
use thiserror::Error;

use crate::mail::Mail;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// FIFO queue of pending mails.
///
/// `wait_and_pop` is the only operation allowed to suspend until data exists.
#[async_trait]
pub trait MailQueue: Send + Sync {
    /// Backend identifier, for logs and health output
    fn backend_name(&self) -> &'static str;

    /// Append a mail; returns the queue length after the push
    async fn push(&self, mail: Mail) -> QueueResult<usize>;

    /// Take the oldest mail, `None` when empty
    async fn pop(&self) -> QueueResult<Option<Mail>>;

    /// Take the oldest mail, waiting as long as needed for one
    async fn wait_and_pop(&self) -> QueueResult<Mail>;

    /// Number of pending mails
    async fn total(&self) -> QueueResult<usize>;

    /// Drop every pending mail; returns how many were dropped
    async fn clear(&self) -> QueueResult<usize>;
}
