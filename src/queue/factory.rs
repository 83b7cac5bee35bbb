//! Mail queue factory

use std::sync::Arc;

use crate::config::{QueueBackend, QueueConfig, RedisConfig};

use super::memory_backend::MemoryMailQueue;
use super::redis_backend::RedisMailQueue;
use super::{MailQueue, QueueResult};

/// Create a mail queue based on configuration.
///
/// - `memory`: a process-local `MemoryMailQueue`
/// - `redis`: a `RedisMailQueue` on the list `{redis.prefix}:{queue.name}`
///
/// # Example
///
/// ```rust,ignore
/// let queue = create_mail_queue(&settings.queue, &settings.redis)?;
/// ```
pub fn create_mail_queue(
    settings: &QueueConfig,
    redis: &RedisConfig,
) -> QueueResult<Arc<dyn MailQueue>> {
    match settings.backend {
        QueueBackend::Redis => {
            tracing::info!(
                backend = "redis",
                prefix = %redis.prefix,
                name = %settings.name,
                "Creating Redis mail queue"
            );
            Ok(Arc::new(RedisMailQueue::new(
                &redis.url,
                &redis.prefix,
                &settings.name,
            )?))
        }
        QueueBackend::Memory => {
            tracing::info!(backend = "memory", name = %settings.name, "Creating memory mail queue");
            Ok(Arc::new(MemoryMailQueue::new()))
        }
    }
}
