//! Work queue contract shared by every pipeline step.
//!
//! A single named queue carries envelopes for all steps. Delivery is
//! at-least-once from the pipeline's point of view: a payload handed out by
//! `dequeue` is gone from the broker, so callers that cannot finish it must
//! enqueue it again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AppConfig, QueueBackend};
use crate::infrastructure::redis::client::RedisService;

pub mod rabbitmq;
pub mod redis_list;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue to '{queue}' failed: {reason}")]
    EnqueueFailed { queue: String, reason: String },

    #[error("Dequeue from '{queue}' failed: {reason}")]
    DequeueFailed { queue: String, reason: String },

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

impl QueueError {
    pub fn enqueue_failed(queue: &str, reason: impl ToString) -> Self {
        Self::EnqueueFailed {
            queue: queue.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn dequeue_failed(queue: &str, reason: impl ToString) -> Self {
        Self::DequeueFailed {
            queue: queue.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a payload to the tail of `queue`.
    async fn enqueue(&self, queue: &str, payload: &[u8]) -> QueueResult<()>;

    /// Pop the head of `queue`, waiting at most `wait` for one to arrive.
    /// `Ok(None)` means the wait elapsed with the queue empty.
    async fn dequeue(&self, queue: &str, wait: Duration) -> QueueResult<Option<Vec<u8>>>;
}

pub async fn connect(config: &AppConfig, redis: &RedisService) -> anyhow::Result<Arc<dyn JobQueue>> {
    let queue: Arc<dyn JobQueue> = match config.queue.backend {
        QueueBackend::Redis => Arc::new(redis_list::RedisQueue::new(redis.clone())),
        QueueBackend::RabbitMq => {
            let url = config
                .queue
                .amqp_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("AMQP_URL is required for the rabbitmq backend"))?;
            Arc::new(rabbitmq::RabbitMqService::new(url).await?)
        }
    };
    Ok(queue)
}
