use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::debug;

use super::{JobQueue, QueueError, QueueResult};
use crate::infrastructure::redis::client::RedisService;

// BLPOP treats 0 as "block forever".
const MIN_BLOCK_SECS: f64 = 0.01;

/// Redis list used as a FIFO: producers `RPUSH`, workers `BLPOP`.
///
/// A blocking pop stalls every command pipelined behind it on the same
/// multiplexed connection, so each pop checks out its own connection
/// from a small idle pool instead of sharing the service connection.
pub struct RedisQueue {
    redis: RedisService,
    idle: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisQueue {
    pub fn new(redis: RedisService) -> Self {
        Self {
            redis,
            idle: Mutex::new(Vec::new()),
        }
    }

    async fn checkout(&self) -> QueueResult<MultiplexedConnection> {
        if let Some(conn) = self.idle.lock().await.pop() {
            return Ok(conn);
        }
        debug!("Opening dedicated Redis connection for blocking pop");
        Ok(self.redis.dedicated_conn().await?)
    }

    async fn checkin(&self, conn: MultiplexedConnection) {
        self.idle.lock().await.push(conn);
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        let mut conn = self.redis.get_conn();
        conn.rpush::<_, _, ()>(queue, payload)
            .await
            .map_err(|e| QueueError::enqueue_failed(queue, e))
    }

    async fn dequeue(&self, queue: &str, wait: Duration) -> QueueResult<Option<Vec<u8>>> {
        let mut conn = self.checkout().await?;
        let timeout = wait.as_secs_f64().max(MIN_BLOCK_SECS);

        let popped: Option<(String, Vec<u8>)> = conn
            .blpop(queue, timeout)
            .await
            .map_err(|e| QueueError::dequeue_failed(queue, e))?;

        self.checkin(conn).await;
        Ok(popped.map(|(_, payload)| payload))
    }
}
