use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, options::*, types::FieldTable,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{JobQueue, QueueError, QueueResult};

// basic_get does not block, so an empty queue is polled at this interval
// until the caller's wait elapses.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
}

impl RabbitMqService {
    async fn connect(url: &str) -> Result<(Connection, Channel)> {
        info!("Connecting to RabbitMQ");
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| anyhow!("Failed to create channel: {}", e))?;

        info!("✅ Connected to RabbitMQ");
        Ok((conn, channel))
    }

    pub async fn new(url: &str) -> Result<Self> {
        let (conn, channel) = Self::connect(url).await?;

        Ok(Self {
            url: url.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
        })
    }

    async fn reconnect(&self) -> QueueResult<()> {
        warn!("RabbitMQ connection dropped, reconnecting...");
        let (conn, channel) = Self::connect(&self.url)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        *self.conn.lock().await = conn;
        *self.channel.lock().await = channel;
        Ok(())
    }

    async fn declare(channel: &Channel, queue: &str) -> lapin::Result<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish_internal(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        let channel = self.channel.lock().await;

        Self::declare(&channel, queue)
            .await
            .map_err(|e| QueueError::enqueue_failed(queue, format!("declare: {e}")))?;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(2), // Persistent
            )
            .await
            .map_err(|e| QueueError::enqueue_failed(queue, e))?
            .await
            .map_err(|e| QueueError::enqueue_failed(queue, format!("confirm: {e}")))?;

        Ok(())
    }

    async fn get_internal(&self, queue: &str) -> QueueResult<Option<Vec<u8>>> {
        let channel = self.channel.lock().await;

        Self::declare(&channel, queue)
            .await
            .map_err(|e| QueueError::dequeue_failed(queue, format!("declare: {e}")))?;

        let Some(message) = channel
            .basic_get(queue, BasicGetOptions::default())
            .await
            .map_err(|e| QueueError::dequeue_failed(queue, e))?
        else {
            return Ok(None);
        };

        let payload = message.delivery.data.clone();
        // Acked on receipt: from here on the pipeline owns redelivery.
        message
            .delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::dequeue_failed(queue, format!("ack: {e}")))?;

        Ok(Some(payload))
    }
}

#[async_trait]
impl JobQueue for RabbitMqService {
    async fn enqueue(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        if let Err(e) = self.publish_internal(queue, payload).await {
            warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
            self.reconnect().await?;
            self.publish_internal(queue, payload).await?;
        }

        Ok(())
    }

    async fn dequeue(&self, queue: &str, wait: Duration) -> QueueResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + wait;

        loop {
            let attempt = match self.get_internal(queue).await {
                Err(e) => {
                    warn!("RabbitMQ get failed: {}. Retrying after reconnect.", e);
                    self.reconnect().await?;
                    self.get_internal(queue).await?
                }
                Ok(attempt) => attempt,
            };

            if attempt.is_some() {
                return Ok(attempt);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
