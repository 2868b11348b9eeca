use redis::{Client, aio::MultiplexedConnection};
use tracing::info;

/// Shared Redis handle used by the cache, the asset lock and the list queue.
///
/// Non-blocking commands share one multiplexed connection (clones are
/// cheap and pipeline over the same socket). Blocking commands must use
/// `dedicated_conn` so they do not stall everybody else.
#[derive(Clone)]
pub struct RedisService {
    client: Client,
    shared: MultiplexedConnection,
}

impl RedisService {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(connection_string)?;
        let mut shared = client.get_multiplexed_async_connection().await?;

        let _pong: String = redis::cmd("PING").query_async(&mut shared).await?;

        info!("✅ Connected to Redis");
        Ok(Self { client, shared })
    }

    pub fn get_conn(&self) -> MultiplexedConnection {
        self.shared.clone()
    }

    pub async fn dedicated_conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }
}
