//! Short-lived per-asset leases.
//!
//! A lease is held for the duration of one stage invocation so that two
//! envelopes for the same asset (a duplicate enqueue, a redelivery racing a
//! retry) never mutate the same record concurrently.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use uuid::Uuid;

use super::client::RedisService;

// Only the holder of the token may release the key.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub token: String,
}

impl Lease {
    pub fn new(asset_id: &str) -> Self {
        Self {
            key: format!("lease:{asset_id}"),
            token: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
pub trait AssetLock: Send + Sync {
    /// Try to take the lease for `asset_id`. `Ok(None)` means somebody else
    /// holds it.
    async fn acquire(&self, asset_id: &str, ttl: Duration) -> anyhow::Result<Option<Lease>>;

    async fn release(&self, lease: &Lease) -> anyhow::Result<()>;
}

pub struct RedisLock {
    redis: RedisService,
    release: Script,
}

impl RedisLock {
    pub fn new(redis: RedisService) -> Self {
        Self {
            redis,
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl AssetLock for RedisLock {
    async fn acquire(&self, asset_id: &str, ttl: Duration) -> anyhow::Result<Option<Lease>> {
        let lease = Lease::new(asset_id);
        let mut conn = self.redis.get_conn();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&lease.key)
            .arg(&lease.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| lease))
    }

    async fn release(&self, lease: &Lease) -> anyhow::Result<()> {
        let mut conn = self.redis.get_conn();
        let _removed: i64 = self
            .release
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
