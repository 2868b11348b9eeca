use std::sync::Arc;

use anyhow::Context;

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool;
use crate::infrastructure::queue::{self, JobQueue};
use crate::infrastructure::redis::cache::RedisCache;
use crate::infrastructure::redis::client::RedisService;
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::video::repository::PgVideoRepository;
use crate::modules::video::service::VideoService;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub redis: RedisService,
    pub queue: Arc<dyn JobQueue>,
    pub videos: Arc<VideoService>,
}

impl AppState {
    /// Connect every backing service named in `config`.
    pub async fn connect(config: AppConfig) -> anyhow::Result<Self> {
        let max_connections = config.worker.count as u32 + 2;
        let db = pool::connect_to_db(&config.database_url, max_connections)
            .await
            .context("connecting to PostgreSQL")?;
        if config.run_migrations {
            pool::run_migrations(&db).await.context("running migrations")?;
        }

        let redis = RedisService::new(&config.redis_url)
            .await
            .context("connecting to Redis")?;

        let storage = StorageService::new(&config.storage);
        storage.ensure_bucket().await?;

        let queue = queue::connect(&config, &redis).await?;

        let videos = Arc::new(VideoService::new(
            Arc::new(PgVideoRepository::new(db)),
            Arc::new(storage),
            Arc::new(RedisCache::new(redis.clone())),
            queue.clone(),
            config.queue.name.clone(),
        ));

        Ok(Self {
            config,
            redis,
            queue,
            videos,
        })
    }
}
