use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKey {
    DatabaseUrl,
    RunMigrations,
    RedisUrl,
    QueueBackend,
    AmqpUrl,
    QueueName,
    DeadLetterQueue,
    WorkerCount,
    DequeueTimeoutSecs,
    JobTimeoutSecs,
    ShutdownGraceSecs,
    MaxAttempts,
    RetryBaseDelayMs,
    RetryMaxDelayMs,
    LeaseTtlSecs,
    LeaseRetryDelayMs,
    MarkFailedOnExhausted,
    MinioUrl,
    MinioBucket,
    MinioRegion,
    MinioAccessKey,
    MinioSecretKey,
    FfmpegPath,
    FfprobePath,
    SegmentSeconds,
    ThumbnailSeekSeconds,
    LogFormat,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RunMigrations => "RUN_MIGRATIONS",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::QueueBackend => "QUEUE_BACKEND",
            EnvKey::AmqpUrl => "AMQP_URL",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::DeadLetterQueue => "DEAD_LETTER_QUEUE",
            EnvKey::WorkerCount => "WORKER_COUNT",
            EnvKey::DequeueTimeoutSecs => "DEQUEUE_TIMEOUT_SECS",
            EnvKey::JobTimeoutSecs => "JOB_TIMEOUT_SECS",
            EnvKey::ShutdownGraceSecs => "SHUTDOWN_GRACE_SECS",
            EnvKey::MaxAttempts => "MAX_ATTEMPTS",
            EnvKey::RetryBaseDelayMs => "RETRY_BASE_DELAY_MS",
            EnvKey::RetryMaxDelayMs => "RETRY_MAX_DELAY_MS",
            EnvKey::LeaseTtlSecs => "LEASE_TTL_SECS",
            EnvKey::LeaseRetryDelayMs => "LEASE_RETRY_DELAY_MS",
            EnvKey::MarkFailedOnExhausted => "MARK_FAILED_ON_EXHAUSTED",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET_VIDEOS",
            EnvKey::MinioRegion => "MINIO_REGION",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::SegmentSeconds => "SEGMENT_SECONDS",
            EnvKey::ThumbnailSeekSeconds => "THUMBNAIL_SEEK_SECONDS",
            EnvKey::LogFormat => "LOG_FORMAT",
        }
    }
}

/// Source of raw configuration values. The process environment in
/// production, a map in tests.
pub trait Lookup {
    fn lookup(&self, key: EnvKey) -> Option<String>;
}

pub struct ProcessEnv;

impl Lookup for ProcessEnv {
    fn lookup(&self, key: EnvKey) -> Option<String> {
        env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
    }
}

impl Lookup for HashMap<String, String> {
    fn lookup(&self, key: EnvKey) -> Option<String> {
        self.get(key.as_str()).cloned()
    }
}

pub fn get(source: &impl Lookup, key: EnvKey) -> Option<String> {
    source.lookup(key)
}

pub fn get_or(source: &impl Lookup, key: EnvKey, default: &str) -> String {
    get(source, key).unwrap_or_else(|| default.to_string())
}

pub fn get_parsed<T: FromStr>(source: &impl Lookup, key: EnvKey, default: T) -> T {
    match get(source, key) {
        Some(val) => match val.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}, using default", key.as_str(), val);
                default
            }
        },
        None => default,
    }
}
