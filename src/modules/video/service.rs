use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, warn};
use uuid::Uuid;

use super::model::{NewVideo, Video, VideoMeta, VideoStatus};
use super::repository::VideoRepository;
use crate::common::digest::sha256_file;
use crate::infrastructure::queue::JobQueue;
use crate::infrastructure::redis::cache::{Cache, CacheKind};
use crate::infrastructure::storage::{ObjectStore, content_type_for};
use crate::pipeline::envelope::{Envelope, Step};

/// Cached object keys and download URLs live this long.
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
// Signed for longer than the cache entry so a cached URL is always valid.
const PRESIGN_TTL: Duration = Duration::from_secs(25 * 60 * 60);

pub fn original_key(id: &str, ext: &str) -> String {
    format!("originals/{id}/original{ext}")
}

pub fn transcoded_key(id: &str, label: &str, ext: &str) -> String {
    format!("transcoded/{id}/{label}{ext}")
}

pub fn segment_key(id: &str, file_name: &str) -> String {
    format!("segments/{id}/{file_name}")
}

pub fn manifest_key(id: &str) -> String {
    segment_key(id, "master.m3u8")
}

pub fn thumbnail_key(id: &str) -> String {
    format!("thumbnails/{id}/{id}.jpeg")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: String,
    pub object_key: String,
    pub sha256: String,
}

/// Asset-level operations shared by the producer surface and the stages.
pub struct VideoService {
    repo: Arc<dyn VideoRepository>,
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn Cache>,
    queue: Arc<dyn JobQueue>,
    queue_name: String,
}

impl VideoService {
    pub fn new(
        repo: Arc<dyn VideoRepository>,
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn Cache>,
        queue: Arc<dyn JobQueue>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            store,
            cache,
            queue,
            queue_name: queue_name.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub async fn get_video(&self, id: &str) -> Result<Video> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("video {} not found", id))
    }

    /// Object key of the uploaded source, served from cache when possible.
    pub async fn get_object_key(&self, id: &str) -> Result<String> {
        let cache_key = CacheKind::ObjectKey.key(id);
        match self.cache.get(&cache_key).await {
            Ok(Some(key)) => return Ok(key),
            Ok(None) => {}
            Err(e) => warn!(video_id = id, "Cache read failed: {}", e),
        }

        let key = self.get_video(id).await?.original_object_key;
        if let Err(e) = self.cache.set(&cache_key, &key, CACHE_TTL).await {
            warn!(video_id = id, "Cache write failed: {}", e);
        }
        Ok(key)
    }

    /// Presigned GET URL for the uploaded source.
    pub async fn get_download_url(&self, id: &str) -> Result<String> {
        let key = self.get_object_key(id).await?;
        let cache_key = CacheKind::DownloadUrl.key(&key);
        match self.cache.get(&cache_key).await {
            Ok(Some(url)) => return Ok(url),
            Ok(None) => {}
            Err(e) => warn!(video_id = id, "Cache read failed: {}", e),
        }

        let url = self
            .store
            .presigned_url(&key, PRESIGN_TTL)
            .await
            .with_context(|| format!("presigning {key}"))?;
        if let Err(e) = self.cache.set(&cache_key, &url, CACHE_TTL).await {
            warn!(video_id = id, "Cache write failed: {}", e);
        }
        Ok(url)
    }

    pub async fn update_meta(&self, id: &str, meta: &VideoMeta, status: VideoStatus) -> Result<()> {
        self.repo.update_meta(id, meta, status).await
    }

    pub async fn update_status(&self, id: &str, status: VideoStatus) -> Result<()> {
        self.repo.update_status(id, status).await
    }

    pub async fn update_qualities(&self, id: &str, labels: &[String], status: VideoStatus) -> Result<()> {
        self.repo.update_qualities(id, labels, status).await
    }

    pub async fn update_manifest(&self, id: &str, path: &str, status: VideoStatus) -> Result<()> {
        self.repo.update_manifest(id, path, status).await
    }

    pub async fn update_thumbnail(&self, id: &str, key: &str) -> Result<()> {
        self.repo.update_thumbnail(id, key).await
    }

    pub async fn mark_failed(&self, id: &str) -> Result<()> {
        self.repo.update_status(id, VideoStatus::Failed).await
    }

    /// Upload a local file as a new asset and start its pipeline run.
    pub async fn submit(&self, path: &Path) -> Result<Submitted> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?
            .to_string();

        let sha256 = sha256_file(path)
            .await
            .with_context(|| format!("hashing {}", path.display()))?;

        let id = Uuid::new_v4().to_string();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let object_key = original_key(&id, &ext);

        info!("⬆️ Uploading {} as {}", filename, object_key);
        self.store
            .upload_local_file(&object_key, path, Some(&content_type_for(path)))
            .await
            .with_context(|| format!("uploading {}", path.display()))?;

        self.repo
            .insert_basic(&NewVideo {
                id: id.clone(),
                filename,
                original_object_key: object_key.clone(),
                sha256: sha256.clone(),
            })
            .await?;

        if let Err(e) = self
            .cache
            .set(&CacheKind::ObjectKey.key(&id), &object_key, CACHE_TTL)
            .await
        {
            warn!(video_id = %id, "Cache write failed: {}", e);
        }

        self.enqueue(&Envelope::new(id.clone(), Step::Validate)).await?;
        info!(video_id = %id, "✅ Submitted for processing");

        Ok(Submitted {
            id,
            object_key,
            sha256,
        })
    }

    /// Put an asset back on the queue at `step`. A failed asset stays
    /// failed unless `reset` is set, which rewinds its status to the one
    /// `step` expects to find.
    pub async fn requeue(&self, id: &str, step: Step, reset: bool) -> Result<()> {
        let video = self.get_video(id).await?;

        if reset {
            let status = status_before(step);
            self.repo.reset_status(id, status).await?;
            info!(video_id = id, from = %video.status, to = %status, "Status reset");
        } else if video.status == VideoStatus::Failed {
            bail!("video {} is failed; pass --reset to run it again", id);
        }

        self.enqueue(&Envelope::new(id, step)).await?;
        info!(video_id = id, %step, "Requeued");
        Ok(())
    }

    async fn enqueue(&self, envelope: &Envelope) -> Result<()> {
        let payload = envelope.encode()?;
        self.queue
            .enqueue(&self.queue_name, &payload)
            .await
            .with_context(|| format!("enqueueing {} for {}", envelope.step, envelope.video_id))
    }
}

/// Status a record holds when `step` is about to run on the happy path.
fn status_before(step: Step) -> VideoStatus {
    match step {
        Step::Validate => VideoStatus::Uploaded,
        Step::Transcode => VideoStatus::Valid,
        Step::Segment | Step::Checksum | Step::Thumbnail | Step::Publish => VideoStatus::Processing,
    }
}
