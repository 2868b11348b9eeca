use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use super::StageHandler;
use crate::infrastructure::media::MediaTool;
use crate::modules::video::service::{VideoService, thumbnail_key};
use crate::pipeline::context::JobContext;
use crate::pipeline::envelope::{Envelope, Step};

pub struct ThumbnailStage {
    videos: Arc<VideoService>,
    media: Arc<dyn MediaTool>,
    seek_seconds: u32,
}

impl ThumbnailStage {
    pub fn new(videos: Arc<VideoService>, media: Arc<dyn MediaTool>, seek_seconds: u32) -> Self {
        Self {
            videos,
            media,
            seek_seconds,
        }
    }
}

#[async_trait]
impl StageHandler for ThumbnailStage {
    fn step(&self) -> Step {
        Step::Thumbnail
    }

    async fn handle(&self, ctx: &JobContext, envelope: &Envelope) -> anyhow::Result<()> {
        let id = envelope.video_id.as_str();
        info!(video_id = id, "Creating thumbnail");

        let source = self.videos.get_download_url(id).await?;
        let dir = tempfile::tempdir()?;
        let output = dir.path().join(format!("{id}.jpeg"));

        self.media
            .thumbnail(&source, &output, self.seek_seconds, &ctx.cancel)
            .await
            .context("extracting thumbnail")?;

        let key = thumbnail_key(id);
        ctx.guard(async {
            self.videos
                .store()
                .upload_local_file(&key, &output, Some(mime::IMAGE_JPEG.as_ref()))
                .await
                .with_context(|| format!("uploading {key}"))
        })
        .await?;

        self.videos.update_thumbnail(id, &key).await?;

        info!(video_id = id, key = %key, "✅ Thumbnail created");
        Ok(())
    }
}
