use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use super::StageHandler;
use crate::infrastructure::media::MediaTool;
use crate::infrastructure::storage::content_type_for;
use crate::modules::video::model::{QUALITY_PROFILES, VideoStatus};
use crate::modules::video::service::{VideoService, transcoded_key};
use crate::pipeline::context::JobContext;
use crate::pipeline::envelope::{Envelope, Step};

/// Produces one rendition per quality profile from the source.
pub struct TranscodeStage {
    videos: Arc<VideoService>,
    media: Arc<dyn MediaTool>,
}

impl TranscodeStage {
    pub fn new(videos: Arc<VideoService>, media: Arc<dyn MediaTool>) -> Self {
        Self { videos, media }
    }
}

#[async_trait]
impl StageHandler for TranscodeStage {
    fn step(&self) -> Step {
        Step::Transcode
    }

    async fn handle(&self, ctx: &JobContext, envelope: &Envelope) -> anyhow::Result<()> {
        let id = envelope.video_id.as_str();
        info!(video_id = id, "🎥 Transcoding started");

        let video = self.videos.get_video(id).await?;
        let source = self.videos.get_download_url(id).await?;
        let ext = video.extension();
        let dir = tempfile::tempdir()?;

        let mut completed = Vec::with_capacity(QUALITY_PROFILES.len());
        for profile in &QUALITY_PROFILES {
            let output = dir.path().join(format!("{}{}", profile.label, ext));
            self.media
                .transcode(&source, &output, profile.height, &ctx.cancel)
                .await
                .with_context(|| format!("transcoding {}", profile.label))?;

            let key = transcoded_key(id, profile.label, &ext);
            let content_type = content_type_for(&output);
            ctx.guard(async {
                self.videos
                    .store()
                    .upload_local_file(&key, &output, Some(&content_type))
                    .await
                    .with_context(|| format!("uploading {key}"))
            })
            .await?;

            info!(video_id = id, quality = profile.label, key = %key, "Rendition uploaded");
            completed.push(profile.label.to_string());
        }

        self.videos
            .update_qualities(id, &completed, VideoStatus::Processing)
            .await?;

        info!(video_id = id, qualities = completed.len(), "✅ Transcoding finished");
        Ok(())
    }
}
