use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use tracing::info;

use super::StageHandler;
use crate::common::digest::sha256_file;
use crate::infrastructure::media::MediaTool;
use crate::modules::video::model::{VideoMeta, VideoStatus};
use crate::modules::video::service::VideoService;
use crate::pipeline::context::JobContext;
use crate::pipeline::envelope::{Envelope, Step};

/// Hashes and probes the uploaded source, recording its technical metadata.
pub struct ValidateStage {
    videos: Arc<VideoService>,
    media: Arc<dyn MediaTool>,
}

impl ValidateStage {
    pub fn new(videos: Arc<VideoService>, media: Arc<dyn MediaTool>) -> Self {
        Self { videos, media }
    }
}

#[async_trait]
impl StageHandler for ValidateStage {
    fn step(&self) -> Step {
        Step::Validate
    }

    async fn handle(&self, ctx: &JobContext, envelope: &Envelope) -> anyhow::Result<()> {
        let id = envelope.video_id.as_str();
        info!(video_id = id, "Validation started");

        let key = self.videos.get_object_key(id).await?;
        let ext = Path::new(&key)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();

        let dir = tempfile::tempdir()?;
        let local = dir.path().join(format!("source{ext}"));
        let size = ctx
            .guard(async {
                self.videos
                    .store()
                    .save_locally(&key, &local)
                    .await
                    .with_context(|| format!("downloading {key}"))
            })
            .await?;

        let sha256 = sha256_file(&local).await?;
        let probe = self
            .media
            .probe(&local, &ctx.cancel)
            .await
            .context("probing source")?;

        let Some(video) = probe.video_stream() else {
            bail!("no video stream in {}", key);
        };
        let audio = probe.audio_stream();

        let meta = VideoMeta {
            sha256,
            duration_seconds: probe.duration_seconds(),
            codec_video: video.codec_name.clone(),
            codec_audio: audio.and_then(|a| a.codec_name.clone()),
            width: video.width.map(|w| w as i32),
            height: video.height.map(|h| h as i32),
        };
        self.videos.update_meta(id, &meta, VideoStatus::Valid).await?;

        info!(
            video_id = id,
            bytes = size,
            checksum = %meta.sha256,
            duration = ?meta.duration_seconds,
            vcodec = ?meta.codec_video,
            acodec = ?meta.codec_audio,
            "✅ Validation finished"
        );
        Ok(())
    }
}
