use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use super::StageHandler;
use super::manifest::master_playlist;
use crate::infrastructure::media::MediaTool;
use crate::infrastructure::storage::content_type_for;
use crate::modules::video::model::{QualityProfile, VideoStatus, quality};
use crate::modules::video::service::{VideoService, manifest_key, segment_key, transcoded_key};
use crate::pipeline::context::JobContext;
use crate::pipeline::envelope::{Envelope, Step};

/// Cuts every completed rendition into HLS segments and publishes the
/// master playlist that ties them together.
pub struct SegmentStage {
    videos: Arc<VideoService>,
    media: Arc<dyn MediaTool>,
    segment_seconds: u32,
}

impl SegmentStage {
    pub fn new(videos: Arc<VideoService>, media: Arc<dyn MediaTool>, segment_seconds: u32) -> Self {
        Self {
            videos,
            media,
            segment_seconds,
        }
    }
}

#[async_trait]
impl StageHandler for SegmentStage {
    fn step(&self) -> Step {
        Step::Segment
    }

    async fn handle(&self, ctx: &JobContext, envelope: &Envelope) -> anyhow::Result<()> {
        let id = envelope.video_id.as_str();
        info!(video_id = id, "Segmenting started");

        let video = self.videos.get_video(id).await?;
        let profiles: Vec<&QualityProfile> = video
            .available_qualities
            .iter()
            .map(|label| quality(label).ok_or_else(|| anyhow!("unknown quality label '{}'", label)))
            .collect::<anyhow::Result<_>>()?;
        if profiles.is_empty() {
            return Err(anyhow!("video {} has no transcoded renditions", id));
        }

        let ext = video.extension();
        let dir = tempfile::tempdir()?;
        let store = self.videos.store();

        for profile in &profiles {
            let rendition_key = transcoded_key(id, profile.label, &ext);
            let local = dir.path().join(format!("{}{}", profile.label, ext));
            ctx.guard(async {
                store
                    .save_locally(&rendition_key, &local)
                    .await
                    .with_context(|| format!("downloading {rendition_key}"))
            })
            .await?;

            let out_dir = dir.path().join(profile.label);
            let files = self
                .media
                .segment(&local, &out_dir, profile.label, self.segment_seconds, &ctx.cancel)
                .await
                .with_context(|| format!("segmenting {}", profile.label))?;

            for file in &files {
                let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let key = segment_key(id, name);
                let content_type = content_type_for(file);
                ctx.guard(async {
                    store
                        .upload_local_file(&key, file, Some(&content_type))
                        .await
                        .with_context(|| format!("uploading {key}"))
                })
                .await?;
                debug!(video_id = id, key = %key, "Segment file uploaded");
            }

            tokio::fs::remove_file(&local).await?;
            info!(video_id = id, quality = profile.label, files = files.len(), "Rendition segmented");
        }

        let manifest = master_playlist(profiles.iter().copied());
        let key = manifest_key(id);
        store
            .put(&key, Bytes::from(manifest), Some("application/vnd.apple.mpegurl"))
            .await
            .with_context(|| format!("uploading {key}"))?;

        self.videos
            .update_manifest(id, &key, VideoStatus::Processing)
            .await?;

        info!(video_id = id, manifest = %key, "✅ Segmenting finished");
        Ok(())
    }
}
