use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use tracing::info;

use super::StageHandler;
use crate::common::digest::sha256_file;
use crate::modules::video::service::VideoService;
use crate::pipeline::context::JobContext;
use crate::pipeline::envelope::{Envelope, Step};

/// Re-verifies the source against the hash recorded at validation and
/// checks that the published manifest is in place.
pub struct ChecksumStage {
    videos: Arc<VideoService>,
}

impl ChecksumStage {
    pub fn new(videos: Arc<VideoService>) -> Self {
        Self { videos }
    }
}

#[async_trait]
impl StageHandler for ChecksumStage {
    fn step(&self) -> Step {
        Step::Checksum
    }

    async fn handle(&self, ctx: &JobContext, envelope: &Envelope) -> anyhow::Result<()> {
        let id = envelope.video_id.as_str();
        info!(video_id = id, "Checksum verification started");

        let video = self.videos.get_video(id).await?;
        let expected = video
            .sha256
            .as_deref()
            .ok_or_else(|| anyhow!("video {} has no recorded checksum", id))?;

        let store = self.videos.store();
        let dir = tempfile::tempdir()?;
        let local = dir.path().join("source");
        ctx.guard(async {
            store
                .save_locally(&video.original_object_key, &local)
                .await
                .with_context(|| format!("downloading {}", video.original_object_key))
        })
        .await?;

        let actual = sha256_file(&local).await?;
        if actual != expected {
            bail!("checksum mismatch for {}: expected {}, got {}", id, expected, actual);
        }

        let manifest = video
            .manifest_path
            .as_deref()
            .ok_or_else(|| anyhow!("video {} has no manifest", id))?;
        if !store.exists(manifest).await? {
            bail!("manifest {} is missing from storage", manifest);
        }

        info!(video_id = id, checksum = %actual, "✅ Checksum verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::video::model::VideoStatus;
    use crate::modules::video::service::manifest_key;
    use crate::testing::Harness;

    async fn segmented(h: &Harness, id: &str) {
        h.seed_video(id, "clip.mp4", VideoStatus::Processing).await;
        h.store.insert(&manifest_key(id), b"#EXTM3U\n".to_vec());
        h.videos
            .update_manifest(id, &manifest_key(id), VideoStatus::Processing)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn passes_when_source_and_manifest_are_intact() {
        let h = Harness::new();
        segmented(&h, "v1").await;

        let stage = ChecksumStage::new(h.videos.clone());
        stage.handle(&h.ctx(), &Envelope::new("v1", Step::Checksum)).await.unwrap();
    }

    #[tokio::test]
    async fn detects_a_modified_source() {
        let h = Harness::new();
        segmented(&h, "v1").await;
        h.store.insert("originals/v1/original.mp4", b"tampered".to_vec());

        let stage = ChecksumStage::new(h.videos.clone());
        let err = stage
            .handle(&h.ctx(), &Envelope::new("v1", Step::Checksum))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn detects_a_missing_manifest() {
        let h = Harness::new();
        segmented(&h, "v1").await;
        h.store.remove(&manifest_key("v1"));

        let stage = ChecksumStage::new(h.videos.clone());
        assert!(stage.handle(&h.ctx(), &Envelope::new("v1", Step::Checksum)).await.is_err());
    }
}
