//! One handler per pipeline step.

use std::sync::Arc;

use async_trait::async_trait;

use super::context::JobContext;
use super::envelope::{Envelope, Step};
use crate::config::settings::MediaSettings;
use crate::infrastructure::media::MediaTool;
use crate::modules::video::service::VideoService;

pub mod checksum;
pub mod manifest;
pub mod publish;
pub mod segment;
pub mod thumbnail;
pub mod transcode;
pub mod validate;

/// Performs the work of one step for one asset.
///
/// Handlers must be idempotent with respect to their output artifacts:
/// the queue is at-least-once, so the same envelope can be handled twice.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn step(&self) -> Step;

    async fn handle(&self, ctx: &JobContext, envelope: &Envelope) -> anyhow::Result<()>;
}

/// The production handler for every step.
pub struct Stages {
    pub validate: Arc<dyn StageHandler>,
    pub transcode: Arc<dyn StageHandler>,
    pub segment: Arc<dyn StageHandler>,
    pub checksum: Arc<dyn StageHandler>,
    pub thumbnail: Arc<dyn StageHandler>,
    pub publish: Arc<dyn StageHandler>,
}

impl Stages {
    pub fn new(videos: Arc<VideoService>, media: Arc<dyn MediaTool>, settings: &MediaSettings) -> Self {
        Self {
            validate: Arc::new(validate::ValidateStage::new(videos.clone(), media.clone())),
            transcode: Arc::new(transcode::TranscodeStage::new(videos.clone(), media.clone())),
            segment: Arc::new(segment::SegmentStage::new(
                videos.clone(),
                media.clone(),
                settings.segment_seconds,
            )),
            checksum: Arc::new(checksum::ChecksumStage::new(videos.clone())),
            thumbnail: Arc::new(thumbnail::ThumbnailStage::new(
                videos.clone(),
                media,
                settings.thumbnail_seek_seconds,
            )),
            publish: Arc::new(publish::PublishStage::new(videos)),
        }
    }
}
