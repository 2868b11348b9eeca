use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::StageHandler;
use crate::modules::video::model::VideoStatus;
use crate::modules::video::service::VideoService;
use crate::pipeline::context::JobContext;
use crate::pipeline::envelope::{Envelope, Step};

pub struct PublishStage {
    videos: Arc<VideoService>,
}

impl PublishStage {
    pub fn new(videos: Arc<VideoService>) -> Self {
        Self { videos }
    }
}

#[async_trait]
impl StageHandler for PublishStage {
    fn step(&self) -> Step {
        Step::Publish
    }

    async fn handle(&self, _ctx: &JobContext, envelope: &Envelope) -> anyhow::Result<()> {
        self.videos
            .update_status(&envelope.video_id, VideoStatus::Ready)
            .await?;
        info!(video_id = %envelope.video_id, "🔥 Published");
        Ok(())
    }
}
