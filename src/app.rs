use std::sync::Arc;

use crate::infrastructure::media::ffmpeg::Ffmpeg;
use crate::infrastructure::redis::lock::RedisLock;
use crate::pipeline::{Dispatcher, Runner, RunnerConfig, TransitionTable};
use crate::pipeline::stages::Stages;
use crate::state::AppState;

/// Wire the production stages, dispatcher and worker pool.
pub fn create_runner(state: &AppState) -> Runner {
    let config = &state.config;

    let media = Arc::new(Ffmpeg::new(&config.media));
    let stages = Stages::new(state.videos.clone(), media, &config.media);

    let dispatcher = Dispatcher::new(
        TransitionTable::standard(stages),
        state.queue.clone(),
        config.queue.name.clone(),
        Arc::new(RedisLock::new(state.redis.clone())),
        config.worker.lease_ttl,
        config.worker.job_timeout,
    );

    Runner::new(
        Arc::new(dispatcher),
        state.queue.clone(),
        state.videos.clone(),
        RunnerConfig::from_app(config),
    )
}
