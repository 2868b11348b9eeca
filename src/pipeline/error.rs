use thiserror::Error;

use super::envelope::{EnvelopeError, Step};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    MalformedEnvelope(#[from] EnvelopeError),

    #[error("no transition registered for step {0}")]
    UnknownStep(Step),

    #[error("asset {0} is being processed by another worker")]
    AssetBusy(String),

    #[error("{step} failed for {video_id}: {source:#}")]
    HandlerFailure {
        step: Step,
        video_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{step} for {video_id} exceeded its deadline")]
    TimedOut { step: Step, video_id: String },

    #[error("{step} for {video_id} was cancelled")]
    Cancelled { step: Step, video_id: String },

    #[error("{step} for {video_id} could not be enqueued: {reason}")]
    EnqueueFailure {
        step: Step,
        video_id: String,
        reason: String,
    },

    #[error("lease error for {video_id}: {source:#}")]
    Lease {
        video_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Failures a later attempt of the same step might get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::HandlerFailure { .. } | PipelineError::TimedOut { .. }
        )
    }
}
