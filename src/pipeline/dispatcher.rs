use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::context::JobContext;
use super::envelope::{Envelope, Step};
use super::error::PipelineError;
use super::stages::StageHandler;
use super::transitions::TransitionTable;
use crate::infrastructure::queue::JobQueue;
use crate::infrastructure::redis::lock::AssetLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// The step succeeded and the successor was enqueued.
    Advanced(Step),
    /// The terminal step succeeded.
    Completed,
}

/// Runs the handler for one envelope and, on success, enqueues the next
/// step. Never retries and never enqueues anything on failure.
pub struct Dispatcher {
    table: TransitionTable,
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    lock: Arc<dyn AssetLock>,
    lease_ttl: Duration,
    job_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        table: TransitionTable,
        queue: Arc<dyn JobQueue>,
        queue_name: impl Into<String>,
        lock: Arc<dyn AssetLock>,
        lease_ttl: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self {
            table,
            queue,
            queue_name: queue_name.into(),
            lock,
            lease_ttl,
            job_timeout,
        }
    }

    pub async fn dispatch(&self, envelope: &Envelope, ctx: &JobContext) -> Result<Dispatched, PipelineError> {
        let transition = self
            .table
            .get(envelope.step)
            .ok_or(PipelineError::UnknownStep(envelope.step))?;

        let lease = self
            .lock
            .acquire(&envelope.video_id, self.lease_ttl)
            .await
            .map_err(|source| PipelineError::Lease {
                video_id: envelope.video_id.clone(),
                source,
            })?
            .ok_or_else(|| PipelineError::AssetBusy(envelope.video_id.clone()))?;

        debug!(video_id = %envelope.video_id, step = %envelope.step, worker = ctx.worker, "Lease acquired");
        let outcome = self.invoke(transition.handler.clone(), envelope, ctx).await;

        if let Err(e) = self.lock.release(&lease).await {
            warn!(video_id = %envelope.video_id, "Failed to release lease, it will expire: {:#}", e);
        }
        outcome?;

        let Some(next) = transition.next else {
            info!(video_id = %envelope.video_id, "🏁 Pipeline completed");
            return Ok(Dispatched::Completed);
        };

        let enqueue_failure = |reason: String| PipelineError::EnqueueFailure {
            step: next,
            video_id: envelope.video_id.clone(),
            reason,
        };
        let payload = envelope
            .advance(next)
            .encode()
            .map_err(|e| enqueue_failure(e.to_string()))?;
        self.queue
            .enqueue(&self.queue_name, &payload)
            .await
            .map_err(|e| enqueue_failure(e.to_string()))?;

        info!(video_id = %envelope.video_id, from = %envelope.step, to = %next, "➡️ Advanced");
        Ok(Dispatched::Advanced(next))
    }

    /// Run the handler in its own task so a panic is contained, bounded by
    /// the job timeout and the context's cancellation.
    async fn invoke(
        &self,
        handler: Arc<dyn StageHandler>,
        envelope: &Envelope,
        ctx: &JobContext,
    ) -> Result<(), PipelineError> {
        let step = envelope.step;
        let video_id = envelope.video_id.clone();

        let task_ctx = ctx.clone();
        let task_envelope = envelope.clone();
        let mut task = tokio::spawn(async move { handler.handle(&task_ctx, &task_envelope).await });

        tokio::select! {
            biased;

            joined = &mut task => match joined {
                Ok(Ok(())) => Ok(()),
                // A handler that observed the abort finishes with an error
                // before the cancel arm is polled.
                Ok(Err(_)) | Err(_) if ctx.cancel.is_cancelled() => {
                    Err(PipelineError::Cancelled { step, video_id })
                }
                Ok(Err(source)) => Err(PipelineError::HandlerFailure { step, video_id, source }),
                Err(e) => Err(PipelineError::HandlerFailure {
                    step,
                    video_id,
                    source: anyhow::anyhow!("handler panicked: {}", e),
                }),
            },
            _ = ctx.cancel.cancelled() => {
                task.abort();
                Err(PipelineError::Cancelled { step, video_id })
            }
            _ = tokio::time::sleep(self.job_timeout) => {
                ctx.cancel.cancel();
                task.abort();
                Err(PipelineError::TimedOut { step, video_id })
            }
        }
    }
}
