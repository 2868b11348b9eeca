//! Supervised pool of worker loops driving the dispatcher.
//!
//! Shutdown is two-phase. The cooperative signal stops workers from taking
//! new jobs; a job already running is allowed to finish. If workers are
//! still busy when the grace period ends, the hard-abort signal cancels
//! every in-flight job and the cancelled envelopes are put back on the
//! queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::JobContext;
use super::dispatcher::{Dispatched, Dispatcher};
use super::envelope::{Envelope, Step};
use super::error::PipelineError;
use super::retry::RetryPolicy;
use crate::config::AppConfig;
use crate::infrastructure::queue::JobQueue;
use crate::modules::video::service::VideoService;

// Pause after a failed dequeue so a broken broker is not hammered.
const DEQUEUE_ERROR_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub workers: usize,
    pub queue_name: String,
    pub dead_letter: Option<String>,
    pub dequeue_timeout: Duration,
    pub retry: RetryPolicy,
    pub lease_retry_delay: Duration,
    pub mark_failed_on_exhausted: bool,
}

impl RunnerConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            workers: config.worker.count,
            queue_name: config.queue.name.clone(),
            dead_letter: config.queue.dead_letter.clone(),
            dequeue_timeout: config.worker.dequeue_timeout,
            retry: RetryPolicy {
                max_attempts: config.worker.max_attempts,
                base_delay: config.worker.retry_base_delay,
                max_delay: config.worker.retry_max_delay,
            },
            lease_retry_delay: config.worker.lease_retry_delay,
            mark_failed_on_exhausted: config.worker.mark_failed_on_exhausted,
        }
    }
}

/// What a dead-lettered job looks like on the dead-letter queue.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub payload: serde_json::Value,
    pub error: String,
    pub step: Option<Step>,
    pub attempts: u32,
    pub failed_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub jobs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub workers: Vec<WorkerReport>,
    pub panics: usize,
    /// Whether in-flight jobs had to be aborted after the grace period.
    pub aborted: bool,
}

impl ShutdownReport {
    pub fn jobs(&self) -> u64 {
        self.workers.iter().map(|w| w.jobs).sum()
    }
}

pub struct Runner {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<dyn JobQueue>,
    videos: Arc<VideoService>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        queue: Arc<dyn JobQueue>,
        videos: Arc<VideoService>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            videos,
            config,
        }
    }

    /// Spawn the worker pool. Workers stop taking jobs once `shutdown` is
    /// cancelled, either directly or through [`RunnerHandle::shutdown`].
    pub fn start(self, shutdown: CancellationToken) -> RunnerHandle {
        let abort = CancellationToken::new();
        let runner = Arc::new(self);
        let supervisor = tokio::spawn(runner.supervise(shutdown.clone(), abort.clone()));

        RunnerHandle {
            shutdown,
            abort,
            supervisor,
        }
    }

    async fn supervise(self: Arc<Self>, shutdown: CancellationToken, abort: CancellationToken) -> ShutdownReport {
        let counters: Vec<Arc<AtomicU64>> = (0..self.config.workers)
            .map(|_| Arc::new(AtomicU64::new(0)))
            .collect();
        let mut set = JoinSet::new();
        for worker in 0..self.config.workers {
            self.spawn_worker(&mut set, worker, counters[worker].clone(), &shutdown, &abort);
        }
        info!("👷 Started {} workers on '{}'", self.config.workers, self.config.queue_name);

        let mut panics = 0;
        while let Some(joined) = set.join_next().await {
            let (worker, result) = match joined {
                Ok(exit) => exit,
                Err(e) => {
                    error!("Worker supervisor task failed: {}", e);
                    continue;
                }
            };

            match result {
                Ok(()) => debug!(worker, "Worker exited"),
                Err(e) if e.is_panic() => {
                    panics += 1;
                    error!(worker, "💥 Worker panicked: {}", e);
                    if !shutdown.is_cancelled() {
                        warn!(worker, "Respawning worker");
                        self.spawn_worker(&mut set, worker, counters[worker].clone(), &shutdown, &abort);
                    }
                }
                Err(e) => warn!(worker, "Worker task ended abnormally: {}", e),
            }
        }

        ShutdownReport {
            workers: counters
                .iter()
                .enumerate()
                .map(|(worker, jobs)| WorkerReport {
                    worker,
                    jobs: jobs.load(Ordering::Relaxed),
                })
                .collect(),
            panics,
            aborted: abort.is_cancelled(),
        }
    }

    // The loop runs in its own task so a panic surfaces as a JoinError
    // tagged with the worker number.
    fn spawn_worker(
        self: &Arc<Self>,
        set: &mut JoinSet<(usize, Result<(), tokio::task::JoinError>)>,
        worker: usize,
        jobs: Arc<AtomicU64>,
        shutdown: &CancellationToken,
        abort: &CancellationToken,
    ) {
        let runner = self.clone();
        let shutdown = shutdown.clone();
        let abort = abort.clone();
        set.spawn(async move {
            let result = tokio::spawn(async move { runner.work(worker, jobs, shutdown, abort).await }).await;
            (worker, result)
        });
    }

    async fn work(&self, worker: usize, jobs: Arc<AtomicU64>, shutdown: CancellationToken, abort: CancellationToken) {
        debug!(worker, "Worker started");

        while !shutdown.is_cancelled() {
            // Never raced against shutdown: a popped payload must be handled.
            let payload = match self
                .queue
                .dequeue(&self.config.queue_name, self.config.dequeue_timeout)
                .await
            {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    error!(worker, "Dequeue failed: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(DEQUEUE_ERROR_PAUSE) => {}
                        _ = shutdown.cancelled() => {}
                    }
                    continue;
                }
            };

            self.process(worker, &payload, &shutdown, &abort).await;
            jobs.fetch_add(1, Ordering::Relaxed);
        }

        debug!(worker, "Worker stopped");
    }

    async fn process(&self, worker: usize, payload: &[u8], shutdown: &CancellationToken, abort: &CancellationToken) {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(worker, "Dropping malformed payload: {}", e);
                self.dead_letter(payload, &e.to_string(), None, 0).await;
                return;
            }
        };

        info!(
            worker,
            video_id = %envelope.video_id,
            step = %envelope.step,
            attempt = envelope.attempt,
            "📦 Job received"
        );

        let ctx = JobContext::new(abort, worker);
        match self.dispatcher.dispatch(&envelope, &ctx).await {
            Ok(Dispatched::Advanced(_)) | Ok(Dispatched::Completed) => {}
            Err(err) => self.handle_failure(worker, &envelope, payload, err, shutdown).await,
        }
    }

    async fn handle_failure(
        &self,
        worker: usize,
        envelope: &Envelope,
        payload: &[u8],
        err: PipelineError,
        shutdown: &CancellationToken,
    ) {
        let video_id = envelope.video_id.as_str();
        let step = envelope.step;

        match &err {
            PipelineError::AssetBusy(_) => {
                debug!(worker, video_id, %step, "Asset busy, requeueing");
                pause(self.config.lease_retry_delay, shutdown).await;
                self.requeue(envelope).await;
            }
            PipelineError::Lease { .. } => {
                warn!(worker, video_id, %step, "{}, requeueing", err);
                pause(self.config.lease_retry_delay, shutdown).await;
                self.requeue(envelope).await;
            }
            PipelineError::Cancelled { .. } => {
                warn!(worker, video_id, %step, "Job cancelled during shutdown, requeueing");
                self.requeue(envelope).await;
            }
            PipelineError::EnqueueFailure { step: next, .. } => {
                error!(
                    worker,
                    video_id,
                    completed = %step,
                    orphaned = %next,
                    "❌ {}. Re-enqueue {} manually to continue",
                    err,
                    next
                );
            }
            _ if err.is_retryable() && self.config.retry.should_retry(envelope.attempt) => {
                let delay = self.config.retry.backoff(envelope.attempt);
                warn!(
                    worker,
                    video_id,
                    %step,
                    attempt = envelope.attempt,
                    "Job failed, retrying in {:?}: {}",
                    delay,
                    err
                );
                pause(delay, shutdown).await;
                self.requeue(&envelope.retry()).await;
            }
            _ => {
                error!(worker, video_id, %step, attempt = envelope.attempt, "❌ Job failed: {}", err);
                let attempts = envelope.attempt.saturating_add(1);
                self.dead_letter(payload, &err.to_string(), Some(step), attempts).await;

                if err.is_retryable() && self.config.mark_failed_on_exhausted {
                    match self.videos.mark_failed(video_id).await {
                        Ok(()) => warn!(video_id, "Marked as failed"),
                        Err(e) => error!(video_id, "Could not mark as failed: {:#}", e),
                    }
                }
            }
        }
    }

    async fn requeue(&self, envelope: &Envelope) {
        let result = match envelope.encode() {
            Ok(payload) => self
                .queue
                .enqueue(&self.config.queue_name, &payload)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            error!(
                video_id = %envelope.video_id,
                step = %envelope.step,
                "❌ Requeue failed, job is lost: {:#}",
                e
            );
        }
    }

    async fn dead_letter(&self, payload: &[u8], error: &str, step: Option<Step>, attempts: u32) {
        let Some(queue) = self.config.dead_letter.as_deref() else {
            return;
        };

        let record = DeadLetter {
            payload: serde_json::from_slice(payload)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())),
            error: error.to_string(),
            step,
            attempts,
            failed_at: OffsetDateTime::now_utc().unix_timestamp(),
        };

        let result = match serde_json::to_vec(&record) {
            Ok(bytes) => self.queue.enqueue(queue, &bytes).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => info!(queue, "Job moved to dead-letter queue"),
            Err(e) => error!(queue, "Dead-lettering failed: {:#}", e),
        }
    }
}

async fn pause(delay: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.cancelled() => {}
    }
}

pub struct RunnerHandle {
    shutdown: CancellationToken,
    abort: CancellationToken,
    supervisor: JoinHandle<ShutdownReport>,
}

impl RunnerHandle {
    /// Stop taking jobs, give running ones `grace` to finish, then cancel
    /// whatever is left and wait for the workers to exit.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        info!("🛑 Shutting down workers (grace {:?})", grace);
        self.shutdown.cancel();

        let mut supervisor = self.supervisor;
        let joined = match tokio::time::timeout(grace, &mut supervisor).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Grace period elapsed, aborting in-flight jobs");
                self.abort.cancel();
                supervisor.await
            }
        };

        match joined {
            Ok(report) => {
                info!(
                    jobs = report.jobs(),
                    panics = report.panics,
                    aborted = report.aborted,
                    "✅ Workers stopped"
                );
                report
            }
            Err(e) => {
                error!("Runner supervisor failed: {}", e);
                ShutdownReport::default()
            }
        }
    }
}
