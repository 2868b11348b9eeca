use tokio_util::sync::CancellationToken;

/// Per-job execution context handed to stage handlers.
///
/// `cancel` fires when the runner hard-aborts in-flight work or when the
/// job's deadline passes. Long-running handler work (subprocesses, large
/// transfers) must observe it.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub cancel: CancellationToken,
    pub worker: usize,
}

impl JobContext {
    /// A context whose token is a child of `abort`.
    pub fn new(abort: &CancellationToken, worker: usize) -> Self {
        Self {
            cancel: abort.child_token(),
            worker,
        }
    }

    /// Run `fut` unless the job is cancelled first.
    pub async fn guard<F, T>(&self, fut: F) -> anyhow::Result<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        tokio::select! {
            result = fut => result,
            _ = self.cancel.cancelled() => Err(anyhow::anyhow!("job cancelled")),
        }
    }
}
