use std::time::Duration;

use rand::Rng;

/// Exponential backoff between attempts of a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Whether a job that just failed on `attempt` (0-based) gets another go.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// `base * 2^attempt` capped at `max_delay`, before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// `delay_for` with up to 10% random jitter added, still capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let jitter_ms = (delay.as_millis() as u64 / 10).max(1);
        let jitter = Duration::from_millis(rand::rng().random_range(0..jitter_ms));
        (delay + jitter).min(self.max_delay)
    }
}
