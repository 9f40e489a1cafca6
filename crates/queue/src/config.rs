//! Queue tuning knobs.

use std::time::Duration;

/// Queue configuration.
///
/// Defaults are tuned for a low-cost hosted Redis: infrequent polling keeps
/// command volume down while still picking jobs up within the hour they were
/// scheduled.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How often workers check for new jobs. Fewer polls, lower
    /// infrastructure cost; more polls, faster pickup.
    pub poll_interval: Duration,
    /// How long a reserved job stays locked. Must exceed worst-case step
    /// latency or a legitimately running job is treated as stalled.
    pub lock_duration: Duration,
    /// Upper bound on concurrently executing jobs per worker process. Also
    /// bounds external-API concurrency and spend.
    pub max_concurrent: usize,
    /// Queue-level delivery attempts per entry.
    pub max_attempts: u32,
    /// Base delay for queue-level redelivery backoff.
    pub backoff_base: Duration,
    /// Ceiling for queue-level redelivery backoff.
    pub backoff_max: Duration,
    /// A job re-appearing as stalled more than this many times is forced to
    /// failed.
    pub max_stalled_count: u32,
    /// Retention for completed entries.
    pub remove_completed_after: Duration,
    /// Retention for failed entries. Kept far longer to support postmortems.
    pub remove_failed_after: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            lock_duration: Duration::from_secs(30),
            max_concurrent: 5,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            max_stalled_count: 2,
            remove_completed_after: Duration::from_secs(24 * 60 * 60),
            remove_failed_after: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl QueueConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_stalled_count(mut self, max_stalled_count: u32) -> Self {
        self.max_stalled_count = max_stalled_count;
        self
    }

    /// Queue-level redelivery delay after the given failed delivery attempt
    /// (0-indexed): exponential in the attempt, capped.
    pub fn redelivery_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.backoff_base.as_millis() as u64;
        let shifted = base_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(shifted.min(self.backoff_max.as_millis() as u64))
    }
}
