//! `colorforge-retry` — bounded retries with exponential backoff and jitter.
//!
//! Every external call in the pipeline (AI provider, object storage, queue)
//! is wrapped in [`with_retry`]. The utility owns *when* to retry; the
//! wrapped clients stay retry-free and only classify their errors via the
//! [`Retryable`] trait.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::warn;

/// Classification hook for errors passing through [`with_retry`].
///
/// Timeouts and connection-level failures should report `true`; errors
/// carrying an HTTP status should defer to [`is_retryable_status`]. Anything
/// else is non-retryable and aborts immediately without consuming the
/// remaining attempts.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry on rate limiting (429) or server errors (5xx).
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first (0 behaves like 1).
    pub max_attempts: u32,
    /// Base delay; doubled per attempt.
    pub base_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Multiplicative jitter factor in [0, 1].
    pub jitter: f64,
    /// Optional per-attempt timeout. Elapse counts as a retryable failure.
    pub timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            jitter: 0.3,
            timeout: None,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Delay before the retry following the given 0-indexed failed attempt.
    ///
    /// `min(base * 2^attempt + random(0, base * 2^attempt * jitter), max)`:
    /// exponential growth with multiplicative jitter, capped, so concurrent
    /// workers don't synchronize into retry storms.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let exponential = base_ms * 2_f64.powi(attempt.min(31) as i32);
        let jitter_range = exponential * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(0.0..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((exponential + jitter).min(max_ms) as u64)
    }
}

/// The failure observed on the final attempt.
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Inner(E),
}

/// Error returned by [`with_retry`].
///
/// `Exhausted` is deliberately distinguishable from the underlying error:
/// callers must surface it, never silently swallow it.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error that a retry cannot fix.
    #[error("non-retryable error: {0}")]
    Fatal(E),
    /// All attempts were consumed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: AttemptError<E> },
}

impl<E> RetryError<E> {
    /// The underlying operation error, if one was observed (timeouts have none).
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Fatal(e) | RetryError::Exhausted { last: AttemptError::Inner(e), .. } => {
                Some(e)
            }
            RetryError::Exhausted { last: AttemptError::TimedOut(_), .. } => None,
        }
    }
}

/// Run `op` with bounded retries per `config`.
///
/// `label` identifies the operation in retry logs; it must not contain
/// request content.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 0..max_attempts {
        let outcome = match config.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result.map_err(AttemptError::Inner),
                Err(_) => Err(AttemptError::TimedOut(timeout)),
            },
            None => op().await.map_err(AttemptError::Inner),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        // Timeouts are always retryable; everything else asks the error.
        let retryable = match &err {
            AttemptError::TimedOut(_) => true,
            AttemptError::Inner(e) => e.is_retryable(),
        };

        if !retryable {
            return match err {
                AttemptError::Inner(e) => Err(RetryError::Fatal(e)),
                AttemptError::TimedOut(_) => unreachable!("timeouts are retryable"),
            };
        }

        if attempt + 1 >= max_attempts {
            return Err(RetryError::Exhausted { attempts: max_attempts, last: err });
        }

        let delay = config.delay_for_attempt(attempt);
        warn!(
            op = label,
            attempt = attempt + 1,
            max_attempts,
            wait_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient failure"
        );
        tokio::time::sleep(delay).await;
    }

    unreachable!("loop returns on success, fatal error, or exhaustion")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
        #[error("status {0}")]
        Status(u16),
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            match self {
                TestError::Transient => true,
                TestError::Fatal => false,
                TestError::Status(code) => is_retryable_status(*code),
            }
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(0.0)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(1000))
            .with_max_delay(Duration::from_millis(60_000))
            .with_jitter(0.0);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(8000));
        // 2^7 = 128s, capped at 60s.
        assert_eq!(config.delay_for_attempt(7), Duration::from_millis(60_000));
    }

    #[test]
    fn jitter_stays_within_factor() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(1000))
            .with_max_delay(Duration::from_secs(600))
            .with_jitter(0.3);

        for _ in 0..100 {
            let delay = config.delay_for_attempt(1).as_millis() as f64;
            assert!((2000.0..=2600.0).contains(&delay), "delay out of range: {delay}");
        }
    }

    #[test]
    fn retryable_status_matrix() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_config(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_aborts_without_consuming_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_config(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Fatal) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Fatal(TestError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_error_status_is_fatal_server_error_is_not() {
        let result: Result<(), _> = with_retry(&fast_config(), "test", || async {
            Err(TestError::Status(400))
        })
        .await;
        assert!(matches!(result, Err(RetryError::Fatal(_))));

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_config(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Status(503)) }
        })
        .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempt_count_and_last_error() {
        let result: Result<(), _> = with_retry(&fast_config(), "test", || async {
            Err(TestError::Transient)
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, AttemptError::Inner(TestError::Transient)));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_retryable_failure() {
        let config = fast_config().with_timeout(Duration::from_millis(10));
        let result: Result<(), RetryError<TestError>> = with_retry(&config, "test", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts: 3, last: AttemptError::TimedOut(t) }) => {
                assert_eq!(t, Duration::from_millis(10));
            }
            other => panic!("expected timeout exhaustion, got {other:?}"),
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delays_without_jitter_are_nondecreasing_and_capped(
                base_ms in 1u64..5000,
                max_ms in 1u64..600_000,
                attempt in 0u32..20,
            ) {
                let config = RetryConfig::default()
                    .with_base_delay(Duration::from_millis(base_ms))
                    .with_max_delay(Duration::from_millis(max_ms))
                    .with_jitter(0.0);

                let current = config.delay_for_attempt(attempt);
                let next = config.delay_for_attempt(attempt + 1);
                prop_assert!(next >= current);
                prop_assert!(current <= Duration::from_millis(max_ms));
            }
        }
    }
}
