//! Bounded retry with exponential backoff and a per-attempt timeout.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

/// Errors that know whether another attempt could succeed.
pub trait Retryable: std::fmt::Display {
    fn is_transient(&self) -> bool;

    /// Error reported when one attempt runs past its timeout.
    fn timed_out(operation: &str, after: Duration) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries, used by tests and one-shot CLI calls.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the attempt
/// budget is spent. Each attempt is bounded by `policy.attempt_timeout`; a timeout
/// counts as a transient failure.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match timeout(policy.attempt_timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => E::timed_out(operation, policy.attempt_timeout),
        };

        if !err.is_transient() || attempt >= attempts {
            if attempt > 1 {
                tracing::warn!(
                    operation = %operation,
                    attempts = attempt,
                    error = %err,
                    "Operation failed after retries"
                );
            }
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        tracing::debug!(
            operation = %operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Flaky,
        Fatal,
        TimedOut,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            !matches!(self, TestError::Fatal)
        }

        fn timed_out(_operation: &str, _after: Duration) -> Self {
            TestError::TimedOut
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry(&fast_policy(), "flaky", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(TestError::Flaky)
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry(&fast_policy(), "fatal", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Fatal)
        })
        .await;
        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry(&fast_policy(), "slow", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(TestError::TimedOut)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
