//! Exponential backoff retry utility
//!
//! Configurable retry with exponential backoff and jitter for transient
//! failures, used by the broker subscriber's reconnect loop.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 means no retries, only initial attempt)
    pub max_retries: u32,
    /// Base delay in milliseconds for the first retry
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds to cap exponential growth
    pub max_delay_ms: u64,
    /// Whether to add random jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64, jitter: bool) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            jitter,
        }
    }

    /// Policy for re-establishing the broker subscriber connection.
    ///
    /// Effectively unbounded: the gateway keeps serving local-only delivery
    /// while reconnecting in the background.
    pub fn broker_reconnect() -> Self {
        Self {
            max_retries: u32::MAX,
            base_delay_ms: 250,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }

    /// Delay before the given retry attempt (0-indexed).
    ///
    /// delay = min(base * 2^attempt, max_delay), plus up to 30% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt.min(32)));
        let capped = exponential.min(self.max_delay_ms);

        let final_delay = if self.jitter {
            let jitter_range = (capped as f64 * 0.3) as u64;
            if jitter_range > 0 {
                capped.saturating_add(rand::thread_rng().gen_range(0..=jitter_range))
            } else {
                capped
            }
        } else {
            capped
        };

        Duration::from_millis(final_delay)
    }
}

/// Retries an async operation with exponential backoff.
///
/// Executes `operation` and retries on failure according to `policy`, but
/// only while `is_retryable` returns true for the error. Returns the last
/// error once retries are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    policy: RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_retryable(&err) => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient failure"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy::new(5, 100, 10_000, false);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(10, 100, 500, false);
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, 100, 10_000, true);
        for attempt in 0..3 {
            let base = RetryPolicy::new(3, 100, 10_000, false).delay_for(attempt);
            let jittered = policy.delay_for(attempt);
            assert!(jittered >= base);
            assert!(jittered.as_millis() <= (base.as_millis() as f64 * 1.3).ceil() as u128);
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<&str, String> = retry_with_backoff(
            move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok("ok")
                    }
                }
            },
            RetryPolicy::new(5, 1, 10, false),
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), String> = retry_with_backoff(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            },
            RetryPolicy::new(5, 1, 10, false),
            |err| err != "fatal",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let result: Result<(), String> = retry_with_backoff(
            || async { Err("still down".to_string()) },
            RetryPolicy::new(2, 1, 5, false),
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err(), "still down");
    }
}
