//! Retry with exponential back-off for transient upstream failures.
//!
//! [`retry_with_backoff`] wraps any fallible async operation and retries only
//! the conditions on the transient allow-list (see [`HttpError::is_retriable`]).
//! Everything else is returned on first occurrence.

use std::future::Future;
use std::time::Duration;

use crate::error::HttpError;

/// HTTP statuses worth retrying: request timeout, payload too large (often a
/// transient proxy limit), rate limiting, and gateway/origin 5xx/52x errors.
pub const RETRIABLE_STATUSES: [u16; 10] = [408, 413, 429, 500, 502, 503, 504, 521, 522, 524];

#[must_use]
pub fn is_retriable_status(status: u16) -> bool {
    RETRIABLE_STATUSES.contains(&status)
}

/// Exponential back-off schedule.
///
/// The wait before retry `n` (1-based) is
/// `min(base_delay * multiplier^(n-1), max_delay)`.
///
/// | Retry | base = 1 000 ms, multiplier = 2, max = 30 s |
/// |-------|---------------------------------------------|
/// | 1     | 1 000 ms                                    |
/// | 2     | 2 000 ms                                    |
/// | 3     | 4 000 ms                                    |
/// | 4     | 8 000 ms                                    |
/// | 5     | 16 000 ms                                   |
/// | 6+    | 30 000 ms                                   |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure. `0` disables retries.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before the given 1-based retry attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let max_ms = self.max_delay.as_secs_f64() * 1_000.0;
        let computed_ms = self.base_delay.as_secs_f64() * 1_000.0 * factor;
        let capped_ms = if computed_ms.is_finite() {
            computed_ms.min(max_ms)
        } else {
            max_ms
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped_ms.round() as u64)
    }
}

/// Runs `operation`, retrying transient failures according to `policy`.
///
/// With `max_retries = 3` the operation is attempted at most 4 times. The
/// computed delay is logged before each sleep.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    mut operation: F,
) -> Result<T, HttpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HttpError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retriable() || attempt >= policy.max_retries {
                    if attempt > 0 {
                        tracing::warn!(
                            target_url = target,
                            attempts = attempt + 1,
                            category = err.category(),
                            error = %err,
                            "giving up on upstream request"
                        );
                    }
                    return Err(err);
                }
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    target_url = target,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    category = err.category(),
                    error = %err,
                    "transient upstream error, retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn status(code: u16) -> HttpError {
        HttpError::Status {
            url: "https://api.example.test".to_owned(),
            status: code,
        }
    }

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_sequence_doubles_then_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (1..=7).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn backoff_honours_custom_multiplier() {
        let policy = RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(100),
            multiplier: 3.0,
            max_delay: Duration::from_millis(1_000),
        };
        let delays: Vec<u128> = (1..=4).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 300, 900, 1_000]);
    }

    #[test]
    fn huge_attempt_numbers_saturate_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&instant_policy(3), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, HttpError>(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_status_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&instant_policy(3), "test", || {
            let c = Arc::clone(&c);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(status(503))
                } else {
                    Ok::<u32, HttpError>(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_after_exhausting_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&instant_policy(2), "test", || {
            let c = Arc::clone(&c);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                // Distinct status on the final attempt proves the last error wins.
                Err::<u32, HttpError>(status(if n == 2 { 504 } else { 429 }))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(HttpError::Status { status: 504, .. })));
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&instant_policy(3), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, HttpError>(status(404))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(HttpError::Status { status: 404, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_the_computed_delay_between_attempts() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
        };
        let start = tokio::time::Instant::now();
        let result = retry_with_backoff(&policy, "test", || async {
            Err::<(), HttpError>(status(503))
        })
        .await;
        assert!(result.is_err());
        // 1 000 ms before retry 1, 2 000 ms before retry 2.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3_000), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3_100), "slept {elapsed:?}");
    }
}
