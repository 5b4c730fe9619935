//! Concurrency cap for outbound requests.
//!
//! [`RateLimiter`] is a counting semaphore over async tasks. Waiters are
//! admitted in submission order (tokio's semaphore is fair), and the permit
//! is an RAII guard, so a slot is released exactly once whether the task
//! succeeds, fails, or is dropped mid-flight.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Observability counters returned by [`RateLimiter::stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterStats {
    pub submitted_count: u64,
    pub elapsed_seconds: f64,
    /// Submitted tasks per second since the last reset.
    pub throughput: f64,
}

pub struct RateLimiter {
    semaphore: Semaphore,
    max_concurrent: usize,
    submitted: AtomicU64,
    started_at: Mutex<Instant>,
}

impl RateLimiter {
    /// Creates a limiter admitting at most `max_concurrent` tasks at once.
    /// A value of `0` is treated as `1`.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
            submitted: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of tasks currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Runs `task` once a slot is free and returns its output unchanged.
    pub async fn execute<F, Fut>(&self, task: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        // The semaphore is owned here and never closed, so acquisition only
        // fails in theory; run unthrottled rather than lose the task.
        let _permit = self.semaphore.acquire().await.ok();
        task().await
    }

    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let started_at = *self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let elapsed_seconds = started_at.elapsed().as_secs_f64();
        let submitted_count = self.submitted.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let throughput = if elapsed_seconds > 0.0 {
            submitted_count as f64 / elapsed_seconds
        } else {
            0.0
        };
        RateLimiterStats {
            submitted_count,
            elapsed_seconds,
            throughput,
        }
    }

    /// Clears the counters. In-flight tasks keep their slots.
    pub fn reset(&self) {
        self.submitted.store(0, Ordering::Relaxed);
        *self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;

    #[tokio::test]
    async fn never_exceeds_concurrency_cap() {
        let cap = 3;
        let limiter = RateLimiter::new(cap);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..cap * 2).map(|_| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            limiter.execute(move || async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            })
        });
        join_all(tasks).await;

        assert_eq!(peak.load(Ordering::SeqCst), cap);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn admits_waiters_in_submission_order() {
        let limiter = RateLimiter::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let tasks = (0..5).map(|i| {
            let order = Arc::clone(&order);
            limiter.execute(move || async move {
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
            })
        });
        join_all(tasks).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failing_task_releases_its_slot() {
        let limiter = RateLimiter::new(1);

        let failed: Result<(), &str> = limiter.execute(|| async { Err("boom") }).await;
        assert_eq!(failed, Err("boom"));
        assert_eq!(limiter.in_flight(), 0);

        let next = tokio::time::timeout(
            Duration::from_secs(1),
            limiter.execute(|| async { 5 }),
        )
        .await
        .expect("slot should have been released");
        assert_eq!(next, 5);
    }

    #[tokio::test]
    async fn dropped_task_releases_its_slot() {
        let limiter = RateLimiter::new(1);

        let stuck = limiter.execute(|| std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), stuck).await;
        assert!(timed_out.is_err());

        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.execute(|| async { "ok" }).await, "ok");
    }

    #[tokio::test]
    async fn stats_count_submissions_and_reset_clears_them() {
        let limiter = RateLimiter::new(2);
        for _ in 0..4 {
            limiter.execute(|| async {}).await;
        }

        let stats = limiter.stats();
        assert_eq!(stats.submitted_count, 4);
        assert!(stats.elapsed_seconds >= 0.0);
        assert!(stats.throughput >= 0.0);

        limiter.reset();
        assert_eq!(limiter.stats().submitted_count, 0);
    }

    #[test]
    fn zero_cap_is_clamped_to_one() {
        assert_eq!(RateLimiter::new(0).max_concurrent(), 1);
    }
}
