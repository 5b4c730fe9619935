//! Per-dependency circuit breaker.
//!
//! The breaker never runs timers. `Open → HalfOpen` is derived at read time
//! from the stored state, the last failure timestamp, and the clock, so every
//! caller re-evaluates eligibility on its own attempt.
//!
//! Timestamps use [`tokio::time::Instant`], which lets tests drive cooldowns
//! with a paused clock.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::CircuitOpenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// Consecutive successful probes that close a half-open breaker.
    pub success_threshold: u32,
    /// Minimum time an open breaker waits before admitting a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker, with `state` already derived.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            probe_in_flight: false,
        }
    }

    fn effective_state(&self, cooldown: Duration, now: Instant) -> CircuitState {
        match self.state {
            CircuitState::Open => {
                let cooled = self
                    .last_failure_time
                    .is_none_or(|at| now.saturating_duration_since(at) >= cooldown);
                if cooled {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            other => other,
        }
    }

    fn remaining_cooldown(&self, cooldown: Duration, now: Instant) -> Duration {
        self.last_failure_time.map_or(Duration::ZERO, |at| {
            cooldown.saturating_sub(now.saturating_duration_since(at))
        })
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, with `HalfOpen` derived once the cooldown has elapsed.
    #[must_use]
    pub fn effective_state(&self) -> CircuitState {
        self.lock()
            .effective_state(self.config.cooldown, Instant::now())
    }

    /// Whether a call made now would be attempted. Has no side effects.
    #[must_use]
    pub fn can_attempt(&self) -> bool {
        let inner = self.lock();
        match inner.effective_state(self.config.cooldown, Instant::now()) {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !inner.probe_in_flight,
            CircuitState::Open => false,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            state: inner.effective_state(self.config.cooldown, Instant::now()),
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Runs `f` if the breaker admits it, recording the outcome.
    ///
    /// # Errors
    ///
    /// Returns a [`CircuitOpenError`] (converted into `E`) without calling
    /// `f` while the breaker is open or a half-open probe is already in
    /// flight. Otherwise returns `f`'s own result unchanged.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.execute_with(f, |_| true).await
    }

    /// Like [`execute`](Self::execute), but only errors for which
    /// `counts_as_failure` returns `true` feed the failure streak. Other
    /// errors are returned untouched and leave every counter as it was; a
    /// half-open probe that ends this way just frees the probe slot.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_with<F, Fut, T, E, P>(&self, f: F, counts_as_failure: P) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
        P: FnOnce(&E) -> bool,
    {
        let probe = self.admit()?;
        let outcome = f().await;
        let probing = probe.is_armed();
        match &outcome {
            Ok(_) => self.record_success(probing),
            Err(err) if counts_as_failure(err) => self.record_failure(probing),
            Err(_) => {
                // Dropping an armed guard clears the probe slot.
                drop(probe);
                return outcome;
            }
        }
        probe.disarm();
        outcome
    }

    /// Opens the breaker now, as if a failure had just occurred.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Open;
        inner.consecutive_successes = 0;
        inner.last_failure_time = Some(Instant::now());
        warn!(breaker = %self.name, "circuit breaker forced open");
    }

    /// Closes the breaker and clears its counters.
    pub fn force_closed(&self) {
        *self.lock() = BreakerInner::closed();
        info!(breaker = %self.name, "circuit breaker forced closed");
    }

    /// Returns the breaker to its freshly constructed state.
    pub fn reset(&self) {
        *self.lock() = BreakerInner::closed();
    }

    fn admit(&self) -> Result<ProbeGuard<'_>, CircuitOpenError> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.effective_state(self.config.cooldown, now) {
            CircuitState::Closed => Ok(ProbeGuard::unarmed(self)),
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                if inner.state == CircuitState::Open {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    info!(breaker = %self.name, "cooldown elapsed, circuit breaker half-open");
                }
                inner.probe_in_flight = true;
                Ok(ProbeGuard::armed(self))
            }
            CircuitState::HalfOpen => Err(CircuitOpenError {
                name: self.name.clone(),
                retry_in: Duration::ZERO,
            }),
            CircuitState::Open => Err(CircuitOpenError {
                name: self.name.clone(),
                retry_in: inner.remaining_cooldown(self.config.cooldown, now),
            }),
        }
    }

    fn record_success(&self, probing: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if probing {
            inner.probe_in_flight = false;
        }
        // Calls admitted while closed may finish after the breaker moved on;
        // only the probe counts toward closing.
        if probing && inner.state == CircuitState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                *inner = BreakerInner::closed();
                info!(breaker = %self.name, "circuit breaker closed after successful probes");
            }
        }
    }

    fn record_failure(&self, probing: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.consecutive_successes = 0;
        inner.last_failure_time = Some(Instant::now());
        if probing {
            inner.probe_in_flight = false;
        }
        let state = inner.state;
        match state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(breaker = %self.name, "probe failed, circuit breaker re-opened");
            }
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    breaker = %self.name,
                    consecutive_failures = inner.consecutive_failures,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the half-open probe slot if the guarded future is dropped before
/// it reports an outcome.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl<'a> ProbeGuard<'a> {
    fn armed(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            armed: true,
        }
    }

    fn unarmed(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            armed: false,
        }
    }

    fn is_armed(&self) -> bool {
        self.armed
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}
