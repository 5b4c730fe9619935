//! Outbound HTTP plumbing shared by the ingestion pipeline: a concurrency
//! limiter, a lazily-evaluated circuit breaker, and a JSON client that
//! composes both with exponential-backoff retries.

pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use client::{HttpClientConfig, RequestOptions, ResilientHttpClient};
pub use error::{CircuitOpenError, HttpError, TransportKind};
pub use rate_limit::{RateLimiter, RateLimiterStats};
pub use retry::{is_retriable_status, RetryPolicy, RETRIABLE_STATUSES};
