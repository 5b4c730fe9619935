//! JSON-over-HTTP client with concurrency limiting, request pacing, and
//! transient-failure retries.
//!
//! Layering, innermost first: the raw `reqwest` call, then pacing and the
//! concurrency slot for each attempt, then the retry loop. Circuit breaking
//! is applied by the owner of the client (see `CatalogClient` in the ingest
//! crate) so each dependency gets its own breaker.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::HttpError;
use crate::rate_limit::{RateLimiter, RateLimiterStats};
use crate::retry::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_concurrent: usize,
    /// Minimum gap between the start of two paced requests.
    pub min_request_spacing: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "petrowatch/0.1 (fuel-price-ingestion)".to_owned(),
            max_concurrent: 10,
            min_request_spacing: Duration::from_millis(100),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-request switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Bypass the concurrency limiter and pacing gate (health probes).
    pub skip_rate_limit: bool,
}

impl RequestOptions {
    #[must_use]
    pub fn unthrottled() -> Self {
        Self {
            skip_rate_limit: true,
        }
    }
}

pub struct ResilientHttpClient {
    client: Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
    min_request_spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl ResilientHttpClient {
    /// # Errors
    ///
    /// Returns [`HttpError::Build`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(HttpError::Build)?;
        Ok(Self {
            client,
            limiter: RateLimiter::new(config.max_concurrent),
            retry: config.retry,
            min_request_spacing: config.min_request_spacing,
            next_slot: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        self.limiter.stats()
    }

    /// GETs `url` and decodes the JSON body, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - [`HttpError::Status`] for a non-2xx response (retried only when on the allow-list).
    /// - [`HttpError::Transport`] for connection-level failures after retries are exhausted.
    /// - [`HttpError::Deserialize`] if the body is not the expected JSON (never retried).
    pub async fn get<T>(&self, url: &str, options: RequestOptions) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        retry_with_backoff(&self.retry, url, || {
            self.send_once(Method::GET, url, None, options)
        })
        .await
    }

    /// POSTs `body` as JSON and decodes the JSON response. Never retried,
    /// since the upstream may already have applied the request.
    ///
    /// # Errors
    ///
    /// Same variants as [`ResilientHttpClient::get`], plus
    /// [`HttpError::Encode`] if `body` cannot be serialized.
    pub async fn post<B, T>(
        &self,
        url: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|source| HttpError::Encode {
            url: url.to_owned(),
            source,
        })?;
        self.send_once(Method::POST, url, Some(payload), options)
            .await
    }

    async fn send_once<T>(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        options: RequestOptions,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        if options.skip_rate_limit {
            return self.dispatch(method, url, body).await;
        }
        self.limiter
            .execute(|| async {
                self.pace().await;
                self.dispatch(method, url, body).await
            })
            .await
    }

    async fn dispatch<T>(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        tracing::debug!(
            %method,
            url,
            in_flight = self.limiter.in_flight(),
            "upstream request"
        );
        let mut request = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(bytes) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HttpError::transport(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| HttpError::transport(url, e))?;
        serde_json::from_str::<T>(&text).map_err(|source| HttpError::Deserialize {
            url: url.to_owned(),
            source,
        })
    }

    /// Waits for this client's next pacing slot. Slots are reserved under
    /// the lock and awaited outside it, so concurrent callers queue up at
    /// `min_request_spacing` intervals.
    async fn pace(&self) {
        if self.min_request_spacing.is_zero() {
            return;
        }
        let slot = {
            let mut next = self
                .next_slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.min_request_spacing);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
