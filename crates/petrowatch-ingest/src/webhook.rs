//! Signed run-completion notifications.
//!
//! The payload is serialized once; the HMAC-SHA256 signature is computed over
//! exactly those bytes and the same bytes are sent on every attempt, so a
//! consumer can verify with [`verify_signature`] against the raw body.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use petrowatch_http::{RetryPolicy, TransportKind};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::stats::{ErrorDetail, RunStatistics, RunStatus};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

#[derive(Clone)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff_base * 2^(n-1)`.
    pub backoff_base: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            max_attempts: 3,
            backoff_base: Duration::from_millis(1_000),
            timeout: Duration::from_secs(10),
            user_agent: "petrowatch/0.1 (fuel-price-ingestion)".to_owned(),
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[redacted]"))
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Wire shape of the statistics block. Field names are part of the
/// downstream contract and independent of [`RunStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookStatistics {
    pub estados_processed: u64,
    pub municipios_processed: u64,
    pub stations_found: u64,
    pub price_changes_detected: u64,
    pub new_stations_added: u64,
    pub errors_encountered: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,
    pub statistics: WebhookStatistics,
    pub errors: Vec<ErrorDetail>,
}

/// Maps the orchestrator's accumulator onto the wire payload.
#[must_use]
pub fn build_payload(
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    status: RunStatus,
    statistics: &RunStatistics,
    errors: &[ErrorDetail],
) -> WebhookPayload {
    WebhookPayload {
        started_at,
        completed_at,
        status,
        statistics: WebhookStatistics {
            estados_processed: statistics.regions_processed,
            municipios_processed: statistics.subregions_processed,
            stations_found: statistics.stations_seen,
            price_changes_detected: statistics.price_changes,
            new_stations_added: statistics.new_stations,
            errors_encountered: statistics.error_count,
        },
        errors: errors.to_vec(),
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook signing key rejected")]
    InvalidKey,

    #[error("failed to serialize webhook payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to build webhook HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("webhook delivery to {url} failed ({kind}): {source}")]
    Transport {
        url: String,
        kind: TransportKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("webhook endpoint {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("webhook endpoint {url} rejected the signature (HTTP {status})")]
    Unauthorized { url: String, status: u16 },
}

impl WebhookError {
    /// Everything except local setup failures and 401/403 is retried.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            WebhookError::Transport { .. } | WebhookError::Status { .. }
        )
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            WebhookError::Status { status, .. } | WebhookError::Unauthorized { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Returns `sha256=<hex hmac>` over `body`.
///
/// # Errors
///
/// Returns [`WebhookError::InvalidKey`] if the MAC rejects the key.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidKey)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Checks a `sha256=<hex>` header against `body` in constant time.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(provided) = header
        .trim()
        .strip_prefix("sha256=")
        .and_then(|h| hex::decode(h).ok())
    else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered { attempts: u32 },
    /// URL or secret not configured.
    Skipped,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    /// # Errors
    ///
    /// Returns [`WebhookError::Build`] if the HTTP client cannot be constructed.
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(WebhookError::Build)?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config.url.is_some() && self.config.secret.is_some()
    }

    /// Signs and POSTs `payload`, retrying with exponential back-off.
    ///
    /// # Errors
    ///
    /// - [`WebhookError::Unauthorized`] on 401/403, after a single attempt.
    /// - The last [`WebhookError::Status`] or [`WebhookError::Transport`]
    ///   once `max_attempts` is exhausted.
    pub async fn send_completion_webhook(
        &self,
        payload: &WebhookPayload,
    ) -> Result<Delivery, WebhookError> {
        let (Some(url), Some(secret)) = (self.config.url.as_deref(), self.config.secret.as_deref())
        else {
            tracing::warn!(
                status = %payload.status,
                "webhook URL or secret not configured, skipping notification"
            );
            return Ok(Delivery::Skipped);
        };

        let body = serde_json::to_vec(payload)?;
        let signature = sign_payload(secret, &body)?;
        let max_attempts = self.config.max_attempts.max(1);
        let backoff = self.backoff();

        let mut attempt = 1u32;
        loop {
            match self.post_once(url, &body, &signature).await {
                Ok(status) => {
                    tracing::info!(
                        attempt,
                        http_status = status,
                        run_status = %payload.status,
                        "completion webhook delivered"
                    );
                    return Ok(Delivery::Delivered { attempts: attempt });
                }
                Err(err) if !err.is_retriable() || attempt >= max_attempts => {
                    tracing::error!(attempt, max_attempts, error = %err, "completion webhook failed");
                    return Err(err);
                }
                Err(err) => {
                    let delay = backoff.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "completion webhook attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// `backoff_base * 2^(attempt-1)` before each retry, uncapped.
    fn backoff(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_attempts.max(1) - 1,
            base_delay: self.config.backoff_base,
            multiplier: 2.0,
            max_delay: Duration::MAX,
        }
    }

    async fn post_once(&self, url: &str, body: &[u8], signature: &str) -> Result<u16, WebhookError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|source| WebhookError::Transport {
                url: url.to_owned(),
                kind: TransportKind::classify(&source),
                source,
            })?;

        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(status),
            401 | 403 => Err(WebhookError::Unauthorized {
                url: url.to_owned(),
                status,
            }),
            _ => Err(WebhookError::Status {
                url: url.to_owned(),
                status,
            }),
        }
    }
}
