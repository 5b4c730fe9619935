use std::error::Error as _;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::retry::is_retriable_status;

/// Connection-level failure classes recognised by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    Dns,
    NetworkUnreachable,
    /// Connect failure without a more specific cause in the error chain.
    Connect,
    /// Anything else (builder errors, redirect loops, body decoding).
    Other,
}

impl TransportKind {
    /// Classifies a `reqwest` error by inspecting its source chain.
    #[must_use]
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportKind::Timeout;
        }

        let mut source = err.source();
        while let Some(inner) = source {
            if let Some(io) = inner.downcast_ref::<std::io::Error>() {
                match io.kind() {
                    std::io::ErrorKind::TimedOut => return TransportKind::Timeout,
                    std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof => return TransportKind::ConnectionReset,
                    std::io::ErrorKind::ConnectionRefused => {
                        return TransportKind::ConnectionRefused
                    }
                    std::io::ErrorKind::NetworkUnreachable
                    | std::io::ErrorKind::HostUnreachable => {
                        return TransportKind::NetworkUnreachable
                    }
                    _ => {}
                }
            }
            let message = inner.to_string().to_lowercase();
            if message.contains("dns error") || message.contains("failed to lookup address") {
                return TransportKind::Dns;
            }
            source = inner.source();
        }

        if err.is_connect() {
            TransportKind::Connect
        } else {
            TransportKind::Other
        }
    }

    #[must_use]
    pub fn is_transient(self) -> bool {
        !matches!(self, TransportKind::Other)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportKind::Timeout => "timeout",
            TransportKind::ConnectionReset => "connection reset",
            TransportKind::ConnectionRefused => "connection refused",
            TransportKind::Dns => "DNS",
            TransportKind::NetworkUnreachable => "network unreachable",
            TransportKind::Connect => "connect",
            TransportKind::Other => "transport",
        };
        f.write_str(label)
    }
}

/// Raised by [`crate::CircuitBreaker`] without invoking the guarded call.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}' is open (retry in {}ms)", .retry_in.as_millis())]
pub struct CircuitOpenError {
    pub name: String,
    /// Time left until the breaker admits a probe. Zero while a probe is in flight.
    pub retry_in: Duration,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{kind} error calling {url}: {source}")]
    Transport {
        url: String,
        kind: TransportKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("JSON deserialization error for {url}: {source}")]
    Deserialize {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode request body for {url}: {source}")]
    Encode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("invalid request URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl HttpError {
    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        HttpError::Transport {
            url: url.to_owned(),
            kind: TransportKind::classify(&source),
            source,
        }
    }

    /// Returns `true` when the failure is on the transient allow-list.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            HttpError::Transport { kind, .. } => kind.is_transient(),
            HttpError::Status { status, .. } => is_retriable_status(*status),
            HttpError::Deserialize { .. }
            | HttpError::Encode { .. }
            | HttpError::CircuitOpen(_)
            | HttpError::InvalidUrl { .. }
            | HttpError::Build(_) => false,
        }
    }

    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, HttpError::CircuitOpen(_))
    }

    /// Short category label used in structured logs and error summaries.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            HttpError::CircuitOpen(_) => "circuit_open",
            HttpError::Deserialize { .. } | HttpError::Encode { .. } => "malformed_payload",
            HttpError::Build(_) | HttpError::InvalidUrl { .. } => "configuration",
            other if other.is_retriable() => "transient",
            _ => "client",
        }
    }

    /// HTTP status code, when the failure came from a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            HttpError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
