// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for outbound calls.
//!
//! [`ClientError`] is what the transport, the guarded transport and the
//! strategy engine return. The kind is preserved end to end: retries and
//! the breaker never wrap it, so callers can branch on it.

use std::time::Duration;
use thiserror::Error;

/// Failure of an outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// DNS, connect or reset failures.
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// The call did not complete within its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP 429.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// HTTP 4xx other than 429.
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    /// The breaker rejected the call without attempting it.
    #[error("circuit breaker '{0}' open, request rejected")]
    CircuitOpen(String),

    /// The payload could not be decoded.
    #[error("malformed payload: {0}")]
    Parse(String),

    /// No transport available and nothing cached.
    #[error("offline: {0}")]
    Offline(String),
}

impl ClientError {
    /// Map a non-success HTTP status to an error kind.
    ///
    /// `retry_after` is the parsed `Retry-After` header, only used for 429.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Server { status, message },
            _ => Self::Client { status, message },
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::Timeout(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Whether the failure says the remote is unreachable (as opposed to
    /// the remote answering with a rejection).
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::Timeout(_) | Self::CircuitOpen(_) | Self::Offline(_)
        )
    }

    /// Whether a failed write should be parked in the offline queue.
    #[must_use]
    pub fn should_queue(&self) -> bool {
        self.is_connectivity() || matches!(self, Self::Server { .. } | Self::RateLimited { .. })
    }

    /// Whether the failure counts against the breaker.
    ///
    /// A 4xx means the dependency is up and answering.
    #[must_use]
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::Timeout(_) | Self::Server { .. } | Self::Offline(_)
        )
    }

    /// Server-suggested delay before the next attempt.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Server { .. } => "server",
            Self::Client { .. } => "client",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Parse(_) => "parse",
            Self::Offline(_) => "offline",
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

const TRANSIENT_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "econnreset",
    "econnrefused",
    "etimedout",
    "enotfound",
    "dns",
    "fetch failed",
    "broken pipe",
    "429",
    "too many requests",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
];

/// Pattern classifier for errors that only carry a message.
///
/// Matches transient network failures, timeouts, 429 and 5xx status codes.
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|digits| digits.parse::<u16>().ok())
        .any(|code| (500..=599).contains(&code))
}
