// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transport boundary.
//!
//! The host supplies a [`Transport`] that performs the actual HTTP call.
//! Cancellation is by dropping the returned future; [`GuardedTransport`]
//! uses that to enforce per-call timeouts.

pub mod guarded;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ClientError;

pub use guarded::GuardedTransport;

/// Header set on synthetic responses produced while offline.
pub const OFFLINE_HEADER: &str = "x-offline";

/// Header carrying the mutation id on replayed writes.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Read-type methods are the only ones whose responses are cached.
    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Overrides the transport-wide timeout for this call.
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Cache key for read requests: the URL alone for GET, prefixed otherwise.
    #[must_use]
    pub fn cache_key(&self) -> String {
        match self.method {
            Method::Get => self.url.clone(),
            other => format!("{} {}", other, self.url),
        }
    }
}

/// Response as seen by the strategies. Bodies are text, typically JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok_json(value: &serde_json::Value) -> Self {
        Self::new(200, value.to_string()).with_header("content-type", "application/json")
    }

    /// Synthetic 503 returned when neither network nor cache can answer.
    pub fn offline(message: &str) -> Self {
        let body = serde_json::json!({ "error": "offline", "message": message });
        Self::new(503, body.to_string())
            .with_header("content-type", "application/json")
            .with_header(OFFLINE_HEADER, "true")
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.header(OFFLINE_HEADER).is_some()
    }

    /// `Retry-After` in delta-seconds form.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Turn a non-2xx response into the matching [`ClientError`].
    pub fn error_for_status(self) -> Result<Self, ClientError> {
        if self.is_success() {
            return Ok(self);
        }
        let retry_after = self.retry_after();
        Err(ClientError::from_status(self.status, self.body, retry_after))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Performs one network round trip.
///
/// Implementations report transport failures as [`ClientError::TransientNetwork`]
/// or [`ClientError::Timeout`] and return any HTTP response, successful or
/// not, as `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, ClientError>;
}
