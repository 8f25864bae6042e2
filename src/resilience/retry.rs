// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff and jitter.
//!
//! Only errors classified as retryable are retried. The last error is
//! returned unchanged once attempts run out.
//!
//! # Example
//!
//! ```
//! use client_resilience::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig {
//!     max_retries: 5,
//!     initial_delay: Duration::from_millis(1000),
//!     max_delay: Duration::from_millis(10_000),
//!     factor: 2.0,
//! };
//!
//! assert_eq!(config.base_delay(0), Duration::from_millis(1000));
//! assert_eq!(config.base_delay(2), Duration::from_millis(4000));
//! assert_eq!(config.base_delay(5), Duration::from_millis(10_000)); // capped
//! ```

use std::future::Future;
use std::time::Duration;
use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{is_transient_message, ClientError};
use crate::storage::traits::StorageError;

/// Upper bound of the additive jitter, as a fraction of the computed delay.
pub const JITTER_FRACTION: f64 = 0.3;

/// Classifies which failures are worth another attempt.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;

    /// Server-suggested minimum wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for ClientError {
    fn is_retryable(&self) -> bool {
        ClientError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        ClientError::retry_after(self)
    }
}

impl RetryableError for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            StorageError::Backend(msg) => is_transient_message(msg) || msg.contains("locked") || msg.contains("busy"),
            StorageError::Serialization(_) => false,
        }
    }
}

/// Backoff configuration for one retried operation.
///
/// `max_retries` counts retries, so an operation runs at most
/// `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fast-fail retry for opening local resources.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Quick retry for individual requests.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Minimal delays for tests.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before retry number `attempt + 1`, without jitter.
    ///
    /// `min(initial_delay * factor^attempt, max_delay)`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.factor.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * exp;
        let max = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= max {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Base delay plus `unit * JITTER_FRACTION * base`, `unit` in `[0, 1)`.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt);
        base + base.mul_f64(unit.clamp(0.0, 1.0) * JITTER_FRACTION)
    }

    /// Jittered delay using the thread RNG.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.jittered_delay(attempt, rand::thread_rng().gen::<f64>())
    }

    /// Apply per-call overrides on top of this config.
    #[must_use]
    pub fn with_overrides(&self, overrides: &RetryOverrides) -> Self {
        Self {
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            initial_delay: overrides.initial_delay.unwrap_or(self.initial_delay),
            max_delay: overrides.max_delay.unwrap_or(self.max_delay),
            factor: overrides.factor.unwrap_or(self.factor),
        }
    }
}

/// Caller-supplied partial retry config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub initial_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub factor: Option<f64>,
}

/// Run `operation` with retries.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    retry_with_notify(operation_name, config, operation, |_, _| {}).await
}

/// Run `operation` with retries, calling `on_retry(next_attempt, &err)`
/// before each backoff sleep.
pub async fn retry_with_notify<F, Fut, T, E, N>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
    N: FnMut(u32, &E),
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempt);
                }
                return Ok(val);
            }
            Err(err) => {
                if !err.is_retryable() || attempt >= config.max_retries {
                    return Err(err);
                }

                let mut delay = config.next_delay(attempt);
                if let Some(hint) = err.retry_after() {
                    delay = delay.max(hint.min(config.max_delay));
                }

                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    attempt + 1,
                    config.max_retries.saturating_add(1),
                    err,
                    delay
                );
                crate::metrics::record_retry(operation_name);
                on_retry(attempt + 1, &err);

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// A reusable operation bound to its retry config.
pub struct RetryingOperation<F> {
    name: String,
    config: RetryConfig,
    operation: F,
}

/// Wrap `operation` so every call goes through [`retry`].
pub fn make_retryable<F>(name: impl Into<String>, config: RetryConfig, operation: F) -> RetryingOperation<F> {
    RetryingOperation {
        name: name.into(),
        config,
        operation,
    }
}

impl<F, Fut, T, E> RetryingOperation<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    pub async fn call(&self) -> Result<T, E> {
        retry(&self.name, &self.config, || (self.operation)()).await
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
