// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the resilience layer.
//!
//! # Example
//!
//! ```
//! use client_resilience::ResilienceConfig;
//! use std::time::Duration;
//!
//! // Minimal config (uses defaults)
//! let config = ResilienceConfig::default();
//! assert_eq!(config.cache_capacity_bytes, 50 * 1024 * 1024); // 50 MB
//!
//! // From JSON, overriding a few fields
//! let config = ResilienceConfig::from_json_str(r#"{
//!     "max_retries": 5,
//!     "circuit_threshold": 3,
//!     "routes": [
//!         { "match": { "prefix": "/api/" }, "strategy": "network_first" },
//!         { "match": { "suffix": ".png" }, "strategy": "stale_while_revalidate", "ttl_ms": 86400000 }
//!     ]
//! }"#).unwrap();
//! assert_eq!(config.retry_config().max_retries, 5);
//! assert_eq!(config.circuit_config().failure_threshold, 3);
//! assert_eq!(config.cache_config().default_ttl, Duration::from_secs(300));
//! ```

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::retry::RetryConfig;
use crate::strategy::{CacheStrategy, RouteRule, StrategyRouter};
use crate::sync::SyncConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Configuration for the resilience layer.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff settings
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Per-attempt network timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Circuit breaker
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,
    #[serde(default = "default_circuit_timeout_ms")]
    pub circuit_timeout_ms: u64,
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,

    /// Cache size in bytes (default: 50 MB)
    #[serde(default = "default_cache_capacity_bytes")]
    pub cache_capacity_bytes: usize,
    #[serde(default = "default_cache_default_ttl_ms")]
    pub cache_default_ttl_ms: u64,

    /// Sync coordinator
    #[serde(default = "default_auto_sync_interval_ms")]
    pub auto_sync_interval_ms: u64,
    #[serde(default = "default_sync_retry_attempts")]
    pub sync_retry_attempts: u32,

    /// Persistent store keys
    #[serde(default = "default_cache_store_key")]
    pub cache_store_key: String,
    #[serde(default = "default_queue_store_key")]
    pub queue_store_key: String,

    /// Strategy routing rules; `None` uses the service-worker defaults
    #[serde(default)]
    pub routes: Option<Vec<RouteRule>>,
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_delay_ms() -> u64 { 1000 }
fn default_max_delay_ms() -> u64 { 10_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_circuit_threshold() -> u32 { 5 }
fn default_circuit_timeout_ms() -> u64 { 60_000 }
fn default_half_open_requests() -> u32 { 3 }
fn default_cache_capacity_bytes() -> usize { 50 * 1024 * 1024 } // 50 MB
fn default_cache_default_ttl_ms() -> u64 { 5 * 60 * 1000 }
fn default_auto_sync_interval_ms() -> u64 { 30_000 }
fn default_sync_retry_attempts() -> u32 { 3 }
fn default_cache_store_key() -> String { "client_resilience.cache".into() }
fn default_queue_store_key() -> String { "client_resilience.queue".into() }

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            request_timeout_ms: default_request_timeout_ms(),
            circuit_threshold: default_circuit_threshold(),
            circuit_timeout_ms: default_circuit_timeout_ms(),
            half_open_requests: default_half_open_requests(),
            cache_capacity_bytes: default_cache_capacity_bytes(),
            cache_default_ttl_ms: default_cache_default_ttl_ms(),
            auto_sync_interval_ms: default_auto_sync_interval_ms(),
            sync_retry_attempts: default_sync_retry_attempts(),
            cache_store_key: default_cache_store_key(),
            queue_store_key: default_queue_store_key(),
            routes: None,
        }
    }
}

impl ResilienceConfig {
    /// Parse and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_threshold == 0 {
            return Err(ConfigError::invalid("circuit_threshold", "must be at least 1"));
        }
        if self.half_open_requests == 0 {
            return Err(ConfigError::invalid("half_open_requests", "must be at least 1"));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(ConfigError::invalid(
                "backoff_multiplier",
                format!("must be a finite value >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(
                "initial_delay_ms",
                format!("{} exceeds max_delay_ms {}", self.initial_delay_ms, self.max_delay_ms),
            ));
        }
        if self.cache_capacity_bytes == 0 {
            return Err(ConfigError::invalid("cache_capacity_bytes", "must be greater than 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("request_timeout_ms", "must be greater than 0"));
        }
        if self.auto_sync_interval_ms == 0 {
            return Err(ConfigError::invalid("auto_sync_interval_ms", "must be greater than 0"));
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            factor: self.backoff_multiplier,
        }
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_threshold,
            success_threshold: self.half_open_requests,
            recovery_timeout: Duration::from_millis(self.circuit_timeout_ms),
        }
    }

    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity_bytes: self.cache_capacity_bytes,
            default_ttl: Duration::from_millis(self.cache_default_ttl_ms),
            store_key: self.cache_store_key.clone(),
        }
    }

    /// Replays use the request backoff curve with their own attempt budget.
    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            auto_sync_interval: Duration::from_millis(self.auto_sync_interval_ms),
            retry: RetryConfig {
                max_retries: self.sync_retry_attempts,
                ..self.retry_config()
            },
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn router(&self) -> StrategyRouter {
        match &self.routes {
            Some(rules) => StrategyRouter::new(rules.clone(), CacheStrategy::NetworkFirst),
            None => StrategyRouter::service_worker_defaults(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RouteMatcher;
    use crate::transport::Request;

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let config = ResilienceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_config(), RetryConfig::default());
        assert_eq!(config.circuit_config(), CircuitConfig::default());
        assert_eq!(config.cache_config(), CacheConfig::default());
        assert_eq!(config.sync_config(), SyncConfig::default());
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = ResilienceConfig::from_json_str("{}").unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.queue_store_key, "client_resilience.queue");
        assert!(config.routes.is_none());
    }

    #[test]
    fn test_sync_config_uses_its_own_attempts() {
        let config = ResilienceConfig {
            max_retries: 7,
            sync_retry_attempts: 2,
            auto_sync_interval_ms: 5000,
            ..Default::default()
        };
        let sync = config.sync_config();
        assert_eq!(sync.retry.max_retries, 2);
        assert_eq!(sync.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(sync.auto_sync_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            r#"{"circuit_threshold": 0}"#,
            r#"{"half_open_requests": 0}"#,
            r#"{"backoff_multiplier": 0.5}"#,
            r#"{"initial_delay_ms": 20000, "max_delay_ms": 10000}"#,
            r#"{"cache_capacity_bytes": 0}"#,
        ];
        for json in cases {
            assert!(
                matches!(ResilienceConfig::from_json_str(json), Err(ConfigError::Invalid { .. })),
                "{json} should be rejected"
            );
        }

        assert!(matches!(
            ResilienceConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_custom_routes() {
        let config = ResilienceConfig::from_json_str(
            r#"{"routes": [{"match": {"prefix": "/static/"}, "strategy": "cache_first", "ttl_ms": 1000}]}"#,
        )
        .unwrap();

        let rules = config.routes.as_ref().unwrap();
        assert_eq!(rules[0].matcher, RouteMatcher::Prefix("/static/".into()));

        let router = config.router();
        let route = router.resolve(&Request::get("/static/app.js"));
        assert_eq!(route.strategy, CacheStrategy::CacheFirst);
        assert_eq!(route.ttl, Some(Duration::from_secs(1)));
        assert_eq!(router.resolve(&Request::get("/other")).strategy, CacheStrategy::NetworkFirst);
    }
}
