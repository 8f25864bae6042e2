// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Maps requests to a cache strategy.
//!
//! Rules are checked in order; the first match wins. Non-read requests are
//! always [`CacheStrategy::NetworkOnly`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::transport::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkOnly,
}

impl CacheStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheFirst => "cache_first",
            Self::NetworkFirst => "network_first",
            Self::StaleWhileRevalidate => "stale_while_revalidate",
            Self::NetworkOnly => "network_only",
        }
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL test for a rule. Prefix and suffix apply to the path (no scheme,
/// host, query or fragment); `contains` applies to the whole URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMatcher {
    Prefix(String),
    Suffix(String),
    Contains(String),
    Any,
}

impl RouteMatcher {
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Prefix(p) => url_path(url).starts_with(p.as_str()),
            Self::Suffix(s) => url_path(url).to_ascii_lowercase().ends_with(&s.to_ascii_lowercase()),
            Self::Contains(s) => url.contains(s.as_str()),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(rename = "match")]
    pub matcher: RouteMatcher,
    pub strategy: CacheStrategy,
    /// Overrides the cache default TTL for responses stored by this rule.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl RouteRule {
    pub fn new(matcher: RouteMatcher, strategy: CacheStrategy) -> Self {
        Self {
            matcher,
            strategy,
            ttl_ms: None,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(ttl.as_millis() as u64);
        self
    }
}

/// Strategy and TTL chosen for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub strategy: CacheStrategy,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRouter {
    rules: Vec<RouteRule>,
    fallback: CacheStrategy,
}

const STATIC_ASSET_SUFFIXES: &[&str] = &[".js", ".css", ".html", ".woff2"];
const IMAGE_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico"];

impl StrategyRouter {
    pub fn new(rules: Vec<RouteRule>, fallback: CacheStrategy) -> Self {
        Self { rules, fallback }
    }

    /// API calls network-first, static assets cache-first, images
    /// stale-while-revalidate, everything else network-first.
    #[must_use]
    pub fn service_worker_defaults() -> Self {
        let mut rules = vec![RouteRule::new(RouteMatcher::Prefix("/api/".into()), CacheStrategy::NetworkFirst)];
        rules.extend(
            STATIC_ASSET_SUFFIXES
                .iter()
                .map(|s| RouteRule::new(RouteMatcher::Suffix((*s).into()), CacheStrategy::CacheFirst)),
        );
        rules.extend(
            IMAGE_SUFFIXES
                .iter()
                .map(|s| RouteRule::new(RouteMatcher::Suffix((*s).into()), CacheStrategy::StaleWhileRevalidate)),
        );
        Self::new(rules, CacheStrategy::NetworkFirst)
    }

    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    #[must_use]
    pub fn resolve(&self, request: &Request) -> Route {
        if !request.method.is_read() {
            return Route {
                strategy: CacheStrategy::NetworkOnly,
                ttl: None,
            };
        }

        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(&request.url))
            .map(|rule| Route {
                strategy: rule.strategy,
                ttl: rule.ttl_ms.map(Duration::from_millis),
            })
            .unwrap_or(Route {
                strategy: self.fallback,
                ttl: None,
            })
    }
}

impl Default for StrategyRouter {
    fn default() -> Self {
        Self::service_worker_defaults()
    }
}

fn url_path(url: &str) -> &str {
    let after_scheme = match url.find("://") {
        Some(i) => {
            let rest = &url[i + 3..];
            rest.find('/').map_or("/", |j| &rest[j..])
        }
        None => url,
    };
    let end = after_scheme.find(['?', '#']).unwrap_or(after_scheme.len());
    &after_scheme[..end]
}
