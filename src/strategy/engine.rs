// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache strategies over the guarded network fetch.
//!
//! | strategy                 | fresh hit | miss          | network down            |
//! |--------------------------|-----------|---------------|-------------------------|
//! | `CacheFirst`             | cache     | network       | stale entry, else error |
//! | `NetworkFirst`           | network   | network       | cache, stale, offline   |
//! | `StaleWhileRevalidate`   | cache + background refresh | network | cached entry   |
//! | `NetworkOnly`            | network   | network       | error                   |
//!
//! Only successful responses to read requests are stored. A 4xx is an
//! answer from a healthy server and is returned to the caller as an error
//! under every strategy.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::router::{CacheStrategy, StrategyRouter};
use crate::cache::BoundedCache;
use crate::error::ClientError;
use crate::sync::status::{FetchSource, StatusBoard};
use crate::transport::{GuardedTransport, Request, Response};

/// A response and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub response: Response,
    pub source: FetchSource,
}

impl Fetched {
    fn new(response: Response, source: FetchSource) -> Self {
        Self { response, source }
    }

    #[must_use]
    pub fn is_from_cache(&self) -> bool {
        self.source.is_from_cache()
    }
}

pub struct StrategyEngine {
    network: Arc<GuardedTransport>,
    cache: Arc<BoundedCache>,
    router: StrategyRouter,
    status: Arc<StatusBoard>,
    /// Cache keys with a background refresh in flight.
    revalidating: Arc<DashMap<String, ()>>,
}

impl StrategyEngine {
    pub fn new(
        network: Arc<GuardedTransport>,
        cache: Arc<BoundedCache>,
        router: StrategyRouter,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            network,
            cache,
            router,
            status,
            revalidating: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn router(&self) -> &StrategyRouter {
        &self.router
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<BoundedCache> {
        &self.cache
    }

    #[must_use]
    pub fn network(&self) -> &Arc<GuardedTransport> {
        &self.network
    }

    /// Number of background refreshes still running.
    #[must_use]
    pub fn revalidations_in_flight(&self) -> usize {
        self.revalidating.len()
    }

    /// Fetch using the strategy the router picks for `request`.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn fetch(&self, request: &Request) -> Result<Fetched, ClientError> {
        let route = self.router.resolve(request);
        self.fetch_with(request, route.strategy, route.ttl).await
    }

    /// Fetch with an explicit strategy. Writes always go straight to the
    /// network whatever strategy is asked for.
    pub async fn fetch_with(
        &self,
        request: &Request,
        strategy: CacheStrategy,
        ttl: Option<Duration>,
    ) -> Result<Fetched, ClientError> {
        let strategy = if request.method.is_read() {
            strategy
        } else {
            CacheStrategy::NetworkOnly
        };
        let _timer = crate::metrics::LatencyTimer::new(strategy.as_str());

        let result = match strategy {
            CacheStrategy::CacheFirst => self.cache_first(request, ttl).await,
            CacheStrategy::NetworkFirst => self.network_first(request, ttl).await,
            CacheStrategy::StaleWhileRevalidate => self.stale_while_revalidate(request, ttl).await,
            CacheStrategy::NetworkOnly => self
                .network
                .execute(request)
                .await
                .map(|r| Fetched::new(r, FetchSource::Network)),
        };

        match &result {
            Ok(fetched) => self.status.record_fetch(fetched.source),
            Err(e) if e.is_connectivity() => self.status.set_online(false),
            Err(_) => {}
        }
        result
    }

    pub async fn cache_first(&self, request: &Request, ttl: Option<Duration>) -> Result<Fetched, ClientError> {
        let key = request.cache_key();
        let cached = self.cache.lookup(&key);

        if let Some(hit) = cached.as_ref().filter(|c| c.fresh) {
            if let Some(response) = decode(&key, &hit.entry.value) {
                crate::metrics::record_cache_lookup("cache_first", "hit");
                return Ok(Fetched::new(response, FetchSource::Cache));
            }
        }
        crate::metrics::record_cache_lookup("cache_first", "miss");

        match self.network.execute(request).await {
            Ok(response) => {
                self.store(&key, &response, ttl).await;
                Ok(Fetched::new(response, FetchSource::Network))
            }
            Err(e) if e.is_connectivity() => match cached.and_then(|c| decode(&key, &c.entry.value)) {
                Some(response) => {
                    debug!(key = %key, error = %e, "Network unavailable, serving stale entry");
                    Ok(Fetched::new(response, FetchSource::StaleCache))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn network_first(&self, request: &Request, ttl: Option<Duration>) -> Result<Fetched, ClientError> {
        let key = request.cache_key();

        let error = match self.network.execute(request).await {
            Ok(response) => {
                self.store(&key, &response, ttl).await;
                return Ok(Fetched::new(response, FetchSource::Network));
            }
            Err(e @ (ClientError::Client { .. } | ClientError::Parse(_))) => return Err(e),
            Err(e) => e,
        };

        if let Some(cached) = self.cache.lookup(&key) {
            if let Some(response) = decode(&key, &cached.entry.value) {
                let (source, outcome) = if cached.fresh {
                    (FetchSource::Cache, "hit")
                } else {
                    (FetchSource::StaleCache, "stale")
                };
                crate::metrics::record_cache_lookup("network_first", outcome);
                debug!(key = %key, error = %error, source = source.as_str(), "Network failed, serving cached entry");
                return Ok(Fetched::new(response, source));
            }
        }

        crate::metrics::record_cache_lookup("network_first", "miss");
        warn!(key = %key, error = %error, "Network failed with nothing cached, returning offline response");
        Ok(Fetched::new(Response::offline(&error.to_string()), FetchSource::Offline))
    }

    pub async fn stale_while_revalidate(
        &self,
        request: &Request,
        ttl: Option<Duration>,
    ) -> Result<Fetched, ClientError> {
        let key = request.cache_key();

        if let Some(cached) = self.cache.lookup(&key) {
            if let Some(response) = decode(&key, &cached.entry.value) {
                let (source, outcome) = if cached.fresh {
                    (FetchSource::Cache, "hit")
                } else {
                    (FetchSource::StaleCache, "stale")
                };
                crate::metrics::record_cache_lookup("stale_while_revalidate", outcome);
                self.spawn_revalidation(key, request.clone(), ttl);
                return Ok(Fetched::new(response, source));
            }
        }

        crate::metrics::record_cache_lookup("stale_while_revalidate", "miss");
        let response = self.network.execute(request).await?;
        self.store(&key, &response, ttl).await;
        Ok(Fetched::new(response, FetchSource::Network))
    }

    /// Refresh `key` in the background unless a refresh is already running.
    /// Failures are logged and dropped; the cached entry stays as it was.
    fn spawn_revalidation(&self, key: String, request: Request, ttl: Option<Duration>) {
        match self.revalidating.entry(key.clone()) {
            Entry::Occupied(_) => {
                debug!(key = %key, "Revalidation already in flight");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let network = self.network.clone();
        let cache = self.cache.clone();
        let in_flight = InFlight {
            set: self.revalidating.clone(),
            key,
        };

        tokio::spawn(async move {
            let key = &in_flight.key;
            match network.execute(&request).await {
                Ok(response) => {
                    store_response(&cache, key, &response, ttl).await;
                    crate::metrics::record_revalidation("refreshed");
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "Background revalidation failed");
                    crate::metrics::record_revalidation("failed");
                }
            }
        });
    }

    async fn store(&self, key: &str, response: &Response, ttl: Option<Duration>) {
        store_response(&self.cache, key, response, ttl).await;
    }
}

/// Clears a key's in-flight revalidation marker when the refresh task ends,
/// including by panic or abort.
struct InFlight {
    set: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

async fn store_response(cache: &BoundedCache, key: &str, response: &Response, ttl: Option<Duration>) {
    if !response.is_success() {
        return;
    }
    if let Err(e) = cache.set(key, response, ttl).await {
        warn!(key = %key, error = %e, "Failed to cache response");
    }
}

fn decode(key: &str, value: &serde_json::Value) -> Option<Response> {
    match serde_json::from_value(value.clone()) {
        Ok(response) => Some(response),
        Err(e) => {
            warn!(key = %key, error = %e, "Cached entry is not a response, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::clock::ManualClock;
    use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig};
    use crate::resilience::retry::RetryConfig;
    use crate::transport::{Method, Transport};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Serves `body` while up, fails with a network error while down.
    struct Switchable {
        up: Mutex<Result<Response, ClientError>>,
        calls: AtomicUsize,
        broken: AtomicBool,
    }

    impl Switchable {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                up: Mutex::new(Ok(Response::new(200, "v1"))),
                calls: AtomicUsize::new(0),
                broken: AtomicBool::new(false),
            })
        }

        fn serve(&self, result: Result<Response, ClientError>) {
            *self.up.lock() = result;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Switchable {
        async fn fetch(&self, _request: &Request) -> Result<Response, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken.load(Ordering::SeqCst) {
                panic!("transport bug");
            }
            self.up.lock().clone()
        }
    }

    fn down() -> Result<Response, ClientError> {
        Err(ClientError::TransientNetwork("connection refused".into()))
    }

    struct Harness {
        engine: StrategyEngine,
        transport: Arc<Switchable>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let transport = Switchable::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let breaker = Arc::new(CircuitBreaker::with_clock(
            "api",
            CircuitConfig {
                failure_threshold: 100,
                ..CircuitConfig::default()
            },
            clock.clone(),
        ));
        let retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::test()
        };
        let network = Arc::new(GuardedTransport::new(transport.clone(), breaker, retry, Duration::from_secs(1)));
        let cache = Arc::new(BoundedCache::with_clock(
            CacheConfig {
                capacity_bytes: 64 * 1024,
                default_ttl: Duration::from_millis(1000),
                store_key: "test".into(),
            },
            clock.clone(),
        ));
        let engine = StrategyEngine::new(network, cache, StrategyRouter::default(), Arc::new(StatusBoard::new()));
        Harness { engine, transport, clock }
    }

    async fn settle(engine: &StrategyEngine) {
        while engine.revalidations_in_flight() > 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_cache_first_hits_cache_after_first_fetch() {
        let h = harness();
        let req = Request::get("/app.js");

        let first = h.engine.cache_first(&req, None).await.unwrap();
        assert_eq!(first.source, FetchSource::Network);

        h.transport.serve(Ok(Response::new(200, "v2")));
        let second = h.engine.cache_first(&req, None).await.unwrap();
        assert_eq!(second.source, FetchSource::Cache);
        assert_eq!(second.response.body, "v1");
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_first_miss_propagates_network_failure() {
        let h = harness();
        h.transport.serve(down());

        let err = h.engine.cache_first(&Request::get("/app.js"), None).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_cache_first_serves_expired_entry_when_offline() {
        let h = harness();
        let req = Request::get("/app.js");
        h.engine.cache_first(&req, None).await.unwrap();

        h.clock.advance(Duration::from_secs(5));
        h.transport.serve(down());

        let fetched = h.engine.cache_first(&req, None).await.unwrap();
        assert_eq!(fetched.source, FetchSource::StaleCache);
        assert_eq!(fetched.response.body, "v1");
    }

    #[tokio::test]
    async fn test_network_first_prefers_network_then_falls_back() {
        let h = harness();
        let req = Request::get("/api/items");

        let fetched = h.engine.fetch(&req).await.unwrap();
        assert_eq!(fetched.source, FetchSource::Network);

        h.transport.serve(down());
        let fetched = h.engine.fetch(&req).await.unwrap();
        assert_eq!(fetched.source, FetchSource::Cache);
        assert_eq!(fetched.response.body, "v1");

        h.clock.advance(Duration::from_secs(5));
        let fetched = h.engine.fetch(&req).await.unwrap();
        assert_eq!(fetched.source, FetchSource::StaleCache);
    }

    #[tokio::test]
    async fn test_network_first_offline_response_when_nothing_cached() {
        let h = harness();
        h.transport.serve(down());

        let fetched = h.engine.network_first(&Request::get("/api/items"), None).await.unwrap();
        assert_eq!(fetched.source, FetchSource::Offline);
        assert_eq!(fetched.response.status, 503);
        assert!(fetched.response.is_offline());
    }

    #[tokio::test]
    async fn test_network_first_propagates_client_errors() {
        let h = harness();
        let req = Request::get("/api/items");
        h.engine.fetch(&req).await.unwrap();

        h.transport.serve(Ok(Response::new(403, "forbidden")));
        let err = h.engine.fetch(&req).await.unwrap_err();
        assert!(matches!(err, ClientError::Client { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_error_responses_are_not_cached() {
        let h = harness();
        let req = Request::get("/api/items");
        h.transport.serve(Ok(Response::new(500, "oops")));

        let fetched = h.engine.network_first(&req, None).await.unwrap();
        assert_eq!(fetched.source, FetchSource::Offline);
        assert!(h.engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_swr_returns_cached_and_refreshes_in_background() {
        let h = harness();
        let req = Request::get("/img/logo.png");

        let first = h.engine.fetch(&req).await.unwrap();
        assert_eq!(first.source, FetchSource::Network);

        h.transport.serve(Ok(Response::new(200, "v2")));
        let second = h.engine.fetch(&req).await.unwrap();
        assert_eq!(second.source, FetchSource::Cache);
        assert_eq!(second.response.body, "v1");

        settle(&h.engine).await;
        let third = h.engine.fetch(&req).await.unwrap();
        assert_eq!(third.response.body, "v2");
        settle(&h.engine).await;
    }

    #[tokio::test]
    async fn test_swr_background_failure_keeps_entry() {
        let h = harness();
        let req = Request::get("/img/logo.png");
        h.engine.fetch(&req).await.unwrap();

        h.transport.serve(down());
        let fetched = h.engine.fetch(&req).await.unwrap();
        assert_eq!(fetched.response.body, "v1");
        settle(&h.engine).await;

        assert!(h.engine.cache().contains_fresh(&req.cache_key()));
    }

    #[tokio::test]
    async fn test_swr_panicking_refresh_does_not_block_later_refreshes() {
        let h = harness();
        let req = Request::get("/img/logo.png");
        h.engine.fetch(&req).await.unwrap();

        h.transport.broken.store(true, Ordering::SeqCst);
        h.engine.stale_while_revalidate(&req, None).await.unwrap();
        settle(&h.engine).await;
        assert_eq!(h.transport.calls(), 2);

        // The key is free again, so the next read schedules a new refresh
        h.transport.broken.store(false, Ordering::SeqCst);
        h.transport.serve(Ok(Response::new(200, "v2")));
        h.engine.stale_while_revalidate(&req, None).await.unwrap();
        assert_eq!(h.engine.revalidations_in_flight(), 1);
        settle(&h.engine).await;
        assert_eq!(h.transport.calls(), 3);
        assert_eq!(h.engine.fetch(&req).await.unwrap().response.body, "v2");
        settle(&h.engine).await;
    }

    #[tokio::test]
    async fn test_swr_deduplicates_refreshes() {
        let h = harness();
        let req = Request::get("/img/logo.png");
        h.engine.fetch(&req).await.unwrap();
        assert_eq!(h.transport.calls(), 1);

        // No await point between these, so the spawned refresh has not run
        h.engine.stale_while_revalidate(&req, None).await.unwrap();
        h.engine.stale_while_revalidate(&req, None).await.unwrap();
        h.engine.stale_while_revalidate(&req, None).await.unwrap();
        assert_eq!(h.engine.revalidations_in_flight(), 1);

        settle(&h.engine).await;
        assert_eq!(h.transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_writes_bypass_cache() {
        let h = harness();
        let req = Request::new(Method::Post, "/api/items").with_body(serde_json::json!({"a": 1}));

        let fetched = h.engine.fetch_with(&req, CacheStrategy::CacheFirst, None).await.unwrap();
        assert_eq!(fetched.source, FetchSource::Network);
        assert!(h.engine.cache().is_empty());
    }
}
