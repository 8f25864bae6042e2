// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Client Resilience
//!
//! Retry, circuit breaking, strategy-driven caching and offline mutation
//! replay for clients talking to an unreliable remote.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ResilientClient                        │
//! │  • fetch(): reads, routed to a cache strategy              │
//! │  • submit(): writes, sent now or queued                    │
//! └─────────────────────────────────────────────────────────────┘
//!               │                                │
//!               ▼                                ▼
//! ┌───────────────────────────┐    ┌───────────────────────────┐
//! │     StrategyEngine        │    │   OfflineMutationQueue    │
//! │  • cache-first            │    │  • priority, then FIFO    │
//! │  • network-first          │    │  • persisted snapshots    │
//! │  • stale-while-revalidate │    └───────────────────────────┘
//! └───────────────────────────┘                  │
//!               │         │            (drained by SyncCoordinator
//!               │         ▼             on reconnect / interval)
//!               │   ┌──────────────┐             │
//!               │   │ BoundedCache │             │
//!               │   │  TTL, bytes  │             │
//!               │   └──────────────┘             │
//!               ▼                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GuardedTransport                        │
//! │  retry (backoff + jitter) → circuit breaker → timeout       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                     host-supplied Transport
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use client_resilience::{
//!     ManualConnectivity, MutationRequest, Request, ResilienceConfig, ResilientClient, SqliteStore,
//!     SubmitOutcome, Transport,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("client.db").await?);
//! let connectivity = Arc::new(ManualConnectivity::default());
//!
//! let client = ResilientClient::open(ResilienceConfig::default(), transport, store, connectivity.clone()).await?;
//! client.start();
//!
//! // Reads go through the routed cache strategy
//! let fetched = client.fetch(&Request::get("/api/incidents")).await?;
//! println!("{} from {:?}", fetched.response.status, fetched.source);
//!
//! // Writes are sent, or queued when they cannot go out
//! connectivity.go_offline();
//! let outcome = client.submit(MutationRequest::create("/api/incidents", json!({"title": "Leak"}))).await?;
//! assert!(matches!(outcome, SubmitOutcome::Queued(_)));
//!
//! // Replayed once the host reports connectivity again
//! connectivity.go_online();
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry
//!
//! ```
//! use client_resilience::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::default();
//! assert_eq!(config.base_delay(0), Duration::from_secs(1));
//! assert_eq!(config.base_delay(2), Duration::from_secs(4));
//! assert_eq!(config.base_delay(5), Duration::from_secs(10)); // capped
//! ```
//!
//! ## Modules
//!
//! - [`client`]: the [`ResilientClient`] composition root
//! - [`resilience`]: retry with backoff, circuit breaker
//! - [`transport`]: transport boundary and the guarded transport
//! - [`cache`]: bounded TTL cache with statistics
//! - [`strategy`]: cache strategies and URL routing
//! - [`queue`]: offline mutation queue
//! - [`sync`]: replay coordinator, connectivity, status publication
//! - [`storage`]: persistent stores (memory, SQLite)

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod resilience;
pub mod storage;
pub mod strategy;
pub mod sync;
pub mod transport;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use cache::{BoundedCache, CacheConfig, CacheError, CacheStatistics};
pub use client::{ClientState, ResilienceError, ResilientClient, SubmitOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ResilienceConfig};
pub use error::ClientError;
pub use metrics::LatencyTimer;
pub use queue::{MutationOp, MutationRequest, OfflineMutationQueue, Priority, QueueError, QueuedMutation};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitState};
pub use resilience::retry::{make_retryable, retry, RetryConfig, RetryOverrides, RetryableError};
pub use storage::{InMemoryStore, PersistentStore, SqliteStore, StorageError};
pub use strategy::{CacheStrategy, Fetched, RouteMatcher, RouteRule, StrategyEngine, StrategyRouter};
pub use sync::{
    Connectivity, ConnectivityObserver, DrainReport, FetchSource, ManualConnectivity, ReachabilityProbe, SyncConfig,
    SyncCoordinator, SyncEvent, SyncSnapshot, SyncStatus,
};
pub use transport::{GuardedTransport, Method, Request, Response, Transport};
