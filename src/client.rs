// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Composition root.
//!
//! [`ResilientClient`] owns one of everything: breaker, guarded transport,
//! cache, strategy engine, mutation queue and sync coordinator. Hosts build
//! one per remote and pass it around by reference.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{BoundedCache, CacheError, CacheStatistics};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, ResilienceConfig};
use crate::error::ClientError;
use crate::queue::{MutationRequest, OfflineMutationQueue, QueueError, QueuedMutation};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::storage::PersistentStore;
use crate::strategy::{Fetched, StrategyEngine};
use crate::sync::{
    ConnectivityObserver, DrainReport, StatusBoard, Subscription, SyncCoordinator, SyncEvent, SyncSnapshot, SyncStatus,
};
use crate::transport::{GuardedTransport, Request, Response, Transport};

/// Client lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Opened, background sync not started
    Created,
    /// Following connectivity and auto-syncing
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Request(#[from] ClientError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Result of [`ResilientClient::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The remote accepted the write.
    Sent(Response),
    /// The write was parked for replay.
    Queued(QueuedMutation),
}

impl SubmitOutcome {
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

pub struct ResilientClient {
    config: ResilienceConfig,
    network: Arc<GuardedTransport>,
    cache: Arc<BoundedCache>,
    engine: StrategyEngine,
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn ConnectivityObserver>,
    state: watch::Sender<ClientState>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResilientClient {
    /// Build a client, loading the cache and the queue from `store`.
    pub async fn open(
        config: ResilienceConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PersistentStore>,
        connectivity: Arc<dyn ConnectivityObserver>,
    ) -> Result<Self, ResilienceError> {
        Self::open_with_clock(config, transport, store, connectivity, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        config: ResilienceConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PersistentStore>,
        connectivity: Arc<dyn ConnectivityObserver>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ResilienceError> {
        config.validate()?;

        let breaker = Arc::new(CircuitBreaker::with_clock("remote", config.circuit_config(), clock.clone()));
        let network = Arc::new(GuardedTransport::new(
            transport,
            breaker,
            config.retry_config(),
            config.request_timeout(),
        ));
        let status = Arc::new(StatusBoard::new());

        let cache = Arc::new(BoundedCache::open(config.cache_config(), store.clone(), clock.clone()).await?);
        let queue = Arc::new(OfflineMutationQueue::open(config.queue_store_key.clone(), store, clock.clone()).await?);

        let engine = StrategyEngine::new(network.clone(), cache.clone(), config.router(), status.clone());
        let coordinator = SyncCoordinator::new(queue, network.clone(), config.sync_config(), clock, status);

        let (state, _) = watch::channel(ClientState::Created);
        let (shutdown, _) = watch::channel(false);

        info!(
            cached = cache.len(),
            pending = coordinator.pending_count(),
            online = connectivity.current().is_online(),
            "Resilient client opened"
        );

        Ok(Self {
            config,
            network,
            cache,
            engine,
            coordinator,
            connectivity,
            state,
            shutdown,
            task: Mutex::new(None),
        })
    }

    /// Spawn the connectivity / auto-sync loop. Idempotent.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("Resilient client already started");
            return;
        }

        let coordinator = self.coordinator.clone();
        let handle = tokio::spawn(coordinator.run(self.connectivity.subscribe(), self.shutdown.subscribe()));
        *task = Some(handle);
        self.state.send_replace(ClientState::Running);
        info!("Resilient client started");
    }

    /// Stop the background loop, cancel any scheduled retry and flush
    /// state a failed store write left unpersisted. Queued mutations stay
    /// persisted for the next run.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Initiating resilient client shutdown...");
        self.state.send_replace(ClientState::ShuttingDown);
        self.shutdown.send_replace(true);

        let task = self.task.lock().take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync loop ended abnormally");
            }
        }
        self.coordinator.cancel_scheduled();

        // Last chance for writes deferred by a failing store
        if let Err(e) = self.coordinator.queue().flush().await {
            warn!(error = %e, "Queue snapshot not persisted at shutdown");
        }
        if let Err(e) = self.cache.flush().await {
            warn!(error = %e, "Cache snapshot not persisted at shutdown");
        }

        self.state.send_replace(ClientState::Stopped);
        info!(pending = self.coordinator.pending_count(), "Resilient client shutdown complete");
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Read through the strategy the router picks for `request`.
    pub async fn fetch(&self, request: &Request) -> Result<Fetched, ClientError> {
        self.engine.fetch(request).await
    }

    /// GET `url` and decode the body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<(T, Fetched), ClientError> {
        let fetched = self.fetch(&Request::get(url)).await?;
        if fetched.response.is_offline() {
            return Err(ClientError::Offline(format!("no network and nothing cached for {url}")));
        }
        let value = fetched.response.json()?;
        Ok((value, fetched))
    }

    /// Send a write, or queue it when it cannot go out now.
    ///
    /// Queued when offline, when the circuit is open, on a connectivity
    /// failure, and on a 5xx or 429 after retries. A 4xx is returned as an
    /// error; the server has answered and replaying would not change that.
    #[tracing::instrument(skip(self, request), fields(endpoint = %request.endpoint, kind = request.op.kind()))]
    pub async fn submit(&self, request: MutationRequest) -> Result<SubmitOutcome, ResilienceError> {
        if !self.connectivity.current().is_online() {
            debug!("Offline, queueing mutation");
            return self.park(request).await;
        }

        match self.network.execute(&request.to_request()).await {
            Ok(response) => {
                crate::metrics::record_submit("sent");
                Ok(SubmitOutcome::Sent(response))
            }
            Err(e) if e.should_queue() => {
                debug!(error = %e, "Send failed, queueing mutation");
                self.park(request).await
            }
            Err(e) => {
                crate::metrics::record_submit("rejected");
                Err(e.into())
            }
        }
    }

    async fn park(&self, request: MutationRequest) -> Result<SubmitOutcome, ResilienceError> {
        let queued = self.coordinator.queue_mutation(request).await?;
        crate::metrics::record_submit("queued");
        Ok(SubmitOutcome::Queued(queued))
    }

    /// Manual drain; replaces any scheduled retry.
    pub async fn sync(&self) -> DrainReport {
        self.coordinator.sync().await
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.coordinator.pending_count()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<SyncEvent>
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.coordinator.subscribe(callback)
    }

    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<SyncSnapshot> {
        self.coordinator.watch_snapshot()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.coordinator.watch_status()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStatistics {
        self.cache.stats()
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.network.breaker().state()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<BoundedCache> {
        &self.cache
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.network.breaker()
    }

    #[must_use]
    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }
}
