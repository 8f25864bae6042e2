// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replays the offline queue when the remote is reachable.
//!
//! # Drain
//!
//! One drain at a time. A call arriving while a drain runs returns at once
//! and asks the running drain to go round again when it finishes.
//!
//! Each replayable mutation, in priority-then-FIFO order, goes through the
//! guarded transport with the sync retry policy:
//!
//! | outcome                               | queue                      | drain     |
//! |---------------------------------------|----------------------------|-----------|
//! | success                               | removed                    | continues |
//! | 5xx / 429 after retries               | `retry_count += 1`         | continues |
//! | offline, network, timeout, open circuit | `retry_count += 1`       | stops     |
//! | 4xx / unparseable                     | marked rejected, kept      | continues |
//!
//! # Scheduling
//!
//! A drain that ends with failed replays schedules one automatic re-drain
//! after a backoff that grows with consecutive failed cycles. A manual
//! [`SyncCoordinator::sync`], going offline or shutdown cancels it.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connectivity::Connectivity;
use super::status::{DrainReport, StatusBoard, SyncEvent, SyncSnapshot, SyncStatus};
use super::subscribers::{Subscribers, Subscription};
use crate::clock::Clock;
use crate::queue::{MutationRequest, OfflineMutationQueue, QueueResult, QueuedMutation};
use crate::resilience::retry::RetryConfig;
use crate::transport::GuardedTransport;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Period of the background drain while online.
    pub auto_sync_interval: Duration,
    /// Retry policy for each replayed mutation within one drain, and the
    /// backoff curve for scheduled re-drains.
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Resets the syncing flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    me: Weak<SyncCoordinator>,
    queue: Arc<OfflineMutationQueue>,
    network: Arc<GuardedTransport>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    status: Arc<StatusBoard>,
    subscribers: Subscribers<SyncEvent>,
    syncing: AtomicBool,
    rerun: AtomicBool,
    online: AtomicBool,
    failed_cycles: AtomicU32,
    scheduled: Mutex<Option<AbortHandle>>,
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<OfflineMutationQueue>,
        network: Arc<GuardedTransport>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
        status: Arc<StatusBoard>,
    ) -> Arc<Self> {
        let coordinator = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            queue,
            network,
            config,
            clock,
            status,
            subscribers: Subscribers::new(),
            syncing: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            online: AtomicBool::new(true),
            failed_cycles: AtomicU32::new(0),
            scheduled: Mutex::new(None),
        });
        coordinator.publish_snapshot(false);
        coordinator
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<OfflineMutationQueue> {
        &self.queue
    }

    /// Current queue length. Never cached.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Consecutive drains that ended with failed replays.
    #[must_use]
    pub fn failed_cycles(&self) -> u32 {
        self.failed_cycles.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_scheduled_retry(&self) -> bool {
        self.scheduled.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Register a callback for every [`SyncEvent`].
    pub fn subscribe<F>(&self, callback: F) -> Subscription<SyncEvent>
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<SyncSnapshot> {
        self.status.subscribe_snapshot()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe_status()
    }

    /// Park a write for later replay.
    pub async fn queue_mutation(&self, request: MutationRequest) -> QueueResult<QueuedMutation> {
        let queued = self.queue.enqueue(request).await?;
        self.publish_snapshot(self.is_syncing());
        Ok(queued)
    }

    /// Put rejected mutations back in line. Does not start a drain.
    pub async fn requeue_rejected(&self) -> QueueResult<usize> {
        self.queue.requeue_rejected().await
    }

    /// Drop a queued mutation without replaying it.
    pub async fn discard(&self, id: Uuid) -> QueueResult<bool> {
        let removed = self.queue.discard(id).await?;
        if removed {
            self.publish_snapshot(self.is_syncing());
        }
        Ok(removed)
    }

    /// Record a connectivity transition. Going online starts a drain;
    /// going offline cancels any scheduled retry.
    pub async fn set_connectivity(&self, state: Connectivity) {
        let was_online = self.online.swap(state.is_online(), Ordering::AcqRel);
        self.status.set_online(state.is_online());

        match state {
            Connectivity::Online => {
                if !was_online {
                    info!(pending = self.pending_count(), "Back online");
                }
                if self.queue.replayable_count() > 0 {
                    self.drain().await;
                }
            }
            Connectivity::Offline => {
                if was_online {
                    info!(pending = self.pending_count(), "Went offline");
                }
                self.cancel_scheduled();
            }
        }
    }

    /// Manual drain. Replaces any scheduled automatic retry.
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self) -> DrainReport {
        self.cancel_scheduled();
        self.drain().await
    }

    /// Cancel the scheduled automatic retry, if any.
    pub fn cancel_scheduled(&self) {
        if let Some(handle) = self.scheduled.lock().take() {
            handle.abort();
            debug!("Cancelled scheduled sync retry");
        }
    }

    /// Drain unless one is already running. A re-entrant call returns an
    /// empty report and makes the running drain go round once more.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self) -> DrainReport {
        loop {
            if self.syncing.swap(true, Ordering::AcqRel) {
                self.rerun.store(true, Ordering::Release);
                debug!("Drain already running, will rerun when it finishes");
                return DrainReport {
                    remaining: self.queue.pending_count(),
                    ..DrainReport::default()
                };
            }

            let report = {
                let _guard = DrainGuard(&self.syncing);
                self.drain_once().await
            };

            if !self.rerun.swap(false, Ordering::AcqRel) || self.queue.replayable_count() == 0 {
                return report;
            }
            debug!("Rerunning drain requested while busy");
        }
    }

    async fn drain_once(&self) -> DrainReport {
        let started = Instant::now();
        let started_online = self.is_online();
        let initial = self.queue.pending_count();
        let replayable = self.queue.replayable();

        self.publish_snapshot(true);
        info!(pending = initial, replayable = replayable.len(), "Drain started");

        let mut report = DrainReport::default();
        let mut interrupted = false;

        for mutation in replayable {
            if started_online && !self.is_online() {
                debug!("Went offline mid-drain, stopping");
                interrupted = true;
                break;
            }

            report.attempted += 1;
            if !self.replay(&mutation, &mut report).await {
                interrupted = true;
                break;
            }
            self.publish_snapshot(true);
        }

        report.remaining = self.queue.pending_count();
        self.publish_snapshot(false);

        if initial > 0 && report.remaining == 0 {
            info!(synced = report.synced, "Fully synchronized");
            self.subscribers.publish(&SyncEvent::FullySynchronized);
        }

        let cycles = if report.failed > 0 {
            self.failed_cycles.fetch_add(1, Ordering::AcqRel).saturating_add(1)
        } else {
            self.failed_cycles.store(0, Ordering::Release);
            0
        };
        self.status.record_drain(self.clock.now_ms(), cycles);

        info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            rejected = report.rejected,
            remaining = report.remaining,
            "Drain finished"
        );
        let outcome = match (interrupted, report.failed) {
            (true, _) => "interrupted",
            (false, 0) => "completed",
            (false, _) => "partial",
        };
        crate::metrics::record_drain(outcome, started.elapsed());
        self.subscribers.publish(&SyncEvent::Finished(report));

        if cycles > 0 && self.is_online() {
            self.schedule_retry(cycles);
        }
        report
    }

    /// Replay one mutation. Returns false when the drain should stop.
    async fn replay(&self, mutation: &QueuedMutation, report: &mut DrainReport) -> bool {
        let request = mutation.to_request();

        match self.network.execute_with(&request, &self.config.retry).await {
            Ok(_) => {
                if let Err(e) = self.queue.remove(mutation.id).await {
                    error!(id = %mutation.id, error = %e, "Failed to persist queue after replay");
                }
                report.synced += 1;
                debug!(id = %mutation.id, endpoint = %mutation.endpoint, "Mutation synced");
                crate::metrics::record_replay("synced");
                self.subscribers.publish(&SyncEvent::MutationSynced { id: mutation.id });
                true
            }
            Err(e) if e.should_queue() => {
                let retry_count = match self.queue.record_failure(mutation.id, &e.to_string()).await {
                    Ok(count) => count.unwrap_or(mutation.retry_count),
                    Err(qe) => {
                        error!(id = %mutation.id, error = %qe, "Failed to persist replay failure");
                        mutation.retry_count.saturating_add(1)
                    }
                };
                report.failed += 1;
                warn!(
                    id = %mutation.id,
                    endpoint = %mutation.endpoint,
                    retry_count,
                    error = %e,
                    "Mutation replay failed, keeping it queued"
                );
                crate::metrics::record_replay("failed");
                self.subscribers.publish(&SyncEvent::MutationFailed {
                    id: mutation.id,
                    error: e.clone(),
                    retry_count,
                });

                if e.is_connectivity() {
                    warn!(error = %e, "Remote unreachable, stopping drain");
                    return false;
                }
                true
            }
            Err(e) => {
                let newly = match self.queue.mark_rejected(mutation.id, &e.to_string()).await {
                    Ok(newly) => newly,
                    Err(qe) => {
                        error!(id = %mutation.id, error = %qe, "Failed to persist rejection");
                        true
                    }
                };
                report.rejected += 1;
                warn!(id = %mutation.id, endpoint = %mutation.endpoint, error = %e, "Mutation rejected by server");
                crate::metrics::record_replay("rejected");
                if newly {
                    self.subscribers.publish(&SyncEvent::MutationRejected {
                        id: mutation.id,
                        error: e,
                    });
                }
                true
            }
        }
    }

    fn schedule_retry(&self, cycles: u32) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        let delay = self.config.retry.next_delay(cycles.saturating_sub(1));
        debug!(?delay, cycles, "Scheduling sync retry");

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach before draining so a cancel cannot abort a running drain
            this.scheduled.lock().take();
            if this.is_online() {
                this.drain().await;
            }
        });

        if let Some(previous) = self.scheduled.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    fn publish_snapshot(&self, syncing: bool) {
        let snapshot = SyncSnapshot {
            syncing,
            pending_count: self.queue.pending_count(),
        };
        self.status.publish_snapshot(snapshot);
        self.subscribers.publish(&SyncEvent::Status(snapshot));
    }

    /// Follow connectivity transitions and drain on an interval until
    /// `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut connectivity: watch::Receiver<Connectivity>, mut shutdown: watch::Receiver<bool>) {
        let initial = *connectivity.borrow_and_update();
        self.online.store(initial.is_online(), Ordering::Release);
        self.status.set_online(initial.is_online());

        let mut ticker = tokio::time::interval(self.config.auto_sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(online = initial.is_online(), pending = self.pending_count(), "Sync coordinator running");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.cancel_scheduled();
                        info!("Sync coordinator stopped");
                        return;
                    }
                }

                Ok(()) = connectivity.changed() => {
                    let state = *connectivity.borrow_and_update();
                    self.set_connectivity(state).await;
                }

                _ = ticker.tick() => {
                    if self.is_online() && !self.is_syncing() && self.queue.replayable_count() > 0 {
                        self.drain().await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ClientError;
    use crate::queue::Priority;
    use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig};
    use crate::transport::{Request, Response, Transport};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Answers from a script; records the URL of every call.
    struct Scripted {
        script: Mutex<VecDeque<Result<Response, ClientError>>>,
        fallback: Mutex<Result<Response, ClientError>>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(fallback: Result<Response, ClientError>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn push(&self, result: Result<Response, ClientError>) {
            self.script.lock().push_back(result);
        }

        fn set_fallback(&self, result: Result<Response, ClientError>) {
            *self.fallback.lock() = result;
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn fetch(&self, request: &Request) -> Result<Response, ClientError> {
            self.seen.lock().push(request.url.clone());
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.lock().clone())
        }
    }

    fn ok() -> Result<Response, ClientError> {
        Ok(Response::new(200, "{}"))
    }

    fn coordinator(transport: Arc<Scripted>) -> Arc<SyncCoordinator> {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = Arc::new(CircuitBreaker::with_clock(
            "sync",
            CircuitConfig {
                failure_threshold: 100,
                ..CircuitConfig::default()
            },
            clock.clone(),
        ));
        let retry = RetryConfig {
            max_retries: 0,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            factor: 2.0,
        };
        let network = Arc::new(GuardedTransport::new(transport, breaker, retry.clone(), Duration::from_secs(1)));
        let config = SyncConfig {
            auto_sync_interval: Duration::from_secs(30),
            retry,
        };
        SyncCoordinator::new(
            Arc::new(OfflineMutationQueue::with_clock(clock.clone())),
            network,
            config,
            clock,
            Arc::new(StatusBoard::new()),
        )
    }

    fn create(endpoint: &str, priority: Priority) -> MutationRequest {
        MutationRequest::create(endpoint, json!({"n": endpoint})).with_priority(priority)
    }

    fn record_events(coordinator: &SyncCoordinator) -> (Arc<Mutex<Vec<SyncEvent>>>, Subscription<SyncEvent>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = coordinator.subscribe(move |e| sink.lock().push(e.clone()));
        (events, sub)
    }

    fn count(events: &Mutex<Vec<SyncEvent>>, pred: impl Fn(&SyncEvent) -> bool) -> usize {
        events.lock().iter().filter(|e| pred(*e)).count()
    }

    #[tokio::test]
    async fn test_drain_replays_in_priority_order() {
        let transport = Scripted::new(ok());
        let sync = coordinator(transport.clone());

        sync.queue_mutation(create("/low", Priority::Low)).await.unwrap();
        sync.queue_mutation(create("/high", Priority::High)).await.unwrap();
        sync.queue_mutation(create("/medium", Priority::Medium)).await.unwrap();

        let report = sync.sync().await;

        assert_eq!(transport.seen(), vec!["/high", "/medium", "/low"]);
        assert_eq!(report.synced, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(sync.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fully_synchronized_fires_once_per_emptying_drain() {
        let transport = Scripted::new(ok());
        let sync = coordinator(transport);
        let (events, _sub) = record_events(&sync);

        sync.queue_mutation(create("/a", Priority::Medium)).await.unwrap();
        assert_eq!(sync.watch_snapshot().borrow().pending_count, 1);

        sync.sync().await;
        // Draining an empty queue does not re-announce it
        sync.sync().await;

        assert_eq!(count(&events, |e| matches!(e, SyncEvent::FullySynchronized)), 1);
        assert!(sync.watch_snapshot().borrow().is_settled());

        // Status snapshots bracket the drain
        let statuses: Vec<SyncSnapshot> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Status(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert!(statuses.contains(&SyncSnapshot { syncing: true, pending_count: 1 }));
        assert!(statuses.contains(&SyncSnapshot { syncing: false, pending_count: 0 }));
    }

    #[tokio::test]
    async fn test_connectivity_error_stops_drain() {
        let transport = Scripted::new(ok());
        transport.push(Err(ClientError::TransientNetwork("reset".into())));
        let sync = coordinator(transport.clone());

        let first = sync.queue_mutation(create("/a", Priority::High)).await.unwrap();
        sync.queue_mutation(create("/b", Priority::Low)).await.unwrap();

        let report = sync.sync().await;

        assert_eq!(transport.seen(), vec!["/a"]);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(sync.queue().get(first.id).unwrap().retry_count, 1);
        sync.cancel_scheduled();
    }

    #[tokio::test]
    async fn test_server_error_keeps_mutation_and_continues() {
        let transport = Scripted::new(ok());
        transport.push(Ok(Response::new(503, "busy")));
        let sync = coordinator(transport.clone());

        let a = sync.queue_mutation(create("/a", Priority::High)).await.unwrap();
        sync.queue_mutation(create("/b", Priority::Low)).await.unwrap();

        let report = sync.sync().await;

        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(sync.pending_count(), 1);
        assert_eq!(sync.queue().get(a.id).unwrap().retry_count, 1);
        assert_eq!(sync.failed_cycles(), 1);
        assert!(sync.has_scheduled_retry());

        // Manual sync replaces the scheduled retry
        let report = sync.sync().await;
        assert_eq!(report.synced, 1);
        assert_eq!(sync.failed_cycles(), 0);
        assert!(!sync.has_scheduled_retry());
    }

    #[tokio::test]
    async fn test_rejected_mutation_is_kept_and_reported_once() {
        let transport = Scripted::new(ok());
        transport.push(Ok(Response::new(422, "invalid")));
        let sync = coordinator(transport.clone());
        let (events, _sub) = record_events(&sync);

        let bad = sync.queue_mutation(create("/bad", Priority::High)).await.unwrap();

        let report = sync.sync().await;
        assert_eq!(report.rejected, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(sync.pending_count(), 1);
        assert!(!sync.has_scheduled_retry());

        // Skipped by later drains
        let report = sync.sync().await;
        assert_eq!(report.attempted, 0);
        assert_eq!(count(&events, |e| matches!(e, SyncEvent::MutationRejected { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, SyncEvent::FullySynchronized)), 0);

        // Host resolves it
        assert_eq!(sync.requeue_rejected().await.unwrap(), 1);
        let report = sync.sync().await;
        assert_eq!(report.synced, 1);
        assert!(sync.queue().get(bad.id).is_none());
        assert_eq!(count(&events, |e| matches!(e, SyncEvent::FullySynchronized)), 1);
    }

    #[tokio::test]
    async fn test_replay_carries_idempotency_key() {
        struct Capture(Mutex<Vec<Request>>);

        #[async_trait]
        impl Transport for Capture {
            async fn fetch(&self, request: &Request) -> Result<Response, ClientError> {
                self.0.lock().push(request.clone());
                Ok(Response::new(201, ""))
            }
        }

        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let clock = Arc::new(ManualClock::new(0));
        let network = Arc::new(GuardedTransport::new(
            capture.clone(),
            Arc::new(CircuitBreaker::with_defaults("sync")),
            RetryConfig::test(),
            Duration::from_secs(1),
        ));
        let sync = SyncCoordinator::new(
            Arc::new(OfflineMutationQueue::with_clock(clock.clone())),
            network,
            SyncConfig::default(),
            clock,
            Arc::new(StatusBoard::new()),
        );

        let queued = sync.queue_mutation(MutationRequest::delete("/api/items/9")).await.unwrap();
        sync.sync().await;

        let sent = capture.0.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header("idempotency-key"), Some(queued.id.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_reentrant_drain_is_a_noop() {
        let transport = Scripted::new(ok());
        let sync = coordinator(transport);
        sync.queue_mutation(create("/a", Priority::Medium)).await.unwrap();

        sync.syncing.store(true, Ordering::Release);
        let report = sync.drain().await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.remaining, 1);
        assert!(sync.rerun.load(Ordering::Acquire));
        sync.syncing.store(false, Ordering::Release);
    }

    #[tokio::test]
    async fn test_going_offline_cancels_scheduled_retry() {
        let transport = Scripted::new(Ok(Response::new(500, "down")));
        let sync = coordinator(transport.clone());
        sync.queue_mutation(create("/a", Priority::Medium)).await.unwrap();

        sync.sync().await;
        assert!(sync.has_scheduled_retry());

        sync.set_connectivity(Connectivity::Offline).await;
        assert!(!sync.has_scheduled_retry());
        assert!(!sync.watch_status().borrow().is_online);

        transport.set_fallback(ok());
        sync.set_connectivity(Connectivity::Online).await;
        assert_eq!(sync.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_retry_fires_after_backoff() {
        let transport = Scripted::new(ok());
        transport.push(Ok(Response::new(502, "bad gateway")));
        let sync = coordinator(transport.clone());
        let (events, _sub) = record_events(&sync);
        sync.queue_mutation(create("/a", Priority::Medium)).await.unwrap();

        sync.sync().await;
        assert_eq!(sync.pending_count(), 1);

        // First cycle backoff is at most 10ms + 30% jitter
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sync.pending_count(), 0);
        assert_eq!(transport.seen().len(), 2);
        assert_eq!(count(&events, |e| matches!(e, SyncEvent::FullySynchronized)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_drains_on_reconnect() {
        let transport = Scripted::new(ok());
        let sync = coordinator(transport);
        sync.queue_mutation(create("/a", Priority::Medium)).await.unwrap();

        let (conn_tx, conn_rx) = watch::channel(Connectivity::Offline);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut snapshots = sync.watch_snapshot();
        let handle = tokio::spawn(sync.clone().run(conn_rx, shutdown_rx));

        tokio::task::yield_now().await;
        assert_eq!(sync.pending_count(), 1);

        conn_tx.send(Connectivity::Online).unwrap();
        snapshots.wait_for(|s| s.is_settled()).await.unwrap();
        assert_eq!(sync.pending_count(), 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
