// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Online/offline signals for the sync coordinator.
//!
//! - [`ManualConnectivity`]: the host reports transitions (OS network
//!   events, app foregrounding, tests).
//! - [`ReachabilityProbe`]: periodically issues a cheap request through the
//!   transport and flips to offline after consecutive failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::transport::{Request, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    #[must_use]
    pub fn is_online(self) -> bool {
        self == Self::Online
    }

    #[must_use]
    pub fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Source of connectivity transitions.
pub trait ConnectivityObserver: Send + Sync {
    /// Receiver that sees every transition from now on.
    fn subscribe(&self) -> watch::Receiver<Connectivity>;

    fn current(&self) -> Connectivity {
        *self.subscribe().borrow()
    }
}

/// Connectivity driven by explicit calls.
pub struct ManualConnectivity {
    tx: watch::Sender<Connectivity>,
}

impl ManualConnectivity {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Report a state. Repeating the current state notifies nobody.
    pub fn set(&self, state: Connectivity) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            info!(?state, "Connectivity changed");
            crate::metrics::set_online(state.is_online());
        }
    }

    pub fn go_online(&self) {
        self.set(Connectivity::Online);
    }

    pub fn go_offline(&self) {
        self.set(Connectivity::Offline);
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}

impl ConnectivityObserver for ManualConnectivity {
    fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive failed probes before reporting offline.
    pub failure_threshold: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Reachability check through the transport.
///
/// Any HTTP response, whatever its status, proves the remote is reachable.
pub struct ReachabilityProbe {
    transport: Arc<dyn Transport>,
    request: Request,
    config: ProbeConfig,
    failures: AtomicU64,
    /// Prevent overlapping probes
    checking: Mutex<()>,
    tx: watch::Sender<Connectivity>,
}

impl ReachabilityProbe {
    pub fn new(transport: Arc<dyn Transport>, request: Request, config: ProbeConfig) -> Self {
        let (tx, _) = watch::channel(Connectivity::Online);
        Self {
            transport,
            request,
            config,
            failures: AtomicU64::new(0),
            checking: Mutex::new(()),
            tx,
        }
    }

    /// Consecutive failed probes.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// Run one probe and publish the resulting state.
    pub async fn check(&self) -> Connectivity {
        let _guard = self.checking.lock().await;

        let reachable = match tokio::time::timeout(self.config.timeout, self.transport.fetch(&self.request)).await {
            Ok(Ok(response)) => {
                debug!(status = response.status, "Reachability probe answered");
                true
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Reachability probe failed");
                false
            }
            Err(_) => {
                debug!(timeout = ?self.config.timeout, "Reachability probe timed out");
                false
            }
        };

        let state = if reachable {
            self.failures.store(0, Ordering::Release);
            Connectivity::Online
        } else {
            let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
            if failures >= self.config.failure_threshold {
                Connectivity::Offline
            } else {
                *self.tx.borrow()
            }
        };

        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            match state {
                Connectivity::Online => info!(url = %self.request.url, "Remote reachable again"),
                Connectivity::Offline => warn!(
                    url = %self.request.url,
                    failures = self.failure_count(),
                    "Remote unreachable"
                ),
            }
            crate::metrics::set_online(state.is_online());
        }
        state
    }

    /// Probe on an interval until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Reachability probe stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.check().await;
                }
            }
        }
    }
}

impl ConnectivityObserver for ReachabilityProbe {
    fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}
