// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker guarding a remote dependency.
//!
//! Wraps async operations and tracks consecutive failures to "trip" the
//! breaker when the threshold is reached.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Service unhealthy, requests fail-fast without attempting
//! - HalfOpen: Testing if service recovered, limited probe requests allowed
//!
//! ```text
//! Closed   → Open:     failure_count reaches failure_threshold
//! Open     → HalfOpen: first call after recovery_timeout has elapsed
//! HalfOpen → Closed:   success_threshold consecutive probe successes
//! HalfOpen → Open:     any probe failure
//! ```
//!
//! Transitions happen under a short synchronous lock and never across an
//! await point.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
            Self::Open => write!(f, "OPEN"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes in half-open to close circuit
    pub success_threshold: u32,
    /// How long to wait before attempting recovery (half-open)
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitConfig {
    /// Trips faster, recovers cautiously
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(120),
        }
    }

    /// Tolerates more failures
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(15),
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at_ms: Option<u64>,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_requests: u32,
}

#[derive(Debug, Default)]
struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at_ms: Option<u64>,
    probes_in_flight: u32,
    /// Bumped on every transition so late probe completions from an earlier
    /// half-open window are ignored.
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
enum Admission {
    Pass,
    Probe { generation: u64 },
}

/// Holds an admitted call until its outcome is recorded. A half-open probe
/// dropped before completing counts as a failed probe, so its slot is
/// never leaked.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl AdmissionGuard<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.admission);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.admission);
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Admission::Probe { .. } = self.admission {
            debug!(circuit = %self.breaker.name, "Half-open probe cancelled before completing");
            self.breaker.on_failure(self.admission);
        }
    }
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    core: Mutex<BreakerCore>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a breaker reading time from `clock`
    pub fn with_clock(name: impl Into<String>, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            core: Mutex::new(BreakerCore::default()),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Get current circuit state.
    ///
    /// Reading never transitions; an expired OPEN stays OPEN until the next call.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Full counter view
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let core = self.core.lock();
        CircuitSnapshot {
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            last_failure_at_ms: core.last_failure_at_ms,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_ms: self.config.recovery_timeout.as_millis() as u64,
            half_open_requests: self.config.success_threshold,
        }
    }

    /// Force CLOSED with all counters zeroed.
    pub fn reset(&self) {
        let mut core = self.core.lock();
        let generation = core.generation + 1;
        *core = BreakerCore {
            generation,
            ..BreakerCore::default()
        };
        drop(core);
        info!(circuit = %self.name, "Circuit breaker reset");
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }

    /// Execute an async operation through the circuit breaker.
    ///
    /// Every error counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_filtered(f, |_| true).await
    }

    /// Execute through the breaker, counting only errors for which
    /// `is_failure` returns true. Other errors are passed through and
    /// treated as a healthy response from the dependency.
    pub async fn call_filtered<F, Fut, T, E, P>(&self, f: F, is_failure: P) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let Some(admission) = self.admit() else {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            debug!(circuit = %self.name, "Circuit breaker rejected call (open)");
            crate::metrics::record_circuit_call(&self.name, "rejected");
            return Err(CircuitError::Rejected);
        };
        let guard = AdmissionGuard {
            breaker: self,
            admission,
            settled: false,
        };

        match f().await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                guard.success();
                crate::metrics::record_circuit_call(&self.name, "success");
                Ok(result)
            }
            Err(e) => {
                if is_failure(&e) {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    guard.failure();
                    crate::metrics::record_circuit_call(&self.name, "failure");
                } else {
                    self.successes.fetch_add(1, Ordering::Relaxed);
                    guard.success();
                    crate::metrics::record_circuit_call(&self.name, "passthrough");
                }
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn admit(&self) -> Option<Admission> {
        let now = self.clock.now_ms();
        let mut core = self.core.lock();

        match core.state {
            CircuitState::Closed => Some(Admission::Pass),
            CircuitState::Open => {
                let cooled = core
                    .last_failure_at_ms
                    .map_or(true, |at| now.saturating_sub(at) >= self.config.recovery_timeout.as_millis() as u64);
                if !cooled {
                    return None;
                }
                self.transition(&mut core, CircuitState::HalfOpen);
                core.probes_in_flight = 1;
                Some(Admission::Probe { generation: core.generation })
            }
            CircuitState::HalfOpen => {
                if core.probes_in_flight >= self.config.success_threshold.max(1) {
                    return None;
                }
                core.probes_in_flight += 1;
                Some(Admission::Probe { generation: core.generation })
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => core.failure_count = 0,
            CircuitState::HalfOpen => {
                if let Admission::Probe { generation } = admission {
                    if generation != core.generation {
                        return;
                    }
                    core.probes_in_flight = core.probes_in_flight.saturating_sub(1);
                }
                core.success_count += 1;
                if core.success_count >= self.config.success_threshold {
                    self.transition(&mut core, CircuitState::Closed);
                }
            }
            // A call admitted before the breaker opened; the open window stands.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, admission: Admission) {
        let now = self.clock.now_ms();
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => {
                core.failure_count += 1;
                if core.failure_count >= self.config.failure_threshold {
                    core.last_failure_at_ms = Some(now);
                    self.transition(&mut core, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                if let Admission::Probe { generation } = admission {
                    if generation != core.generation {
                        return;
                    }
                }
                core.failure_count += 1;
                core.last_failure_at_ms = Some(now);
                self.transition(&mut core, CircuitState::Open);
            }
            CircuitState::Open => core.failure_count += 1,
        }
    }

    fn transition(&self, core: &mut BreakerCore, to: CircuitState) {
        let from = core.state;
        if from == to {
            return;
        }
        core.state = to;
        core.generation += 1;
        core.probes_in_flight = 0;
        if from == CircuitState::HalfOpen {
            core.success_count = 0;
        }
        if to == CircuitState::Closed {
            core.failure_count = 0;
        }

        match to {
            CircuitState::Open => warn!(
                circuit = %self.name,
                from = %from,
                failures = core.failure_count,
                "Circuit breaker opened"
            ),
            _ => info!(circuit = %self.name, from = %from, to = %to, "Circuit breaker transition"),
        }
        crate::metrics::set_circuit_state(&self.name, to as u8);
    }

    /// Get total number of calls
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }
}
