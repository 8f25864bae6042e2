// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the resilience layer.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `client_resilience_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size gauges
//!
//! # Labels
//! - `operation`: name passed to the retry executor
//! - `circuit`: breaker name
//! - `strategy`: cache_first, network_first, stale_while_revalidate, network_only
//! - `outcome`: success, failure, rejected, hit, miss, stale, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record one retry (not counting the first attempt)
pub fn record_retry(operation: &str) {
    counter!(
        "client_resilience_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a call through a circuit breaker
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "client_resilience_circuit_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set circuit breaker state (0=closed, 1=half-open, 2=open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "client_resilience_circuit_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record a cache lookup made by a strategy
pub fn record_cache_lookup(strategy: &str, outcome: &str) {
    counter!(
        "client_resilience_cache_lookups_total",
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set current cache size in bytes
pub fn set_cache_bytes(bytes: usize) {
    gauge!("client_resilience_cache_bytes").set(bytes as f64);
}

/// Set current cache entry count
pub fn set_cache_entries(count: usize) {
    gauge!("client_resilience_cache_entries").set(count as f64);
}

/// Record cache evictions by partition (synchronized, pending, expired)
pub fn record_eviction(partition: &str, count: usize) {
    counter!(
        "client_resilience_cache_evictions_total",
        "partition" => partition.to_string()
    )
    .increment(count as u64);
}

/// Record a background revalidation outcome
pub fn record_revalidation(outcome: &str) {
    counter!(
        "client_resilience_revalidations_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set number of queued mutations
pub fn set_pending_mutations(count: usize) {
    gauge!("client_resilience_pending_mutations").set(count as f64);
}

/// Record a snapshot write that failed and was deferred (cache, queue)
pub fn record_persist_failure(component: &str) {
    counter!(
        "client_resilience_persist_failures_total",
        "component" => component.to_string()
    )
    .increment(1);
}

/// Record a replayed mutation outcome (synced, failed, rejected)
pub fn record_replay(outcome: &str) {
    counter!(
        "client_resilience_replays_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a finished drain
pub fn record_drain(outcome: &str, duration: Duration) {
    counter!(
        "client_resilience_drains_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("client_resilience_drain_seconds").record(duration.as_secs_f64());
}

/// Record a mutation submitted by the host
pub fn record_submit(outcome: &str) {
    counter!(
        "client_resilience_submits_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record request latency through a strategy
pub fn record_latency(strategy: &str, duration: Duration) {
    histogram!(
        "client_resilience_request_seconds",
        "strategy" => strategy.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set connectivity (1=online, 0=offline)
pub fn set_online(online: bool) {
    gauge!("client_resilience_online").set(if online { 1.0 } else { 0.0 });
}

/// RAII timer that records request latency on drop
pub struct LatencyTimer {
    strategy: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(strategy: &'static str) -> Self {
        Self {
            strategy,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.strategy, self.start.elapsed());
    }
}
