// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic client-resilience usage example.
//!
//! Demonstrates, against an in-process simulated remote:
//! 1. Opening a client over a SQLite file store
//! 2. Network-first reads, then cache fallback when the remote drops
//! 3. Writes queued while offline
//! 4. Replay on reconnect, with sync events
//! 5. The circuit breaker fast-failing a dead remote
//! 6. Displaying metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use async_trait::async_trait;
use client_resilience::{
    ClientError, ManualConnectivity, MutationRequest, Priority, Request, ResilienceConfig, ResilientClient,
    Response, SqliteStore, SubmitOutcome, SyncEvent, Transport,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A tiny item API that can be switched off.
struct SimulatedRemote {
    up: AtomicBool,
    items: Mutex<BTreeMap<u64, Value>>,
    next_id: AtomicU64,
}

impl SimulatedRemote {
    fn new() -> Self {
        let mut items = BTreeMap::new();
        items.insert(1, json!({"id": 1, "title": "Burst pipe, level 2"}));
        Self {
            up: AtomicBool::new(true),
            items: Mutex::new(items),
            next_id: AtomicU64::new(2),
        }
    }
}

#[async_trait]
impl Transport for SimulatedRemote {
    async fn fetch(&self, request: &Request) -> Result<Response, ClientError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(ClientError::TransientNetwork("connection refused".into()));
        }

        match (request.method.as_str(), request.url.as_str()) {
            ("GET", "/api/incidents") => {
                let items: Vec<Value> = self.items.lock().values().cloned().collect();
                Ok(Response::ok_json(&json!(items)))
            }
            ("POST", "/api/incidents") => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let mut body = request.body.clone().unwrap_or(Value::Null);
                body["id"] = json!(id);
                self.items.lock().insert(id, body.clone());
                Ok(Response::new(201, body.to_string()))
            }
            _ => Ok(Response::new(404, "not found")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "client_resilience=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║         client-resilience: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and open the client
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Opening client...");

    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("client.db");
    let store = Arc::new(SqliteStore::open(&db_path.to_string_lossy()).await?);

    let config = ResilienceConfig {
        // Fast backoff for the demo
        max_retries: 1,
        initial_delay_ms: 20,
        max_delay_ms: 100,
        request_timeout_ms: 2_000,
        circuit_threshold: 3,
        circuit_timeout_ms: 1_000,
        auto_sync_interval_ms: 60_000,
        ..Default::default()
    };

    let remote = Arc::new(SimulatedRemote::new());
    let connectivity = Arc::new(ManualConnectivity::default());
    let client = ResilientClient::open(config, remote.clone(), store, connectivity.clone()).await?;

    let _events = client.subscribe(|event| match event {
        SyncEvent::MutationSynced { id } => println!("   └─ 📤 synced {id}"),
        SyncEvent::MutationRejected { id, error } => println!("   └─ ⛔ rejected {id}: {error}"),
        SyncEvent::FullySynchronized => println!("   └─ ✅ fully synchronized"),
        _ => {}
    });

    client.start();
    println!("   State: {}", client.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Reads: network-first with cache fallback
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Reading /api/incidents (network-first)...");
    let fetched = client.fetch(&Request::get("/api/incidents")).await?;
    println!("   └─ {} from {:?}: {}", fetched.response.status, fetched.source, fetched.response.body);

    println!("\n🔌 Remote goes down, reading again...");
    remote.up.store(false, Ordering::SeqCst);
    let fetched = client.fetch(&Request::get("/api/incidents")).await?;
    println!("   └─ {} from {:?} (degraded, no error surfaced)", fetched.response.status, fetched.source);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Writes while offline are queued
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Device goes offline, submitting writes...");
    connectivity.go_offline();

    for (title, priority) in [
        ("Generator fault", Priority::Low),
        ("Gas leak, block C", Priority::High),
        ("Broken window", Priority::Medium),
    ] {
        let request = MutationRequest::create("/api/incidents", json!({"title": title})).with_priority(priority);
        if let SubmitOutcome::Queued(m) = client.submit(request).await? {
            println!("   └─ queued {} ({:?}) {}", m.id, m.priority, title);
        }
    }
    println!("   Pending: {}", client.pending_count());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Reconnect: queue drains in priority order
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔄 Back online, draining...");
    remote.up.store(true, Ordering::SeqCst);
    client.breaker().reset();
    let mut snapshots = client.watch_snapshot();
    connectivity.go_online();
    snapshots.wait_for(|s| s.is_settled()).await?;
    println!("   Pending: {}", client.pending_count());

    let fetched = client.fetch(&Request::get("/api/incidents")).await?;
    println!("   └─ server now has: {}", fetched.response.body);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Circuit breaker
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⚡ Remote dies while we think we're online...");
    remote.up.store(false, Ordering::SeqCst);
    for i in 1..=4 {
        let outcome = client.submit(MutationRequest::create("/api/incidents", json!({"n": i}))).await?;
        println!(
            "   └─ submit #{i}: {} (circuit {})",
            if outcome.is_queued() { "queued" } else { "sent" },
            client.circuit_state()
        );
    }
    let snapshot = client.breaker().snapshot();
    println!("   Breaker: {:?}", snapshot);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Stats and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let stats = client.cache_stats();
    println!("\n📊 Cache:");
    println!("   └─ Entries: {} ({} pending)", stats.total_entries, stats.pending_count);
    println!("   └─ Size: {} / {} bytes ({:.3}%)", stats.size_bytes, stats.capacity_bytes, stats.usage_percent);
    println!("\n📡 Status: {:?}", *client.watch_status().borrow());

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    client.shutdown().await;
    println!(
        "   ✅ Shutdown complete! State: {} ({} mutations persisted for next run)",
        client.state(),
        client.pending_count()
    );

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    histograms.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }

    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }

    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, labels, count, sum) in &histograms {
            println!("      └─ {}{} count={} sum={:.4}", name, labels, count, sum);
        }
    }

    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
