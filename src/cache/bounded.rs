// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capacity-bounded TTL cache with synchronized/pending partitioning.
//!
//! # Eviction
//!
//! When an insert would push `size_bytes` past `capacity_bytes`, entries
//! are evicted in this order until the bound holds again:
//!
//! 1. synchronized entries, oldest first
//! 2. pending entries, oldest first
//!
//! The entry being inserted is never a candidate. A single value larger
//! than the whole capacity is refused with [`CacheError::EntryTooLarge`].
//!
//! # Persistence
//!
//! With a backing [`PersistentStore`], every mutation writes a JSON snapshot
//! of the whole entry set under `store_key`. Snapshots are taken after the
//! persist lock is acquired, so a later writer always persists a state at
//! least as new as an earlier one. Writers queued behind the lock whose
//! change was already covered by that snapshot skip their own write.
//!
//! A failed snapshot write is logged and does not fail the change; the
//! next change (or [`BoundedCache::flush`]) writes the full state again.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::entry::{CacheEntry, CachedValue};
use super::stats::CacheStatistics;
use crate::clock::{Clock, SystemClock};
use crate::storage::traits::{PersistentStore, StorageError};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("entry '{key}' is {size} bytes, larger than cache capacity {capacity}")]
    EntryTooLarge { key: String, size: usize, capacity: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub capacity_bytes: usize,
    pub default_ttl: Duration,
    /// Key of the snapshot in the persistent store.
    pub store_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 50 * 1024 * 1024,
            default_ttl: Duration::from_secs(5 * 60),
            store_key: "client_resilience.cache".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct CacheSnapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

#[derive(Serialize)]
struct CacheSnapshotRef<'a> {
    version: u32,
    entries: Vec<&'a CacheEntry>,
}

#[derive(Default)]
struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
    size_bytes: usize,
    next_seq: u64,
    /// Bumped on every change.
    revision: u64,
}

impl CacheIndex {
    fn from_entries(entries: Vec<CacheEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.next_seq = index.next_seq.max(entry.seq + 1);
            index.size_bytes += entry.size_bytes;
            if let Some(old) = index.entries.insert(entry.key.clone(), entry) {
                index.size_bytes -= old.size_bytes;
            }
        }
        index
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.size_bytes -= removed.size_bytes;
        Some(removed)
    }

    /// Evict until `size_bytes <= capacity`, sparing `keep`.
    /// Returns (synchronized, pending) eviction counts.
    fn evict_to(&mut self, capacity: usize, keep: &str) -> (usize, usize) {
        if self.size_bytes <= capacity {
            return (0, 0);
        }

        let mut candidates: Vec<(bool, u64, String)> = self
            .entries
            .values()
            .filter(|e| e.key != keep)
            .map(|e| {
                let (pending, seq) = e.eviction_rank();
                (pending, seq, e.key.clone())
            })
            .collect();
        candidates.sort_unstable();

        let mut evicted = (0, 0);
        for (pending, _, key) in candidates {
            if self.size_bytes <= capacity {
                break;
            }
            if self.remove(&key).is_some() {
                if pending {
                    evicted.1 += 1;
                } else {
                    evicted.0 += 1;
                }
            }
        }
        evicted
    }
}

/// Bounded key/value cache. One instance owns its store key.
pub struct BoundedCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn PersistentStore>>,
    index: RwLock<CacheIndex>,
    /// Revision last written to the store.
    persisted: tokio::sync::Mutex<u64>,
}

impl BoundedCache {
    /// Memory-only cache.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            store: None,
            index: RwLock::new(CacheIndex::default()),
            persisted: tokio::sync::Mutex::new(0),
        }
    }

    /// Cache backed by `store`, loading any previous snapshot.
    ///
    /// A snapshot that fails to decode is discarded with a warning.
    pub async fn open(
        config: CacheConfig,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let index = match store.get(&config.store_key).await? {
            Some(bytes) => match serde_json::from_slice::<CacheSnapshot>(&bytes) {
                Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => CacheIndex::from_entries(snapshot.entries),
                Ok(snapshot) => {
                    warn!(
                        key = %config.store_key,
                        version = snapshot.version,
                        "Unknown cache snapshot version, starting empty"
                    );
                    CacheIndex::default()
                }
                Err(e) => {
                    warn!(key = %config.store_key, error = %e, "Corrupt cache snapshot, starting empty");
                    CacheIndex::default()
                }
            },
            None => CacheIndex::default(),
        };

        debug!(
            key = %config.store_key,
            backend = store.backend_name(),
            entries = index.entries.len(),
            bytes = index.size_bytes,
            "Cache loaded"
        );

        let cache = Self {
            config,
            clock,
            store: Some(store),
            index: RwLock::new(index),
            persisted: tokio::sync::Mutex::new(0),
        };
        cache.publish_gauges();
        Ok(cache)
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store a value that already matches upstream.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.insert(key, value, ttl, true).await
    }

    /// Store a locally-authored value not yet flushed upstream.
    pub async fn set_pending<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.insert(key, value, ttl, false).await
    }

    async fn insert<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        synchronized: bool,
    ) -> Result<(), CacheError> {
        let encoded = serde_json::to_vec(value)?;
        let value: serde_json::Value = serde_json::from_slice(&encoded)?;
        let size = encoded.len() + key.len();
        let capacity = self.config.capacity_bytes;
        if size > capacity {
            return Err(CacheError::EntryTooLarge {
                key: key.to_string(),
                size,
                capacity,
            });
        }

        let ttl_ms = ttl.unwrap_or(self.config.default_ttl).as_millis() as u64;
        let now = self.clock.now_ms();

        let (evicted_sync, evicted_pending) = {
            let mut index = self.index.write();
            let seq = index.next_seq;
            index.next_seq += 1;

            let entry = CacheEntry::new(key.to_string(), value, encoded.len(), now, ttl_ms, synchronized, seq);
            index.remove(key);
            index.size_bytes += entry.size_bytes;
            index.entries.insert(key.to_string(), entry);
            index.revision += 1;

            index.evict_to(capacity, key)
        };

        if evicted_sync + evicted_pending > 0 {
            debug!(
                key,
                synchronized = evicted_sync,
                pending = evicted_pending,
                "Evicted cache entries to stay within capacity"
            );
            crate::metrics::record_eviction("synchronized", evicted_sync);
            crate::metrics::record_eviction("pending", evicted_pending);
        }

        self.persist().await;
        Ok(())
    }

    /// Fresh value for `key`, decoded as `T`. Expired entries read as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let now = self.clock.now_ms();
        let value = {
            let index = self.index.read();
            match index.entries.get(key) {
                Some(entry) if !entry.is_expired(now) => entry.value.clone(),
                _ => return Ok(None),
            }
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Entry for `key` regardless of expiry, with its freshness.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<CachedValue> {
        let now = self.clock.now_ms();
        let index = self.index.read();
        index.entries.get(key).map(|entry| CachedValue {
            fresh: !entry.is_expired(now),
            entry: entry.clone(),
        })
    }

    #[must_use]
    pub fn contains_fresh(&self, key: &str) -> bool {
        self.lookup(key).is_some_and(|v| v.fresh)
    }

    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let removed = {
            let mut index = self.index.write();
            let removed = index.remove(key).is_some();
            if removed {
                index.revision += 1;
            }
            removed
        };
        if removed {
            self.persist().await;
        }
        Ok(removed)
    }

    /// Flip the given entries to synchronized. Returns how many changed.
    pub async fn mark_synchronized<S: AsRef<str>>(&self, keys: &[S]) -> Result<usize, CacheError> {
        let changed = {
            let mut index = self.index.write();
            let mut changed = 0;
            for key in keys {
                if let Some(entry) = index.entries.get_mut(key.as_ref()) {
                    if !entry.synchronized {
                        entry.synchronized = true;
                        changed += 1;
                    }
                }
            }
            if changed > 0 {
                index.revision += 1;
            }
            changed
        };
        if changed > 0 {
            self.persist().await;
        }
        Ok(changed)
    }

    /// Drop every synchronized entry, keeping pending ones.
    pub async fn clear_synchronized(&self) -> Result<usize, CacheError> {
        self.remove_where(|entry, _| entry.synchronized).await
    }

    /// Drop expired synchronized entries. Pending entries are kept even when
    /// expired, since they hold data not yet flushed upstream.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let purged = self.remove_where(|entry, now| entry.synchronized && entry.is_expired(now)).await?;
        if purged > 0 {
            crate::metrics::record_eviction("expired", purged);
        }
        Ok(purged)
    }

    pub async fn clear_all(&self) -> Result<usize, CacheError> {
        self.remove_where(|_, _| true).await
    }

    async fn remove_where<P>(&self, predicate: P) -> Result<usize, CacheError>
    where
        P: Fn(&CacheEntry, u64) -> bool,
    {
        let now = self.clock.now_ms();
        let removed = {
            let mut index = self.index.write();
            let doomed: Vec<String> = index
                .entries
                .values()
                .filter(|e| predicate(e, now))
                .map(|e| e.key.clone())
                .collect();
            for key in &doomed {
                index.remove(key);
            }
            if !doomed.is_empty() {
                index.revision += 1;
            }
            doomed.len()
        };
        if removed > 0 {
            self.persist().await;
        }
        Ok(removed)
    }

    /// Statistics recomputed from the current entry set.
    #[must_use]
    pub fn stats(&self) -> CacheStatistics {
        let index = self.index.read();
        CacheStatistics::from_entries(index.entries.values(), self.config.capacity_bytes)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish_gauges(&self) {
        let index = self.index.read();
        crate::metrics::set_cache_bytes(index.size_bytes);
        crate::metrics::set_cache_entries(index.entries.len());
    }

    /// Write the current entry set if it changed since the last successful
    /// write, reporting the storage error to the caller.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.write_snapshot().await
    }

    /// True when the store holds the current entry set.
    pub async fn is_persisted(&self) -> bool {
        self.store.is_none() || *self.persisted.lock().await == self.index.read().revision
    }

    async fn persist(&self) {
        self.publish_gauges();
        if let Err(e) = self.write_snapshot().await {
            warn!(
                key = %self.config.store_key,
                error = %e,
                "Failed to persist cache snapshot, keeping in memory until the next write"
            );
            crate::metrics::record_persist_failure("cache");
        }
    }

    async fn write_snapshot(&self) -> Result<(), CacheError> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        // Held across the write so snapshots land in revision order
        let mut persisted = self.persisted.lock().await;
        let (bytes, revision) = {
            let index = self.index.read();
            if index.revision == *persisted {
                return Ok(());
            }
            let mut entries: Vec<&CacheEntry> = index.entries.values().collect();
            entries.sort_by_key(|e| e.seq);
            let bytes = serde_json::to_vec(&CacheSnapshotRef {
                version: SNAPSHOT_VERSION,
                entries,
            })?;
            (bytes, index.revision)
        };
        store.set(&self.config.store_key, &bytes).await?;
        *persisted = revision;
        Ok(())
    }
}
