// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};

/// One cached value.
///
/// Entries are replaced, never mutated in place, except for the
/// `synchronized` flag flipped by `mark_synchronized`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub stored_at_ms: u64,
    pub ttl_ms: u64,
    /// False while the value exists only locally (not yet flushed upstream).
    pub synchronized: bool,
    /// Serialized value length plus key length.
    pub size_bytes: usize,
    /// Insertion sequence, used for oldest-first eviction.
    pub seq: u64,
}

impl CacheEntry {
    pub(crate) fn new(
        key: String,
        value: serde_json::Value,
        encoded_len: usize,
        stored_at_ms: u64,
        ttl_ms: u64,
        synchronized: bool,
        seq: u64,
    ) -> Self {
        let size_bytes = encoded_len + key.len();
        Self {
            key,
            value,
            stored_at_ms,
            ttl_ms,
            synchronized,
            size_bytes,
            seq,
        }
    }

    /// Expired once strictly more than `ttl_ms` has elapsed since storing.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.stored_at_ms) > self.ttl_ms
    }

    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.stored_at_ms)
    }

    /// Eviction order: synchronized before pending, then oldest first.
    pub(crate) fn eviction_rank(&self) -> (bool, u64) {
        (!self.synchronized, self.seq)
    }
}

/// Entry returned by `lookup`, with its freshness at lookup time.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub entry: CacheEntry,
    pub fresh: bool,
}
