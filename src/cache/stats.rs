// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::Serialize;

use super::entry::CacheEntry;

/// Usage figures derived from the live entry set. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub pending_count: usize,
    pub synchronized_count: usize,
    pub size_bytes: usize,
    pub capacity_bytes: usize,
    /// `size_bytes / capacity_bytes * 100`
    pub usage_percent: f64,
}

impl CacheStatistics {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CacheEntry>, capacity_bytes: usize) -> Self {
        let mut stats = Self {
            total_entries: 0,
            pending_count: 0,
            synchronized_count: 0,
            size_bytes: 0,
            capacity_bytes,
            usage_percent: 0.0,
        };

        for entry in entries {
            stats.total_entries += 1;
            stats.size_bytes += entry.size_bytes;
            if entry.synchronized {
                stats.synchronized_count += 1;
            } else {
                stats.pending_count += 1;
            }
        }

        if capacity_bytes > 0 {
            stats.usage_percent = stats.size_bytes as f64 / capacity_bytes as f64 * 100.0;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stats_partition_and_usage() {
        let entries = vec![
            CacheEntry::new("a".into(), json!(1), 9, 0, 0, true, 0),
            CacheEntry::new("b".into(), json!(2), 9, 0, 0, false, 1),
            CacheEntry::new("c".into(), json!(3), 9, 0, 0, false, 2),
        ];

        let stats = CacheStatistics::from_entries(&entries, 60);

        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.synchronized_count, 1);
        assert_eq!(stats.pending_count, 2);
        assert_eq!(stats.size_bytes, 30);
        assert!((stats.usage_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_stats() {
        let stats = CacheStatistics::from_entries(std::iter::empty(), 0);
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.usage_percent, 0.0);
    }
}
