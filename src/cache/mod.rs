// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local object cache.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Cache Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  entry.rs    - CacheEntry, TTL expiry, eviction rank         │
//! │  stats.rs    - CacheStatistics derived from the entry set    │
//! │  bounded.rs  - BoundedCache: capacity, eviction, snapshots   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod bounded;
pub mod entry;
pub mod stats;

pub use bounded::{BoundedCache, CacheConfig, CacheError};
pub use entry::{CacheEntry, CachedValue};
pub use stats::CacheStatistics;
