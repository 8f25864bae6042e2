// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync state published to the host.
//!
//! Two views are kept current through `watch` channels: [`SyncSnapshot`]
//! (what the drain is doing) and [`SyncStatus`] (where the last data came
//! from). Discrete [`SyncEvent`]s go through the subscriber list.

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::ClientError;

/// Drain progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSnapshot {
    pub syncing: bool,
    pub pending_count: usize,
}

impl SyncSnapshot {
    /// Nothing left to send and no drain running.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.syncing && self.pending_count == 0
    }
}

/// Connectivity and provenance of the most recent fetch or sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_from_cache: bool,
    pub last_sync_at_ms: Option<u64>,
    /// Consecutive drains that ended with replayable work left.
    pub retry_count: u32,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_online: true,
            is_from_cache: false,
            last_sync_at_ms: None,
            retry_count: 0,
        }
    }
}

/// Where a fetched response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Network,
    /// Fresh cache entry.
    Cache,
    /// Expired cache entry served because the network could not answer.
    StaleCache,
    /// Synthetic offline response.
    Offline,
}

impl FetchSource {
    #[must_use]
    pub fn is_from_cache(self) -> bool {
        matches!(self, Self::Cache | Self::StaleCache)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cache => "cache",
            Self::StaleCache => "stale_cache",
            Self::Offline => "offline",
        }
    }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Mutations replayed this drain.
    pub attempted: usize,
    pub synced: usize,
    /// Replays that failed and stay queued for the next cycle.
    pub failed: usize,
    /// Replays permanently refused by the server.
    pub rejected: usize,
    /// Queue length after the drain, rejected mutations included.
    pub remaining: usize,
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Status(SyncSnapshot),
    MutationSynced { id: Uuid },
    MutationFailed { id: Uuid, error: ClientError, retry_count: u32 },
    MutationRejected { id: Uuid, error: ClientError },
    /// The queue went from non-empty to empty during a drain. Fired once
    /// per such drain.
    FullySynchronized,
    Finished(DrainReport),
}

/// Holds the watch senders for both status views.
pub struct StatusBoard {
    snapshot: watch::Sender<SyncSnapshot>,
    status: watch::Sender<SyncStatus>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(SyncSnapshot::default());
        let (status, _) = watch::channel(SyncStatus::default());
        Self { snapshot, status }
    }

    #[must_use]
    pub fn subscribe_snapshot(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.subscribe()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        *self.snapshot.borrow()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn publish_snapshot(&self, snapshot: SyncSnapshot) {
        self.snapshot.send_replace(snapshot);
    }

    /// Record where the last response came from.
    pub fn record_fetch(&self, source: FetchSource) {
        self.status.send_modify(|status| {
            status.is_from_cache = source.is_from_cache();
            match source {
                FetchSource::Network => status.is_online = true,
                FetchSource::Offline | FetchSource::StaleCache => status.is_online = false,
                FetchSource::Cache => {}
            }
        });
    }

    pub fn set_online(&self, online: bool) {
        self.status.send_if_modified(|status| {
            if status.is_online == online {
                return false;
            }
            status.is_online = online;
            true
        });
    }

    /// Record the end of a drain.
    pub fn record_drain(&self, finished_at_ms: u64, retry_count: u32) {
        self.status.send_modify(|status| {
            status.last_sync_at_ms = Some(finished_at_ms);
            status.retry_count = retry_count;
        });
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_provenance_updates_status() {
        let board = StatusBoard::new();
        let rx = board.subscribe_status();

        board.record_fetch(FetchSource::StaleCache);
        let status = *rx.borrow();
        assert!(status.is_from_cache);
        assert!(!status.is_online);

        board.record_fetch(FetchSource::Network);
        let status = *rx.borrow();
        assert!(!status.is_from_cache);
        assert!(status.is_online);

        // A fresh cache hit says nothing about connectivity
        board.set_online(false);
        board.record_fetch(FetchSource::Cache);
        assert!(!board.status().is_online);
        assert!(board.status().is_from_cache);
    }

    #[test]
    fn test_record_drain() {
        let board = StatusBoard::new();
        board.record_drain(42, 2);
        assert_eq!(board.status().last_sync_at_ms, Some(42));
        assert_eq!(board.status().retry_count, 2);
    }

    #[tokio::test]
    async fn test_snapshot_watch_sees_updates() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe_snapshot();

        board.publish_snapshot(SyncSnapshot { syncing: true, pending_count: 3 });
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SyncSnapshot { syncing: true, pending_count: 3 });
        assert!(!board.snapshot().is_settled());

        board.publish_snapshot(SyncSnapshot::default());
        assert!(board.snapshot().is_settled());
    }
}
