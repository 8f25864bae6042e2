// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable queue of writes made while the remote was unreachable.
//!
//! Every change is written through to the [`PersistentStore`] before the
//! call returns, as one JSON snapshot under the queue's store key. A
//! mutation leaves the queue only through [`OfflineMutationQueue::remove`]
//! (confirmed replay), [`OfflineMutationQueue::discard`] or
//! [`OfflineMutationQueue::clear`].
//!
//! A failed snapshot write never fails the change that caused it: the
//! in-memory queue stays authoritative, the failure is logged, and the next
//! change (or [`OfflineMutationQueue::flush`]) writes the full state again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::mutation::{MutationRequest, QueuedMutation};
use crate::clock::{Clock, SystemClock};
use crate::storage::traits::{PersistentStore, StorageError};

const SNAPSHOT_VERSION: u32 = 1;

/// Error type for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Deserialize)]
struct QueueSnapshot {
    version: u32,
    next_seq: u64,
    mutations: Vec<QueuedMutation>,
}

#[derive(Serialize)]
struct QueueSnapshotRef<'a> {
    version: u32,
    next_seq: u64,
    mutations: &'a [QueuedMutation],
}

#[derive(Default)]
struct QueueState {
    /// Kept in enqueue order.
    mutations: Vec<QueuedMutation>,
    next_seq: u64,
    /// Bumped on every change.
    revision: u64,
}

impl QueueState {
    fn touch(&mut self) {
        self.revision += 1;
    }
}

pub struct OfflineMutationQueue {
    store_key: String,
    store: Option<Arc<dyn PersistentStore>>,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    /// Revision last written to the store.
    persisted: tokio::sync::Mutex<u64>,
}

impl OfflineMutationQueue {
    /// Memory-only queue.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store_key: String::new(),
            store: None,
            clock,
            state: Mutex::new(QueueState::default()),
            persisted: tokio::sync::Mutex::new(0),
        }
    }

    /// Queue persisted under `store_key`, loading what a previous run left.
    ///
    /// A snapshot that fails to decode is logged and replaced with an empty
    /// queue.
    pub async fn open(
        store_key: impl Into<String>,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> QueueResult<Self> {
        let store_key = store_key.into();

        let state = match store.get(&store_key).await? {
            Some(bytes) => match serde_json::from_slice::<QueueSnapshot>(&bytes) {
                Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
                    let max_seq = snapshot.mutations.iter().map(|m| m.seq + 1).max().unwrap_or(0);
                    QueueState {
                        next_seq: snapshot.next_seq.max(max_seq),
                        mutations: snapshot.mutations,
                        revision: 0,
                    }
                }
                Ok(snapshot) => {
                    warn!(key = %store_key, version = snapshot.version, "Unknown queue snapshot version, starting empty");
                    QueueState::default()
                }
                Err(e) => {
                    warn!(key = %store_key, error = %e, "Corrupt queue snapshot, starting empty");
                    QueueState::default()
                }
            },
            None => QueueState::default(),
        };

        if !state.mutations.is_empty() {
            info!(key = %store_key, pending = state.mutations.len(), "Loaded queued mutations");
        }
        crate::metrics::set_pending_mutations(state.mutations.len());

        Ok(Self {
            store_key,
            store: Some(store),
            clock,
            state: Mutex::new(state),
            persisted: tokio::sync::Mutex::new(0),
        })
    }

    /// Add a mutation. Assigns id, timestamp and a zero retry count.
    pub async fn enqueue(&self, request: MutationRequest) -> QueueResult<QueuedMutation> {
        let now = self.clock.now_ms();
        let queued = {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            let queued = QueuedMutation::new(request, now, seq);
            state.mutations.push(queued.clone());
            state.touch();
            queued
        };

        debug!(
            id = %queued.id,
            kind = queued.op.kind(),
            endpoint = %queued.endpoint,
            priority = ?queued.priority,
            "Mutation queued"
        );
        self.persist().await;
        Ok(queued)
    }

    /// Number of mutations held, rejected ones included.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().mutations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    /// All mutations in replay order.
    #[must_use]
    pub fn pending(&self) -> Vec<QueuedMutation> {
        let mut all = self.state.lock().mutations.clone();
        all.sort_by_key(QueuedMutation::replay_key);
        all
    }

    /// Mutations a drain should attempt, in replay order.
    #[must_use]
    pub fn replayable(&self) -> Vec<QueuedMutation> {
        let mut ready: Vec<QueuedMutation> =
            self.state.lock().mutations.iter().filter(|m| !m.rejected).cloned().collect();
        ready.sort_by_key(QueuedMutation::replay_key);
        ready
    }

    #[must_use]
    pub fn replayable_count(&self) -> usize {
        self.state.lock().mutations.iter().filter(|m| !m.rejected).count()
    }

    #[must_use]
    pub fn rejected(&self) -> Vec<QueuedMutation> {
        let mut rejected: Vec<QueuedMutation> =
            self.state.lock().mutations.iter().filter(|m| m.rejected).cloned().collect();
        rejected.sort_by_key(QueuedMutation::replay_key);
        rejected
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<QueuedMutation> {
        self.state.lock().mutations.iter().find(|m| m.id == id).cloned()
    }

    /// Drop a mutation after a confirmed replay.
    pub async fn remove(&self, id: Uuid) -> QueueResult<bool> {
        let removed = {
            let mut state = self.state.lock();
            let before = state.mutations.len();
            state.mutations.retain(|m| m.id != id);
            let removed = state.mutations.len() != before;
            if removed {
                state.touch();
            }
            removed
        };
        if removed {
            self.persist().await;
        }
        Ok(removed)
    }

    /// Count a failed replay. Returns the new retry count.
    pub async fn record_failure(&self, id: Uuid, error: &str) -> QueueResult<Option<u32>> {
        let retry_count = self.update(id, |m| {
            m.retry_count = m.retry_count.saturating_add(1);
            m.last_error = Some(error.to_string());
            m.retry_count
        });
        if retry_count.is_some() {
            self.persist().await;
        }
        Ok(retry_count)
    }

    /// Mark a mutation as permanently refused. Returns true if it was not
    /// already rejected.
    pub async fn mark_rejected(&self, id: Uuid, error: &str) -> QueueResult<bool> {
        let newly = self.update(id, |m| {
            let newly = !m.rejected;
            m.rejected = true;
            m.last_error = Some(error.to_string());
            newly
        });
        if newly.is_some() {
            self.persist().await;
        }
        Ok(newly.unwrap_or(false))
    }

    /// Put every rejected mutation back in line for the next drain.
    pub async fn requeue_rejected(&self) -> QueueResult<usize> {
        let count = {
            let mut state = self.state.lock();
            let mut count = 0;
            for m in state.mutations.iter_mut().filter(|m| m.rejected) {
                m.rejected = false;
                count += 1;
            }
            if count > 0 {
                state.touch();
            }
            count
        };
        if count > 0 {
            info!(count, "Requeued rejected mutations");
            self.persist().await;
        }
        Ok(count)
    }

    /// Give up on a mutation without replaying it.
    pub async fn discard(&self, id: Uuid) -> QueueResult<bool> {
        let removed = self.remove(id).await?;
        if removed {
            info!(%id, "Discarded queued mutation");
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> QueueResult<usize> {
        let count = {
            let mut state = self.state.lock();
            let count = state.mutations.len();
            state.mutations.clear();
            state.touch();
            count
        };
        if count > 0 {
            self.persist().await;
        }
        Ok(count)
    }

    fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut QueuedMutation) -> R) -> Option<R> {
        let mut state = self.state.lock();
        let result = state.mutations.iter_mut().find(|m| m.id == id).map(f);
        if result.is_some() {
            state.touch();
        }
        result
    }

    /// Write the current state to the store if it has changed since the
    /// last successful write. Unlike ordinary changes, this reports the
    /// storage error to the caller.
    pub async fn flush(&self) -> QueueResult<()> {
        self.write_snapshot().await
    }

    /// True when the store holds the current state.
    pub async fn is_persisted(&self) -> bool {
        self.store.is_none() || *self.persisted.lock().await == self.state.lock().revision
    }

    async fn persist(&self) {
        if let Err(e) = self.write_snapshot().await {
            warn!(
                key = %self.store_key,
                pending = self.pending_count(),
                error = %e,
                "Failed to persist queue snapshot, keeping in memory until the next write"
            );
            crate::metrics::record_persist_failure("queue");
        }
    }

    async fn write_snapshot(&self) -> QueueResult<()> {
        let Some(store) = &self.store else {
            crate::metrics::set_pending_mutations(self.pending_count());
            return Ok(());
        };

        // Held across the write so snapshots land in revision order
        let mut persisted = self.persisted.lock().await;
        let (bytes, count, revision) = {
            let state = self.state.lock();
            if state.revision == *persisted {
                return Ok(());
            }
            let bytes = serde_json::to_vec(&QueueSnapshotRef {
                version: SNAPSHOT_VERSION,
                next_seq: state.next_seq,
                mutations: &state.mutations,
            })?;
            (bytes, state.mutations.len(), state.revision)
        };
        store.set(&self.store_key, &bytes).await?;
        *persisted = revision;
        crate::metrics::set_pending_mutations(count);
        Ok(())
    }
}

impl Default for OfflineMutationQueue {
    fn default() -> Self {
        Self::new()
    }
}
