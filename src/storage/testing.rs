// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::memory::InMemoryStore;
use super::traits::{PersistentStore, StorageError};

/// In-memory store whose writes can be switched to fail.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: InMemoryStore,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistentStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".into()));
        }
        self.inner.set(key, value).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
