// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local disk store over SQLite.
//!
//! ```sql
//! CREATE TABLE kv_store (
//!     key TEXT PRIMARY KEY,
//!     value BLOB NOT NULL,
//!     updated_at INTEGER NOT NULL   -- Unix millis
//! );
//! ```
//!
//! Goes through the sqlx `Any` driver, so blobs are read back as `Vec<u8>`.

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{PersistentStore, StorageError};
use crate::clock::{Clock, SystemClock};
use crate::resilience::retry::{retry, RetryConfig};

static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqliteStore {
    pool: AnyPool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`.
    ///
    /// Connecting uses the startup retry preset, so a locked file gets a few
    /// attempts before failing.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        Self::connect(&format!("sqlite://{}?mode=rwc", path), 2).await
    }

    /// Private in-memory database. Single connection, since each SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        install_drivers();

        let pool = retry("sqlite_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to connect to kv store: {}", e)))
        })
        .await?;

        let store = Self { pool };
        store.enable_wal_mode().await?;
        store.init_schema().await?;

        info!(url, "SQLite kv store ready");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: AnyPool) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        // In-memory databases report "memory" and ignore the request
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        retry("sqlite_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
            )
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to create kv_store table: {}", e)))
        })
        .await?;

        Ok(())
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        retry("sqlite_get", &RetryConfig::query(), || async {
            let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            match row {
                Some(row) => {
                    let value: Vec<u8> = row
                        .try_get("value")
                        .map_err(|e| StorageError::Backend(format!("Failed to read value for '{}': {}", key, e)))?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let now = SystemClock.now_ms() as i64;

        retry("sqlite_set", &RetryConfig::query(), || async {
            sqlx::query(
                r#"
                INSERT INTO kv_store (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        debug!(key, bytes = value.len(), "kv value saved");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        retry("sqlite_remove", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM kv_store WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_roundtrip_and_upsert() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let store = SqliteStore::open(path.to_str().unwrap()).await.unwrap();

        assert!(store.get("missing").await.unwrap().is_none());

        store.set("cache", b"{\"a\":1}").await.unwrap();
        store.set("cache", b"{\"a\":2}").await.unwrap();
        assert_eq!(store.get("cache").await.unwrap().unwrap(), b"{\"a\":2}".to_vec());

        store.remove("cache").await.unwrap();
        assert!(store.get("cache").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::open(path).await.unwrap();
            store.set("queue", &[1, 2, 3]).await.unwrap();
            store.pool().close().await;
        }

        let reopened = SqliteStore::open(path).await.unwrap();
        assert_eq!(reopened.get("queue").await.unwrap(), Some(vec![1, 2, 3]));
    }
}
