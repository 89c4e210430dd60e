//! Durable key-value store backing the script `storage` API
//!
//! One process-wide table shared by every extension. Keys are not namespaced;
//! extensions prefix their own keys.

use crate::core::config::StorageConfig;
use crate::core::error::Result;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

/// SQLite-backed string store with a connection pool
#[derive(Clone)]
pub struct KeyValueStore {
    pool: Pool<SqliteConnectionManager>,
}

impl KeyValueStore {
    pub fn open(db_path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open(
            &config.database_path(),
            config.pool_size,
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    /// Store backed by a private in-memory database
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();

        // In-memory databases are per connection, so the pool holds exactly one
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn migrate(&self) -> Result<()> {
        self.connection()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert or replace the value stored under `key`
    pub fn save(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.connection()?.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn load(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .connection()?
            .query_row("SELECT value FROM kv_store WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

}
