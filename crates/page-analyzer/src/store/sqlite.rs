//! Durable tier backed by SQLite.

use super::{DurableTier, StoreError};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Key-value table in a single SQLite file. Values are stored as JSON text.
pub struct SqliteTier {
    db: Arc<Mutex<Connection>>,
}

impl SqliteTier {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)?;
        Self::init(db)
    }

    /// Open the default database at ~/.page-analyzer/results.db.
    pub fn default_store() -> Result<Self, StoreError> {
        Self::open(&default_path())
    }

    /// An in-memory database, gone when the tier is dropped.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, StoreError> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await?
    }
}

/// Default database location.
pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".page-analyzer")
        .join("results.db")
}

#[async_trait]
impl DurableTier for SqliteTier {
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;
        self.with_db(move |db| {
            db.execute(
                "INSERT OR REPLACE INTO entries (key, value, updated_at)
                 VALUES (?1, ?2, CURRENT_TIMESTAMP)",
                rusqlite::params![key, text],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let key = key.to_string();
        self.with_db(move |db| {
            let text: Option<String> = db
                .query_row(
                    "SELECT value FROM entries WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get(0),
                )
                .optional()?;
            match text {
                Some(text) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let prefix = prefix.to_string();
        self.with_db(move |db| {
            let mut stmt = db.prepare(
                "SELECT key, value FROM entries
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![prefix], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut entries = Vec::with_capacity(rows.len());
            for (key, text) in rows {
                match serde_json::from_str(&text) {
                    Ok(value) => entries.push((key, value)),
                    Err(e) => debug!(key = %key, error = %e, "skipping unparsable row"),
                }
            }
            Ok(entries)
        })
        .await
    }
}
