//! Cache storage trait and SQLite implementation.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Errors from a cache storage backend.
///
/// These never reach service callers: the [`LocalCache`](super::LocalCache)
/// wrapper logs them and degrades to safe defaults.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("storage I/O error: {0}")]
  Io(String),
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("storage lock poisoned")]
  Poisoned,
}

/// Trait for durable key-value storage of JSON blobs.
///
/// A `put` fully replaces any prior value under the key. There is no
/// cross-call transaction: concurrent writers to one key race and the last
/// write wins.
pub trait CacheStorage: Send + Sync {
  /// Persist `value` under `key`, replacing any prior value.
  fn put(&self, key: &str, value: &Value) -> Result<(), StorageError>;

  /// Fetch the value stored under `key`, or None if absent.
  fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

  /// Delete the entry under `key`; absent keys are not an error.
  fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// SQLite-based persistent storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the key-value cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStorage {
  /// Open or create the cache database at the default location.
  pub fn open() -> Result<Self, StorageError> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open or create the cache database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| StorageError::Io(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path)?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// In-memory database, used by tests and ephemeral sessions.
  pub fn open_in_memory() -> Result<Self, StorageError> {
    let storage = Self {
      conn: Mutex::new(Connection::open_in_memory()?),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Default database path under the platform data directory.
  fn default_path() -> Result<std::path::PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StorageError::Io("could not determine data directory".into()))?;

    Ok(data_dir.join("centime").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }
}

impl CacheStorage for SqliteStorage {
  fn put(&self, key: &str, value: &Value) -> Result<(), StorageError> {
    let data = serde_json::to_vec(value)?;
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_cache (key, data, updated_at) VALUES (?, ?, datetime('now'))",
      params![key, data],
    )?;
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM kv_cache WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn.execute("DELETE FROM kv_cache WHERE key = ?", params![key])?;
    Ok(())
  }
}

/// In-memory storage backend for tests and cache-less sessions.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn put(&self, key: &str, value: &Value) -> Result<(), StorageError> {
    let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    entries.insert(key.to_string(), value.clone());
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
    let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(entries.get(key).cloned())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
    entries.remove(key);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn sqlite_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    let storage = SqliteStorage::open_at(&path).unwrap();
    let value = json!({"amount": "12.50", "category": "Transport"});

    storage.put("user_transactions_u1", &value).unwrap();
    assert_eq!(
      storage.get("user_transactions_u1").unwrap(),
      Some(value.clone())
    );

    // Survives a reopen
    drop(storage);
    let storage = SqliteStorage::open_at(&path).unwrap();
    assert_eq!(storage.get("user_transactions_u1").unwrap(), Some(value));
  }

  #[test]
  fn put_replaces_prior_value() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("k", &json!([1, 2])).unwrap();
    storage.put("k", &json!([3])).unwrap();
    assert_eq!(storage.get("k").unwrap(), Some(json!([3])));
  }

  #[test]
  fn remove_is_idempotent() {
    let storage = MemoryStorage::new();
    storage.put("k", &json!(42)).unwrap();
    storage.remove("k").unwrap();
    storage.remove("k").unwrap();
    assert_eq!(storage.get("k").unwrap(), None);
  }
}
