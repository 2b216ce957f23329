//! Infallible cache facade and list helpers.
//!
//! Wraps a [`CacheStorage`] backend behind an API that never fails the
//! caller: storage errors are logged and reads degrade to safe defaults.
//! Every entity's local cache is one flat JSON array under a single key,
//! trading O(n) scans for simplicity — per-user volumes are hundreds of
//! records, not millions.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use super::storage::CacheStorage;

/// Cache handle shared across services. Cloning shares the backend.
pub struct LocalCache<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> LocalCache<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Persist a value under `key`. Write failures are logged and swallowed;
  /// the cache is an availability layer, not the source of truth.
  pub fn save<T: Serialize>(&self, key: &str, value: &T) {
    let value = match serde_json::to_value(value) {
      Ok(v) => v,
      Err(e) => {
        warn!("failed to serialize cache entry {}: {}", key, e);
        return;
      }
    };
    if let Err(e) = self.storage.put(key, &value) {
      warn!("failed to write cache entry {}: {}", key, e);
    }
  }

  /// Load a value, or None when absent or undecodable.
  pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = match self.storage.get(key) {
      Ok(v) => v?,
      Err(e) => {
        warn!("failed to read cache entry {}: {}", key, e);
        return None;
      }
    };
    match serde_json::from_value(value) {
      Ok(v) => Some(v),
      Err(e) => {
        warn!("failed to decode cache entry {}: {}", key, e);
        None
      }
    }
  }

  /// Delete a key. Absent keys are not an error.
  pub fn remove(&self, key: &str) {
    if let Err(e) = self.storage.remove(key) {
      warn!("failed to remove cache entry {}: {}", key, e);
    }
  }

  /// Load the list under `key`, empty when absent or undecodable.
  pub fn load_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
    self.load(key).unwrap_or_default()
  }

  /// Prepend `item` to the list under `key` (newest-first ordering) and
  /// write it back. Returns the updated list.
  pub fn prepend<T: Serialize + DeserializeOwned + Clone>(&self, key: &str, item: &T) -> Vec<T> {
    let mut list = self.load_list::<T>(key);
    list.insert(0, item.clone());
    self.save(key, &list);
    list
  }

  /// Locate the entry whose id matches via `matches`, apply `mutate` to it
  /// and write the list back. Returns None when no entry matched — callers
  /// use this to detect id-mismatch races instead of a silent no-op.
  pub fn update_in_list<T, M, F>(&self, key: &str, matches: M, mutate: F) -> Option<Vec<T>>
  where
    T: Serialize + DeserializeOwned,
    M: Fn(&T) -> bool,
    F: FnOnce(&mut T),
  {
    let mut list = self.load_list::<T>(key);
    let slot = list.iter_mut().find(|item| matches(item))?;
    mutate(slot);
    self.save(key, &list);
    Some(list)
  }

  /// Remove entries matching `matches` and write the list back.
  pub fn remove_from_list<T, M>(&self, key: &str, matches: M) -> Vec<T>
  where
    T: Serialize + DeserializeOwned,
    M: Fn(&T) -> bool,
  {
    let mut list = self.load_list::<T>(key);
    list.retain(|item| !matches(item));
    self.save(key, &list);
    list
  }

  /// Replace the whole list under `key`.
  pub fn replace_list<T: Serialize>(&self, key: &str, items: &[T]) {
    self.save(key, &items)
  }

  /// Raw JSON view of a cached list, used by the outbox to patch records
  /// without knowing their concrete type.
  pub fn load_raw_list(&self, key: &str) -> Vec<Value> {
    self.load_list(key)
  }
}

impl<S: CacheStorage> Clone for LocalCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
