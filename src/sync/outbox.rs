//! Pending-operation queue for failed remote writes.
//!
//! When a remote write fails, the optimistic local state already stands;
//! the operation itself is queued here, persisted in the same key-value
//! store as the caches, and replayed FIFO when connectivity returns.
//! Replay is idempotent by id: a create re-runs under its temporary id and
//! swaps in the remote id exactly once, updates and deletes re-target the
//! same document, and increments carry deltas, which compose.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheStorage, LocalCache};
use crate::models::Collection;
use crate::remote::DocumentStore;
use crate::sync::bus::ChangeBus;

/// Queue capacity: when full, the oldest operation is dropped.
const DEFAULT_CAPACITY: usize = 256;

/// An operation is dropped after this many failed replay attempts; the
/// optimistic record keeps its `local_` id and stays visible.
const MAX_ATTEMPTS: u32 = 5;

/// What to replay against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingKind {
  Create { temp_id: String, data: Value },
  Update { id: String, patch: Value },
  Delete { id: String },
  Increment { id: String, field: String, delta: Decimal },
}

/// One queued remote write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOp {
  pub collection: Collection,
  pub owner_id: String,
  #[serde(default)]
  pub attempts: u32,
  #[serde(flatten)]
  pub kind: PendingKind,
}

/// Outcome of a replay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
  pub replayed: usize,
  pub retained: usize,
  pub dropped: usize,
}

/// Persisted, bounded queue of pending writes for one owner.
pub struct Outbox<S: CacheStorage> {
  cache: LocalCache<S>,
  capacity: usize,
}

fn outbox_key(owner_id: &str) -> String {
  format!("pending_ops_{}", owner_id)
}

impl<S: CacheStorage> Outbox<S> {
  pub fn new(cache: LocalCache<S>) -> Self {
    Self {
      cache,
      capacity: DEFAULT_CAPACITY,
    }
  }

  #[cfg(test)]
  pub(crate) fn with_capacity(cache: LocalCache<S>, capacity: usize) -> Self {
    Self { cache, capacity }
  }

  /// Append an operation, dropping the oldest when the queue is full.
  pub fn push(&self, op: PendingOp) {
    let key = outbox_key(&op.owner_id);
    let mut ops: Vec<PendingOp> = self.cache.load_list(&key);
    if ops.len() >= self.capacity {
      let evicted = ops.remove(0);
      warn!(
        "outbox full ({} ops), dropping oldest {:?}",
        self.capacity, evicted.kind
      );
    }
    ops.push(op);
    self.cache.save(&key, &ops);
  }

  pub fn pending(&self, owner_id: &str) -> Vec<PendingOp> {
    self.cache.load_list(&outbox_key(owner_id))
  }

  pub fn is_empty(&self, owner_id: &str) -> bool {
    self.pending(owner_id).is_empty()
  }

  /// Replace the data carried by a pending create for `temp_id`. Used when
  /// a never-synced record is edited again before its create has replayed,
  /// so the eventual create ships the latest state.
  pub fn refresh_create(&self, owner_id: &str, temp_id: &str, data: Value) -> bool {
    let key = outbox_key(owner_id);
    let mut ops: Vec<PendingOp> = self.cache.load_list(&key);
    for op in ops.iter_mut() {
      if let PendingKind::Create {
        temp_id: pending, ..
      } = &op.kind
      {
        if pending == temp_id {
          op.kind = PendingKind::Create {
            temp_id: temp_id.to_string(),
            data,
          };
          self.cache.save(&key, &ops);
          return true;
        }
      }
    }
    false
  }

  /// Drop the pending create for `temp_id`, if any. Used when a
  /// never-synced record is deleted: the remote never heard of it, so
  /// there is nothing left to replay.
  pub fn drop_create(&self, owner_id: &str, temp_id: &str) {
    let key = outbox_key(owner_id);
    let ops: Vec<PendingOp> = self.cache.load_list(&key);
    let remaining: Vec<PendingOp> = ops
      .into_iter()
      .filter(|op| {
        !matches!(
          &op.kind,
          PendingKind::Create { temp_id: pending, .. } if pending == temp_id
        )
      })
      .collect();
    self.cache.save(&key, &remaining);
  }

  /// Replay queued operations against the remote store.
  ///
  /// Successful creates swap the temporary id in the collection's cached
  /// list and re-notify observers. Failed retryable operations stay queued
  /// until [`MAX_ATTEMPTS`]; non-retryable rejections are dropped
  /// immediately.
  pub async fn flush<R: DocumentStore>(
    &self,
    owner_id: &str,
    remote: &R,
    bus: &ChangeBus,
  ) -> FlushReport {
    let key = outbox_key(owner_id);
    let ops: Vec<PendingOp> = self.cache.load_list(&key);
    if ops.is_empty() {
      return FlushReport::default();
    }

    let mut report = FlushReport::default();
    let mut retained: Vec<PendingOp> = Vec::new();
    let mut touched: Vec<Collection> = Vec::new();

    for mut op in ops {
      let collection_name = op.collection.remote_name();
      let result = match &op.kind {
        PendingKind::Create { data, .. } => remote
          .create_document(collection_name, data)
          .await
          .map(Some),
        PendingKind::Update { id, patch } => remote
          .update_document(collection_name, id, patch)
          .await
          .map(|_| None),
        PendingKind::Delete { id } => remote
          .delete_document(collection_name, id)
          .await
          .map(|_| None),
        PendingKind::Increment {
          id,
          field,
          delta,
        } => remote
          .atomic_increment(collection_name, id, field, *delta)
          .await
          .map(|_| None),
      };

      match result {
        Ok(remote_id) => {
          report.replayed += 1;
          if let (Some(remote_id), PendingKind::Create { temp_id, .. }) = (remote_id, &op.kind) {
            self.confirm_create(&op, temp_id, &remote_id);
            if !touched.contains(&op.collection) {
              touched.push(op.collection);
            }
          }
        }
        Err(e) if e.is_retryable() => {
          op.attempts += 1;
          if op.attempts >= MAX_ATTEMPTS {
            warn!(
              "dropping pending {:?} after {} attempts: {}",
              op.kind, op.attempts, e
            );
            report.dropped += 1;
          } else {
            debug!("pending {:?} still failing: {}", op.kind, e);
            report.retained += 1;
            retained.push(op);
          }
        }
        Err(e) => {
          warn!("remote rejected pending {:?}, dropping: {}", op.kind, e);
          report.dropped += 1;
        }
      }
    }

    self.cache.save(&key, &retained);
    for collection in touched {
      bus.notify(collection);
    }
    report
  }

  /// Swap a confirmed create's temporary id for the remote id in the
  /// collection's cached list. Works on the raw JSON so the outbox stays
  /// independent of concrete record types.
  fn confirm_create(&self, op: &PendingOp, temp_id: &str, remote_id: &str) {
    let cache_key = op.collection.cache_key(&op.owner_id);
    let swapped = self.cache.update_in_list::<Value, _, _>(
      &cache_key,
      |item| item.get("id").and_then(Value::as_str) == Some(temp_id),
      |item| item["id"] = Value::String(remote_id.to_string()),
    );
    if swapped.is_none() {
      // The record was deleted locally while its create waited; the remote
      // copy will come back on the next snapshot and be deleted then.
      warn!(
        "confirmed create {} -> {} but record is gone from cache",
        temp_id, remote_id
      );
    }
  }
}

impl<S: CacheStorage> Clone for Outbox<S> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      capacity: self.capacity,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::remote::MemoryStore;
  use serde_json::json;

  fn create_op(owner: &str, temp_id: &str) -> PendingOp {
    PendingOp {
      collection: Collection::Transactions,
      owner_id: owner.into(),
      attempts: 0,
      kind: PendingKind::Create {
        temp_id: temp_id.into(),
        data: json!({"owner_id": owner, "amount": "10"}),
      },
    }
  }

  #[test]
  fn queue_is_bounded_dropping_oldest() {
    let cache = LocalCache::new(MemoryStorage::new());
    let outbox = Outbox::with_capacity(cache, 2);

    outbox.push(create_op("u1", "local_1"));
    outbox.push(create_op("u1", "local_2"));
    outbox.push(create_op("u1", "local_3"));

    let pending = outbox.pending("u1");
    assert_eq!(pending.len(), 2);
    assert!(matches!(
      &pending[0].kind,
      PendingKind::Create { temp_id, .. } if temp_id == "local_2"
    ));
  }

  #[tokio::test]
  async fn flush_replays_create_and_swaps_cached_id() {
    let cache = LocalCache::new(MemoryStorage::new());
    let outbox = Outbox::new(cache.clone());
    let remote = MemoryStore::new();
    let bus = ChangeBus::new();

    // Optimistic record in the cache, matching create queued.
    cache.prepend(
      "user_transactions_u1",
      &json!({"id": "local_1", "owner_id": "u1", "amount": "10"}),
    );
    outbox.push(create_op("u1", "local_1"));

    let report = outbox.flush("u1", &remote, &bus).await;

    assert_eq!(report.replayed, 1);
    assert!(outbox.is_empty("u1"));

    let cached = cache.load_raw_list("user_transactions_u1");
    assert_eq!(cached.len(), 1);
    let id = cached[0]["id"].as_str().unwrap();
    assert!(!id.starts_with("local_"), "id not swapped: {}", id);
    assert_eq!(remote.documents("transactions").len(), 1);
  }

  #[tokio::test]
  async fn flush_keeps_retryable_failures_until_attempt_cap() {
    let cache = LocalCache::new(MemoryStorage::new());
    let outbox = Outbox::new(cache);
    let remote = MemoryStore::new();
    remote.set_offline(true);
    let bus = ChangeBus::new();

    outbox.push(create_op("u1", "local_1"));

    for round in 1..MAX_ATTEMPTS {
      let report = outbox.flush("u1", &remote, &bus).await;
      assert_eq!(report.retained, 1, "round {}", round);
    }

    // Final attempt hits the cap and drops the op.
    let report = outbox.flush("u1", &remote, &bus).await;
    assert_eq!(report.dropped, 1);
    assert!(outbox.is_empty("u1"));
  }

  #[test]
  fn refresh_create_replaces_pending_data() {
    let cache = LocalCache::new(MemoryStorage::new());
    let outbox = Outbox::new(cache);
    outbox.push(create_op("u1", "local_1"));

    let refreshed = outbox.refresh_create("u1", "local_1", json!({"amount": "25"}));
    assert!(refreshed);

    let pending = outbox.pending("u1");
    assert!(matches!(
      &pending[0].kind,
      PendingKind::Create { data, .. } if data["amount"] == json!("25")
    ));

    assert!(!outbox.refresh_create("u1", "local_404", json!({})));
  }

  #[test]
  fn drop_create_removes_only_matching_op() {
    let cache = LocalCache::new(MemoryStorage::new());
    let outbox = Outbox::new(cache);
    outbox.push(create_op("u1", "local_1"));
    outbox.push(create_op("u1", "local_2"));

    outbox.drop_create("u1", "local_1");

    let pending = outbox.pending("u1");
    assert_eq!(pending.len(), 1);
    assert!(matches!(
      &pending[0].kind,
      PendingKind::Create { temp_id, .. } if temp_id == "local_2"
    ));
  }
}
