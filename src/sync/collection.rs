//! Generic sync service for one cached collection.
//!
//! Every list-shaped entity (transactions, goals, subscriptions) gets the
//! same treatment: optimistic local mutation first, change-bus
//! notification second, remote write last. Failed remote writes land in
//! the outbox; the optimistic record is the durable state until replay
//! succeeds.

use serde_json::Value;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheStorage, LocalCache};
use crate::models::Record;
use crate::remote::{Direction, Document, DocumentStore, Filter, QuerySpec};
use crate::sync::bus::{ChangeBus, ListenerGuard};
use crate::sync::outbox::{Outbox, PendingKind, PendingOp};

use rust_decimal::Decimal;

/// Prefix marking an id as locally generated and not yet confirmed.
const TEMP_ID_PREFIX: &str = "local_";

/// True for ids minted locally that the remote store has never seen.
pub fn is_temp_id(id: &str) -> bool {
  id.starts_with(TEMP_ID_PREFIX)
}

/// Extra constraints on a subscription's remote query.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
  /// Additional equality filter, e.g. on a category.
  pub filter: Option<Filter>,
  /// Result-count cap for large collections.
  pub limit: Option<u32>,
}

/// Handle returned by [`CollectionSync::subscribe`]. Cancels the remote
/// poll task and the bus listener on [`unsubscribe`](Self::unsubscribe) or
/// drop; callers must tear it down to avoid leaking callbacks.
pub struct SubscriptionHandle {
  alive: Arc<AtomicBool>,
  guard: Option<ListenerGuard>,
  task: JoinHandle<()>,
}

impl SubscriptionHandle {
  pub(crate) fn new(alive: Arc<AtomicBool>, guard: ListenerGuard, task: JoinHandle<()>) -> Self {
    Self {
      alive,
      guard: Some(guard),
      task,
    }
  }

  pub fn unsubscribe(mut self) {
    self.teardown();
  }

  fn teardown(&mut self) {
    // The flag stops callback delivery even if the poll task has a
    // snapshot already in flight.
    self.alive.store(false, Ordering::SeqCst);
    if let Some(guard) = self.guard.take() {
      guard.cancel();
    }
    self.task.abort();
  }
}

impl Drop for SubscriptionHandle {
  fn drop(&mut self) {
    self.teardown();
  }
}

/// Cache-first sync service for one record type.
pub struct CollectionSync<T: Record, R: DocumentStore, S: CacheStorage> {
  remote: Arc<R>,
  cache: LocalCache<S>,
  bus: ChangeBus,
  outbox: Outbox<S>,
  poll_interval: Duration,
  temp_seq: Arc<AtomicU64>,
  _record: PhantomData<fn() -> T>,
}

impl<T: Record + std::cmp::PartialEq, R: DocumentStore, S: CacheStorage + 'static> CollectionSync<T, R, S> {
  pub fn new(
    remote: Arc<R>,
    cache: LocalCache<S>,
    bus: ChangeBus,
    outbox: Outbox<S>,
    poll_interval: Duration,
  ) -> Self {
    Self {
      remote,
      cache,
      bus,
      outbox,
      poll_interval,
      temp_seq: Arc::new(AtomicU64::new(0)),
      _record: PhantomData,
    }
  }

  /// Mint a temporary id: creation timestamp plus a process-local sequence
  /// number, so two adds in the same millisecond stay distinguishable.
  fn mint_temp_id(&self) -> String {
    let millis = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis())
      .unwrap_or(0);
    let seq = self.temp_seq.fetch_add(1, Ordering::SeqCst);
    format!("{}{}_{}", TEMP_ID_PREFIX, millis, seq)
  }

  /// Add a record optimistically. Returns the authoritative id at call
  /// completion: the remote id when the create succeeded, the temporary id
  /// when it is queued for replay. Never fails the caller.
  pub async fn add(&self, mut record: T) -> String {
    let temp_id = self.mint_temp_id();
    record.set_id(temp_id.clone());

    let key = T::COLLECTION.cache_key(record.owner_id());
    self.cache.prepend(&key, &record);
    self.bus.notify(T::COLLECTION);

    let data = strip_id(&record);
    match self
      .remote
      .create_document(T::COLLECTION.remote_name(), &data)
      .await
    {
      Ok(remote_id) => {
        // Merge against the temporary id: a concurrent local update may
        // already have touched other fields, which must survive the swap.
        let swapped = self.cache.update_in_list::<T, _, _>(
          &key,
          |r| r.id() == temp_id,
          |r| r.set_id(remote_id.clone()),
        );
        if swapped.is_none() {
          warn!(
            "record {} vanished from cache before id confirmation",
            temp_id
          );
        }
        self.bus.notify(T::COLLECTION);
        remote_id
      }
      Err(e) => {
        warn!(
          "remote create failed, keeping optimistic record {}: {}",
          temp_id, e
        );
        self.outbox.push(PendingOp {
          collection: T::COLLECTION,
          owner_id: record.owner_id().to_string(),
          attempts: 0,
          kind: PendingKind::Create {
            temp_id: temp_id.clone(),
            data,
          },
        });
        temp_id
      }
    }
  }

  /// Merge `record` over the cached entry with the same id. Returns false
  /// when no cached entry matches its current id, so callers can detect an
  /// id-swap race instead of a silent no-op.
  pub async fn update(&self, record: T) -> bool {
    let id = record.id().to_string();
    let key = T::COLLECTION.cache_key(record.owner_id());

    let replacement = record.clone();
    let found = self
      .cache
      .update_in_list::<T, _, _>(&key, |r| r.id() == id, move |slot| *slot = replacement);
    if found.is_none() {
      warn!("update missed: no cached record with id {}", id);
      return false;
    }
    self.bus.notify(T::COLLECTION);

    if is_temp_id(&id) {
      // Never synced: fold the edit into the pending create so the
      // eventual replay ships the latest state.
      if !self
        .outbox
        .refresh_create(record.owner_id(), &id, strip_id(&record))
      {
        debug!("no pending create to refresh for {}", id);
      }
      return true;
    }

    match self
      .remote
      .update_document(T::COLLECTION.remote_name(), &id, &strip_id(&record))
      .await
    {
      Ok(()) => {}
      Err(e) => {
        warn!("remote update failed for {}, queueing: {}", id, e);
        self.outbox.push(PendingOp {
          collection: T::COLLECTION,
          owner_id: record.owner_id().to_string(),
          attempts: 0,
          kind: PendingKind::Update {
            id,
            patch: strip_id(&record),
          },
        });
      }
    }
    true
  }

  /// Remove a record locally, then remotely. A record that never reached
  /// the remote is removed purely locally, along with its pending create.
  pub async fn delete(&self, owner_id: &str, id: &str) {
    let key = T::COLLECTION.cache_key(owner_id);
    self.cache.remove_from_list::<T, _>(&key, |r| r.id() == id);
    self.bus.notify(T::COLLECTION);

    if is_temp_id(id) {
      self.outbox.drop_create(owner_id, id);
      return;
    }

    match self
      .remote
      .delete_document(T::COLLECTION.remote_name(), id)
      .await
    {
      Ok(()) => {}
      Err(e) => {
        // Deleted locally; it may reappear on the next snapshot until the
        // queued delete replays.
        warn!("remote delete failed for {}, queueing: {}", id, e);
        self.outbox.push(PendingOp {
          collection: T::COLLECTION,
          owner_id: owner_id.to_string(),
          attempts: 0,
          kind: PendingKind::Delete { id: id.to_string() },
        });
      }
    }
  }

  /// Add `delta` to a numeric field, locally as a read-modify-write on the
  /// cached list, remotely through the store's native atomic increment so
  /// concurrent remote writers cannot lose updates.
  pub async fn increment(&self, owner_id: &str, id: &str, field: &str, delta: Decimal) -> bool {
    let key = T::COLLECTION.cache_key(owner_id);
    let updated = self.cache.update_in_list::<T, _, _>(
      &key,
      |r| r.id() == id,
      |r| {
        if !r.apply_increment(field, delta) {
          warn!("record {} has no incrementable field {}", id, field);
        }
      },
    );
    let Some(updated) = updated else {
      warn!("increment missed: no cached record with id {}", id);
      return false;
    };
    self.bus.notify(T::COLLECTION);

    if is_temp_id(id) {
      if let Some(record) = updated.iter().find(|r| r.id() == id) {
        self.outbox.refresh_create(owner_id, id, strip_id(record));
      }
      return true;
    }

    match self
      .remote
      .atomic_increment(T::COLLECTION.remote_name(), id, field, delta)
      .await
    {
      Ok(()) => {}
      Err(e) => {
        warn!("remote increment failed for {}, queueing: {}", id, e);
        self.outbox.push(PendingOp {
          collection: T::COLLECTION,
          owner_id: owner_id.to_string(),
          attempts: 0,
          kind: PendingKind::Increment {
            id: id.to_string(),
            field: field.to_string(),
            delta,
          },
        });
      }
    }
    true
  }

  /// One-shot fetch: remote when reachable (refreshing the cache), cached
  /// data otherwise.
  pub async fn list(&self, owner_id: &str) -> Vec<T> {
    let key = T::COLLECTION.cache_key(owner_id);
    match self
      .remote
      .query_documents(T::COLLECTION.remote_name(), &self.base_query(owner_id))
      .await
    {
      Ok(docs) => {
        let records = decode_documents::<T>(&docs);
        self.cache.replace_list(&key, &records);
        records
      }
      Err(e) => {
        debug!("list falling back to cache: {}", e);
        self.cache.load_list(&key)
      }
    }
  }

  /// Subscribe to the collection for `owner_id`.
  ///
  /// The callback fires immediately with the cached snapshot, again on
  /// every local-only mutation while the cache is still the best source,
  /// and on every remote snapshot that changes the data. The first remote
  /// snapshot stops the cache re-emits; from then on the remote is
  /// authoritative and the cache is just its write-behind copy.
  pub fn subscribe(
    &self,
    owner_id: &str,
    callback: impl Fn(Vec<T>) + Send + Sync + 'static,
  ) -> SubscriptionHandle {
    self.subscribe_with(owner_id, SubscribeOptions::default(), callback)
  }

  pub fn subscribe_with(
    &self,
    owner_id: &str,
    options: SubscribeOptions,
    callback: impl Fn(Vec<T>) + Send + Sync + 'static,
  ) -> SubscriptionHandle {
    let callback: Arc<dyn Fn(Vec<T>) + Send + Sync> = Arc::new(callback);
    let key = T::COLLECTION.cache_key(owner_id);
    let alive = Arc::new(AtomicBool::new(true));
    let trusting_cache = Arc::new(AtomicBool::new(true));

    // Fast path: the cached snapshot goes out before any network round
    // trip, so the UI has data on the first frame.
    callback(self.cache.load_list::<T>(&key));

    let guard = {
      let cache = self.cache.clone();
      let key = key.clone();
      let callback = Arc::clone(&callback);
      let alive = Arc::clone(&alive);
      let trusting_cache = Arc::clone(&trusting_cache);
      self.bus.subscribe(T::COLLECTION, move || {
        if alive.load(Ordering::SeqCst) && trusting_cache.load(Ordering::SeqCst) {
          callback(cache.load_list::<T>(&key));
        }
      })
    };

    let task = {
      let remote = Arc::clone(&self.remote);
      let cache = self.cache.clone();
      let alive = Arc::clone(&alive);
      let trusting_cache = Arc::clone(&trusting_cache);
      let poll_interval = self.poll_interval;

      let mut query = self.base_query(owner_id);
      if let Some(filter) = options.filter {
        query.filters.push(filter);
      }
      if let Some(limit) = options.limit {
        query.limit = Some(limit);
      }

      tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_seen: Option<Vec<T>> = None;

        loop {
          interval.tick().await;
          if !alive.load(Ordering::SeqCst) {
            break;
          }

          match remote
            .query_documents(T::COLLECTION.remote_name(), &query)
            .await
          {
            Ok(docs) => {
              let records = decode_documents::<T>(&docs);
              trusting_cache.store(false, Ordering::SeqCst);

              // None on the first snapshot, so the authoritative list is
              // always delivered at least once.
              if last_seen.as_ref() != Some(&records) {
                // Teardown race: unsubscribe may have happened while the
                // query was in flight.
                if !alive.load(Ordering::SeqCst) {
                  break;
                }
                callback(records.clone());
                cache.replace_list(&key, &records);
                last_seen = Some(records);
              }
            }
            Err(e) => {
              // Offline or flaky: the last delivered data keeps standing.
              debug!("remote poll failed: {}", e);
            }
          }
        }
      })
    };

    SubscriptionHandle {
      alive,
      guard: Some(guard),
      task,
    }
  }

  fn base_query(&self, owner_id: &str) -> QuerySpec {
    let mut query = QuerySpec::for_owner(owner_id);
    if let Some(field) = T::ORDER_FIELD {
      query = query.order_by(field, Direction::Desc);
    }
    query
  }

  /// The outbox shared by this service, for replay on reconnect.
  pub fn outbox(&self) -> &Outbox<S> {
    &self.outbox
  }

  pub fn remote(&self) -> &Arc<R> {
    &self.remote
  }

  pub fn cache(&self) -> &LocalCache<S> {
    &self.cache
  }

  pub fn bus(&self) -> &ChangeBus {
    &self.bus
  }
}

impl<T: Record, R: DocumentStore, S: CacheStorage> Clone for CollectionSync<T, R, S> {
  fn clone(&self) -> Self {
    Self {
      remote: Arc::clone(&self.remote),
      cache: self.cache.clone(),
      bus: self.bus.clone(),
      outbox: self.outbox.clone(),
      poll_interval: self.poll_interval,
      temp_seq: Arc::clone(&self.temp_seq),
      _record: PhantomData,
    }
  }
}

/// Serialize a record for the remote store, dropping the id field: the
/// store assigns ids, and documents do not carry their own.
pub(crate) fn strip_id<T: Record>(record: &T) -> Value {
  let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
  if let Value::Object(map) = &mut value {
    map.remove("id");
  }
  value
}

/// Decode remote documents, folding the document id back into the record.
/// Undecodable documents are logged and skipped rather than failing the
/// whole snapshot.
pub(crate) fn decode_documents<T: Record>(docs: &[Document]) -> Vec<T> {
  docs
    .iter()
    .filter_map(|doc| {
      let mut data = doc.data.clone();
      if let Value::Object(map) = &mut data {
        map.insert("id".to_string(), Value::String(doc.id.clone()));
      }
      match serde_json::from_value::<T>(data) {
        Ok(record) => Some(record),
        Err(e) => {
          warn!("skipping undecodable document {}: {}", doc.id, e);
          None
        }
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::models::{Collection, Transaction, TxKind};
  use crate::remote::MemoryStore;
  use std::sync::Mutex;
  use tokio::time::sleep;

  type TxSync = CollectionSync<Transaction, MemoryStore, MemoryStorage>;

  fn setup() -> (Arc<MemoryStore>, TxSync) {
    let remote = Arc::new(MemoryStore::new());
    let cache = LocalCache::new(MemoryStorage::new());
    let sync = CollectionSync::new(
      Arc::clone(&remote),
      cache.clone(),
      ChangeBus::new(),
      Outbox::new(cache),
      Duration::from_millis(50),
    );
    (remote, sync)
  }

  fn tx(amount: i64) -> Transaction {
    Transaction {
      id: String::new(),
      amount: rust_decimal::Decimal::new(amount, 0),
      category: "Nourriture".into(),
      description: String::new(),
      date: "2024-03-05T10:00:00Z".parse().unwrap(),
      owner_id: "u1".into(),
      kind: TxKind::Expense,
    }
  }

  fn cached(sync: &TxSync) -> Vec<Transaction> {
    sync
      .cache()
      .load_list(&Collection::Transactions.cache_key("u1"))
  }

  #[tokio::test]
  async fn add_prepends_exactly_one_record() {
    let (_remote, sync) = setup();

    sync.add(tx(100)).await;
    assert_eq!(cached(&sync).len(), 1);

    sync.add(tx(50)).await;
    let list = cached(&sync);
    assert_eq!(list.len(), 2);
    // Newest first
    assert_eq!(list[0].amount, rust_decimal::Decimal::new(50, 0));
  }

  #[tokio::test]
  async fn online_add_swaps_in_the_remote_id() {
    let (_remote, sync) = setup();

    let id = sync.add(tx(100)).await;

    assert!(!is_temp_id(&id));
    assert_eq!(cached(&sync)[0].id, id);
  }

  #[tokio::test]
  async fn offline_add_keeps_optimistic_record_and_queues_create() {
    let (remote, sync) = setup();
    remote.set_offline(true);

    let id = sync.add(tx(100)).await;

    assert!(is_temp_id(&id));
    let list = cached(&sync);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, id);
    assert_eq!(list[0].amount, rust_decimal::Decimal::new(100, 0));
    assert_eq!(sync.outbox().pending("u1").len(), 1);
  }

  #[tokio::test]
  async fn replayed_create_leaves_no_duplicate() {
    let (remote, sync) = setup();
    remote.set_offline(true);
    let temp_id = sync.add(tx(100)).await;

    remote.set_offline(false);
    sync.outbox().flush("u1", remote.as_ref(), sync.bus()).await;

    let list = cached(&sync);
    assert_eq!(list.len(), 1);
    assert!(!is_temp_id(&list[0].id));
    assert_ne!(list[0].id, temp_id);
    assert_eq!(remote.documents("transactions").len(), 1);
  }

  #[tokio::test]
  async fn update_locates_record_by_current_id_across_the_swap() {
    let (remote, sync) = setup();
    remote.set_offline(true);
    let temp_id = sync.add(tx(100)).await;

    // Edit while the create is still pending: found under the temp id.
    let mut edited = cached(&sync).remove(0);
    edited.amount = rust_decimal::Decimal::new(120, 0);
    assert!(sync.update(edited).await);

    // The pending create now carries the edited amount.
    remote.set_offline(false);
    sync.outbox().flush("u1", remote.as_ref(), sync.bus()).await;
    let confirmed = cached(&sync).remove(0);
    assert_eq!(confirmed.amount, rust_decimal::Decimal::new(120, 0));

    // After the swap the record answers to its remote id only.
    let mut stale = confirmed.clone();
    stale.id = temp_id;
    assert!(!sync.update(stale).await, "stale temp id must be surfaced");

    let mut fresh = confirmed.clone();
    fresh.amount = rust_decimal::Decimal::new(130, 0);
    assert!(sync.update(fresh).await);
  }

  #[tokio::test]
  async fn subscribe_with_empty_cache_offline_emits_exactly_once() {
    let (remote, sync) = setup();
    remote.set_offline(true);

    let snapshots: Arc<Mutex<Vec<Vec<Transaction>>>> = Arc::new(Mutex::new(Vec::new()));
    let handle = sync.subscribe("u1", {
      let snapshots = Arc::clone(&snapshots);
      move |list| snapshots.lock().unwrap().push(list)
    });

    // Several poll intervals pass without connectivity.
    sleep(Duration::from_millis(200)).await;

    let snapshots = snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 1, "only the initial cached emit");
    assert!(snapshots[0].is_empty());
    drop(snapshots);
    handle.unsubscribe();
  }

  #[tokio::test]
  async fn unsubscribing_one_subscriber_keeps_the_other() {
    let (remote, sync) = setup();
    remote.set_offline(true); // local-only: deliveries go through the bus

    let count = |snapshots: &Arc<Mutex<Vec<Vec<Transaction>>>>| snapshots.lock().unwrap().len();
    let record = |snapshots: &Arc<Mutex<Vec<Vec<Transaction>>>>| {
      let snapshots = Arc::clone(snapshots);
      move |list| snapshots.lock().unwrap().push(list)
    };

    let first: Arc<Mutex<Vec<Vec<Transaction>>>> = Arc::default();
    let second: Arc<Mutex<Vec<Vec<Transaction>>>> = Arc::default();
    let first_handle = sync.subscribe("u1", record(&first));
    let second_handle = sync.subscribe("u1", record(&second));
    assert_eq!(count(&first), 1);
    assert_eq!(count(&second), 1);

    first_handle.unsubscribe();
    sync.add(tx(10)).await;

    assert_eq!(count(&first), 1, "unsubscribed observer stays silent");
    assert_eq!(count(&second), 2, "surviving observer saw the mutation");
    second_handle.unsubscribe();
  }

  #[tokio::test]
  async fn remote_snapshot_overwrites_cache_and_stops_cache_reemits() {
    let (remote, sync) = setup();
    remote.seed_document(
      "transactions",
      "r9",
      serde_json::json!({
        "amount": "42",
        "category": "Transport",
        "description": "",
        "date": "2024-03-01T00:00:00.000Z",
        "owner_id": "u1",
        "kind": "expense"
      }),
    );

    let snapshots: Arc<Mutex<Vec<Vec<Transaction>>>> = Arc::default();
    let handle = sync.subscribe("u1", {
      let snapshots = Arc::clone(&snapshots);
      move |list| snapshots.lock().unwrap().push(list)
    });

    sleep(Duration::from_millis(200)).await;
    handle.unsubscribe();

    let snapshots = snapshots.lock().unwrap();
    // Initial cached emit (empty), then the authoritative snapshot; an
    // unchanged poll result is not re-delivered.
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1].len(), 1);
    assert_eq!(snapshots[1][0].id, "r9");

    // The snapshot was written back for the next launch's fast path.
    let list = cached(&sync);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, "r9");
  }

  #[tokio::test]
  async fn no_delivery_after_unsubscribe() {
    let (remote, sync) = setup();
    remote.set_offline(true);

    let snapshots: Arc<Mutex<Vec<Vec<Transaction>>>> = Arc::default();
    let handle = sync.subscribe("u1", {
      let snapshots = Arc::clone(&snapshots);
      move |list| snapshots.lock().unwrap().push(list)
    });
    handle.unsubscribe();

    sync.add(tx(10)).await;
    sleep(Duration::from_millis(120)).await;

    assert_eq!(snapshots.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn failed_delete_is_queued_for_replay() {
    let (remote, sync) = setup();
    let id = sync.add(tx(100)).await;

    remote.set_offline(true);
    sync.delete("u1", &id).await;

    assert!(cached(&sync).is_empty());
    assert_eq!(sync.outbox().pending("u1").len(), 1);

    remote.set_offline(false);
    sync.outbox().flush("u1", remote.as_ref(), sync.bus()).await;
    assert!(remote.documents("transactions").is_empty());
  }

  #[test]
  fn temp_ids_are_distinguishable() {
    let (_remote, sync) = {
      let remote = Arc::new(MemoryStore::new());
      let cache = LocalCache::new(MemoryStorage::new());
      let sync: TxSync = CollectionSync::new(
        Arc::clone(&remote),
        cache.clone(),
        ChangeBus::new(),
        Outbox::new(cache),
        Duration::from_secs(30),
      );
      (remote, sync)
    };

    let a = sync.mint_temp_id();
    let b = sync.mint_temp_id();
    assert!(is_temp_id(&a));
    assert_ne!(a, b);
  }
}
