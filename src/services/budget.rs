//! Monthly budget service.
//!
//! The budget is a single decimal per owner, stored as a field on the
//! owner's `users` document remotely and under an owner-scoped key
//! locally. Unlike the list services, `set` surfaces remote failure to
//! the caller: a settings screen has no optimistic list to fall back on
//! and must show explicit feedback.

use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheStorage, LocalCache};
use crate::models::Collection;
use crate::remote::{decimal_from_value, DocumentStore, RemoteError};
use crate::sync::{ChangeBus, SubscriptionHandle};

/// Sync service for the per-owner budget scalar.
pub struct Budget<R: DocumentStore, S: CacheStorage> {
  remote: Arc<R>,
  cache: LocalCache<S>,
  bus: ChangeBus,
  poll_interval: Duration,
}

impl<R: DocumentStore, S: CacheStorage + 'static> Budget<R, S> {
  pub fn new(remote: Arc<R>, cache: LocalCache<S>, bus: ChangeBus, poll_interval: Duration) -> Self {
    Self {
      remote,
      cache,
      bus,
      poll_interval,
    }
  }

  /// Set the monthly budget. The cache and observers update first, then
  /// the remote write runs — and its failure propagates, unlike the
  /// fire-and-forget list mutations.
  pub async fn set(&self, owner_id: &str, amount: Decimal) -> Result<(), RemoteError> {
    let key = Collection::Budget.cache_key(owner_id);
    self.cache.save(&key, &amount);
    self.bus.notify(Collection::Budget);

    self
      .remote
      .update_document(
        Collection::Budget.remote_name(),
        owner_id,
        &json!({ "budget": amount }),
      )
      .await
  }

  /// Fetch the budget: remote when reachable (refreshing the cache),
  /// cached value otherwise. None when the owner never set one.
  pub async fn get(&self, owner_id: &str) -> Option<Decimal> {
    let key = Collection::Budget.cache_key(owner_id);
    match self
      .remote
      .get_document(Collection::Budget.remote_name(), owner_id)
      .await
    {
      Ok(doc) => {
        let value = doc.and_then(|doc| doc.data.get("budget").and_then(decimal_from_value));
        match &value {
          Some(amount) => self.cache.save(&key, amount),
          None => self.cache.remove(&key),
        }
        value
      }
      Err(e) => {
        debug!("budget falling back to cache: {}", e);
        self.cache.load(&key)
      }
    }
  }

  /// Observe the budget: cached value immediately, then remote polling,
  /// same contract as the list subscriptions.
  pub fn subscribe(
    &self,
    owner_id: &str,
    callback: impl Fn(Option<Decimal>) + Send + Sync + 'static,
  ) -> SubscriptionHandle {
    let callback: Arc<dyn Fn(Option<Decimal>) + Send + Sync> = Arc::new(callback);
    let key = Collection::Budget.cache_key(owner_id);
    let alive = Arc::new(AtomicBool::new(true));
    let trusting_cache = Arc::new(AtomicBool::new(true));

    callback(self.cache.load::<Decimal>(&key));

    let guard = {
      let cache = self.cache.clone();
      let key = key.clone();
      let callback = Arc::clone(&callback);
      let alive = Arc::clone(&alive);
      let trusting_cache = Arc::clone(&trusting_cache);
      self.bus.subscribe(Collection::Budget, move || {
        if alive.load(Ordering::SeqCst) && trusting_cache.load(Ordering::SeqCst) {
          callback(cache.load::<Decimal>(&key));
        }
      })
    };

    let task = {
      let remote = Arc::clone(&self.remote);
      let cache = self.cache.clone();
      let callback = Arc::clone(&callback);
      let alive = Arc::clone(&alive);
      let owner_id = owner_id.to_string();
      let poll_interval = self.poll_interval;

      tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_seen: Option<Option<Decimal>> = None;

        loop {
          interval.tick().await;
          if !alive.load(Ordering::SeqCst) {
            break;
          }

          match remote
            .get_document(Collection::Budget.remote_name(), &owner_id)
            .await
          {
            Ok(doc) => {
              let value = doc.and_then(|doc| doc.data.get("budget").and_then(decimal_from_value));
              trusting_cache.store(false, Ordering::SeqCst);
              if last_seen.as_ref() != Some(&value) {
                if !alive.load(Ordering::SeqCst) {
                  break;
                }
                callback(value);
                match &value {
                  Some(amount) => cache.save(&key, amount),
                  None => cache.remove(&key),
                }
                last_seen = Some(value);
              }
            }
            Err(e) => {
              debug!("budget poll failed: {}", e);
            }
          }
        }
      })
    };

    SubscriptionHandle::new(alive, guard, task)
  }
}
