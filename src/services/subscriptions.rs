//! Recurring subscription service.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStorage, LocalCache};
use crate::models::{NewSubscription, Subscription};
use crate::remote::DocumentStore;
use crate::sync::{ChangeBus, CollectionSync, Outbox, SubscriptionHandle};

/// Sync service for the subscriptions collection.
pub struct Subscriptions<R: DocumentStore, S: CacheStorage> {
  sync: CollectionSync<Subscription, R, S>,
}

impl<R: DocumentStore, S: CacheStorage + 'static> Subscriptions<R, S> {
  pub fn new(
    remote: Arc<R>,
    cache: LocalCache<S>,
    bus: ChangeBus,
    outbox: Outbox<S>,
    poll_interval: Duration,
  ) -> Self {
    Self {
      sync: CollectionSync::new(remote, cache, bus, outbox, poll_interval),
    }
  }

  pub async fn add(&self, new: NewSubscription) -> String {
    self
      .sync
      .add(Subscription {
        id: String::new(),
        name: new.name,
        amount: new.amount,
        due_day: new.due_day,
        owner_id: new.owner_id,
      })
      .await
  }

  pub async fn update(&self, subscription: Subscription) -> bool {
    self.sync.update(subscription).await
  }

  pub async fn delete(&self, owner_id: &str, id: &str) {
    self.sync.delete(owner_id, id).await
  }

  pub fn subscribe(
    &self,
    owner_id: &str,
    callback: impl Fn(Vec<Subscription>) + Send + Sync + 'static,
  ) -> SubscriptionHandle {
    self.sync.subscribe(owner_id, callback)
  }

  pub async fn list(&self, owner_id: &str) -> Vec<Subscription> {
    self.sync.list(owner_id).await
  }
}
