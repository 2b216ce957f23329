//! Savings goal service.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStorage, LocalCache};
use crate::models::{Goal, NewGoal};
use crate::remote::DocumentStore;
use crate::sync::{ChangeBus, CollectionSync, Outbox, SubscriptionHandle};

/// Sync service for the goals collection.
pub struct Goals<R: DocumentStore, S: CacheStorage> {
  sync: CollectionSync<Goal, R, S>,
}

impl<R: DocumentStore, S: CacheStorage + 'static> Goals<R, S> {
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

  /// Create a goal. Saved amount always starts at 0 and the creation time
  /// is stamped here, not taken from the caller.
  pub async fn add(&self, new: NewGoal) -> String {
    self
      .sync
      .add(Goal {
        id: String::new(),
        name: new.name,
        target_amount: new.target_amount,
        saved_amount: Decimal::ZERO,
        owner_id: new.owner_id,
        created_at: Utc::now(),
      })
      .await
  }

  /// Move money into a goal. Locally this is a clamped read-modify-write
  /// on the cached record; remotely it is the store's atomic increment, so
  /// two devices funding the same goal cannot lose either contribution.
  pub async fn fund(&self, owner_id: &str, id: &str, amount: Decimal) -> bool {
    self
      .sync
      .increment(owner_id, id, "saved_amount", amount)
      .await
  }

  pub async fn update(&self, goal: Goal) -> bool {
    self.sync.update(goal).await
  }

  pub async fn delete(&self, owner_id: &str, id: &str) {
    self.sync.delete(owner_id, id).await
  }

  /// Observe the owner's goals, newest first.
  pub fn subscribe(
    &self,
    owner_id: &str,
    callback: impl Fn(Vec<Goal>) + Send + Sync + 'static,
  ) -> SubscriptionHandle {
    self.sync.subscribe(owner_id, callback)
  }

  pub async fn list(&self, owner_id: &str) -> Vec<Goal> {
    self.sync.list(owner_id).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::remote::MemoryStore;

  fn service() -> (Arc<MemoryStore>, Goals<MemoryStore, MemoryStorage>) {
    let remote = Arc::new(MemoryStore::new());
    let cache = LocalCache::new(MemoryStorage::new());
    let service = Goals::new(
      Arc::clone(&remote),
      cache.clone(),
      ChangeBus::new(),
      Outbox::new(cache),
      Duration::from_secs(30),
    );
    (remote, service)
  }

  #[tokio::test]
  async fn funding_twice_accumulates() {
    let (_remote, service) = service();
    let id = service
      .add(NewGoal {
        name: "Vélo".into(),
        target_amount: Decimal::new(500, 0),
        owner_id: "u1".into(),
      })
      .await;

    assert!(service.fund("u1", &id, Decimal::new(200, 0)).await);
    assert!(service.fund("u1", &id, Decimal::new(200, 0)).await);

    let goals = service.list("u1").await;
    assert_eq!(goals[0].saved_amount, Decimal::new(400, 0));
    assert!(!goals[0].is_complete());

    assert!(service.fund("u1", &id, Decimal::new(100, 0)).await);
    assert!(service.list("u1").await[0].is_complete());
  }

  #[tokio::test]
  async fn funding_a_missing_goal_reports_false() {
    let (_remote, service) = service();
    assert!(!service.fund("u1", "nope", Decimal::ONE).await);
  }

  #[tokio::test]
  async fn deleting_a_never_synced_goal_is_purely_local() {
    let (remote, service) = service();
    remote.set_offline(true);

    let id = service
      .add(NewGoal {
        name: "Local only".into(),
        target_amount: Decimal::new(100, 0),
        owner_id: "u1".into(),
      })
      .await;
    assert!(crate::sync::is_temp_id(&id));
    let deletes_before = remote.delete_calls();

    service.delete("u1", &id).await;

    assert_eq!(remote.delete_calls(), deletes_before, "no remote call");
    remote.set_offline(false);
    assert!(service.list("u1").await.is_empty());
  }
}
