//! Entity sync services: one per collection, plus a bundle that wires
//! them over a shared cache, bus and outbox.

mod budget;
mod goals;
mod subscriptions;
mod transactions;

pub use budget::Budget;
pub use goals::Goals;
pub use subscriptions::Subscriptions;
pub use transactions::Transactions;

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStorage, LocalCache};
use crate::remote::DocumentStore;
use crate::sync::{ChangeBus, FlushReport, Outbox};

/// All sync services over one storage backend and one remote store.
pub struct Services<R: DocumentStore, S: CacheStorage> {
  pub transactions: Transactions<R, S>,
  pub goals: Goals<R, S>,
  pub subscriptions: Subscriptions<R, S>,
  pub budget: Budget<R, S>,
  remote: Arc<R>,
  bus: ChangeBus,
  outbox: Outbox<S>,
}

impl<R: DocumentStore, S: CacheStorage + 'static> Services<R, S> {
  pub fn new(remote: Arc<R>, storage: S, poll_interval: Duration) -> Self {
    let cache = LocalCache::new(storage);
    let bus = ChangeBus::new();
    let outbox = Outbox::new(cache.clone());

    Self {
      transactions: Transactions::new(
        Arc::clone(&remote),
        cache.clone(),
        bus.clone(),
        outbox.clone(),
        poll_interval,
      ),
      goals: Goals::new(
        Arc::clone(&remote),
        cache.clone(),
        bus.clone(),
        outbox.clone(),
        poll_interval,
      ),
      subscriptions: Subscriptions::new(
        Arc::clone(&remote),
        cache.clone(),
        bus.clone(),
        outbox.clone(),
        poll_interval,
      ),
      budget: Budget::new(Arc::clone(&remote), cache, bus.clone(), poll_interval),
      remote,
      bus,
      outbox,
    }
  }

  /// Replay queued offline writes for `owner_id`.
  pub async fn flush_pending(&self, owner_id: &str) -> FlushReport {
    self
      .outbox
      .flush(owner_id, self.remote.as_ref(), &self.bus)
      .await
  }

  /// Number of writes still waiting for replay.
  pub fn pending_count(&self, owner_id: &str) -> usize {
    self.outbox.pending(owner_id).len()
  }

  pub fn bus(&self) -> &ChangeBus {
    &self.bus
  }
}
