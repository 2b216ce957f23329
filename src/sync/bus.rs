//! In-process change notification bus.
//!
//! Remote subscriptions only fire for remote events; when a mutation is
//! applied locally (optimistically), active observers still need to
//! re-render. The bus is a per-collection registry of zero-argument
//! callbacks: no payload is passed, listeners re-read the cache, which
//! avoids stale-payload bugs at the cost of a re-fetch.
//!
//! Each bus is an owned, injectable object — independent service sets
//! (tests in particular) get independent buses with no shared globals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

use crate::models::Collection;

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Registry {
  next_id: u64,
  listeners: HashMap<Collection, Vec<(u64, Callback)>>,
}

/// Cloneable handle to a shared listener registry.
#[derive(Clone, Default)]
pub struct ChangeBus {
  registry: Arc<Mutex<Registry>>,
}

impl ChangeBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `callback` for local changes to `collection`. The returned
  /// guard deregisters on [`ListenerGuard::cancel`] or drop.
  pub fn subscribe(
    &self,
    collection: Collection,
    callback: impl Fn() + Send + Sync + 'static,
  ) -> ListenerGuard {
    let id = {
      let mut registry = match self.registry.lock() {
        Ok(r) => r,
        Err(e) => e.into_inner(),
      };
      registry.next_id += 1;
      let id = registry.next_id;
      registry
        .listeners
        .entry(collection)
        .or_default()
        .push((id, Arc::new(callback)));
      id
    };

    ListenerGuard {
      registry: Arc::downgrade(&self.registry),
      collection,
      id,
    }
  }

  /// Invoke every listener registered for `collection`, synchronously, in
  /// registration order. Callbacks run outside the registry lock so they
  /// may subscribe or notify in turn.
  pub fn notify(&self, collection: Collection) {
    let callbacks: Vec<Callback> = {
      let registry = match self.registry.lock() {
        Ok(r) => r,
        Err(e) => e.into_inner(),
      };
      registry
        .listeners
        .get(&collection)
        .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
        .unwrap_or_default()
    };

    for callback in callbacks {
      callback();
    }
  }

  #[cfg(test)]
  pub(crate) fn listener_count(&self, collection: Collection) -> usize {
    let registry = self.registry.lock().unwrap();
    registry
      .listeners
      .get(&collection)
      .map(|entries| entries.len())
      .unwrap_or(0)
  }
}

/// Deregisters one listener when cancelled or dropped.
pub struct ListenerGuard {
  registry: Weak<Mutex<Registry>>,
  collection: Collection,
  id: u64,
}

impl ListenerGuard {
  /// Explicitly deregister. Dropping the guard has the same effect.
  pub fn cancel(self) {
    // Drop impl does the work.
  }

  fn deregister(&self) {
    let Some(registry) = self.registry.upgrade() else {
      return;
    };
    let mut registry = match registry.lock() {
      Ok(r) => r,
      Err(e) => e.into_inner(),
    };
    if let Some(entries) = registry.listeners.get_mut(&self.collection) {
      let before = entries.len();
      entries.retain(|(id, _)| *id != self.id);
      if entries.len() == before {
        warn!("listener {} already deregistered", self.id);
      }
    }
  }
}

impl Drop for ListenerGuard {
  fn drop(&mut self) {
    self.deregister();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&count);
    (count, move || {
      inner.fetch_add(1, Ordering::SeqCst);
    })
  }

  #[test]
  fn notify_reaches_all_listeners_for_collection() {
    let bus = ChangeBus::new();
    let (a, cb_a) = counter();
    let (b, cb_b) = counter();
    let _guard_a = bus.subscribe(Collection::Transactions, cb_a);
    let _guard_b = bus.subscribe(Collection::Transactions, cb_b);
    let (other, cb_other) = counter();
    let _guard_other = bus.subscribe(Collection::Goals, cb_other);

    bus.notify(Collection::Transactions);

    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 1);
    assert_eq!(other.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn unsubscribing_one_keeps_the_other() {
    let bus = ChangeBus::new();
    let (a, cb_a) = counter();
    let (b, cb_b) = counter();
    let guard_a = bus.subscribe(Collection::Goals, cb_a);
    let _guard_b = bus.subscribe(Collection::Goals, cb_b);

    guard_a.cancel();
    bus.notify(Collection::Goals);

    assert_eq!(a.load(Ordering::SeqCst), 0);
    assert_eq!(b.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn dropping_guard_deregisters() {
    let bus = ChangeBus::new();
    {
      let (_count, cb) = counter();
      let _guard = bus.subscribe(Collection::Budget, cb);
      assert_eq!(bus.listener_count(Collection::Budget), 1);
    }
    assert_eq!(bus.listener_count(Collection::Budget), 0);
  }

  #[test]
  fn listeners_run_in_registration_order() {
    let bus = ChangeBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second", "third"] {
      let order = Arc::clone(&order);
      // Guards leak intentionally: the bus holds them for the test's life.
      std::mem::forget(bus.subscribe(Collection::Subscriptions, move || {
        order.lock().unwrap().push(tag);
      }));
    }

    bus.notify(Collection::Subscriptions);

    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
  }
}
