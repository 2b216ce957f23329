//! Domain types shared by the cache, sync and service layers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// The collections the app syncs, used both as remote collection names and
/// as local cache namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
  Transactions,
  Goals,
  Subscriptions,
  Budget,
}

impl Collection {
  /// Collection name on the remote document store.
  ///
  /// The budget is not its own collection remotely: it lives as a field on
  /// the owner's document in `users`.
  pub fn remote_name(self) -> &'static str {
    match self {
      Collection::Transactions => "transactions",
      Collection::Goals => "goals",
      Collection::Subscriptions => "subscriptions",
      Collection::Budget => "users",
    }
  }

  /// Owner-scoped local cache key.
  ///
  /// Scoping every key by owner keeps two accounts on a shared device from
  /// reading each other's cached data.
  pub fn cache_key(self, owner_id: &str) -> String {
    let stem = match self {
      Collection::Transactions => "transactions",
      Collection::Goals => "goals",
      Collection::Subscriptions => "subscriptions",
      Collection::Budget => "budget",
    };
    format!("user_{}_{}", stem, owner_id)
  }
}

/// A record that lives in an owner-scoped cached list and syncs to a remote
/// collection.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
  const COLLECTION: Collection;

  /// Field the remote subscription orders by (descending), if any.
  const ORDER_FIELD: Option<&'static str> = None;

  /// Current identifier: a `local_` temporary id until the remote store
  /// confirms the write, the remote-assigned id afterwards.
  fn id(&self) -> &str;

  fn set_id(&mut self, id: String);

  fn owner_id(&self) -> &str;

  /// Apply an atomic-increment instruction to a named numeric field.
  /// Returns false when the record has no such incrementable field.
  fn apply_increment(&mut self, field: &str, delta: Decimal) -> bool {
    let _ = (field, delta);
    false
  }
}

/// Whether a transaction moves money out or in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
  Expense,
  Income,
}

/// A single logged expense or income entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
  pub id: String,
  pub amount: Decimal,
  pub category: String,
  pub description: String,
  #[serde(with = "crate::remote::timestamp")]
  pub date: DateTime<Utc>,
  pub owner_id: String,
  pub kind: TxKind,
}

impl Record for Transaction {
  const COLLECTION: Collection = Collection::Transactions;
  const ORDER_FIELD: Option<&'static str> = Some("date");

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn owner_id(&self) -> &str {
    &self.owner_id
  }
}

/// Input for creating a transaction; the service assigns the id.
#[derive(Debug, Clone)]
pub struct NewTransaction {
  pub amount: Decimal,
  pub category: String,
  pub description: String,
  pub date: DateTime<Utc>,
  pub owner_id: String,
  pub kind: TxKind,
}

/// A savings goal. `saved_amount` starts at 0 and only grows through
/// funding; completion (`saved >= target`) is derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
  pub id: String,
  pub name: String,
  pub target_amount: Decimal,
  pub saved_amount: Decimal,
  pub owner_id: String,
  #[serde(with = "crate::remote::timestamp")]
  pub created_at: DateTime<Utc>,
}

impl Goal {
  pub fn is_complete(&self) -> bool {
    self.saved_amount >= self.target_amount
  }
}

impl Record for Goal {
  const COLLECTION: Collection = Collection::Goals;
  const ORDER_FIELD: Option<&'static str> = Some("created_at");

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn owner_id(&self) -> &str {
    &self.owner_id
  }

  fn apply_increment(&mut self, field: &str, delta: Decimal) -> bool {
    if field == "saved_amount" {
      // The local mirror of the remote atomic increment never goes below 0.
      self.saved_amount = (self.saved_amount + delta).max(Decimal::ZERO);
      true
    } else {
      false
    }
  }
}

/// Input for creating a goal; the service stamps `created_at` and starts
/// `saved_amount` at 0.
#[derive(Debug, Clone)]
pub struct NewGoal {
  pub name: String,
  pub target_amount: Decimal,
  pub owner_id: String,
}

/// A recurring monthly subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
  pub id: String,
  pub name: String,
  pub amount: Decimal,
  /// Day of month the payment is due (1-31).
  pub due_day: u8,
  pub owner_id: String,
}

impl Record for Subscription {
  const COLLECTION: Collection = Collection::Subscriptions;

  fn id(&self) -> &str {
    &self.id
  }

  fn set_id(&mut self, id: String) {
    self.id = id;
  }

  fn owner_id(&self) -> &str {
    &self.owner_id
  }
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
  pub name: String,
  pub amount: Decimal,
  pub due_day: u8,
  pub owner_id: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cache_keys_are_owner_scoped() {
    assert_eq!(
      Collection::Transactions.cache_key("u1"),
      "user_transactions_u1"
    );
    assert_eq!(Collection::Budget.cache_key("u2"), "user_budget_u2");
  }

  #[test]
  fn goal_increment_clamps_at_zero() {
    let mut goal = Goal {
      id: "g1".into(),
      name: "Vacances".into(),
      target_amount: Decimal::new(500, 0),
      saved_amount: Decimal::new(100, 0),
      owner_id: "u1".into(),
      created_at: chrono::Utc::now(),
    };

    assert!(goal.apply_increment("saved_amount", Decimal::new(-300, 0)));
    assert_eq!(goal.saved_amount, Decimal::ZERO);

    assert!(!goal.apply_increment("target_amount", Decimal::ONE));
  }

  #[test]
  fn tx_kind_serializes_lowercase() {
    assert_eq!(
      serde_json::to_string(&TxKind::Expense).unwrap(),
      "\"expense\""
    );
    assert_eq!(serde_json::to_string(&TxKind::Income).unwrap(), "\"income\"");
  }
}
