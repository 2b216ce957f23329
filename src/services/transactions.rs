//! Transaction service: optimistic logging of expenses and income.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheStorage, LocalCache};
use crate::models::{Collection, NewTransaction, Transaction, TxKind};
use crate::remote::{timestamp, DocumentStore, Filter, FilterOp, QuerySpec};
use crate::sync::{ChangeBus, CollectionSync, Outbox, SubscribeOptions, SubscriptionHandle};

/// Sync service for the transactions collection.
pub struct Transactions<R: DocumentStore, S: CacheStorage> {
  sync: CollectionSync<Transaction, R, S>,
}

impl<R: DocumentStore, S: CacheStorage + 'static> Transactions<R, S> {
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

  /// Log a transaction. Returns the authoritative id at call completion:
  /// remote on confirmation, temporary when the write is queued.
  pub async fn add(&self, new: NewTransaction) -> String {
    self
      .sync
      .add(Transaction {
        id: String::new(),
        amount: new.amount,
        category: new.category,
        description: new.description,
        date: new.date,
        owner_id: new.owner_id,
        kind: new.kind,
      })
      .await
  }

  /// Merge an edited transaction over the cached record with the same id.
  /// Returns false when no cached record matches.
  pub async fn update(&self, transaction: Transaction) -> bool {
    self.sync.update(transaction).await
  }

  pub async fn delete(&self, owner_id: &str, id: &str) {
    self.sync.delete(owner_id, id).await
  }

  /// Observe the owner's transactions, newest first.
  pub fn subscribe(
    &self,
    owner_id: &str,
    callback: impl Fn(Vec<Transaction>) + Send + Sync + 'static,
  ) -> SubscriptionHandle {
    self.sync.subscribe(owner_id, callback)
  }

  /// Observe one category only, optionally capped.
  pub fn subscribe_category(
    &self,
    owner_id: &str,
    category: &str,
    limit: Option<u32>,
    callback: impl Fn(Vec<Transaction>) + Send + Sync + 'static,
  ) -> SubscriptionHandle {
    let options = SubscribeOptions {
      filter: Some(Filter {
        field: "category".to_string(),
        op: FilterOp::Eq,
        value: json!(category),
      }),
      limit,
    };
    self.sync.subscribe_with(owner_id, options, callback)
  }

  /// One-shot fetch, remote when reachable, cache otherwise.
  pub async fn list(&self, owner_id: &str) -> Vec<Transaction> {
    self.sync.list(owner_id).await
  }

  /// Total spent (expenses only) in one calendar month. Queries the
  /// remote store with a date-range filter; offline, sums the cached
  /// list instead.
  pub async fn monthly_expenses(&self, owner_id: &str, year: i32, month: u32) -> Decimal {
    let Some((start, end)) = month_bounds(year, month) else {
      return Decimal::ZERO;
    };

    let query = QuerySpec::for_owner(owner_id)
      .filter("date", FilterOp::Gte, json!(timestamp::format(&start)))
      .filter("date", FilterOp::Lte, json!(timestamp::format(&end)));

    let transactions = match self
      .sync
      .remote()
      .query_documents(Collection::Transactions.remote_name(), &query)
      .await
    {
      Ok(docs) => crate::sync::decode_documents::<Transaction>(&docs),
      Err(e) => {
        debug!("monthly expenses falling back to cache: {}", e);
        let key = Collection::Transactions.cache_key(owner_id);
        self
          .sync
          .cache()
          .load_list::<Transaction>(&key)
          .into_iter()
          .filter(|t| t.date >= start && t.date <= end)
          .collect()
      }
    };

    transactions
      .iter()
      .filter(|t| t.kind == TxKind::Expense)
      .map(|t| t.amount)
      .sum()
  }
}

/// First and last instant of a calendar month, UTC.
fn month_bounds(
  year: i32,
  month: u32,
) -> Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> {
  let first = NaiveDate::from_ymd_opt(year, month, 1)?;
  let next = if month == 12 {
    NaiveDate::from_ymd_opt(year + 1, 1, 1)?
  } else {
    NaiveDate::from_ymd_opt(year, month + 1, 1)?
  };
  let start = first.and_hms_opt(0, 0, 0)?.and_utc();
  let end = next.and_hms_opt(0, 0, 0)?.and_utc() - chrono::Duration::milliseconds(1);
  Some((start, end))
}
