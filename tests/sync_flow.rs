//! End-to-end sync flow over the SQLite cache: offline writes survive a
//! restart and replay once connectivity returns.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use centime::cache::SqliteStorage;
use centime::models::{NewGoal, NewTransaction, TxKind};
use centime::remote::MemoryStore;
use centime::services::Services;
use centime::sync::is_temp_id;

fn new_transaction(amount: i64) -> NewTransaction {
  NewTransaction {
    amount: Decimal::new(amount, 0),
    category: "Nourriture".into(),
    description: "marché".into(),
    date: "2024-03-05T10:00:00Z".parse().unwrap(),
    owner_id: "u1".into(),
    kind: TxKind::Expense,
  }
}

#[tokio::test]
async fn offline_writes_survive_restart_and_replay() {
  let dir = tempfile::tempdir().unwrap();
  let db_path = dir.path().join("cache.db");
  let remote = Arc::new(MemoryStore::new());
  remote.set_offline(true);

  // First session: log a transaction and a goal while offline.
  let temp_tx_id;
  {
    let storage = SqliteStorage::open_at(&db_path).unwrap();
    let services = Services::new(Arc::clone(&remote), storage, Duration::from_secs(30));

    temp_tx_id = services.transactions.add(new_transaction(100)).await;
    assert!(is_temp_id(&temp_tx_id));

    services
      .goals
      .add(NewGoal {
        name: "Vacances".into(),
        target_amount: Decimal::new(500, 0),
        owner_id: "u1".into(),
      })
      .await;

    assert_eq!(services.pending_count("u1"), 2);
  }

  // Second session, same device: the cache and the queue survived.
  let storage = SqliteStorage::open_at(&db_path).unwrap();
  let services = Services::new(Arc::clone(&remote), storage, Duration::from_secs(30));
  assert_eq!(services.pending_count("u1"), 2);

  let cached = services.transactions.list("u1").await; // offline -> cache
  assert_eq!(cached.len(), 1);
  assert_eq!(cached[0].id, temp_tx_id);
  assert_eq!(cached[0].amount, Decimal::new(100, 0));

  // Connectivity returns: replay swaps ids, leaves no duplicates.
  remote.set_offline(false);
  let report = services.flush_pending("u1").await;
  assert_eq!(report.replayed, 2);
  assert_eq!(services.pending_count("u1"), 0);

  let transactions = services.transactions.list("u1").await;
  assert_eq!(transactions.len(), 1);
  assert!(!is_temp_id(&transactions[0].id));
  assert_eq!(remote.documents("transactions").len(), 1);
  assert_eq!(remote.documents("goals").len(), 1);

  // Funding the now-confirmed goal goes through the remote atomic path.
  let goal_id = services.goals.list("u1").await[0].id.clone();
  assert!(services.goals.fund("u1", &goal_id, Decimal::new(200, 0)).await);
  assert!(services.goals.fund("u1", &goal_id, Decimal::new(200, 0)).await);
  assert_eq!(
    services.goals.list("u1").await[0].saved_amount,
    Decimal::new(400, 0)
  );
}

#[tokio::test]
async fn cached_dates_round_trip_as_rfc3339_strings() {
  let dir = tempfile::tempdir().unwrap();
  let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();
  let remote = Arc::new(MemoryStore::new());
  let services = Services::new(remote, storage, Duration::from_secs(30));

  services.transactions.add(new_transaction(42)).await;

  let listed = services.transactions.list("u1").await;
  assert_eq!(
    listed[0].date,
    "2024-03-05T10:00:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()
  );
}
