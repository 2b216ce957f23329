//! CLI commands driving the sync services.
//!
//! Each command plays the role of one of the app's screens: it wires the
//! SQLite cache and HTTP remote into the services, runs one operation and
//! prints the result.

use chrono::{Datelike, Utc};
use clap::Subcommand;
use color_eyre::Result;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::analysis::{self, HealthStatus};
use crate::cache::SqliteStorage;
use crate::config::Config;
use crate::models::{NewGoal, NewSubscription, NewTransaction, Transaction, TxKind};
use crate::remote::HttpStore;
use crate::services::Services;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Log an expense (or income with --income)
  Add {
    amount: Decimal,
    category: String,
    #[arg(short, long, default_value = "")]
    description: String,
    /// Log as income instead of expense
    #[arg(long)]
    income: bool,
  },
  /// List transactions, newest first
  List,
  /// Watch transactions live until Ctrl-C
  Watch,
  /// Savings goals
  #[command(subcommand)]
  Goal(GoalCommand),
  /// Recurring subscriptions
  #[command(subcommand)]
  Sub(SubCommand),
  /// Monthly budget
  #[command(subcommand)]
  Budget(BudgetCommand),
  /// Check spending pace against the monthly budget
  Health,
  /// Replay writes queued while offline
  Sync,
}

#[derive(Subcommand, Debug)]
pub enum GoalCommand {
  /// Create a savings goal
  Add { name: String, target: Decimal },
  /// Move money into a goal
  Fund { id: String, amount: Decimal },
  /// List goals
  List,
  /// Delete a goal
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
  /// Add a subscription (due_day is the day of month, 1-31)
  Add {
    name: String,
    amount: Decimal,
    due_day: u8,
  },
  /// List subscriptions
  List,
  /// Delete a subscription
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum BudgetCommand {
  /// Show the monthly budget
  Get,
  /// Set the monthly budget
  Set { amount: Decimal },
}

pub async fn run(config: &Config, command: Command) -> Result<()> {
  let storage = match &config.cache_path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  let remote = Arc::new(HttpStore::new(&config.remote.base_url, Config::api_token())?);
  let services = Services::new(remote, storage, config.poll_interval());
  let owner = config.owner_id.as_str();

  match command {
    Command::Add {
      amount,
      category,
      description,
      income,
    } => {
      let id = services
        .transactions
        .add(NewTransaction {
          amount,
          category,
          description,
          date: Utc::now(),
          owner_id: owner.to_string(),
          kind: if income { TxKind::Income } else { TxKind::Expense },
        })
        .await;
      if crate::sync::is_temp_id(&id) {
        println!("Logged offline as {} (will sync later)", id);
      } else {
        println!("Logged as {}", id);
      }
    }

    Command::List => {
      let transactions = services.transactions.list(owner).await;
      if transactions.is_empty() {
        println!("No transactions.");
      }
      for t in &transactions {
        print_transaction(t);
      }
    }

    Command::Watch => {
      let handle = services.transactions.subscribe(owner, |transactions| {
        println!("--- {} transaction(s) ---", transactions.len());
        for t in &transactions {
          print_transaction(t);
        }
      });
      tokio::signal::ctrl_c().await?;
      handle.unsubscribe();
    }

    Command::Goal(goal_command) => match goal_command {
      GoalCommand::Add { name, target } => {
        let id = services
          .goals
          .add(NewGoal {
            name,
            target_amount: target,
            owner_id: owner.to_string(),
          })
          .await;
        println!("Goal created: {}", id);
      }
      GoalCommand::Fund { id, amount } => {
        if services.goals.fund(owner, &id, amount).await {
          println!("Funded {} with {}", id, amount);
        } else {
          println!("No goal with id {}", id);
        }
      }
      GoalCommand::List => {
        for goal in services.goals.list(owner).await {
          let mark = if goal.is_complete() { " (reached)" } else { "" };
          println!(
            "{}  {}  {}/{}{}",
            goal.id, goal.name, goal.saved_amount, goal.target_amount, mark
          );
        }
      }
      GoalCommand::Delete { id } => {
        services.goals.delete(owner, &id).await;
        println!("Deleted {}", id);
      }
    },

    Command::Sub(sub_command) => match sub_command {
      SubCommand::Add {
        name,
        amount,
        due_day,
      } => {
        let id = services
          .subscriptions
          .add(NewSubscription {
            name,
            amount,
            due_day,
            owner_id: owner.to_string(),
          })
          .await;
        println!("Subscription added: {}", id);
      }
      SubCommand::List => {
        for sub in services.subscriptions.list(owner).await {
          println!(
            "{}  {}  {}/month, due day {}",
            sub.id, sub.name, sub.amount, sub.due_day
          );
        }
      }
      SubCommand::Delete { id } => {
        services.subscriptions.delete(owner, &id).await;
        println!("Deleted {}", id);
      }
    },

    Command::Budget(budget_command) => match budget_command {
      BudgetCommand::Get => match services.budget.get(owner).await {
        Some(amount) => println!("Monthly budget: {}", amount),
        None => println!("No budget set."),
      },
      BudgetCommand::Set { amount } => {
        // Unlike list mutations, a failed budget save is reported: the
        // caller has no other way to know it must retry.
        services.budget.set(owner, amount).await?;
        println!("Monthly budget set to {}", amount);
      }
    },

    Command::Health => {
      let budget = services.budget.get(owner).await.unwrap_or(Decimal::ZERO);
      let today = Utc::now().date_naive();
      let expenses = services
        .transactions
        .monthly_expenses(owner, today.year(), today.month())
        .await;
      let health = analysis::spending_health(budget, expenses, today);
      let label = match health.status {
        HealthStatus::Safe => "OK",
        HealthStatus::Warning => "WARN",
        HealthStatus::Danger => "DANGER",
      };
      println!("[{}] spent {} of {} — {}", label, expenses, budget, health.message);
    }

    Command::Sync => {
      let pending = services.pending_count(owner);
      if pending == 0 {
        println!("Nothing to sync.");
        return Ok(());
      }
      let report = services.flush_pending(owner).await;
      println!(
        "Replayed {} op(s), {} still pending, {} dropped",
        report.replayed, report.retained, report.dropped
      );
    }
  }

  Ok(())
}

fn print_transaction(t: &Transaction) {
  let sign = match t.kind {
    TxKind::Expense => "-",
    TxKind::Income => "+",
  };
  println!(
    "{}  {}{:>10}  {:<14}  {}  {}",
    t.date.format("%Y-%m-%d"),
    sign,
    t.amount,
    t.category,
    t.id,
    t.description
  );
}
