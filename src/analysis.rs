//! Spending pace analysis against the monthly budget.
//!
//! Compares actual spending to the linear pace the budget allows: with a
//! budget of 3000 on day 10 of a 30-day month, expected spending is 1000.
//! A 10% overshoot is tolerated, 20% earns a warning, beyond that the
//! projection says when the money runs out.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
  Safe,
  Warning,
  Danger,
}

/// Verdict on the month's spending pace.
#[derive(Debug, Clone, PartialEq)]
pub struct SpendingHealth {
  pub status: HealthStatus,
  pub message: String,
}

/// Rate the month's spending against `budget` as of `today`.
pub fn spending_health(budget: Decimal, expenses: Decimal, today: NaiveDate) -> SpendingHealth {
  if budget <= Decimal::ZERO {
    return SpendingHealth {
      status: HealthStatus::Warning,
      message: "Set a monthly budget to get spending advice.".to_string(),
    };
  }

  let current_day = Decimal::from(today.day());
  let expected = budget * current_day / Decimal::from(days_in_month(today));
  let warning_threshold = expected * Decimal::new(11, 1); // +10%
  let danger_threshold = expected * Decimal::new(12, 1); // +20%

  if expenses <= warning_threshold {
    SpendingHealth {
      status: HealthStatus::Safe,
      message: "On track to stay within budget this month.".to_string(),
    }
  } else if expenses <= danger_threshold {
    SpendingHealth {
      status: HealthStatus::Warning,
      message: "Spending slightly faster than the daily average.".to_string(),
    }
  } else {
    let daily_average = expenses / current_day;
    let remaining = budget - expenses;
    let days_left = if remaining > Decimal::ZERO {
      (remaining / daily_average).floor().to_i64().unwrap_or(0)
    } else {
      0
    };
    SpendingHealth {
      status: HealthStatus::Danger,
      message: format!(
        "At this pace the budget runs out in {} days.",
        days_left
      ),
    }
  }
}

fn days_in_month(date: NaiveDate) -> u32 {
  let next_month_first = if date.month() == 12 {
    NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
  } else {
    NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
  };
  next_month_first
    .and_then(|d| d.pred_opt())
    .map(|d| d.day())
    .unwrap_or(30)
}
