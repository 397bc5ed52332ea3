use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One day's balance figures for one account, as reported by the provider.
///
/// Uniquely identified by `(account_id, date)` within a series. A record is
/// only ever superseded by a later fetch covering the same date; the provider
/// may revise recent days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub date: NaiveDate,
    pub available: Option<Decimal>,
    pub current: Option<Decimal>,
    pub iso_currency_code: String,
    pub limit: Option<Decimal>,
    pub unofficial_currency_code: Option<String>,
}

/// Per-account balance history plus the provider's derived statistics.
///
/// The four statistics are computed upstream over the fetched window only and
/// are carried through verbatim; they are never recomputed from the merged
/// history held in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalanceSeries {
    /// Defaulted so one account missing its id rejects that account,
    /// not the whole payload
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub balances: Vec<BalanceRecord>,
    pub days_negative: i64,
    pub days_single_digit: i64,
    pub days_double_digit: i64,
    pub median_balance: Decimal,
}

impl AccountBalanceSeries {
    /// Earliest fetched date, if any
    pub fn first_date(&self) -> Option<NaiveDate> {
        self.balances.first().map(|r| r.date)
    }

    /// Latest fetched date, if any
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.balances.last().map(|r| r.date)
    }
}

/// The persisted per-user document: one entry per account, unique by
/// `account_id`, plus the synced window boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBalanceDocument {
    pub user_id: String,
    pub accounts_balances: Vec<AccountBalanceSeries>,
    pub window_from: NaiveDate,
    pub window_to: NaiveDate,
    pub last_updated: DateTime<Utc>,
}
