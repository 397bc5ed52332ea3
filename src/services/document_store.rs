//! Balance document store.
//!
//! SQLite stands in for the document database: one `user_balance_documents`
//! row per user plus nested `account_balance_series` rows, unique per
//! `(user_id, account_id)`. The only mutation contract the reconciler relies
//! on is the three-tier conditional write in [`BalanceStore::apply_series`]:
//! update-in-place, then append-new-entry, then create-new-document, with
//! each tier's precondition re-checked so exactly one tier fires.

use crate::constants::STORE_BUSY_TIMEOUT_SECS;
use crate::error::{Error, Result};
use crate::models::{
    AccountBalanceSeries, BalanceRecord, RunSummary, SyncBatchCursor, SyncReport,
    UserBalanceDocument, WriteOutcome,
};
use crate::services::window::BalanceWindow;
use crate::utils::{format_date, parse_date};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

/// Database schema version for migrations
const DB_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone)]
pub struct BalanceStore {
    pool: SqlitePool,
}

impl BalanceStore {
    /// Open (or create) the balance store with WAL and a busy timeout so the
    /// pool is safe for concurrent per-user tasks.
    pub async fn new(database_path: PathBuf) -> Result<Self> {
        info!("Opening balance store at: {:?}", database_path);

        if let Some(parent) = database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(STORE_BUSY_TIMEOUT_SECS))
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(connect_options).await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_balance_documents (
                user_id TEXT PRIMARY KEY CHECK (length(user_id) > 0),
                window_from TEXT NOT NULL,
                window_to TEXT NOT NULL,
                last_updated DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_balance_series (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL CHECK (length(user_id) > 0),
                account_id TEXT NOT NULL CHECK (length(account_id) > 0),
                balances TEXT NOT NULL CHECK (json_valid(balances)),
                days_negative INTEGER NOT NULL,
                days_single_digit INTEGER NOT NULL,
                days_double_digit INTEGER NOT NULL,
                median_balance TEXT NOT NULL,
                UNIQUE(user_id, account_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_series_user ON account_balance_series(user_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_cursors (
                name TEXT PRIMARY KEY,
                divisor INTEGER NOT NULL,
                counter INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                run_id TEXT PRIMARY KEY,
                cadence TEXT NOT NULL,
                started_at DATETIME NOT NULL,
                elapsed_secs INTEGER NOT NULL,
                users_total INTEGER NOT NULL,
                users_targeted INTEGER NOT NULL,
                users_succeeded INTEGER NOT NULL,
                users_failed INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)")
            .bind(DB_SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Load the persisted series for one `(user_id, account_id)` pair
    pub async fn load_series(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<Option<AccountBalanceSeries>> {
        let row = sqlx::query(
            r#"
            SELECT account_id, balances, days_negative, days_single_digit,
                   days_double_digit, median_balance
            FROM account_balance_series
            WHERE user_id = ?1 AND account_id = ?2
            "#,
        )
        .bind(user_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_series).transpose()
    }

    /// Load the full user document (all account series plus window bounds)
    pub async fn load_document(&self, user_id: &str) -> Result<Option<UserBalanceDocument>> {
        let doc_row = sqlx::query(
            "SELECT window_from, window_to, last_updated FROM user_balance_documents WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let doc_row = match doc_row {
            Some(row) => row,
            None => return Ok(None),
        };

        let series_rows = sqlx::query(
            r#"
            SELECT account_id, balances, days_negative, days_single_digit,
                   days_double_digit, median_balance
            FROM account_balance_series
            WHERE user_id = ?1
            ORDER BY account_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let accounts_balances = series_rows
            .into_iter()
            .map(row_to_series)
            .collect::<Result<Vec<_>>>()?;

        let window_from: String = doc_row.try_get("window_from")?;
        let window_to: String = doc_row.try_get("window_to")?;
        let last_updated: DateTime<Utc> = doc_row.try_get("last_updated")?;

        Ok(Some(UserBalanceDocument {
            user_id: user_id.to_string(),
            accounts_balances,
            window_from: parse_date(&window_from)?,
            window_to: parse_date(&window_to)?,
            last_updated,
        }))
    }

    /// Apply a merged series with the three-tier conditional write.
    ///
    /// Tier order is strict and each precondition is re-checked by the store
    /// itself: the update matches only an existing `(user, account)` row; the
    /// document insert takes effect only when no document exists, which
    /// decides append vs. create even when several accounts of one user land
    /// concurrently. `window` supplies `window_from` on first creation only.
    pub async fn apply_series(
        &self,
        user_id: &str,
        series: &AccountBalanceSeries,
        window: &BalanceWindow,
    ) -> Result<WriteOutcome> {
        let balances_json = serde_json::to_string(&series.balances)?;
        let median = series.median_balance.to_string();

        // Tier 1: update-in-place
        let updated = sqlx::query(
            r#"
            UPDATE account_balance_series
            SET balances = ?1, days_negative = ?2, days_single_digit = ?3,
                days_double_digit = ?4, median_balance = ?5
            WHERE user_id = ?6 AND account_id = ?7
            "#,
        )
        .bind(&balances_json)
        .bind(series.days_negative)
        .bind(series.days_single_digit)
        .bind(series.days_double_digit)
        .bind(&median)
        .bind(user_id)
        .bind(&series.account_id)
        .execute(&self.pool)
        .await
        .map_err(|e| self.classify_write_error(user_id, series, e))?;

        if updated.rows_affected() > 0 {
            return Ok(WriteOutcome::Updated);
        }

        // Tiers 2 and 3 share a transaction: whether the document insert took
        // effect distinguishes append from create.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let doc_insert = sqlx::query(
            r#"
            INSERT INTO user_balance_documents (user_id, window_from, window_to, last_updated)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(format_date(&window.start))
        .bind(format_date(&window.end))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| self.classify_write_error(user_id, series, e))?;

        sqlx::query(
            r#"
            INSERT INTO account_balance_series
                (user_id, account_id, balances, days_negative, days_single_digit,
                 days_double_digit, median_balance)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(user_id)
        .bind(&series.account_id)
        .bind(&balances_json)
        .bind(series.days_negative)
        .bind(series.days_single_digit)
        .bind(series.days_double_digit)
        .bind(&median)
        .execute(&mut *tx)
        .await
        .map_err(|e| self.classify_write_error(user_id, series, e))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if doc_insert.rows_affected() > 0 {
            Ok(WriteOutcome::Created)
        } else {
            Ok(WriteOutcome::Appended)
        }
    }

    /// Advance the synced window after a user's accounts have been applied.
    /// `window_to` never moves backwards; `window_from` keeps its creation
    /// value to preserve the original sync boundary.
    pub async fn finalize_window(&self, user_id: &str, window: &BalanceWindow) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_balance_documents
            SET window_to = MAX(window_to, ?1), last_updated = ?2
            WHERE user_id = ?3
            "#,
        )
        .bind(format_date(&window.end))
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically read-increment-write the named batch cursor and return the
    /// counter value in effect for this run. Seeded so the first run ever
    /// lands on slice 0.
    pub async fn advance_cursor(
        &self,
        name: &str,
        default_divisor: u32,
        divisor_override: Option<u32>,
    ) -> Result<SyncBatchCursor> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sync_cursors (name, divisor, counter)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(default_divisor as i64)
        .bind(default_divisor.saturating_sub(1) as i64)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT divisor, counter FROM sync_cursors WHERE name = ?1")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;

        let stored_divisor: i64 = row.try_get("divisor")?;
        let counter: i64 = row.try_get("counter")?;

        let divisor = divisor_override.unwrap_or(stored_divisor as u32).max(1);
        let next = (counter as u32 + 1) % divisor;

        sqlx::query("UPDATE sync_cursors SET divisor = ?1, counter = ?2 WHERE name = ?3")
            .bind(divisor as i64)
            .bind(next as i64)
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(SyncBatchCursor::new(divisor, next))
    }

    /// Read the named cursor without advancing it
    pub async fn cursor(&self, name: &str) -> Result<Option<SyncBatchCursor>> {
        let row = sqlx::query("SELECT divisor, counter FROM sync_cursors WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            let divisor: i64 = row.get("divisor");
            let counter: i64 = row.get("counter");
            SyncBatchCursor::new(divisor as u32, counter as u32)
        }))
    }

    /// Persist a compact per-run summary row
    pub async fn record_run(&self, report: &SyncReport, users_total: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs
                (run_id, cadence, started_at, elapsed_secs, users_total,
                 users_targeted, users_succeeded, users_failed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&report.run_id)
        .bind(report.cadence)
        .bind(report.started_at)
        .bind(report.elapsed.as_secs() as i64)
        .bind(users_total as i64)
        .bind(report.users_targeted as i64)
        .bind(report.stats.users_succeeded as i64)
        .bind(report.stats.users_failed as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent run summaries, newest first
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, cadence, started_at, elapsed_secs,
                   users_targeted, users_succeeded, users_failed
            FROM sync_runs
            ORDER BY started_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RunSummary {
                run_id: row.get("run_id"),
                cadence: row.get("cadence"),
                started_at: row.get("started_at"),
                elapsed_secs: row.get("elapsed_secs"),
                users_targeted: row.get("users_targeted"),
                users_succeeded: row.get("users_succeeded"),
                users_failed: row.get("users_failed"),
            })
            .collect())
    }

    /// Number of user documents in the store
    pub async fn document_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM user_balance_documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of per-account series across all documents
    pub async fn series_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM account_balance_series")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Constraint violations mean the store rejected the document shape. The
    /// intended merged content is logged in full so the write can be replayed
    /// manually; the caller skips only this user's commit.
    fn classify_write_error(
        &self,
        user_id: &str,
        series: &AccountBalanceSeries,
        err: sqlx::Error,
    ) -> Error {
        match err {
            sqlx::Error::Database(db_err) => {
                let payload = serde_json::to_string(series)
                    .unwrap_or_else(|_| "<unserializable>".to_string());
                error!(
                    user_id = %user_id,
                    account_id = %series.account_id,
                    error = %db_err,
                    payload = %payload,
                    "Store rejected balance write; intended content logged for manual replay"
                );
                Error::WriteRejected {
                    user_id: user_id.to_string(),
                    reason: db_err.to_string(),
                }
            }
            other => Error::Database(other.to_string()),
        }
    }
}

fn row_to_series(row: sqlx::sqlite::SqliteRow) -> Result<AccountBalanceSeries> {
    let balances_json: String = row.try_get("balances")?;
    let balances: Vec<BalanceRecord> = serde_json::from_str(&balances_json)?;
    let median_raw: String = row.try_get("median_balance")?;
    let median_balance = rust_decimal::Decimal::from_str(&median_raw)
        .map_err(|e| Error::Parse(format!("Invalid stored median_balance: {}", e)))?;

    Ok(AccountBalanceSeries {
        account_id: row.try_get("account_id")?,
        balances,
        days_negative: row.try_get("days_negative")?,
        days_single_digit: row.try_get("days_single_digit")?,
        days_double_digit: row.try_get("days_double_digit")?,
        median_balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    fn window(from: (i32, u32, u32), to: (i32, u32, u32)) -> BalanceWindow {
        BalanceWindow {
            start: NaiveDate::from_ymd_opt(from.0, from.1, from.2).unwrap(),
            end: NaiveDate::from_ymd_opt(to.0, to.1, to.2).unwrap(),
        }
    }

    fn series(account_id: &str, days: &[u32]) -> AccountBalanceSeries {
        AccountBalanceSeries {
            account_id: account_id.to_string(),
            balances: days
                .iter()
                .map(|&n| crate::models::BalanceRecord {
                    date: NaiveDate::from_ymd_opt(2024, 6, n).unwrap(),
                    available: Some(Decimal::new(n as i64 * 100, 2)),
                    current: Some(Decimal::new(n as i64 * 100, 2)),
                    iso_currency_code: "USD".to_string(),
                    limit: None,
                    unofficial_currency_code: None,
                })
                .collect(),
            days_negative: 0,
            days_single_digit: 2,
            days_double_digit: 3,
            median_balance: Decimal::new(1500, 2),
        }
    }

    async fn test_store() -> (tempfile::TempDir, BalanceStore) {
        let dir = tempdir().unwrap();
        let store = BalanceStore::new(dir.path().join("test.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_three_tier_selection() {
        let (_dir, store) = test_store().await;
        let w = window((2024, 6, 1), (2024, 6, 10));

        // Brand-new user: exactly the create tier fires
        let outcome = store
            .apply_series("user-1", &series("acc-1", &[1, 2, 3]), &w)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Created);

        // Existing user, new account: exactly the append tier fires
        let outcome = store
            .apply_series("user-1", &series("acc-2", &[1, 2, 3]), &w)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Appended);

        // Existing pair: exactly the update tier fires
        let outcome = store
            .apply_series("user-1", &series("acc-1", &[2, 3, 4]), &w)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);

        // One document, two series entries, no duplicates
        assert_eq!(store.document_count().await.unwrap(), 1);
        assert_eq!(store.series_count().await.unwrap(), 2);

        let doc = store.load_document("user-1").await.unwrap().unwrap();
        assert_eq!(doc.accounts_balances.len(), 2);
        let acc1 = &doc.accounts_balances[0];
        assert_eq!(acc1.account_id, "acc-1");
        assert_eq!(
            acc1.balances.first().unwrap().date,
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()
        );
    }

    #[tokio::test]
    async fn test_load_series_round_trip() {
        let (_dir, store) = test_store().await;
        let w = window((2024, 6, 1), (2024, 6, 10));
        let original = series("acc-1", &[5, 6, 7]);

        store.apply_series("user-1", &original, &w).await.unwrap();
        let loaded = store.load_series("user-1", "acc-1").await.unwrap().unwrap();
        assert_eq!(loaded, original);

        assert!(store
            .load_series("user-1", "missing")
            .await
            .unwrap()
            .is_none());
        assert!(store.load_series("ghost", "acc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_window_to_is_monotonic_and_from_is_preserved() {
        let (_dir, store) = test_store().await;
        let first = window((2024, 6, 1), (2024, 6, 10));

        store
            .apply_series("user-1", &series("acc-1", &[1, 2]), &first)
            .await
            .unwrap();
        store.finalize_window("user-1", &first).await.unwrap();

        // A later run with a newer end advances window_to
        let second = window((2024, 6, 5), (2024, 6, 15));
        store.finalize_window("user-1", &second).await.unwrap();
        let doc = store.load_document("user-1").await.unwrap().unwrap();
        assert_eq!(doc.window_to, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
        // window_from keeps the original sync boundary
        assert_eq!(doc.window_from, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());

        // An older end never moves window_to backwards
        let stale = window((2024, 5, 1), (2024, 6, 3));
        store.finalize_window("user-1", &stale).await.unwrap();
        let doc = store.load_document("user-1").await.unwrap().unwrap();
        assert_eq!(doc.window_to, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
    }

    #[tokio::test]
    async fn test_cursor_advances_mod_divisor() {
        let (_dir, store) = test_store().await;

        // Seeded so the first run lands on slice 0
        let c = store.advance_cursor("balance_sync", 3, None).await.unwrap();
        assert_eq!((c.divisor, c.counter), (3, 0));
        let c = store.advance_cursor("balance_sync", 3, None).await.unwrap();
        assert_eq!(c.counter, 1);
        let c = store.advance_cursor("balance_sync", 3, None).await.unwrap();
        assert_eq!(c.counter, 2);
        let c = store.advance_cursor("balance_sync", 3, None).await.unwrap();
        assert_eq!(c.counter, 0);

        // Divisor override reshapes the rotation
        let c = store
            .advance_cursor("balance_sync", 3, Some(2))
            .await
            .unwrap();
        assert_eq!(c.divisor, 2);
        assert!(c.counter < 2);
    }

    #[tokio::test]
    async fn test_write_rejection_reports_user() {
        let (_dir, store) = test_store().await;
        let w = window((2024, 6, 1), (2024, 6, 10));

        // Empty account_id violates the store's schema constraints
        let bad = series("", &[1]);
        let err = store.apply_series("user-1", &bad, &w).await.unwrap_err();
        assert!(matches!(err, Error::WriteRejected { ref user_id, .. } if user_id == "user-1"));

        // Nothing partial was committed
        assert_eq!(store.document_count().await.unwrap(), 0);
        assert_eq!(store.series_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_disjoint_users_match_sequential_state() {
        let (_dir, store) = test_store().await;
        let w = window((2024, 6, 1), (2024, 6, 10));

        let store_a = store.clone();
        let store_b = store.clone();
        let task_a = tokio::spawn(async move {
            store_a
                .apply_series("user-a", &series("acc-a", &[1, 2, 3]), &w)
                .await
                .unwrap();
            store_a.finalize_window("user-a", &w).await.unwrap();
        });
        let task_b = tokio::spawn(async move {
            store_b
                .apply_series("user-b", &series("acc-b", &[4, 5, 6]), &w)
                .await
                .unwrap();
            store_b.finalize_window("user-b", &w).await.unwrap();
        });
        task_a.await.unwrap();
        task_b.await.unwrap();

        let doc_a = store.load_document("user-a").await.unwrap().unwrap();
        let doc_b = store.load_document("user-b").await.unwrap().unwrap();
        assert_eq!(doc_a.accounts_balances, vec![series("acc-a", &[1, 2, 3])]);
        assert_eq!(doc_b.accounts_balances, vec![series("acc-b", &[4, 5, 6])]);
        assert_eq!(store.document_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_summaries_round_trip() {
        let (_dir, store) = test_store().await;

        let report = SyncReport {
            run_id: "abc12345".to_string(),
            cadence: "frequent",
            started_at: Utc::now(),
            elapsed: Duration::from_secs(42),
            users_total: 100,
            users_targeted: 25,
            stats: crate::models::SyncStats {
                users_succeeded: 24,
                users_failed: 1,
                ..Default::default()
            },
        };
        store.record_run(&report, 100).await.unwrap();

        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "abc12345");
        assert_eq!(runs[0].users_succeeded, 24);
        assert_eq!(runs[0].users_failed, 1);
        assert_eq!(runs[0].elapsed_secs, 42);
    }
}
