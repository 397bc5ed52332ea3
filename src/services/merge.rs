//! Merge engine: combines a freshly fetched balance window with the
//! persisted series for the same account.
//!
//! The fetched window always extends through today, so when its first date is
//! found in the existing series the fetched records supersede everything from
//! that point on. When the splice point cannot be located (the window starts
//! before recorded history, or past the end of it) the engine falls back to
//! keeping every existing record whose date is absent from the fetched window
//! and appending the whole fetched window.
//!
//! Statistics are always carried from the fetched payload. The provider
//! computes them over the fetched window only; recomputing them over the
//! merged history would change their meaning.

use crate::error::{Error, Result};
use crate::models::AccountBalanceSeries;
use std::collections::HashSet;

/// Reject payloads the merge cannot reason about: a missing account id or a
/// fetched window that is not strictly ascending by date.
pub fn validate_fetched(fetched: &AccountBalanceSeries) -> Result<()> {
    if fetched.account_id.trim().is_empty() {
        return Err(Error::MalformedSeries {
            account_id: "<missing>".to_string(),
            reason: "fetched payload has no account_id".to_string(),
        });
    }

    for pair in fetched.balances.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(Error::MalformedSeries {
                account_id: fetched.account_id.clone(),
                reason: format!(
                    "fetched dates not strictly ascending: {} then {}",
                    pair[0].date, pair[1].date
                ),
            });
        }
    }

    Ok(())
}

/// Merge a fetched window into the existing persisted series for one account.
///
/// Guarantees on the returned series: no two records share a date, records
/// are sorted ascending by date, and re-applying the same fetched window is
/// a no-op (idempotent).
pub fn merge_series(
    existing: Option<&AccountBalanceSeries>,
    fetched: AccountBalanceSeries,
) -> Result<AccountBalanceSeries> {
    validate_fetched(&fetched)?;

    let existing = match existing {
        // First observation of this account: the fetched series is the result
        None => return Ok(fetched),
        Some(existing) => existing,
    };

    let merged_balances = match fetched.first_date() {
        None => existing.balances.clone(),
        Some(window_start) => {
            match existing.balances.iter().position(|r| r.date == window_start) {
                Some(splice_idx) => {
                    // Splice: fetched data supersedes the overlapping tail
                    let mut merged = existing.balances[..splice_idx].to_vec();
                    merged.extend(fetched.balances.iter().cloned());
                    merged
                }
                None => {
                    // Fallback: keep existing records with dates the window
                    // does not cover, then append the whole window
                    let fetched_dates: HashSet<_> =
                        fetched.balances.iter().map(|r| r.date).collect();
                    let mut merged: Vec<_> = existing
                        .balances
                        .iter()
                        .filter(|r| !fetched_dates.contains(&r.date))
                        .cloned()
                        .collect();
                    merged.extend(fetched.balances.iter().cloned());
                    merged.sort_by_key(|r| r.date);
                    merged
                }
            }
        }
    };

    Ok(AccountBalanceSeries {
        account_id: fetched.account_id,
        balances: merged_balances,
        days_negative: fetched.days_negative,
        days_single_digit: fetched.days_single_digit,
        days_double_digit: fetched.days_double_digit,
        median_balance: fetched.median_balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BalanceRecord;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::collections::HashSet;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(n as i64 - 1)
    }

    fn record(n: u32, current: i64) -> BalanceRecord {
        BalanceRecord {
            date: day(n),
            available: Some(Decimal::new(current, 2)),
            current: Some(Decimal::new(current, 2)),
            iso_currency_code: "USD".to_string(),
            limit: None,
            unofficial_currency_code: None,
        }
    }

    fn series(account_id: &str, days: &[u32]) -> AccountBalanceSeries {
        AccountBalanceSeries {
            account_id: account_id.to_string(),
            balances: days.iter().map(|&n| record(n, n as i64 * 100)).collect(),
            days_negative: 0,
            days_single_digit: 1,
            days_double_digit: 2,
            median_balance: Decimal::new(5000, 2),
        }
    }

    fn dates(series: &AccountBalanceSeries) -> Vec<NaiveDate> {
        series.balances.iter().map(|r| r.date).collect()
    }

    fn assert_invariants(series: &AccountBalanceSeries) {
        let ds = dates(series);
        let unique: HashSet<_> = ds.iter().collect();
        assert_eq!(unique.len(), ds.len(), "duplicate dates in merged series");
        let mut sorted = ds.clone();
        sorted.sort();
        assert_eq!(sorted, ds, "merged series not sorted ascending");
    }

    #[test]
    fn test_no_existing_series_is_fetched_verbatim() {
        let fetched = series("acc-1", &[1, 2, 3]);
        let merged = merge_series(None, fetched.clone()).unwrap();
        assert_eq!(merged, fetched);
    }

    #[test]
    fn test_splice_replaces_overlapping_tail() {
        // existing d1..d10, fetched d8..d12 -> [d1..d7] ++ [d8..d12]
        let existing = series("acc-1", &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let fetched = series("acc-1", &[8, 9, 10, 11, 12]);
        let merged = merge_series(Some(&existing), fetched).unwrap();

        assert_eq!(merged.balances.len(), 12);
        assert_eq!(dates(&merged), (1..=12).map(day).collect::<Vec<_>>());
        assert_invariants(&merged);
        // d8..d12 must be the fetched copies, not the existing ones
        assert_eq!(merged.balances[7].current, Some(Decimal::new(800, 2)));
    }

    #[test]
    fn test_fallback_keeps_both_sides_across_gap() {
        // existing d1..d5, fetched d20..d25: no overlap, nothing dropped
        let existing = series("acc-1", &[1, 2, 3, 4, 5]);
        let fetched = series("acc-1", &[20, 21, 22, 23, 24, 25]);
        let merged = merge_series(Some(&existing), fetched).unwrap();

        assert_eq!(merged.balances.len(), 11);
        let expected: Vec<_> = (1..=5).chain(20..=25).map(day).collect();
        assert_eq!(dates(&merged), expected);
        assert_invariants(&merged);
    }

    #[test]
    fn test_fallback_deduplicates_interior_overlap() {
        // Window starts on a date the existing series never recorded (d4
        // missing), so the splice point cannot be found; shared dates must
        // still appear exactly once, with the fetched copy winning.
        let existing = series("acc-1", &[1, 2, 3, 5, 6]);
        let mut fetched = series("acc-1", &[4, 5, 6, 7]);
        for r in &mut fetched.balances {
            r.current = Some(Decimal::new(-1, 0));
        }
        let merged = merge_series(Some(&existing), fetched).unwrap();

        assert_eq!(dates(&merged), (1..=7).map(day).collect::<Vec<_>>());
        assert_invariants(&merged);
        let d5 = merged.balances.iter().find(|r| r.date == day(5)).unwrap();
        assert_eq!(d5.current, Some(Decimal::new(-1, 0)));
    }

    #[test]
    fn test_idempotent_reapplication() {
        let existing = series("acc-1", &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let fetched = series("acc-1", &[8, 9, 10, 11, 12]);

        let once = merge_series(Some(&existing), fetched.clone()).unwrap();
        let twice = merge_series(Some(&once), fetched).unwrap();

        assert_eq!(once, twice);
        assert_invariants(&twice);
    }

    #[test]
    fn test_statistics_come_from_fetched_payload() {
        let existing = series("acc-1", &[1, 2, 3]);
        let mut fetched = series("acc-1", &[3, 4, 5]);
        fetched.days_negative = 9;
        fetched.days_single_digit = 8;
        fetched.days_double_digit = 7;
        fetched.median_balance = Decimal::new(12345, 2);

        let merged = merge_series(Some(&existing), fetched).unwrap();
        assert_eq!(merged.days_negative, 9);
        assert_eq!(merged.days_single_digit, 8);
        assert_eq!(merged.days_double_digit, 7);
        assert_eq!(merged.median_balance, Decimal::new(12345, 2));
    }

    #[test]
    fn test_empty_fetched_window_preserves_existing_records() {
        let existing = series("acc-1", &[1, 2, 3]);
        let mut fetched = series("acc-1", &[]);
        fetched.median_balance = Decimal::new(777, 2);

        let merged = merge_series(Some(&existing), fetched).unwrap();
        assert_eq!(dates(&merged), dates(&existing));
        // Statistics still carried from the fetch
        assert_eq!(merged.median_balance, Decimal::new(777, 2));
    }

    #[test]
    fn test_rejects_missing_account_id() {
        let fetched = series("", &[1, 2, 3]);
        let err = merge_series(None, fetched).unwrap_err();
        assert!(matches!(err, Error::MalformedSeries { .. }));
    }

    #[test]
    fn test_rejects_non_chronological_window() {
        let mut fetched = series("acc-1", &[1, 2, 3]);
        fetched.balances.swap(0, 2);
        let err = merge_series(None, fetched).unwrap_err();
        assert!(matches!(err, Error::MalformedSeries { .. }));
    }

    #[test]
    fn test_rejects_duplicate_dates_in_window() {
        let mut fetched = series("acc-1", &[1, 2]);
        let dup = fetched.balances[1].clone();
        fetched.balances.push(dup);
        let err = merge_series(None, fetched).unwrap_err();
        assert!(matches!(err, Error::MalformedSeries { .. }));
    }

    #[test]
    fn test_splice_at_first_existing_record() {
        // Window covers the entire recorded history
        let existing = series("acc-1", &[1, 2, 3]);
        let fetched = series("acc-1", &[1, 2, 3, 4]);
        let merged = merge_series(Some(&existing), fetched).unwrap();
        assert_eq!(dates(&merged), (1..=4).map(day).collect::<Vec<_>>());
        assert_invariants(&merged);
    }
}
