use crate::utils::format_date;
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// The `[start, end]` date range requested in a single provider fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BalanceWindow {
    pub fn start_str(&self) -> String {
        format_date(&self.start)
    }

    pub fn end_str(&self) -> String {
        format_date(&self.end)
    }
}

/// Compute the fetch window: `end` is today, `start` is today minus the
/// configured lookback. Pure function of the clock and configuration.
pub fn select_window(now: DateTime<Utc>, lookback_days: u32) -> BalanceWindow {
    let end = now.date_naive();
    let start = end - Duration::days(lookback_days as i64);
    BalanceWindow { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_thirty_day_lookback() {
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 12, 30, 0).unwrap();
        let window = select_window(now, 30);
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2024, 5, 15).unwrap());
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2024, 4, 15).unwrap());
    }

    #[test]
    fn test_ninety_day_lookback_crosses_year() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let window = select_window(now, 90);
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2023, 11, 3).unwrap());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    }

    #[test]
    fn test_window_strings() {
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 23, 59, 59).unwrap();
        let window = select_window(now, 5);
        assert_eq!(window.start_str(), "2024-05-10");
        assert_eq!(window.end_str(), "2024-05-15");
    }
}
