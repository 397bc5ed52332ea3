use crate::constants::DATE_FORMAT;
use crate::error::Error;
use chrono::NaiveDate;
use std::path::PathBuf;

/// Get the balance store database path from environment variable or use default
pub fn get_balance_store_path() -> PathBuf {
    std::env::var("BALANCE_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("balance_data").join("balances.db"))
}

/// Get the backing relational store path from environment variable or use default
pub fn get_backend_db_path() -> PathBuf {
    std::env::var("BACKEND_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("balance_data").join("backend.db"))
}

/// Format a calendar date the way the provider and the store expect it
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| Error::Parse(format!("Invalid date '{}': {}", s, e)))
}

/// Short run identifier attached to every log line of one run
pub fn short_run_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(format_date(&date), "2024-03-09");
        assert_eq!(parse_date("2024-03-09").unwrap(), date);
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(parse_date("03/09/2024").is_err());
        assert!(parse_date("not-a-date").is_err());
    }

    #[test]
    fn test_short_run_id_length() {
        assert_eq!(short_run_id().len(), 8);
    }
}
