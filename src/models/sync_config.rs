use crate::constants::{
    DEFAULT_MAX_CONCURRENT_USERS, DEFAULT_RUN_TIMEOUT_SECS, EXTENDED_LOOKBACK_DAYS,
    FREQUENT_LOOKBACK_DAYS,
};
use std::time::Duration;

/// Run cadence for the reconciler. Frequent runs cover a short recent window;
/// extended runs re-fetch a deeper window to pick up provider revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCadence {
    /// Frequent run, 30-day lookback
    Frequent,
    /// Extended run, 90-day lookback
    Extended,
}

impl RunCadence {
    pub fn lookback_days(&self) -> u32 {
        match self {
            RunCadence::Frequent => FREQUENT_LOOKBACK_DAYS,
            RunCadence::Extended => EXTENDED_LOOKBACK_DAYS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunCadence::Frequent => "frequent",
            RunCadence::Extended => "extended",
        }
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "frequent" | "daily" => Ok(RunCadence::Frequent),
            "extended" | "deep" => Ok(RunCadence::Extended),
            _ => Err(format!(
                "Invalid cadence: {}. Valid options: frequent, extended",
                s
            )),
        }
    }
}

/// Configuration for one reconciliation run
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub cadence: RunCadence,

    /// Days of history to request from the provider
    pub lookback_days: u32,

    /// Bounded worker pool size (one task per user)
    pub max_concurrent_users: usize,

    /// Global deadline; tasks still outstanding are abandoned
    pub run_timeout: Duration,

    /// Override for the persisted cursor divisor
    pub divisor_override: Option<u32>,

    /// Process every user instead of the rotating slice
    pub full_population: bool,
}

impl SyncConfig {
    pub fn for_cadence(cadence: RunCadence) -> Self {
        Self {
            cadence,
            lookback_days: cadence.lookback_days(),
            max_concurrent_users: DEFAULT_MAX_CONCURRENT_USERS,
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            divisor_override: None,
            full_population: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::for_cadence(RunCadence::Frequent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_lookback() {
        assert_eq!(RunCadence::Frequent.lookback_days(), 30);
        assert_eq!(RunCadence::Extended.lookback_days(), 90);
    }

    #[test]
    fn test_cadence_parse() {
        assert_eq!(RunCadence::parse("frequent").unwrap(), RunCadence::Frequent);
        assert_eq!(RunCadence::parse("EXTENDED").unwrap(), RunCadence::Extended);
        assert!(RunCadence::parse("hourly").is_err());
    }
}
