//! Tuning constants for the balance reconciliation pipeline.

/// Lookback window for frequent-cadence runs (days)
pub const FREQUENT_LOOKBACK_DAYS: u32 = 30;

/// Lookback window for extended-cadence runs (days)
pub const EXTENDED_LOOKBACK_DAYS: u32 = 90;

/// Default bounded worker pool size (one task per user)
pub const DEFAULT_MAX_CONCURRENT_USERS: usize = 10;

/// Default overall run deadline; outstanding user tasks are abandoned past this
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 3600;

/// Default divisor for the rotating user-population slice.
/// A single run targets roughly 1/divisor of all users.
pub const DEFAULT_CURSOR_DIVISOR: u32 = 7;

/// Name of the persisted cursor row driving the rotating slice
pub const BALANCE_CURSOR_NAME: &str = "balance_sync";

/// Maximum provider request attempts before reporting a terminal error
pub const PROVIDER_MAX_RETRIES: u32 = 5;

/// First backoff delay after a 429; doubles on each subsequent retry
pub const PROVIDER_BACKOFF_BASE_SECS: f64 = 1.0;

/// Cap on a single backoff delay
pub const PROVIDER_BACKOFF_CAP_SECS: f64 = 60.0;

/// Per-request timeout on the provider HTTP client
pub const PROVIDER_REQUEST_TIMEOUT_SECS: u64 = 120;

/// How long a connection waits on a locked store before giving up
pub const STORE_BUSY_TIMEOUT_SECS: u64 = 30;

/// Worker loop: frequent-cadence sync interval (1 day)
pub const FREQUENT_SYNC_INTERVAL_SECS: u64 = 86_400;

/// Worker loop: extended-cadence sync interval (7 days)
pub const EXTENDED_SYNC_INTERVAL_SECS: u64 = 604_800;

/// Calendar date format used on the wire and in the store
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// How many recent run summaries the status command shows
pub const STATUS_RECENT_RUNS: i64 = 10;
