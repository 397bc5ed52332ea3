mod balance;
mod cursor;
mod outcome;
mod sync_config;

pub use balance::{AccountBalanceSeries, BalanceRecord, UserBalanceDocument};
pub use cursor::SyncBatchCursor;
pub use outcome::{RunSummary, SyncPhase, SyncReport, SyncStats, UserSyncOutcome, WriteOutcome};
pub use sync_config::{RunCadence, SyncConfig};
