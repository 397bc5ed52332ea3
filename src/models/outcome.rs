use chrono::{DateTime, Utc};
use std::time::Duration;

/// Which of the three persistence tiers fired for an account.
///
/// Exactly one tier fires per account per run; the explicit result type is
/// what makes the tier selection unit-testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The user document already held this account; its series was replaced
    Updated,
    /// The user document existed but lacked this account; a new entry was appended
    Appended,
    /// No document existed for this user; one was created with this account
    Created,
}

impl WriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Updated => "updated",
            WriteOutcome::Appended => "appended",
            WriteOutcome::Created => "created",
        }
    }
}

/// Lifecycle of one per-user task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Pending,
    Fetching,
    Merging,
    Persisting,
    Done,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Pending => "pending",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Merging => "merging",
            SyncPhase::Persisting => "persisting",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        }
    }
}

/// Result of one user's pipeline run. Per-account errors are contained here;
/// they never propagate to other users' tasks.
#[derive(Debug, Clone)]
pub struct UserSyncOutcome {
    pub user_id: String,
    pub phase: SyncPhase,
    pub accounts_total: usize,
    pub accounts_synced: usize,
    pub accounts_skipped: usize,
    pub accounts_updated: usize,
    pub accounts_appended: usize,
    pub accounts_created: usize,
    pub error: Option<String>,
}

impl UserSyncOutcome {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            phase: SyncPhase::Pending,
            accounts_total: 0,
            accounts_synced: 0,
            accounts_skipped: 0,
            accounts_updated: 0,
            accounts_appended: 0,
            accounts_created: 0,
            error: None,
        }
    }

    pub fn failed(user_id: &str, error: String) -> Self {
        let mut outcome = Self::new(user_id);
        outcome.phase = SyncPhase::Failed;
        outcome.error = Some(error);
        outcome
    }

    pub fn succeeded(&self) -> bool {
        self.phase == SyncPhase::Done
    }

    pub fn tally(&mut self, write: WriteOutcome) {
        self.accounts_synced += 1;
        match write {
            WriteOutcome::Updated => self.accounts_updated += 1,
            WriteOutcome::Appended => self.accounts_appended += 1,
            WriteOutcome::Created => self.accounts_created += 1,
        }
    }
}

/// Aggregated counters across one run
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub users_succeeded: usize,
    pub users_failed: usize,
    pub users_abandoned: usize,
    pub accounts_synced: usize,
    pub accounts_skipped: usize,
    pub accounts_updated: usize,
    pub accounts_appended: usize,
    pub accounts_created: usize,
}

impl SyncStats {
    pub fn absorb(&mut self, outcome: &UserSyncOutcome) {
        if outcome.succeeded() {
            self.users_succeeded += 1;
        } else {
            self.users_failed += 1;
        }
        self.accounts_synced += outcome.accounts_synced;
        self.accounts_skipped += outcome.accounts_skipped;
        self.accounts_updated += outcome.accounts_updated;
        self.accounts_appended += outcome.accounts_appended;
        self.accounts_created += outcome.accounts_created;
    }
}

/// Batch-level result of one coordinator run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub run_id: String,
    pub cadence: &'static str,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub users_total: usize,
    pub users_targeted: usize,
    pub stats: SyncStats,
}

impl SyncReport {
    /// `N/M users succeeded`, the user-visible result of a run
    pub fn completion_line(&self) -> String {
        format!(
            "{}/{} users succeeded",
            self.stats.users_succeeded, self.users_targeted
        )
    }
}

/// One persisted run summary row, shown by the status command
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub cadence: String,
    pub started_at: String,
    pub elapsed_secs: i64,
    pub users_targeted: i64,
    pub users_succeeded: i64,
    pub users_failed: i64,
}
