//! Sync coordinator: enumerates the target user slice and runs the per-user
//! pipeline (window -> provider fetch -> merge -> persist) with bounded
//! parallelism and a global run deadline.
//!
//! Every per-user and per-account failure is contained in its own task and
//! surfaced through structured logs plus the batch summary; only a fatal
//! setup failure (cursor, backing store) aborts the run before dispatch.

use crate::constants::{BALANCE_CURSOR_NAME, DEFAULT_CURSOR_DIVISOR};
use crate::error::{Error, Result};
use crate::models::{SyncConfig, SyncPhase, SyncReport, SyncStats, UserSyncOutcome};
use crate::services::document_store::BalanceStore;
use crate::services::merge::merge_series;
use crate::services::provider::{BalanceProvider, FetchedBalances};
use crate::services::user_directory::{rotation_slice, UserDirectory};
use crate::services::window::{select_window, BalanceWindow};
use crate::utils::short_run_id;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub struct BalanceSync {
    config: SyncConfig,
    provider: Arc<BalanceProvider>,
    store: BalanceStore,
    directory: UserDirectory,
}

impl BalanceSync {
    pub fn new(
        config: SyncConfig,
        provider: BalanceProvider,
        store: BalanceStore,
        directory: UserDirectory,
    ) -> Self {
        Self {
            config,
            provider: Arc::new(provider),
            store,
            directory,
        }
    }

    /// Run one reconciliation batch and return its report.
    ///
    /// Errors out of this function are fatal (nothing was dispatched);
    /// everything after dispatch is absorbed into the report.
    pub async fn run(&self) -> Result<SyncReport> {
        let run_id = short_run_id();
        let started_at = Utc::now();
        let run_timer = Instant::now();

        // Step 1: advance the rotating cursor before any work, so a crash
        // mid-run does not re-process this slice next time
        let cursor = if self.config.full_population {
            None
        } else {
            Some(
                self.store
                    .advance_cursor(
                        BALANCE_CURSOR_NAME,
                        DEFAULT_CURSOR_DIVISOR,
                        self.config.divisor_override,
                    )
                    .await?,
            )
        };

        // Step 2: enumerate the population from the backing store
        let user_ids = self.directory.list_user_ids().await?;

        let targeted: Vec<String> = match cursor {
            None => user_ids.clone(),
            Some(cursor) => rotation_slice(&user_ids, cursor.divisor, cursor.counter).to_vec(),
        };

        info!(
            run_id = %run_id,
            cadence = self.config.cadence.as_str(),
            users_total = user_ids.len(),
            users_targeted = targeted.len(),
            cursor = ?cursor,
            lookback_days = self.config.lookback_days,
            "Starting balance sync run"
        );

        // Step 3: one independent task per user, gated by the worker pool
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_users));
        let mut tasks: JoinSet<UserSyncOutcome> = JoinSet::new();

        for user_id in targeted.iter().cloned() {
            let semaphore = semaphore.clone();
            let provider = self.provider.clone();
            let store = self.store.clone();
            let window = select_window(Utc::now(), self.config.lookback_days);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return UserSyncOutcome::failed(&user_id, "pool closed".to_string()),
                };
                sync_user(&provider, &store, &window, &user_id).await
            });
        }

        // Step 4: collect outcomes until done or the run deadline fires
        let mut stats = SyncStats::default();
        let deadline = tokio::time::sleep(self.config.run_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok(outcome)) => absorb_outcome(&run_id, &mut stats, &outcome),
                        Some(Err(e)) => {
                            stats.users_failed += 1;
                            warn!(run_id = %run_id, error = %e, "User task did not complete");
                        }
                    }
                }
                _ = &mut deadline => {
                    let outstanding = tasks.len();
                    warn!(
                        run_id = %run_id,
                        outstanding = outstanding,
                        "Run deadline reached, abandoning outstanding user tasks"
                    );
                    tasks.abort_all();
                    while let Some(joined) = tasks.join_next().await {
                        match joined {
                            Ok(outcome) => absorb_outcome(&run_id, &mut stats, &outcome),
                            Err(_) => stats.users_abandoned += 1,
                        }
                    }
                    break;
                }
            }
        }

        let report = SyncReport {
            run_id: run_id.clone(),
            cadence: self.config.cadence.as_str(),
            started_at,
            elapsed: run_timer.elapsed(),
            users_total: user_ids.len(),
            users_targeted: targeted.len(),
            stats,
        };

        if let Err(e) = self.store.record_run(&report, user_ids.len()).await {
            warn!(run_id = %run_id, error = %e, "Could not persist run summary");
        }

        info!(
            run_id = %run_id,
            completion = %report.completion_line(),
            users_abandoned = report.stats.users_abandoned,
            accounts_synced = report.stats.accounts_synced,
            accounts_skipped = report.stats.accounts_skipped,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Balance sync run finished"
        );

        Ok(report)
    }
}

fn absorb_outcome(run_id: &str, stats: &mut SyncStats, outcome: &UserSyncOutcome) {
    if outcome.succeeded() {
        debug!(
            run_id = %run_id,
            user_id = %outcome.user_id,
            accounts_synced = outcome.accounts_synced,
            accounts_skipped = outcome.accounts_skipped,
            "User sync done"
        );
    } else {
        warn!(
            run_id = %run_id,
            user_id = %outcome.user_id,
            phase = outcome.phase.as_str(),
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "User sync failed"
        );
    }
    stats.absorb(outcome);
}

/// Run the full pipeline for one user. Never returns an error: every failure
/// is folded into the outcome so it cannot disturb sibling tasks.
pub async fn sync_user(
    provider: &BalanceProvider,
    store: &BalanceStore,
    window: &BalanceWindow,
    user_id: &str,
) -> UserSyncOutcome {
    let fetched = match provider.fetch_balances(user_id, window).await {
        Ok(fetched) => fetched,
        Err(e) => {
            warn!(
                user_id = %user_id,
                phase = SyncPhase::Fetching.as_str(),
                error = %e,
                "Skipping user, provider fetch failed"
            );
            return UserSyncOutcome::failed(user_id, e.to_string());
        }
    };

    if fetched.accounts.is_empty() && fetched.rejected.is_empty() {
        debug!(user_id = %user_id, "No balances returned for the requested window");
        let mut outcome = UserSyncOutcome::new(user_id);
        outcome.phase = SyncPhase::Done;
        return outcome;
    }

    apply_fetched(store, user_id, window, fetched).await
}

/// Merge and persist an already-fetched payload, one account at a time.
/// Shape errors skip the single account; a store rejection skips the rest of
/// this user's commit (the intended content is already logged for replay).
pub(crate) async fn apply_fetched(
    store: &BalanceStore,
    user_id: &str,
    window: &BalanceWindow,
    fetched: FetchedBalances,
) -> UserSyncOutcome {
    let mut outcome = UserSyncOutcome::new(user_id);
    outcome.accounts_total = fetched.accounts.len() + fetched.rejected.len();

    for rejection in &fetched.rejected {
        warn!(user_id = %user_id, error = %rejection, "Skipping unparseable account payload");
        outcome.accounts_skipped += 1;
    }

    for series in fetched.accounts {
        outcome.phase = SyncPhase::Merging;
        let account_id = series.account_id.clone();

        let existing = match store.load_series(user_id, &account_id).await {
            Ok(existing) => existing,
            Err(e) => {
                outcome.phase = SyncPhase::Failed;
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        let merged = match merge_series(existing.as_ref(), series) {
            Ok(merged) => merged,
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    account_id = %account_id,
                    error = %e,
                    "Skipping account, malformed fetched series"
                );
                outcome.accounts_skipped += 1;
                continue;
            }
        };

        outcome.phase = SyncPhase::Persisting;
        match store.apply_series(user_id, &merged, window).await {
            Ok(write) => {
                info!(
                    user_id = %user_id,
                    account_id = %account_id,
                    outcome = write.as_str(),
                    records = merged.balances.len(),
                    "Applied merged balance series"
                );
                outcome.tally(write);
            }
            Err(e) => {
                // A WriteRejected has already logged the intended content
                // for manual replay; either way the rest of this user's
                // commit is skipped.
                outcome.phase = SyncPhase::Failed;
                outcome.error = Some(e.to_string());
                return outcome;
            }
        }
    }

    if outcome.accounts_synced > 0 {
        if let Err(e) = store.finalize_window(user_id, window).await {
            outcome.phase = SyncPhase::Failed;
            outcome.error = Some(e.to_string());
            return outcome;
        }
    }

    outcome.phase = SyncPhase::Done;
    outcome
}
