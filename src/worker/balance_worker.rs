use crate::constants::{EXTENDED_SYNC_INTERVAL_SECS, FREQUENT_SYNC_INTERVAL_SECS};
use crate::models::{RunCadence, SyncConfig};
use crate::services::{BalanceProvider, BalanceStore, BalanceSync, UserDirectory};
use crate::utils::{get_backend_db_path, get_balance_store_path};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument};

#[instrument]
pub async fn run() {
    info!("Starting balance worker with two-cadence sync strategy");
    info!(
        "  - Frequent runs: every {}s, {}-day lookback",
        FREQUENT_SYNC_INTERVAL_SECS,
        RunCadence::Frequent.lookback_days()
    );
    info!(
        "  - Extended runs: every {}s, {}-day lookback",
        EXTENDED_SYNC_INTERVAL_SECS,
        RunCadence::Extended.lookback_days()
    );

    let mut iteration_count = 0u64;
    let mut last_extended_sync = std::time::Instant::now();

    loop {
        iteration_count += 1;
        let loop_start = std::time::Instant::now();

        info!(
            worker = "Balance",
            iteration = iteration_count,
            "Starting sync cycle"
        );

        let frequent_ok = run_once(RunCadence::Frequent, iteration_count).await;

        let mut extended_ok = true;
        if last_extended_sync.elapsed().as_secs() >= EXTENDED_SYNC_INTERVAL_SECS {
            info!(
                worker = "Balance",
                iteration = iteration_count,
                "Extended interval elapsed, running deep lookback"
            );
            extended_ok = run_once(RunCadence::Extended, iteration_count).await;
            last_extended_sync = std::time::Instant::now();
        }

        info!(
            worker = "Balance",
            iteration = iteration_count,
            loop_duration_secs = loop_start.elapsed().as_secs_f64(),
            next_check_secs = FREQUENT_SYNC_INTERVAL_SECS,
            all_successful = frequent_ok && extended_ok,
            "Iteration completed"
        );

        sleep(Duration::from_secs(FREQUENT_SYNC_INTERVAL_SECS)).await;
    }
}

/// Run one reconciliation batch for a cadence. Returns false on a fatal
/// setup error; the loop continues either way.
async fn run_once(cadence: RunCadence, iteration: u64) -> bool {
    let provider = match BalanceProvider::from_env() {
        Ok(provider) => provider,
        Err(e) => {
            error!(
                worker = "Balance",
                iteration = iteration,
                error = %e,
                "Provider configuration invalid, skipping run"
            );
            return false;
        }
    };

    let store = match BalanceStore::new(get_balance_store_path()).await {
        Ok(store) => store,
        Err(e) => {
            error!(
                worker = "Balance",
                iteration = iteration,
                error = %e,
                "Could not open balance store, skipping run"
            );
            return false;
        }
    };

    let directory = match UserDirectory::new(get_backend_db_path()).await {
        Ok(directory) => directory,
        Err(e) => {
            error!(
                worker = "Balance",
                iteration = iteration,
                error = %e,
                "Could not open backing store, skipping run"
            );
            return false;
        }
    };

    let config = SyncConfig::for_cadence(cadence);
    let sync = BalanceSync::new(config, provider, store, directory);

    match sync.run().await {
        Ok(report) => {
            info!(
                worker = "Balance",
                iteration = iteration,
                cadence = cadence.as_str(),
                completion = %report.completion_line(),
                duration_secs = report.elapsed.as_secs_f64(),
                "Sync completed"
            );
            true
        }
        Err(e) => {
            error!(
                worker = "Balance",
                iteration = iteration,
                cadence = cadence.as_str(),
                error = %e,
                "Sync failed"
            );
            false
        }
    }
}
