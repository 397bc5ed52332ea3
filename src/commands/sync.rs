use crate::models::{RunCadence, SyncConfig};
use crate::services::{BalanceProvider, BalanceStore, BalanceSync, UserDirectory};
use crate::utils::{get_backend_db_path, get_balance_store_path};
use std::time::Duration;

pub fn run(
    cadence_arg: String,
    lookback_days: Option<u32>,
    all_users: bool,
    divisor: Option<u32>,
    workers: Option<usize>,
    timeout_secs: Option<u64>,
) {
    let cadence = match RunCadence::parse(&cadence_arg) {
        Ok(cadence) => cadence,
        Err(e) => {
            eprintln!("❌ Error parsing cadence: {}", e);
            std::process::exit(1);
        }
    };

    let mut config = SyncConfig::for_cadence(cadence);
    if let Some(days) = lookback_days {
        config.lookback_days = days;
    }
    if let Some(workers) = workers {
        config.max_concurrent_users = workers.max(1);
    }
    if let Some(secs) = timeout_secs {
        config.run_timeout = Duration::from_secs(secs);
    }
    config.full_population = all_users;
    config.divisor_override = divisor;

    println!("🔄 Balance sync: {} cadence, {}-day lookback", cadence.as_str(), config.lookback_days);
    if all_users {
        println!("👥 Target: full user population (rotating slice disabled)");
    } else {
        println!("👥 Target: rotating slice (advances the persisted cursor)");
    }

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    runtime.block_on(async {
        let provider = match BalanceProvider::from_env() {
            Ok(provider) => provider,
            Err(e) => {
                eprintln!("❌ Provider configuration error: {}", e);
                std::process::exit(1);
            }
        };

        let store = match BalanceStore::new(get_balance_store_path()).await {
            Ok(store) => store,
            Err(e) => {
                eprintln!("❌ Could not open balance store: {}", e);
                std::process::exit(1);
            }
        };

        let directory = match UserDirectory::new(get_backend_db_path()).await {
            Ok(directory) => directory,
            Err(e) => {
                eprintln!("❌ Could not open backing store: {}", e);
                std::process::exit(1);
            }
        };

        let sync = BalanceSync::new(config, provider, store, directory);

        match sync.run().await {
            Ok(report) => {
                println!("\n✨ Run {} complete: {}", report.run_id, report.completion_line());
                println!(
                    "   accounts: {} synced ({} updated, {} appended, {} created), {} skipped",
                    report.stats.accounts_synced,
                    report.stats.accounts_updated,
                    report.stats.accounts_appended,
                    report.stats.accounts_created,
                    report.stats.accounts_skipped,
                );
                if report.stats.users_abandoned > 0 {
                    println!("   ⚠️  {} users abandoned at the run deadline", report.stats.users_abandoned);
                }
                println!("   ⏱️  {:.1}s elapsed", report.elapsed.as_secs_f64());
            }
            Err(e) => {
                eprintln!("❌ Balance sync aborted: {}", e);
                std::process::exit(1);
            }
        }
    });
}
