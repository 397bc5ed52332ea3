use crate::constants::{BALANCE_CURSOR_NAME, STATUS_RECENT_RUNS};
use crate::services::BalanceStore;
use crate::utils::get_balance_store_path;

pub fn run() {
    println!("📊 Balance Store Status\n");

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    let result: Result<(), Box<dyn std::error::Error>> = runtime.block_on(async {
        let store = BalanceStore::new(get_balance_store_path()).await?;

        let documents = store.document_count().await?;
        let series = store.series_count().await?;
        println!("👥 User documents: {}", documents);
        println!("🏦 Account series: {}", series);

        match store.cursor(BALANCE_CURSOR_NAME).await? {
            Some(cursor) => println!(
                "🔁 Rotation cursor: slice {}/{} next-advanced",
                cursor.counter, cursor.divisor
            ),
            None => println!("🔁 Rotation cursor: not yet initialized"),
        }

        let runs = store.recent_runs(STATUS_RECENT_RUNS).await?;
        if runs.is_empty() {
            println!("\n⚠️  No recorded runs yet. Run 'balance-recon sync' first.");
        } else {
            println!("\n═══ Recent runs ═══");
            for run in runs {
                println!(
                    "  {} | {} | {} | {}s | {}/{} users ok ({} failed)",
                    run.started_at,
                    run.run_id,
                    run.cadence,
                    run.elapsed_secs,
                    run.users_succeeded,
                    run.users_targeted,
                    run.users_failed,
                );
            }
        }

        store.close().await;
        Ok(())
    });

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}
