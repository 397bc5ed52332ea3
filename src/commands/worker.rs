use crate::worker;

pub fn run() {
    println!("🚀 Starting balance worker (frequent + extended cadences)");

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    runtime.block_on(async {
        worker::run_balance_worker().await;
    });
}
