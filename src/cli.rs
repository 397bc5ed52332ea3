use clap::{Parser, Subcommand};

use crate::commands;

#[derive(Parser)]
#[command(name = "balance-recon")]
#[command(about = "Balance time-series reconciliation CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one reconciliation batch now
    Sync {
        /// Run cadence: frequent (30-day lookback) or extended (90-day)
        #[arg(short, long, default_value = "frequent")]
        cadence: String,

        /// Override the lookback window in days
        #[arg(long)]
        lookback_days: Option<u32>,

        /// Process every user instead of the rotating slice
        #[arg(long)]
        all: bool,

        /// Override the rotating-slice divisor
        #[arg(long)]
        divisor: Option<u32>,

        /// Bounded worker pool size
        #[arg(short, long)]
        workers: Option<usize>,

        /// Global run deadline in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Run the recurring worker loop
    Worker,
    /// Show store contents, cursor position, and recent runs
    Status,
}

pub fn run() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            cadence,
            lookback_days,
            all,
            divisor,
            workers,
            timeout_secs,
        } => {
            commands::sync::run(cadence, lookback_days, all, divisor, workers, timeout_secs);
        }
        Commands::Worker => {
            commands::worker::run();
        }
        Commands::Status => {
            commands::status::run();
        }
    }
}
