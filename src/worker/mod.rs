pub mod balance_worker;

pub use balance_worker::run as run_balance_worker;
