pub mod balance_sync;
pub mod document_store;
pub mod merge;
pub mod provider;
pub mod user_directory;
pub mod window;

pub use balance_sync::{sync_user, BalanceSync};
pub use document_store::BalanceStore;
pub use merge::{merge_series, validate_fetched};
pub use provider::{BalanceProvider, FetchedBalances};
pub use user_directory::{rotation_slice, UserDirectory};
pub use window::{select_window, BalanceWindow};
