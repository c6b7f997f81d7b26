//! Watchlist stores

pub mod file;
pub mod memory;
pub mod traits;

pub use file::JsonFileWatchlistStore;
pub use memory::InMemoryWatchlistStore;
pub use traits::WatchlistStore;
