//! WatchlistStore trait definition

use crate::error::WatchlistResult;
use crate::types::{WatchlistEntry, WatchlistKey};
use async_trait::async_trait;

/// Persistence for watchlist entries, so the in-memory and snapshot-file
/// stores can be swapped without touching the manager.
#[async_trait]
pub trait WatchlistStore: Send + Sync {
    /// Store a new entry. Fails if the key is taken.
    async fn insert(&self, entry: WatchlistEntry) -> WatchlistResult<()>;

    async fn get(&self, key: &WatchlistKey) -> WatchlistResult<Option<WatchlistEntry>>;

    /// Remove and return an entry.
    async fn remove(&self, key: &WatchlistKey) -> WatchlistResult<Option<WatchlistEntry>>;

    /// One user's entries in insertion order.
    async fn list_user(&self, user: &str) -> WatchlistResult<Vec<WatchlistEntry>>;

    /// Every entry in insertion order.
    async fn list_all(&self) -> WatchlistResult<Vec<WatchlistEntry>>;

    /// Drop every entry; returns how many there were.
    async fn clear(&self) -> WatchlistResult<usize>;

    /// Highest sequence stored, so numbering resumes after a restart.
    async fn max_sequence(&self) -> WatchlistResult<Option<u64>>;
}
