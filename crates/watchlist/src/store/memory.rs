//! In-memory watchlist store

use crate::error::{WatchlistError, WatchlistResult};
use crate::store::traits::WatchlistStore;
use crate::types::{WatchlistEntry, WatchlistKey};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory watchlist store; entries are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryWatchlistStore {
    entries: RwLock<BTreeMap<WatchlistKey, WatchlistEntry>>,
}

impl InMemoryWatchlistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: impl IntoIterator<Item = WatchlistEntry>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().map(|e| (e.key(), e)).collect()),
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<WatchlistEntry> {
        by_sequence(self.entries.read().values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn by_sequence(mut entries: Vec<WatchlistEntry>) -> Vec<WatchlistEntry> {
    entries.sort_by_key(|e| e.sequence);
    entries
}

#[async_trait]
impl WatchlistStore for InMemoryWatchlistStore {
    async fn insert(&self, entry: WatchlistEntry) -> WatchlistResult<()> {
        let key = entry.key();
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(WatchlistError::Duplicate {
                user: key.user,
                symbol: key.symbol,
                expiry: key.expiry,
            });
        }
        entries.insert(key, entry);
        Ok(())
    }

    async fn get(&self, key: &WatchlistKey) -> WatchlistResult<Option<WatchlistEntry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn remove(&self, key: &WatchlistKey) -> WatchlistResult<Option<WatchlistEntry>> {
        Ok(self.entries.write().remove(key))
    }

    async fn list_user(&self, user: &str) -> WatchlistResult<Vec<WatchlistEntry>> {
        let entries = self
            .entries
            .read()
            .values()
            .filter(|e| e.user == user)
            .cloned()
            .collect();
        Ok(by_sequence(entries))
    }

    async fn list_all(&self) -> WatchlistResult<Vec<WatchlistEntry>> {
        Ok(self.snapshot())
    }

    async fn clear(&self) -> WatchlistResult<usize> {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        Ok(count)
    }

    async fn max_sequence(&self) -> WatchlistResult<Option<u64>> {
        Ok(self.entries.read().values().map(|e| e.sequence).max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{NaiveDate, Utc};
    use common::InstrumentType;

    fn entry(user: &str, symbol: &str, sequence: u64) -> WatchlistEntry {
        WatchlistEntry {
            user: user.to_string(),
            symbol: symbol.to_string(),
            expiry: NaiveDate::from_ymd_opt(2024, 3, 28).unwrap(),
            instrument_type: InstrumentType::Index,
            sequence,
            anchor_ltp: Some(22_000.0),
            legs_requested: 2,
            legs_subscribed: 2,
            added_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_key() {
        let store = InMemoryWatchlistStore::new();
        store.insert(entry("alice", "NIFTY", 1)).await.unwrap();
        assert_matches!(
            store.insert(entry("alice", "NIFTY", 2)).await,
            Err(WatchlistError::Duplicate { .. })
        );
        store.insert(entry("bob", "NIFTY", 3)).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_lists_in_insertion_order() {
        let store = InMemoryWatchlistStore::new();
        store.insert(entry("alice", "RELIANCE", 5)).await.unwrap();
        store.insert(entry("alice", "BANKNIFTY", 2)).await.unwrap();
        store.insert(entry("bob", "NIFTY", 3)).await.unwrap();

        let symbols: Vec<String> = store
            .list_user("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.symbol)
            .collect();
        assert_eq!(symbols, vec!["BANKNIFTY", "RELIANCE"]);
        assert_eq!(store.max_sequence().await.unwrap(), Some(5));

        let removed = store.remove(&entry("bob", "NIFTY", 0).key()).await.unwrap();
        assert_eq!(removed.map(|e| e.sequence), Some(3));
        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.is_empty());
    }
}
