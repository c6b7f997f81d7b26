//! Snapshot-file watchlist store.
//!
//! Keeps entries in memory and rewrites a JSON snapshot after every
//! change. The layout is internal and may change between versions.

use crate::error::WatchlistResult;
use crate::store::memory::InMemoryWatchlistStore;
use crate::store::traits::WatchlistStore;
use crate::types::{WatchlistEntry, WatchlistKey};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct JsonFileWatchlistStore {
    path: PathBuf,
    entries: InMemoryWatchlistStore,
    /// Serialises mutate-then-write so snapshots land in order
    write_lock: Mutex<()>,
}

impl JsonFileWatchlistStore {
    /// Open the store, loading the snapshot at `path` if there is one.
    pub async fn open(path: impl AsRef<Path>) -> WatchlistResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries: Vec<WatchlistEntry> = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            Ok(_) => Vec::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), entries = entries.len(), "Watchlist snapshot loaded");

        Ok(Self {
            path,
            entries: InMemoryWatchlistStore::from_entries(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> WatchlistResult<()> {
        let snapshot = self.entries.snapshot();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), entries = snapshot.len(), "Watchlist snapshot written");
        Ok(())
    }
}

#[async_trait]
impl WatchlistStore for JsonFileWatchlistStore {
    async fn insert(&self, entry: WatchlistEntry) -> WatchlistResult<()> {
        let _guard = self.write_lock.lock().await;
        self.entries.insert(entry).await?;
        self.persist().await
    }

    async fn get(&self, key: &WatchlistKey) -> WatchlistResult<Option<WatchlistEntry>> {
        self.entries.get(key).await
    }

    async fn remove(&self, key: &WatchlistKey) -> WatchlistResult<Option<WatchlistEntry>> {
        let _guard = self.write_lock.lock().await;
        let removed = self.entries.remove(key).await?;
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn list_user(&self, user: &str) -> WatchlistResult<Vec<WatchlistEntry>> {
        self.entries.list_user(user).await
    }

    async fn list_all(&self) -> WatchlistResult<Vec<WatchlistEntry>> {
        self.entries.list_all().await
    }

    async fn clear(&self) -> WatchlistResult<usize> {
        let _guard = self.write_lock.lock().await;
        let count = self.entries.clear().await?;
        self.persist().await?;
        Ok(count)
    }

    async fn max_sequence(&self) -> WatchlistResult<Option<u64>> {
        self.entries.max_sequence().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use common::InstrumentType;

    fn entry(user: &str, symbol: &str, sequence: u64) -> WatchlistEntry {
        WatchlistEntry {
            user: user.to_string(),
            symbol: symbol.to_string(),
            expiry: NaiveDate::from_ymd_opt(2024, 3, 28).unwrap(),
            instrument_type: InstrumentType::Optidx,
            sequence,
            anchor_ltp: Some(22_150.0),
            legs_requested: 42,
            legs_subscribed: 40,
            added_at: Utc::now(),
        }
    }

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("chainfeed-watchlist-{}-{}", std::process::id(), name))
            .join("watchlists.json")
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let path = scratch_path("reopen");
        let _ = tokio::fs::remove_file(&path).await;

        let store = JsonFileWatchlistStore::open(&path).await.unwrap();
        store.insert(entry("alice", "NIFTY", 1)).await.unwrap();
        store.insert(entry("bob", "BANKNIFTY", 2)).await.unwrap();
        store.remove(&entry("bob", "BANKNIFTY", 0).key()).await.unwrap();
        drop(store);

        let reopened = JsonFileWatchlistStore::open(&path).await.unwrap();
        let all = reopened.list_all().await.unwrap();
        assert_eq!(all, vec![entry_with_time("alice", "NIFTY", 1, all[0].added_at)]);
        assert_eq!(reopened.max_sequence().await.unwrap(), Some(1));

        assert_eq!(reopened.clear().await.unwrap(), 1);
        let emptied = JsonFileWatchlistStore::open(&path).await.unwrap();
        assert!(emptied.list_all().await.unwrap().is_empty());

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    fn entry_with_time(user: &str, symbol: &str, sequence: u64, at: chrono::DateTime<Utc>) -> WatchlistEntry {
        WatchlistEntry {
            added_at: at,
            ..entry(user, symbol, sequence)
        }
    }

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let path = scratch_path("missing");
        let store = JsonFileWatchlistStore::open(&path).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
        assert_eq!(store.path(), path.as_path());
    }
}
