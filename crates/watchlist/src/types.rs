//! Watchlist types

use chrono::{DateTime, NaiveDate, Utc};
use common::{InstrumentType, SecurityId};
use serde::{Deserialize, Serialize};

/// Identity of a watchlist entry. Symbols are stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchlistKey {
    pub user: String,
    pub symbol: String,
    pub expiry: NaiveDate,
}

impl WatchlistKey {
    pub fn new(user: impl Into<String>, symbol: &str, expiry: NaiveDate) -> Self {
        Self {
            user: user.into(),
            symbol: symbol.trim().to_uppercase(),
            expiry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub user: String,
    pub symbol: String,
    pub expiry: NaiveDate,
    pub instrument_type: InstrumentType,
    /// Insertion order across all users
    pub sequence: u64,
    /// Underlying price the chain was generated from. Removal regenerates
    /// the same chain from it instead of storing the legs.
    pub anchor_ltp: Option<f64>,
    pub legs_requested: usize,
    pub legs_subscribed: usize,
    pub added_at: DateTime<Utc>,
}

impl WatchlistEntry {
    pub fn key(&self) -> WatchlistKey {
        WatchlistKey {
            user: self.user.clone(),
            symbol: self.symbol.clone(),
            expiry: self.expiry,
        }
    }
}

/// A leg that could not be subscribed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegFailure {
    pub security_id: SecurityId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddOutcome {
    /// The entry was stored
    pub accepted: bool,
    pub legs_subscribed: usize,
    pub legs_requested: usize,
    pub failures: Vec<LegFailure>,
}

impl AddOutcome {
    /// Some, but not all, requested legs are streaming.
    pub fn is_partial(&self) -> bool {
        self.legs_subscribed > 0 && self.legs_subscribed < self.legs_requested
    }

    pub fn is_complete(&self) -> bool {
        self.legs_requested > 0 && self.legs_subscribed == self.legs_requested
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemoveOutcome {
    pub removed: bool,
    pub legs_unsubscribed: usize,
}
