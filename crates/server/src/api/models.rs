//! Request and response bodies

use chrono::NaiveDate;
use common::InstrumentType;
use serde::{Deserialize, Serialize};
use watchlist::{AddOutcome, LegFailure, RemoveOutcome, WatchlistEntry};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while the cache is empty or no upstream
    /// connection is up
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_subscriptions: usize,
    pub cached_chains: usize,
    pub connections_up: usize,
    pub connections_total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddWatchlistRequest {
    pub user: String,
    pub symbol: String,
    pub expiry: NaiveDate,
    #[serde(default = "default_instrument_type")]
    pub instrument_type: InstrumentType,
    /// Price to centre the chain on; defaults to the last known price
    #[serde(default)]
    pub underlying_ltp: Option<f64>,
}

fn default_instrument_type() -> InstrumentType {
    InstrumentType::Index
}

#[derive(Debug, Serialize)]
pub struct AddWatchlistResponse {
    pub success: bool,
    pub accepted: bool,
    pub partial: bool,
    pub legs_subscribed: usize,
    pub legs_requested: usize,
    pub failures: Vec<LegFailure>,
}

impl From<AddOutcome> for AddWatchlistResponse {
    fn from(outcome: AddOutcome) -> Self {
        Self {
            success: outcome.accepted,
            accepted: outcome.accepted,
            partial: outcome.is_partial(),
            legs_subscribed: outcome.legs_subscribed,
            legs_requested: outcome.legs_requested,
            failures: outcome.failures,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RemoveWatchlistResponse {
    pub success: bool,
    pub removed: bool,
    pub legs_unsubscribed: usize,
}

impl From<RemoveOutcome> for RemoveWatchlistResponse {
    fn from(outcome: RemoveOutcome) -> Self {
        Self {
            success: true,
            removed: outcome.removed,
            legs_unsubscribed: outcome.legs_unsubscribed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WatchlistResponse {
    pub success: bool,
    pub user: String,
    pub entries: Vec<WatchlistEntry>,
}
