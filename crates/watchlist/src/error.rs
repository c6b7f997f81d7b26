//! Watchlist error types

use chrono::NaiveDate;
use instrument::InstrumentError;
use thiserror::Error;

pub type WatchlistResult<T> = Result<T, WatchlistError>;

#[derive(Error, Debug, Clone)]
pub enum WatchlistError {
    #[error("{symbol} {expiry} is already on {user}'s watchlist")]
    Duplicate {
        user: String,
        symbol: String,
        expiry: NaiveDate,
    },

    /// No underlying price to centre the chain on
    #[error("No underlying price known for {0}")]
    NoPrice(String),

    /// Nothing listed under the symbol, expiry and type
    #[error("No {instrument_type} instrument listed for {symbol} expiring {expiry}")]
    UnknownInstrument {
        symbol: String,
        expiry: NaiveDate,
        instrument_type: String,
    },

    #[error("Invalid watchlist request: {0}")]
    InvalidRequest(String),

    #[error("Watchlist store error: {0}")]
    Store(String),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),
}

impl From<std::io::Error> for WatchlistError {
    fn from(err: std::io::Error) -> Self {
        WatchlistError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for WatchlistError {
    fn from(err: serde_json::Error) -> Self {
        WatchlistError::Store(err.to_string())
    }
}
