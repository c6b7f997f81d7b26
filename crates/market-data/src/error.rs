//! Option-chain cache error types

use chrono::NaiveDate;
use instrument::InstrumentError;
use thiserror::Error;
use upstream::UpstreamError;

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in option-chain cache operations
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// No cached chain for the requested underlying and expiry
    #[error("No cached option chain for {underlying} expiring {expiry}")]
    NotFound { underlying: String, expiry: NaiveDate },

    /// The registry has nothing the cache can key an underlying on
    #[error("Unknown underlying: {0}")]
    UnknownUnderlying(String),

    /// Startup populate left the cache empty
    #[error("Startup integrity check failed: {0}")]
    StartupIntegrity(String),

    /// Closing-price table could not be read
    #[error("Closing price source failed: {0}")]
    ClosingSource(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),
}

impl CacheError {
    /// Fatal errors abort startup; everything else is retried on the next pass.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::StartupIntegrity(_))
    }
}

impl From<csv::Error> for CacheError {
    fn from(err: csv::Error) -> Self {
        CacheError::ClosingSource(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::ClosingSource(err.to_string())
    }
}
