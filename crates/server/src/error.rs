//! Server error types

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid server configuration: {0}")]
    ConfigError(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error(transparent)]
    Cache(#[from] market_data::CacheError),

    #[error(transparent)]
    Instrument(#[from] instrument::InstrumentError),

    #[error(transparent)]
    Upstream(#[from] upstream::UpstreamError),

    #[error(transparent)]
    Feed(#[from] subscription::FeedError),

    #[error(transparent)]
    Watchlist(#[from] watchlist::WatchlistError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    pub fn bind(address: impl Into<String>, source: io::Error) -> Self {
        Self::BindError {
            address: address.into(),
            source,
        }
    }
}
