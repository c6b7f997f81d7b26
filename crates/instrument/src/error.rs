//! Error types for the instrument crate.

use thiserror::Error;

/// Result type alias for instrument operations.
pub type InstrumentResult<T> = Result<T, InstrumentError>;

/// Errors that can occur in instrument operations.
///
/// Lookups that simply find nothing return `None` or an empty list; these
/// variants are for failures a caller has to act on.
#[derive(Error, Debug, Clone)]
pub enum InstrumentError {
    /// No listed contracts for the requested underlying/expiry.
    #[error("No option chain listed for {underlying} expiring {expiry}")]
    NotFound { underlying: String, expiry: String },

    /// The instrument source could not be read at all.
    #[error("Instrument source unreadable: {0}")]
    Source(String),

    /// A row of the instrument master did not describe a valid instrument.
    #[error("Malformed instrument row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },

    /// Invalid price input to the ATM engine.
    #[error("Invalid underlying price: {0}")]
    InvalidPrice(f64),
}

impl From<csv::Error> for InstrumentError {
    fn from(err: csv::Error) -> Self {
        InstrumentError::Source(err.to_string())
    }
}

impl From<std::io::Error> for InstrumentError {
    fn from(err: std::io::Error) -> Self {
        InstrumentError::Source(err.to_string())
    }
}
