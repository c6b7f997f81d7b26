//! Error types for the subscription ledger and connection pool.

use common::SecurityId;
use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// No room and nothing evictable; surfaced to the caller, never retried
    #[error("Capacity exceeded subscribing {token}: {active}/{capacity} active, nothing evictable")]
    CapacityExceeded {
        token: SecurityId,
        active: usize,
        capacity: usize,
    },

    #[error("All connections are at capacity")]
    CapacityExhausted,

    #[error("Unknown connection: {0}")]
    UnknownConnection(usize),
}
