//! # Watchlist Crate
//!
//! Per-user lists of (symbol, expiry) and the subscriptions they drive.
//!
//! ## Key Components
//!
//! - **Manager**: [`WatchlistManager`] turns a watchlist add into a
//!   USER_DRIVEN subscription per ATM ladder leg and a removal back into
//!   unsubscribes, reporting partial success explicitly.
//! - **Stores**: [`WatchlistStore`] with an in-memory and a JSON snapshot
//!   implementation.
//! - **End of day**: [`EndOfDay`] sweeps user-driven subscriptions and
//!   clears every watchlist once per trading day.

pub mod eod;
pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use eod::{EndOfDay, EodReport, EodSchedule};
pub use error::{WatchlistError, WatchlistResult};
pub use manager::WatchlistManager;
pub use store::{InMemoryWatchlistStore, JsonFileWatchlistStore, WatchlistStore};
pub use types::{AddOutcome, LegFailure, RemoveOutcome, WatchlistEntry, WatchlistKey};
