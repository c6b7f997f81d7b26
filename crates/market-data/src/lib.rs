//! # Market Data Crate
//!
//! In-memory option-chain cache for the tracked underlyings.
//!
//! ## Key Components
//!
//! - **Cache**: [`OptionChainCacheService`] holds one
//!   [`OptionChainSkeleton`] per (underlying, expiry) and switches each
//!   underlying between `Live` and `Closing` prices as its session opens
//!   and closes.
//! - **Closing prices**: [`ClosingPriceSource`] serves the previous close
//!   while the market is shut; [`CsvClosingPriceSource`] reads it from a
//!   `security_id,close` table.
//! - **Decay**: [`DecayModel`] estimates premiums of legs that have no
//!   quote from their distance to the money.
//!
//! ## Key Invariants
//!
//! - `get` returns a populated skeleton or `NotFound`, never an empty one
//! - Broker-quoted live legs are never overwritten by estimates
//! - An empty cache after startup populate is fatal

pub mod cache;
pub mod closing;
pub mod decay;
pub mod error;
pub mod types;

pub use cache::{CacheServiceConfig, OptionChainCacheService, TrackedChain};
pub use closing::{ClosingChain, ClosingPriceSource, CsvClosingPriceSource};
pub use decay::{intrinsic_value, DecayModel};
pub use error::{CacheError, CacheResult};
pub use types::{
    ChainLeg, ChainStrike, OptionChainSkeleton, PriceSource, SessionState, SourceTransition,
};
