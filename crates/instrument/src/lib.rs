//! # Instrument Crate
//!
//! The instrument universe and the ATM strike logic built on it.
//!
//! ## Key Components
//!
//! - **Registry**: [`InstrumentRegistry`] loads the broker instrument master
//!   (CSV) once and indexes it by symbol, symbol + expiry, underlying +
//!   expiry and security id. Strike steps and lot sizes are derived from the
//!   data, never hard-coded per symbol.
//! - **ATM Engine**: [`AtmEngine`] computes ATM strikes, generates
//!   [`StrikeLadder`]s of listed strikes around them, and decides when a
//!   cached ladder is stale.
//!
//! ```text
//! instrument master (CSV) ──► InstrumentRegistry ──► AtmEngine ──► StrikeLadder
//!                                   ▲                    │
//!                                   └──── strike step ───┘
//! ```

pub mod atm;
pub mod error;
pub mod registry;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use atm::{
    atm_strike, AtmEngine, AtmEngineConfig, LadderStrike, RecalcTrigger, StrikeLadder,
    FALLBACK_STRIKE_STEP,
};
pub use error::{InstrumentError, InstrumentResult};
pub use registry::InstrumentRegistry;
pub use types::{InstrumentRecord, LoadReport, StrikeLegs};
