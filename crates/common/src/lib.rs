//! Common types and utilities for chainfeed
//!
//! This crate provides shared types and the injectable clock used across
//! all chainfeed crates.
//!
//! # Modules
//!
//! - [`error`] - Common error types
//! - [`types`] - Broker identifiers (SecurityId, ExchangeSegment, OptionRight, Tick)
//! - [`clock`] - `Clock` trait with system and manual implementations

pub mod clock;
pub mod error;
pub mod types;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Error, Result};
pub use types::*;
