//! Option-chain cache types

use chrono::{DateTime, NaiveDate, Utc};
use common::{OptionRight, SecurityId};
use serde::Serialize;
use std::fmt;

/// Where chain prices come from.
///
/// Doubles as the per-leg provenance tag: a `Live` leg was last priced from
/// the broker (REST chain or streamed tick), a `Closing` leg from the
/// closing-price table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceSource {
    Live,
    Closing,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Live => "live",
            PriceSource::Closing => "closing",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One option leg of a cached chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainLeg {
    pub security_id: SecurityId,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub provenance: PriceSource,
    /// Price came from the decay estimate rather than a quote
    pub estimated: bool,
    pub updated_at: DateTime<Utc>,
}

impl ChainLeg {
    pub(crate) fn unpriced(security_id: SecurityId, provenance: PriceSource, at: DateTime<Utc>) -> Self {
        Self {
            security_id,
            last: None,
            bid: None,
            ask: None,
            provenance,
            estimated: false,
            updated_at: at,
        }
    }

    /// Priced by the broker during a live session.
    pub fn is_live_quote(&self) -> bool {
        self.provenance == PriceSource::Live && !self.estimated && self.last.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainStrike {
    pub strike: f64,
    pub call: ChainLeg,
    pub put: ChainLeg,
}

impl ChainStrike {
    pub fn leg(&self, right: OptionRight) -> &ChainLeg {
        match right {
            OptionRight::Call => &self.call,
            OptionRight::Put => &self.put,
        }
    }

    pub fn leg_mut(&mut self, right: OptionRight) -> &mut ChainLeg {
        match right {
            OptionRight::Call => &mut self.call,
            OptionRight::Put => &mut self.put,
        }
    }
}

/// Cached option chain for one underlying and expiry.
///
/// Created on first populate and updated in place afterwards; never
/// removed while the process runs. Strikes are ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionChainSkeleton {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike_step: f64,
    pub lot_size: Option<u32>,
    pub atm_strike: Option<f64>,
    pub underlying_ltp: Option<f64>,
    pub source: PriceSource,
    pub updated_at: DateTime<Utc>,
    pub strikes: Vec<ChainStrike>,
}

impl OptionChainSkeleton {
    pub fn strike(&self, strike: f64) -> Option<&ChainStrike> {
        self.strikes.iter().find(|s| same_strike(s.strike, strike))
    }

    pub fn leg(&self, strike: f64, right: OptionRight) -> Option<&ChainLeg> {
        self.strike(strike).map(|s| s.leg(right))
    }

    pub fn leg_count(&self) -> usize {
        self.strikes.len() * 2
    }

    /// Legs carrying a price, quoted or estimated.
    pub fn priced_legs(&self) -> usize {
        self.strikes
            .iter()
            .flat_map(|s| [&s.call, &s.put])
            .filter(|l| l.last.is_some())
            .count()
    }
}

pub(crate) fn same_strike(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

/// Price-source state of one underlying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionState {
    pub source: PriceSource,
    pub checked_at: DateTime<Utc>,
    pub ltp: Option<f64>,
}

/// A LIVE/CLOSING switch applied by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceTransition {
    pub underlying: String,
    pub from: PriceSource,
    pub to: PriceSource,
    pub chains_repopulated: usize,
}
