//! Core domain types for the instrument universe.

use chrono::NaiveDate;
use common::{ExchangeSegment, InstrumentType, OptionRight, SecurityId};
use serde::{Deserialize, Serialize};

/// One tradable (or index) instrument from the broker's instrument master.
///
/// Immutable once loaded; the registry hands out `Arc<InstrumentRecord>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub security_id: SecurityId,
    pub segment: ExchangeSegment,
    pub instrument_type: InstrumentType,
    /// Root symbol, e.g. `NIFTY` for the index and every NIFTY contract
    pub symbol: String,
    /// Broker display name, e.g. `NIFTY-Mar2024-22000-CE`
    pub trading_symbol: String,
    pub underlying: String,
    pub expiry: Option<NaiveDate>,
    pub strike: Option<f64>,
    pub option_right: Option<OptionRight>,
    pub lot_size: u32,
}

impl InstrumentRecord {
    pub fn is_option(&self) -> bool {
        self.option_right.is_some()
    }

    /// True for the spot/cash record of an underlying (no expiry).
    pub fn is_spot(&self) -> bool {
        self.expiry.is_none()
            && matches!(
                self.instrument_type,
                InstrumentType::Index | InstrumentType::Equity
            )
    }
}

/// Call and put security ids listed at one strike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeLegs {
    pub call: Option<SecurityId>,
    pub put: Option<SecurityId>,
}

impl StrikeLegs {
    pub fn get(&self, right: OptionRight) -> Option<SecurityId> {
        match right {
            OptionRight::Call => self.call,
            OptionRight::Put => self.put,
        }
    }

    pub fn set(&mut self, right: OptionRight, id: SecurityId) {
        match right {
            OptionRight::Call => self.call = Some(id),
            OptionRight::Put => self.put = Some(id),
        }
    }

    /// Both legs are listed.
    pub fn is_complete(&self) -> bool {
        self.call.is_some() && self.put.is_some()
    }
}

/// Outcome of loading an instrument master.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}
