//! Common types used across chainfeed
//!
//! This module provides the broker-facing identifiers shared by the registry,
//! the subscription ledger, the upstream feed and the option-chain cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Broker security identifier (the streaming "token")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityId(pub u64);

impl SecurityId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SecurityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| Error::malformed("security id", s))
    }
}

/// Exchange segment as the broker names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeSegment {
    /// Index values (spot only, not tradable)
    #[serde(rename = "IDX_I")]
    Index,
    #[serde(rename = "NSE_EQ")]
    NseEquity,
    #[serde(rename = "NSE_FNO")]
    NseFno,
    #[serde(rename = "BSE_EQ")]
    BseEquity,
    #[serde(rename = "BSE_FNO")]
    BseFno,
    #[serde(rename = "MCX_COMM")]
    McxCommodity,
}

impl ExchangeSegment {
    pub const ALL: [ExchangeSegment; 6] = [
        ExchangeSegment::Index,
        ExchangeSegment::NseEquity,
        ExchangeSegment::NseFno,
        ExchangeSegment::BseEquity,
        ExchangeSegment::BseFno,
        ExchangeSegment::McxCommodity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeSegment::Index => "IDX_I",
            ExchangeSegment::NseEquity => "NSE_EQ",
            ExchangeSegment::NseFno => "NSE_FNO",
            ExchangeSegment::BseEquity => "BSE_EQ",
            ExchangeSegment::BseFno => "BSE_FNO",
            ExchangeSegment::McxCommodity => "MCX_COMM",
        }
    }
}

impl fmt::Display for ExchangeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeSegment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|seg| seg.as_str() == wanted)
            .ok_or_else(|| Error::unknown("exchange segment", s))
    }
}

/// Instrument type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentType {
    /// Index spot
    Index,
    /// Cash equity
    Equity,
    /// Index future
    Futidx,
    /// Stock future
    Futstk,
    /// Index option
    Optidx,
    /// Stock option
    Optstk,
    /// Commodity future
    Futcom,
    /// Option on commodity future
    Optfut,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Index => "INDEX",
            InstrumentType::Equity => "EQUITY",
            InstrumentType::Futidx => "FUTIDX",
            InstrumentType::Futstk => "FUTSTK",
            InstrumentType::Optidx => "OPTIDX",
            InstrumentType::Optstk => "OPTSTK",
            InstrumentType::Futcom => "FUTCOM",
            InstrumentType::Optfut => "OPTFUT",
        }
    }

    /// True for the option contract types themselves
    pub fn is_option(&self) -> bool {
        matches!(
            self,
            InstrumentType::Optidx | InstrumentType::Optstk | InstrumentType::Optfut
        )
    }

    /// True when a watchlist entry of this type fans out into an option chain
    pub fn is_option_bearing(&self) -> bool {
        self.is_option()
            || matches!(
                self,
                InstrumentType::Index | InstrumentType::Equity | InstrumentType::Futcom
            )
    }

    /// True for index-linked types (wider chains)
    pub fn is_index_linked(&self) -> bool {
        matches!(
            self,
            InstrumentType::Index | InstrumentType::Futidx | InstrumentType::Optidx
        )
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INDEX" => Ok(InstrumentType::Index),
            "EQUITY" => Ok(InstrumentType::Equity),
            "FUTIDX" => Ok(InstrumentType::Futidx),
            "FUTSTK" => Ok(InstrumentType::Futstk),
            "OPTIDX" => Ok(InstrumentType::Optidx),
            "OPTSTK" => Ok(InstrumentType::Optstk),
            "FUTCOM" => Ok(InstrumentType::Futcom),
            "OPTFUT" => Ok(InstrumentType::Optfut),
            other => Err(Error::unknown("instrument type", other)),
        }
    }
}

/// Option right (call or put leg)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionRight {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl OptionRight {
    pub const BOTH: [OptionRight; 2] = [OptionRight::Call, OptionRight::Put];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptionRight::Call => "CE",
            OptionRight::Put => "PE",
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionRight {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CE" | "CALL" | "C" => Ok(OptionRight::Call),
            "PE" | "PUT" | "P" => Ok(OptionRight::Put),
            other => Err(Error::unknown("option right", other)),
        }
    }
}

/// A (segment, security id) pair, the unit of an upstream subscribe request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedInstrument {
    pub segment: ExchangeSegment,
    pub security_id: SecurityId,
}

impl FeedInstrument {
    pub fn new(segment: ExchangeSegment, security_id: SecurityId) -> Self {
        Self {
            segment,
            security_id,
        }
    }
}

/// Decoded last-traded-price event from the upstream feed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub security_id: SecurityId,
    pub ltp: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Tick {
    pub fn new(security_id: SecurityId, ltp: f64) -> Self {
        Self {
            security_id,
            ltp,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_round_trip_names() {
        for seg in ExchangeSegment::ALL {
            assert_eq!(seg.as_str().parse::<ExchangeSegment>().unwrap(), seg);
        }
        assert!("NYSE".parse::<ExchangeSegment>().is_err());
    }

    #[test]
    fn test_segment_serde_uses_broker_names() {
        let json = serde_json::to_string(&ExchangeSegment::NseFno).unwrap();
        assert_eq!(json, "\"NSE_FNO\"");
    }

    #[test]
    fn test_instrument_type_flags() {
        assert!(InstrumentType::Optidx.is_option());
        assert!(InstrumentType::Index.is_option_bearing());
        assert!(!InstrumentType::Futstk.is_option_bearing());
        assert!(InstrumentType::Optidx.is_index_linked());
        assert!(!InstrumentType::Optstk.is_index_linked());
    }

    #[test]
    fn test_option_right_parse() {
        assert_eq!("ce".parse::<OptionRight>().unwrap(), OptionRight::Call);
        assert_eq!("PE".parse::<OptionRight>().unwrap(), OptionRight::Put);
        assert!("XX".parse::<OptionRight>().is_err());
    }

    #[test]
    fn test_security_id_parse() {
        assert_eq!(" 49081 ".parse::<SecurityId>().unwrap(), SecurityId(49081));
        assert!("abc".parse::<SecurityId>().is_err());
    }
}
