//! Payload types exchanged with the broker REST API.

use chrono::NaiveDate;
use common::{FeedInstrument, SecurityId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// REST endpoint classes; each has its own rate ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    Quote,
    OptionChain,
    ExpiryList,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Quote => "quote",
            EndpointClass::OptionChain => "option_chain",
            EndpointClass::ExpiryList => "expiry_list",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot quote for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub security_id: SecurityId,
    pub ltp: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
}

/// Broker-quoted prices of one option leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegQuote {
    #[serde(default)]
    pub security_id: Option<SecurityId>,
    pub last: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
}

/// One strike row of a broker option chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChainRow {
    pub strike: f64,
    #[serde(default)]
    pub call: Option<LegQuote>,
    #[serde(default)]
    pub put: Option<LegQuote>,
}

/// Live option chain for one underlying and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChainQuote {
    pub underlying: FeedInstrument,
    pub expiry: NaiveDate,
    pub underlying_ltp: f64,
    pub rows: Vec<ChainRow>,
}

impl OptionChainQuote {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
