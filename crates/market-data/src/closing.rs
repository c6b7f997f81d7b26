//! Closing-price source used while the session is closed.

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::SecurityId;
use instrument::InstrumentRegistry;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Last closing prices of one chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClosingChain {
    pub underlying_close: Option<f64>,
    /// Close per option leg; legs without a close are absent
    pub legs: HashMap<SecurityId, f64>,
}

impl ClosingChain {
    pub fn is_empty(&self) -> bool {
        self.underlying_close.is_none() && self.legs.is_empty()
    }
}

#[async_trait]
pub trait ClosingPriceSource: Send + Sync {
    async fn closing_chain(&self, underlying: &str, expiry: NaiveDate) -> CacheResult<ClosingChain>;
}

#[derive(Debug, Deserialize)]
struct CloseRow {
    security_id: u64,
    close: f64,
}

/// Closing prices keyed by security id, loaded from a `security_id,close`
/// CSV table and resolved to chains through the registry.
pub struct CsvClosingPriceSource {
    registry: Arc<InstrumentRegistry>,
    prices: RwLock<HashMap<SecurityId, f64>>,
}

impl CsvClosingPriceSource {
    pub fn load_path<P: AsRef<Path>>(path: P, registry: Arc<InstrumentRegistry>) -> CacheResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| CacheError::ClosingSource(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loading closing prices");
        Self::load(file, registry)
    }

    /// Rows with a non-positive or non-finite close are skipped.
    pub fn load<R: Read>(source: R, registry: Arc<InstrumentRegistry>) -> CacheResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);

        let mut prices = HashMap::new();
        let mut skipped = 0usize;
        for row in reader.deserialize::<CloseRow>() {
            match row {
                Ok(row) if row.close.is_finite() && row.close > 0.0 => {
                    prices.insert(SecurityId(row.security_id), row.close);
                }
                Ok(_) | Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, "Skipped malformed closing price rows");
        }
        info!(prices = prices.len(), "Closing prices loaded");

        Ok(Self::from_prices(registry, prices))
    }

    pub fn from_prices(
        registry: Arc<InstrumentRegistry>,
        prices: impl IntoIterator<Item = (SecurityId, f64)>,
    ) -> Self {
        Self {
            registry,
            prices: RwLock::new(prices.into_iter().collect()),
        }
    }

    /// An empty table; every chain resolves to estimates only.
    pub fn empty(registry: Arc<InstrumentRegistry>) -> Self {
        Self::from_prices(registry, [])
    }

    pub fn set_price(&self, security_id: SecurityId, close: f64) {
        self.prices.write().insert(security_id, close);
    }

    pub fn price(&self, security_id: SecurityId) -> Option<f64> {
        self.prices.read().get(&security_id).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.read().is_empty()
    }
}

#[async_trait]
impl ClosingPriceSource for CsvClosingPriceSource {
    async fn closing_chain(&self, underlying: &str, expiry: NaiveDate) -> CacheResult<ClosingChain> {
        let prices = self.prices.read();
        let underlying_close = self
            .registry
            .spot(underlying)
            .and_then(|spot| prices.get(&spot.security_id).copied());

        let legs = self
            .registry
            .strikes(underlying, expiry)
            .into_iter()
            .flat_map(|(_, legs)| [legs.call, legs.put])
            .flatten()
            .filter_map(|id| prices.get(&id).map(|close| (id, *close)))
            .collect();

        Ok(ClosingChain {
            underlying_close,
            legs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instrument::testing::{nifty_expiry, sample_registry, NIFTY_SPOT_ID};

    #[tokio::test]
    async fn test_load_resolves_chain_through_registry() {
        let csv = "security_id,close\n13,22150.5\n40000,210.0\n40001,3.5\n99999,1.0\n41000,-4\nbogus,2\n";
        let source = CsvClosingPriceSource::load(csv.as_bytes(), sample_registry()).unwrap();
        assert_eq!(source.len(), 4);
        assert_eq!(source.price(NIFTY_SPOT_ID), Some(22150.5));

        let chain = source.closing_chain("nifty", nifty_expiry()).await.unwrap();
        assert_eq!(chain.underlying_close, Some(22150.5));
        assert_eq!(chain.legs.len(), 2);
        assert_eq!(chain.legs.get(&SecurityId(40000)), Some(&210.0));
        // Not a NIFTY leg
        assert!(!chain.legs.contains_key(&SecurityId(99999)));
    }

    #[tokio::test]
    async fn test_unknown_chain_is_empty() {
        let source = CsvClosingPriceSource::empty(sample_registry());
        let chain = source.closing_chain("FOO", nifty_expiry()).await.unwrap();
        assert!(chain.is_empty());
    }
}
