//! Broker REST client - trait and in-memory implementation

use crate::error::{UpstreamError, UpstreamResult};
use crate::types::{OptionChainQuote, Quote};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{FeedInstrument, SecurityId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Client trait for the broker's quote and option-chain REST API
#[async_trait]
pub trait BrokerRestClient: Send + Sync {
    /// Snapshot quotes for a batch of instruments. Unknown instruments are
    /// left out of the result rather than failing the batch.
    async fn fetch_quote(&self, instruments: &[FeedInstrument]) -> UpstreamResult<Vec<Quote>>;

    /// Live option chain of `underlying` (its spot instrument) for `expiry`
    async fn fetch_option_chain(
        &self,
        underlying: FeedInstrument,
        expiry: NaiveDate,
    ) -> UpstreamResult<OptionChainQuote>;

    /// Expiries the broker lists for `underlying`
    async fn fetch_expiry_list(&self, underlying: FeedInstrument) -> UpstreamResult<Vec<NaiveDate>>;
}

// ==================== Mock Implementation ====================

#[derive(Default)]
struct MockData {
    quotes: HashMap<SecurityId, Quote>,
    chains: HashMap<(SecurityId, NaiveDate), OptionChainQuote>,
    expiries: HashMap<SecurityId, Vec<NaiveDate>>,
}

/// In-memory broker client for tests and dry runs
#[derive(Clone, Default)]
pub struct MockBrokerClient {
    data: Arc<RwLock<MockData>>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote(self, quote: Quote) -> Self {
        self.data.write().quotes.insert(quote.security_id, quote);
        self
    }

    pub fn with_chain(self, chain: OptionChainQuote) -> Self {
        self.set_chain(chain);
        self
    }

    pub fn with_expiries(self, underlying: SecurityId, expiries: Vec<NaiveDate>) -> Self {
        self.data.write().expiries.insert(underlying, expiries);
        self
    }

    /// Replace a chain after construction.
    pub fn set_chain(&self, chain: OptionChainQuote) {
        self.data
            .write()
            .chains
            .insert((chain.underlying.security_id, chain.expiry), chain);
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls that reached this client.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> UpstreamResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::unavailable("mock broker offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerRestClient for MockBrokerClient {
    async fn fetch_quote(&self, instruments: &[FeedInstrument]) -> UpstreamResult<Vec<Quote>> {
        self.enter()?;
        let data = self.data.read();
        Ok(instruments
            .iter()
            .filter_map(|i| data.quotes.get(&i.security_id).copied())
            .collect())
    }

    async fn fetch_option_chain(
        &self,
        underlying: FeedInstrument,
        expiry: NaiveDate,
    ) -> UpstreamResult<OptionChainQuote> {
        self.enter()?;
        self.data
            .read()
            .chains
            .get(&(underlying.security_id, expiry))
            .cloned()
            .ok_or_else(|| {
                UpstreamError::unavailable(format!(
                    "no chain for {} expiring {}",
                    underlying.security_id, expiry
                ))
            })
    }

    async fn fetch_expiry_list(&self, underlying: FeedInstrument) -> UpstreamResult<Vec<NaiveDate>> {
        self.enter()?;
        Ok(self
            .data
            .read()
            .expiries
            .get(&underlying.security_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ExchangeSegment;

    #[tokio::test]
    async fn test_mock_client_serves_and_fails() {
        let nifty = FeedInstrument::new(ExchangeSegment::Index, SecurityId(13));
        let client = MockBrokerClient::new().with_quote(Quote {
            security_id: SecurityId(13),
            ltp: 22000.0,
            bid: None,
            ask: None,
        });

        let quotes = client.fetch_quote(&[nifty]).await.unwrap();
        assert_eq!(quotes.len(), 1);

        client.set_failing(true);
        assert!(client.fetch_quote(&[nifty]).await.is_err());
        assert_eq!(client.call_count(), 2);
    }
}
