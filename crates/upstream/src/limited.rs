//! Rate-limited, cached, time-bounded wrapper around any [`BrokerRestClient`].

use crate::backoff::EndpointBackoff;
use crate::error::{UpstreamError, UpstreamResult};
use crate::rate_limit::EndpointLimiters;
use crate::rest::BrokerRestClient;
use crate::ttl_cache::TtlCache;
use crate::types::{EndpointClass, OptionChainQuote, Quote};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{FeedInstrument, SecurityId};
use config::BrokerApiConfig;
use observability::FeedMetrics;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

/// Applies per-endpoint sliding windows, a request timeout, failure backoff
/// and response caching in front of an inner client.
///
/// While an endpoint class is backing off, calls to it fail fast with
/// [`UpstreamError::BackingOff`] without reaching the broker.
///
/// Chain and expiry responses are cached per (underlying, expiry) for long
/// TTLs; quotes are cached per instrument for a short one.
pub struct RateLimitedClient<C> {
    inner: C,
    limiters: EndpointLimiters,
    backoff: EndpointBackoff,
    timeout: Duration,
    quotes: TtlCache<SecurityId, Quote>,
    chains: TtlCache<(SecurityId, NaiveDate), OptionChainQuote>,
    expiries: TtlCache<SecurityId, Vec<NaiveDate>>,
    metrics: FeedMetrics,
}

impl<C: BrokerRestClient> RateLimitedClient<C> {
    pub fn new(inner: C, config: &BrokerApiConfig) -> Self {
        Self {
            inner,
            limiters: EndpointLimiters::from_config(&config.rate_limits),
            backoff: EndpointBackoff::from_config(&config.failure_backoff),
            timeout: config.request_timeout(),
            quotes: TtlCache::new(Duration::from_millis(config.cache.quote_ttl_ms)),
            chains: TtlCache::new(Duration::from_secs(config.cache.chain_ttl_seconds)),
            expiries: TtlCache::new(Duration::from_secs(config.cache.expiry_ttl_seconds)),
            metrics: FeedMetrics::new(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Drop the cached chain so the next fetch goes upstream.
    pub fn invalidate_chain(&self, underlying: SecurityId, expiry: NaiveDate) {
        self.chains.invalidate(&(underlying, expiry));
    }

    async fn call<T, F>(&self, class: EndpointClass, fut: F) -> UpstreamResult<T>
    where
        T: Send,
        F: Future<Output = UpstreamResult<T>> + Send,
    {
        if let Some(retry_in) = self.backoff.remaining(class) {
            return Err(UpstreamError::BackingOff {
                endpoint: class.as_str(),
                retry_in,
            });
        }
        self.limiters.get(class).acquire().await;

        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout {
                endpoint: class.as_str(),
                after: self.timeout,
            }),
        };
        self.metrics
            .record_rest_call(class.as_str(), started.elapsed(), result.is_ok());

        match &result {
            Ok(_) => self.backoff.record_success(class),
            Err(e) => {
                let pause = self.backoff.record_failure(class);
                warn!(endpoint = %class, error = %e, backoff = ?pause, "Broker REST call failed");
            }
        }
        result
    }
}

#[async_trait]
impl<C: BrokerRestClient> BrokerRestClient for RateLimitedClient<C> {
    async fn fetch_quote(&self, instruments: &[FeedInstrument]) -> UpstreamResult<Vec<Quote>> {
        let mut quotes = Vec::with_capacity(instruments.len());
        let mut missing = Vec::new();
        for instrument in instruments {
            match self.quotes.get(&instrument.security_id) {
                Some(quote) => quotes.push(quote),
                None => missing.push(*instrument),
            }
        }

        if !missing.is_empty() {
            let fetched = self
                .call(EndpointClass::Quote, self.inner.fetch_quote(&missing))
                .await?;
            for quote in fetched {
                self.quotes.insert(quote.security_id, quote);
                quotes.push(quote);
            }
        }
        Ok(quotes)
    }

    async fn fetch_option_chain(
        &self,
        underlying: FeedInstrument,
        expiry: NaiveDate,
    ) -> UpstreamResult<OptionChainQuote> {
        let key = (underlying.security_id, expiry);
        if let Some(chain) = self.chains.get(&key) {
            return Ok(chain);
        }

        let chain = self
            .call(
                EndpointClass::OptionChain,
                self.inner.fetch_option_chain(underlying, expiry),
            )
            .await?;
        if !chain.is_empty() {
            self.chains.insert(key, chain.clone());
        }
        Ok(chain)
    }

    async fn fetch_expiry_list(&self, underlying: FeedInstrument) -> UpstreamResult<Vec<NaiveDate>> {
        if let Some(expiries) = self.expiries.get(&underlying.security_id) {
            return Ok(expiries);
        }

        let expiries = self
            .call(
                EndpointClass::ExpiryList,
                self.inner.fetch_expiry_list(underlying),
            )
            .await?;
        self.expiries.insert(underlying.security_id, expiries.clone());
        Ok(expiries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::MockBrokerClient;
    use crate::types::{ChainRow, LegQuote};
    use assert_matches::assert_matches;
    use common::ExchangeSegment;

    fn nifty() -> FeedInstrument {
        FeedInstrument::new(ExchangeSegment::Index, SecurityId(13))
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 28).unwrap()
    }

    fn chain() -> OptionChainQuote {
        let leg = LegQuote {
            security_id: None,
            last: 100.0,
            bid: None,
            ask: None,
        };
        OptionChainQuote {
            underlying: nifty(),
            expiry: expiry(),
            underlying_ltp: 23150.0,
            rows: vec![ChainRow {
                strike: 23200.0,
                call: Some(leg),
                put: Some(leg),
            }],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_served_from_cache() {
        let client = RateLimitedClient::new(
            MockBrokerClient::new().with_chain(chain()),
            &BrokerApiConfig::default(),
        );

        client.fetch_option_chain(nifty(), expiry()).await.unwrap();
        client.fetch_option_chain(nifty(), expiry()).await.unwrap();
        assert_eq!(client.inner().call_count(), 1);

        client.invalidate_chain(SecurityId(13), expiry());
        client.fetch_option_chain(nifty(), expiry()).await.unwrap();
        assert_eq!(client.inner().call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_surface_as_unavailable() {
        let mock = MockBrokerClient::new();
        mock.set_failing(true);
        let client = RateLimitedClient::new(mock, &BrokerApiConfig::default());

        let err = client.fetch_expiry_list(nifty()).await.unwrap_err();
        assert_matches!(err, UpstreamError::Unavailable(_));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_class_backs_off_without_calling_upstream() {
        let mut config = BrokerApiConfig::default();
        config.cache.chain_ttl_seconds = 0;
        config.failure_backoff.initial_backoff_ms = 10_000;
        let mock = MockBrokerClient::new().with_chain(chain());
        mock.set_failing(true);
        let client = RateLimitedClient::new(mock, &config);

        client.fetch_option_chain(nifty(), expiry()).await.unwrap_err();
        assert_eq!(client.inner().call_count(), 1);

        client.inner().set_failing(false);
        let err = client.fetch_option_chain(nifty(), expiry()).await.unwrap_err();
        assert_matches!(err, UpstreamError::BackingOff { endpoint: "option_chain", .. });
        assert_eq!(client.inner().call_count(), 1);

        // Other classes are unaffected
        client.fetch_expiry_list(nifty()).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        client.fetch_option_chain(nifty(), expiry()).await.unwrap();
        assert_eq!(client.inner().call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_chain_call_waits_for_window() {
        let mut config = BrokerApiConfig::default();
        config.cache.chain_ttl_seconds = 0;
        let client = RateLimitedClient::new(MockBrokerClient::new().with_chain(chain()), &config);

        let start = tokio::time::Instant::now();
        client.fetch_option_chain(nifty(), expiry()).await.unwrap();
        client.fetch_option_chain(nifty(), expiry()).await.unwrap();
        assert!(start.elapsed() >= config.rate_limits.option_chain.window());
    }
}
