//! Broker REST client over HTTP (reqwest)

use crate::error::{UpstreamError, UpstreamResult};
use crate::rest::BrokerRestClient;
use crate::types::{ChainRow, LegQuote, OptionChainQuote, Quote};
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{FeedInstrument, SecurityId};
use config::BrokerApiConfig;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// HTTP client for the broker's market-quote and option-chain endpoints.
///
/// Timeouts and rate limits are applied by [`crate::RateLimitedClient`];
/// this type only speaks the wire format.
pub struct HttpBrokerClient {
    client: Client,
    base_url: String,
    client_id: String,
    access_token: String,
}

impl HttpBrokerClient {
    pub fn new(config: &BrokerApiConfig) -> UpstreamResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            access_token: config.access_token.clone(),
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &'static str,
        path: &str,
        body: serde_json::Value,
    ) -> UpstreamResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Broker REST request");

        let response = self
            .client
            .post(&url)
            .header("access-token", &self.access_token)
            .header("client-id", &self.client_id)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

// ==================== Wire types ====================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct WireDepthLevel {
    price: f64,
}

#[derive(Debug, Default, Deserialize)]
struct WireDepth {
    #[serde(default)]
    buy: Vec<WireDepthLevel>,
    #[serde(default)]
    sell: Vec<WireDepthLevel>,
}

#[derive(Debug, Deserialize)]
struct WireQuote {
    last_price: f64,
    #[serde(default)]
    depth: Option<WireDepth>,
}

#[derive(Debug, Deserialize)]
struct WireLeg {
    #[serde(default)]
    security_id: Option<u64>,
    #[serde(default)]
    last_price: f64,
    #[serde(default)]
    top_bid_price: Option<f64>,
    #[serde(default)]
    top_ask_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireStrike {
    #[serde(default)]
    ce: Option<WireLeg>,
    #[serde(default)]
    pe: Option<WireLeg>,
}

#[derive(Debug, Deserialize)]
struct WireChain {
    last_price: f64,
    #[serde(default)]
    oc: BTreeMap<String, WireStrike>,
}

fn positive(price: Option<f64>) -> Option<f64> {
    price.filter(|p| *p > 0.0)
}

impl From<WireLeg> for LegQuote {
    fn from(leg: WireLeg) -> Self {
        LegQuote {
            security_id: leg.security_id.map(SecurityId),
            last: leg.last_price,
            bid: positive(leg.top_bid_price),
            ask: positive(leg.top_ask_price),
        }
    }
}

fn quote_body(instruments: &[FeedInstrument]) -> serde_json::Value {
    let mut by_segment: BTreeMap<&'static str, Vec<u64>> = BTreeMap::new();
    for instrument in instruments {
        by_segment
            .entry(instrument.segment.as_str())
            .or_default()
            .push(instrument.security_id.value());
    }
    serde_json::json!(by_segment)
}

fn decode_quotes(
    data: HashMap<String, HashMap<String, WireQuote>>,
) -> UpstreamResult<Vec<Quote>> {
    let mut quotes = Vec::new();
    for (_, by_id) in data {
        for (id, quote) in by_id {
            let security_id: SecurityId = id
                .parse()
                .map_err(|_| UpstreamError::Decode(format!("bad security id '{}'", id)))?;
            let depth = quote.depth.unwrap_or_default();
            quotes.push(Quote {
                security_id,
                ltp: quote.last_price,
                bid: positive(depth.buy.first().map(|l| l.price)),
                ask: positive(depth.sell.first().map(|l| l.price)),
            });
        }
    }
    quotes.sort_by_key(|q| q.security_id);
    Ok(quotes)
}

fn decode_chain(
    underlying: FeedInstrument,
    expiry: NaiveDate,
    chain: WireChain,
) -> UpstreamResult<OptionChainQuote> {
    let mut rows = Vec::with_capacity(chain.oc.len());
    for (strike, legs) in chain.oc {
        let strike: f64 = strike
            .parse()
            .map_err(|_| UpstreamError::Decode(format!("bad strike '{}'", strike)))?;
        rows.push(ChainRow {
            strike,
            call: legs.ce.map(LegQuote::from),
            put: legs.pe.map(LegQuote::from),
        });
    }
    rows.sort_by(|a, b| a.strike.total_cmp(&b.strike));

    Ok(OptionChainQuote {
        underlying,
        expiry,
        underlying_ltp: chain.last_price,
        rows,
    })
}

#[async_trait]
impl BrokerRestClient for HttpBrokerClient {
    async fn fetch_quote(&self, instruments: &[FeedInstrument]) -> UpstreamResult<Vec<Quote>> {
        if instruments.is_empty() {
            return Ok(Vec::new());
        }
        let envelope: Envelope<HashMap<String, HashMap<String, WireQuote>>> = self
            .post("quote", "/marketfeed/quote", quote_body(instruments))
            .await?;
        decode_quotes(envelope.data)
    }

    async fn fetch_option_chain(
        &self,
        underlying: FeedInstrument,
        expiry: NaiveDate,
    ) -> UpstreamResult<OptionChainQuote> {
        let body = serde_json::json!({
            "UnderlyingScrip": underlying.security_id.value(),
            "UnderlyingSeg": underlying.segment.as_str(),
            "Expiry": expiry.format("%Y-%m-%d").to_string(),
        });
        let envelope: Envelope<WireChain> = self
            .post("option_chain", "/optionchain", body)
            .await?;
        decode_chain(underlying, expiry, envelope.data)
    }

    async fn fetch_expiry_list(&self, underlying: FeedInstrument) -> UpstreamResult<Vec<NaiveDate>> {
        let body = serde_json::json!({
            "UnderlyingScrip": underlying.security_id.value(),
            "UnderlyingSeg": underlying.segment.as_str(),
        });
        let envelope: Envelope<Vec<String>> = self
            .post("expiry_list", "/optionchain/expirylist", body)
            .await?;

        let mut expiries = envelope
            .data
            .iter()
            .map(|raw| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| UpstreamError::Decode(format!("bad expiry '{}'", raw)))
            })
            .collect::<UpstreamResult<Vec<_>>>()?;
        expiries.sort();
        Ok(expiries)
    }
}
