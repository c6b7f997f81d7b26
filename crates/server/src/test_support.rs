//! Fixtures shared by the server tests.

use crate::app::{FeedParts, FeedServices};
use chrono::{TimeZone, Utc};
use common::{ExchangeSegment, FeedInstrument, ManualClock, OptionRight, SecurityId};
use config::{MasterConfig, TrackedUnderlying};
use instrument::testing::{nifty_expiry, sample_registry, NIFTY_SPOT_ID};
use market_data::CsvClosingPriceSource;
use std::ops::Deref;
use std::sync::Arc;
use upstream::{ChainRow, LegQuote, ManualCalendar, MockBrokerClient, OptionChainQuote};
use watchlist::InMemoryWatchlistStore;

pub(crate) fn test_config(tracked: &[&str], always_on: &[&str]) -> MasterConfig {
    let mut config = MasterConfig::default();
    config.atm.index_strikes_each_side = 2;
    config.atm.stock_strikes_each_side = 2;
    config.subscriptions.global_capacity = 100;
    config.connections.count = 2;
    config.connections.capacity_per_connection = 60;
    config.api.host = "127.0.0.1".to_string();
    config.api.port = 0;
    config.instruments.tracked = tracked
        .iter()
        .map(|symbol| TrackedUnderlying {
            symbol: symbol.to_string(),
            expiries: 1,
            always_on: always_on.contains(symbol),
        })
        .collect();
    config
}

fn nifty_live_chain() -> OptionChainQuote {
    let leg = |last: f64| LegQuote {
        security_id: None,
        last,
        bid: Some(last - 0.5),
        ask: Some(last + 0.5),
    };
    OptionChainQuote {
        underlying: FeedInstrument::new(ExchangeSegment::Index, NIFTY_SPOT_ID),
        expiry: nifty_expiry(),
        underlying_ltp: 23_210.0,
        rows: vec![ChainRow {
            strike: 23_200.0,
            call: Some(leg(140.0)),
            put: Some(leg(125.0)),
        }],
    }
}

/// Sample registry, every session closed, NIFTY closing prices (spot at
/// 23_050) and a NIFTY live chain on the mock broker.
pub(crate) fn feed_parts() -> (FeedParts, Arc<ManualCalendar>, MockBrokerClient) {
    feed_parts_at(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 20, 4, 0, 0).unwrap()))
}

fn feed_parts_at(clock: ManualClock) -> (FeedParts, Arc<ManualCalendar>, MockBrokerClient) {
    let registry = sample_registry();
    let mut prices = vec![(NIFTY_SPOT_ID, 23_050.0)];
    for (strike, legs) in registry.strikes("NIFTY", nifty_expiry()) {
        if let (Some(call), Some(put)) = (legs.call, legs.put) {
            prices.push((call, strike / 100.0));
            prices.push((put, strike / 200.0));
        }
    }
    let calendar = Arc::new(ManualCalendar::new());
    let broker = MockBrokerClient::new().with_chain(nifty_live_chain());

    let parts = FeedParts {
        registry: registry.clone(),
        rest: Arc::new(broker.clone()),
        closing: Arc::new(CsvClosingPriceSource::from_prices(registry, prices)),
        calendar: calendar.clone(),
        store: Arc::new(InMemoryWatchlistStore::new()),
        clock: Arc::new(clock),
    };
    (parts, calendar, broker)
}

pub(crate) struct Harness {
    pub services: FeedServices,
    pub calendar: Arc<ManualCalendar>,
    pub clock: ManualClock,
}

impl Deref for Harness {
    type Target = FeedServices;

    fn deref(&self) -> &FeedServices {
        &self.services
    }
}

/// Assembled services with the cache already populated.
pub(crate) async fn feed_services(tracked: &[&str], always_on: &[&str]) -> Harness {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 20, 4, 0, 0).unwrap());
    let (parts, calendar, _broker) = feed_parts_at(clock.clone());
    let services = FeedServices::assemble(test_config(tracked, always_on), parts);
    services.cache.populate().await.unwrap();
    Harness {
        services,
        calendar,
        clock,
    }
}

pub(crate) fn nifty_leg(strike: f64, right: OptionRight) -> SecurityId {
    sample_registry()
        .option_token("NIFTY", nifty_expiry(), strike, right)
        .unwrap()
}
