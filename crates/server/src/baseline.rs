//! ALWAYS_ON baseline: the spot and the nearest-expiry ATM ladder of every
//! underlying configured `always_on`.

use common::{FeedInstrument, SecurityId, SharedClock};
use instrument::{AtmEngine, InstrumentRegistry, StrikeLadder};
use market_data::OptionChainCacheService;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use subscription::{SubscriptionManager, SubscriptionMeta, Tier, UnsubscribeReason};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BaselineReport {
    pub underlyings: usize,
    pub subscribed: usize,
    pub failed: usize,
}

pub struct Baseline {
    registry: Arc<InstrumentRegistry>,
    atm: Arc<AtmEngine>,
    subscriptions: Arc<SubscriptionManager>,
    cache: Arc<OptionChainCacheService>,
    clock: SharedClock,
    underlyings: BTreeSet<String>,
}

impl Baseline {
    pub fn new(
        atm: Arc<AtmEngine>,
        subscriptions: Arc<SubscriptionManager>,
        cache: Arc<OptionChainCacheService>,
        clock: SharedClock,
        underlyings: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            registry: atm.registry().clone(),
            atm,
            subscriptions,
            cache,
            clock,
            underlyings: underlyings.into_iter().map(|u| u.to_uppercase()).collect(),
        }
    }

    pub fn contains(&self, underlying: &str) -> bool {
        self.underlyings.contains(&underlying.to_uppercase())
    }

    pub fn underlyings(&self) -> impl Iterator<Item = &str> {
        self.underlyings.iter().map(String::as_str)
    }

    /// Subscribe every baseline underlying's price instrument and, where the
    /// cache knows a price, its ATM ladder. Underlyings without a price get
    /// their ladder on the first tick.
    #[tracing::instrument(skip(self))]
    pub fn bootstrap(&self) -> BaselineReport {
        let mut report = BaselineReport::default();
        for underlying in &self.underlyings {
            report.underlyings += 1;

            match price_instrument(&self.registry, underlying) {
                Some(instrument) => {
                    let meta = SubscriptionMeta::instrument(instrument.segment, underlying.clone());
                    self.tally(&mut report, instrument.security_id, meta);
                }
                None => {
                    warn!(%underlying, "No price instrument listed for baseline underlying");
                    report.failed += 1;
                    continue;
                }
            }

            let Some(ltp) = self.known_price(underlying) else {
                info!(%underlying, "No price yet, ladder deferred to the first tick");
                continue;
            };
            let Some(expiry) = self
                .registry
                .nearest_option_expiry(underlying, self.clock.now().date_naive())
            else {
                debug!(%underlying, "No live option expiry, baseline is the price instrument only");
                continue;
            };
            match self.atm.refresh(underlying, expiry, ltp, true) {
                Ok(Some(ladder)) => {
                    for (id, strike, right) in ladder.legs() {
                        let meta = self.leg_meta(&ladder, strike, right);
                        self.tally(&mut report, id, meta);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%underlying, error = %e, "Baseline ladder generation failed");
                }
            }
        }
        info!(
            underlyings = report.underlyings,
            subscribed = report.subscribed,
            failed = report.failed,
            "Always-on baseline subscribed"
        );
        report
    }

    /// Move the baseline from `previous` to `ladder`: subscribe the new legs
    /// and drop ALWAYS_ON legs that left the ladder. Returns the number of
    /// legs subscribed.
    pub fn roll(&self, previous: Option<&StrikeLadder>, ladder: &StrikeLadder) -> usize {
        let current: HashSet<SecurityId> = ladder.legs().map(|(id, _, _)| id).collect();
        let mut report = BaselineReport::default();
        for (id, strike, right) in ladder.legs() {
            let meta = self.leg_meta(ladder, strike, right);
            self.tally(&mut report, id, meta);
        }

        let mut dropped = 0;
        if let Some(previous) = previous {
            for (id, _, _) in previous.legs() {
                if current.contains(&id) {
                    continue;
                }
                let baseline_row = self
                    .subscriptions
                    .get(id)
                    .is_some_and(|row| row.tier == Tier::AlwaysOn);
                if baseline_row && self.subscriptions.unsubscribe(id, UnsubscribeReason::Explicit) {
                    dropped += 1;
                }
            }
        }
        info!(
            underlying = %ladder.underlying,
            atm = ladder.atm_strike,
            subscribed = report.subscribed,
            dropped,
            "Always-on ladder rolled"
        );
        report.subscribed
    }

    fn known_price(&self, underlying: &str) -> Option<f64> {
        self.cache.session(underlying).and_then(|s| s.ltp).or_else(|| {
            self.cache
                .expiries(underlying)
                .first()
                .and_then(|expiry| self.cache.get(underlying, *expiry).ok())
                .and_then(|chain| chain.underlying_ltp)
        })
    }

    fn leg_meta(&self, ladder: &StrikeLadder, strike: f64, right: common::OptionRight) -> SubscriptionMeta {
        let segment = self
            .registry
            .segment_of(&ladder.underlying)
            .unwrap_or(common::ExchangeSegment::NseFno);
        SubscriptionMeta::option(segment, ladder.underlying.clone(), ladder.expiry, strike, right)
    }

    fn tally(&self, report: &mut BaselineReport, id: SecurityId, meta: SubscriptionMeta) {
        match self.subscriptions.subscribe(id, Tier::AlwaysOn, meta) {
            Ok(_) => report.subscribed += 1,
            Err(e) => {
                report.failed += 1;
                warn!(security_id = %id, error = %e, "Always-on subscribe failed");
            }
        }
    }
}

/// The instrument whose ticks price an underlying: its spot record, or its
/// nearest future when no spot is listed.
pub fn price_instrument(registry: &InstrumentRegistry, underlying: &str) -> Option<FeedInstrument> {
    if let Some(spot) = registry.spot(underlying) {
        return Some(FeedInstrument::new(spot.segment, spot.security_id));
    }
    registry
        .lookup(underlying)
        .into_iter()
        .filter(|r| !r.is_option() && r.expiry.is_some())
        .min_by_key(|r| r.expiry)
        .map(|r| FeedInstrument::new(r.segment, r.security_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feed_services, nifty_leg};
    use common::OptionRight;
    use instrument::testing::{nifty_expiry, NIFTY_SPOT_ID, RELIANCE_SPOT_ID};

    #[tokio::test]
    async fn test_bootstrap_subscribes_spot_and_ladder() {
        let services = feed_services(&["NIFTY"], &["NIFTY"]).await;
        let report = services.baseline.bootstrap();

        // spot + 2 strikes each side of ATM, both legs
        assert_eq!(report.underlyings, 1);
        assert_eq!(report.subscribed, 1 + 10);
        assert_eq!(report.failed, 0);
        assert_eq!(services.subscriptions.stats().per_tier.always_on, 11);
        assert!(services.subscriptions.is_active(NIFTY_SPOT_ID));
        // Closing spot 23_050 rounds up to 23_100
        let ladder = services.atm.cached("NIFTY").unwrap();
        assert_eq!(ladder.atm_strike, 23_100.0);
        assert_eq!(ladder.expiry, nifty_expiry());
        assert!(services.subscriptions.is_active(nifty_leg(23_100.0, OptionRight::Put)));
    }

    #[tokio::test]
    async fn test_roll_drops_legs_that_left_the_ladder() {
        let services = feed_services(&["NIFTY"], &["NIFTY"]).await;
        services.baseline.bootstrap();
        let previous = services.atm.cached("NIFTY").unwrap();

        let ladder = services
            .atm
            .refresh("NIFTY", nifty_expiry(), 23_300.0, false)
            .unwrap()
            .unwrap();
        services.baseline.roll(Some(&previous), &ladder);

        // 22_900/23_000 left, 23_400/23_500 joined
        assert!(!services.subscriptions.is_active(nifty_leg(22_900.0, OptionRight::Call)));
        assert!(!services.subscriptions.is_active(nifty_leg(23_000.0, OptionRight::Put)));
        assert!(services.subscriptions.is_active(nifty_leg(23_500.0, OptionRight::Call)));
        assert_eq!(services.subscriptions.stats().per_tier.always_on, 11);
    }

    #[test]
    fn test_price_instrument_prefers_spot() {
        let registry = instrument::testing::sample_registry();
        assert_eq!(
            price_instrument(&registry, "reliance").map(|i| i.security_id),
            Some(RELIANCE_SPOT_ID)
        );
        assert!(price_instrument(&registry, "UNKNOWN").is_none());
    }
}
