//! Routes decoded feed ticks to the cache and the ATM engine.

use crate::baseline::Baseline;
use common::{SharedClock, Tick};
use instrument::{AtmEngine, InstrumentRecord, InstrumentRegistry};
use market_data::OptionChainCacheService;
use std::sync::Arc;
use subscription::TickSink;
use tracing::{debug, trace, warn};

pub struct TickRouter {
    registry: Arc<InstrumentRegistry>,
    atm: Arc<AtmEngine>,
    cache: Arc<OptionChainCacheService>,
    baseline: Arc<Baseline>,
    clock: SharedClock,
}

impl TickRouter {
    pub fn new(
        atm: Arc<AtmEngine>,
        cache: Arc<OptionChainCacheService>,
        baseline: Arc<Baseline>,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry: atm.registry().clone(),
            atm,
            cache,
            baseline,
            clock,
        }
    }

    /// Underlying priced by this record's ticks, if any.
    fn priced_underlying(&self, record: &InstrumentRecord) -> Option<String> {
        if record.is_option() {
            return None;
        }
        if record.is_spot() {
            return Some(record.underlying.to_uppercase());
        }
        // A future prices its underlying only when no spot is listed
        let underlying = record.underlying.to_uppercase();
        let price_id = crate::baseline::price_instrument(&self.registry, &underlying)?.security_id;
        (price_id == record.security_id).then_some(underlying)
    }

    fn on_underlying_tick(&self, underlying: &str, ltp: f64) {
        let repriced = self.cache.on_tick(underlying, ltp);
        trace!(%underlying, ltp, repriced, "Underlying tick");

        // Resolved per tick so the ladder moves on once its expiry passes
        let previous = self.atm.cached(underlying);
        let expiry = self
            .registry
            .nearest_option_expiry(underlying, self.clock.now().date_naive())
            .or_else(|| previous.as_ref().map(|l| l.expiry));
        let Some(expiry) = expiry else {
            return;
        };

        match self.atm.refresh(underlying, expiry, ltp, false) {
            Ok(Some(ladder)) if self.baseline.contains(underlying) => {
                self.baseline.roll(previous.as_ref(), &ladder);
            }
            Ok(_) => {}
            Err(e) => debug!(%underlying, error = %e, "Ladder refresh skipped"),
        }
    }
}

impl TickSink for TickRouter {
    fn on_tick(&self, connection_id: usize, tick: Tick) {
        if !(tick.ltp.is_finite() && tick.ltp > 0.0) {
            warn!(connection_id, security_id = %tick.security_id, ltp = tick.ltp, "Dropping tick with invalid price");
            return;
        }
        let Some(record) = self.registry.by_security_id(tick.security_id) else {
            trace!(connection_id, security_id = %tick.security_id, "Tick for unknown instrument");
            return;
        };

        if record.is_option() {
            self.cache.on_leg_tick(tick.security_id, tick.ltp);
        } else if let Some(underlying) = self.priced_underlying(&record) {
            self.on_underlying_tick(&underlying, tick.ltp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feed_services, nifty_leg};
    use common::{OptionRight, SecurityId};
    use chrono::{TimeZone, Utc};
    use instrument::testing::{nifty_expiry, nifty_next_expiry, sample_registry, NIFTY_FUTURE_ID, NIFTY_SPOT_ID};
    use instrument::RecalcTrigger;
    use market_data::PriceSource;

    #[tokio::test]
    async fn test_spot_tick_reprices_cache_and_rolls_baseline() {
        let services = feed_services(&["NIFTY"], &["NIFTY"]).await;
        services.baseline.bootstrap();
        let router = services.tick_router();

        router.on_tick(0, Tick::new(NIFTY_SPOT_ID, 23_420.0));

        let chain = services.cache.get("NIFTY", nifty_expiry()).unwrap();
        assert_eq!(chain.underlying_ltp, Some(23_420.0));
        assert_eq!(chain.atm_strike, Some(23_400.0));
        assert_eq!(services.atm.cached("NIFTY").unwrap().atm_strike, 23_400.0);
        assert!(services
            .subscriptions
            .is_active(nifty_leg(23_600.0, OptionRight::Put)));
    }

    #[tokio::test]
    async fn test_leg_tick_marks_leg_live() {
        let services = feed_services(&["NIFTY"], &[]).await;
        let router = services.tick_router();
        let id = nifty_leg(23_000.0, OptionRight::Call);

        router.on_tick(1, Tick::new(id, 99.5));

        let chain = services.cache.get("NIFTY", nifty_expiry()).unwrap();
        let leg = chain.leg(23_000.0, OptionRight::Call).unwrap();
        assert_eq!(leg.last, Some(99.5));
        assert_eq!(leg.provenance, PriceSource::Live);
        assert!(!leg.estimated);
    }

    #[tokio::test]
    async fn test_ignores_futures_unknown_and_bad_prices() {
        let services = feed_services(&["NIFTY"], &[]).await;
        let router = services.tick_router();
        let before = services.cache.get("NIFTY", nifty_expiry()).unwrap();

        // NIFTY has a spot, so its future does not price the chain
        router.on_tick(0, Tick::new(NIFTY_FUTURE_ID, 23_900.0));
        router.on_tick(0, Tick::new(SecurityId(999_999), 1.0));
        router.on_tick(0, Tick::new(NIFTY_SPOT_ID, f64::NAN));

        let after = services.cache.get("NIFTY", nifty_expiry()).unwrap();
        assert_eq!(before.underlying_ltp, after.underlying_ltp);
        assert!(services.atm.cached("NIFTY").is_none());
    }

    #[tokio::test]
    async fn test_ladder_moves_to_next_expiry_once_current_expires() {
        let services = feed_services(&["NIFTY"], &["NIFTY"]).await;
        services.baseline.bootstrap();
        let old_atm_call = nifty_leg(23_100.0, OptionRight::Call);
        assert!(services.subscriptions.is_active(old_atm_call));

        services
            .clock
            .set(Utc.with_ymd_and_hms(2024, 3, 29, 4, 0, 0).unwrap());
        services.tick_router().on_tick(0, Tick::new(NIFTY_SPOT_ID, 23_420.0));

        let ladder = services.atm.cached("NIFTY").unwrap();
        assert_eq!(ladder.expiry, nifty_next_expiry());
        assert_eq!(ladder.trigger, RecalcTrigger::ExpiryChange);
        assert_eq!(ladder.atm_strike, 23_400.0);

        let next_atm_call = sample_registry()
            .option_token("NIFTY", nifty_next_expiry(), 23_400.0, OptionRight::Call)
            .unwrap();
        assert!(services.subscriptions.is_active(next_atm_call));
        assert!(!services.subscriptions.is_active(old_atm_call));
        assert_eq!(services.subscriptions.stats().per_tier.always_on, 11);
    }
}
