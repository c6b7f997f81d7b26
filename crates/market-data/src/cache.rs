//! Option Chain Cache Service.
//!
//! Keeps one [`OptionChainSkeleton`] per tracked (underlying, expiry) and a
//! price source per underlying. During a session the chains come from the
//! broker's REST chain and streamed ticks (`Live`); outside it from the
//! closing-price table (`Closing`). Legs without a quote carry a decay
//! estimate flagged `estimated`.
//!
//! ```text
//!             calendar open?                     REST option chain
//! populate ──────────────────► Live ───────────────────────────────┐
//!     │                                                            ▼
//!     └──────────────────────► Closing ──► closing-price table ──► skeletons
//!                                                                  ▲    │
//! reconcile (periodic): source flipped ──► populate_underlying ────┘    │
//! on_tick / on_leg_tick ────────────────────────────────────────────────┘
//! ```

use crate::closing::ClosingPriceSource;
use crate::decay::DecayModel;
use crate::error::{CacheError, CacheResult};
use crate::types::{
    same_strike, ChainLeg, ChainStrike, OptionChainSkeleton, PriceSource, SessionState,
    SourceTransition,
};
use chrono::{DateTime, NaiveDate, Utc};
use common::{FeedInstrument, OptionRight, SecurityId, SharedClock};
use config::{CacheConfig, InstrumentsConfig};
use instrument::{atm_strike, InstrumentRegistry, FALLBACK_STRIKE_STEP};
use observability::FeedMetrics;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use upstream::{BrokerRestClient, ChainRow, LegQuote, MarketCalendar};

/// Underlying whose nearest expiries are cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedChain {
    pub underlying: String,
    pub expiries: usize,
}

#[derive(Debug, Clone)]
pub struct CacheServiceConfig {
    pub tracked: Vec<TrackedChain>,
    /// Decides the startup source; the first tracked underlying when unset
    pub representative_underlying: Option<String>,
    pub decay: DecayModel,
}

impl CacheServiceConfig {
    pub fn from_config(instruments: &InstrumentsConfig, cache: &CacheConfig) -> Self {
        Self {
            tracked: instruments
                .tracked
                .iter()
                .map(|t| TrackedChain {
                    underlying: t.symbol.to_uppercase(),
                    expiries: t.expiries.max(1) as usize,
                })
                .collect(),
            representative_underlying: cache.representative_underlying.as_ref().map(|u| u.to_uppercase()),
            decay: DecayModel::from(&cache.decay),
        }
    }
}

#[derive(Debug, Clone)]
struct LegRef {
    underlying: String,
    expiry: NaiveDate,
    strike: f64,
    right: OptionRight,
}

#[derive(Default)]
struct CacheState {
    chains: HashMap<(String, NaiveDate), OptionChainSkeleton>,
    sessions: HashMap<String, SessionState>,
    legs: HashMap<SecurityId, LegRef>,
}

impl CacheState {
    fn store(&mut self, skeleton: OptionChainSkeleton) {
        for strike in &skeleton.strikes {
            for right in OptionRight::BOTH {
                self.legs.insert(
                    strike.leg(right).security_id,
                    LegRef {
                        underlying: skeleton.underlying.clone(),
                        expiry: skeleton.expiry,
                        strike: strike.strike,
                        right,
                    },
                );
            }
        }
        self.chains
            .insert((skeleton.underlying.clone(), skeleton.expiry), skeleton);
    }

    /// Drop an underlying's chains that expired before `today`, with their
    /// leg index entries. Returns how many chains went.
    fn prune_expired(&mut self, underlying: &str, today: NaiveDate) -> usize {
        let before = self.chains.len();
        self.chains
            .retain(|(u, expiry), _| u != underlying || *expiry >= today);
        self.legs
            .retain(|_, leg| leg.underlying != underlying || leg.expiry >= today);
        before - self.chains.len()
    }

    fn has_expired(&self, underlying: &str, today: NaiveDate) -> bool {
        self.chains
            .keys()
            .any(|(u, expiry)| u == underlying && *expiry < today)
    }
}

pub struct OptionChainCacheService {
    registry: Arc<InstrumentRegistry>,
    rest: Arc<dyn BrokerRestClient>,
    closing: Arc<dyn ClosingPriceSource>,
    calendar: Arc<dyn MarketCalendar>,
    clock: SharedClock,
    config: CacheServiceConfig,
    state: RwLock<CacheState>,
    metrics: FeedMetrics,
}

impl OptionChainCacheService {
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        rest: Arc<dyn BrokerRestClient>,
        closing: Arc<dyn ClosingPriceSource>,
        calendar: Arc<dyn MarketCalendar>,
        clock: SharedClock,
        config: CacheServiceConfig,
    ) -> Self {
        Self {
            registry,
            rest,
            closing,
            calendar,
            clock,
            config,
            state: RwLock::new(CacheState::default()),
            metrics: FeedMetrics::new(),
        }
    }

    pub fn tracked_underlyings(&self) -> Vec<String> {
        self.config.tracked.iter().map(|t| t.underlying.clone()).collect()
    }

    fn representative(&self) -> Option<String> {
        self.config
            .representative_underlying
            .clone()
            .or_else(|| self.config.tracked.first().map(|t| t.underlying.clone()))
    }

    /// `Live` while the session of the underlying's segment is open.
    /// Underlyings the registry cannot place are treated as closed.
    pub fn resolve_source(&self, underlying: &str) -> PriceSource {
        match self.registry.segment_of(underlying) {
            Some(segment) if self.calendar.is_session_open(segment, self.clock.now()) => {
                PriceSource::Live
            }
            _ => PriceSource::Closing,
        }
    }

    /// Fill the cache for every tracked underlying from the source the
    /// representative underlying resolves to. An empty cache afterwards is
    /// fatal.
    #[tracing::instrument(skip(self))]
    pub async fn populate(&self) -> CacheResult<usize> {
        let Some(representative) = self.representative() else {
            return Err(CacheError::StartupIntegrity(
                "no tracked underlyings configured".to_string(),
            ));
        };
        let source = self.resolve_source(&representative);
        info!(%representative, %source, "Populating option chain cache");

        let mut total = 0;
        for tracked in self.tracked_underlyings() {
            match self.populate_underlying(&tracked, source).await {
                Ok(count) => total += count,
                Err(e) => warn!(underlying = %tracked, error = %e, "Populate failed"),
            }
        }

        if self.state.read().chains.is_empty() {
            return Err(CacheError::StartupIntegrity(format!(
                "no option chain could be loaded from the {} source",
                source
            )));
        }
        info!(chains = total, "Option chain cache populated");
        Ok(total)
    }

    /// Re-populate every cached expiry of one underlying from `source`.
    ///
    /// Expiries that fail keep their previous skeleton. The underlying's
    /// session switches to `source` once at least one chain loaded.
    pub async fn populate_underlying(&self, underlying: &str, source: PriceSource) -> CacheResult<usize> {
        let underlying = underlying.to_uppercase();
        let expiries = self.expiries_for(&underlying, source).await;
        if expiries.is_empty() {
            return Err(CacheError::UnknownUnderlying(underlying));
        }

        let mut loaded = 0;
        let mut last_error = None;
        for expiry in expiries {
            match self.build_chain(&underlying, expiry, source).await {
                Ok(skeleton) => {
                    debug!(
                        underlying = %underlying,
                        %expiry,
                        %source,
                        strikes = skeleton.strikes.len(),
                        priced = skeleton.priced_legs(),
                        "Chain loaded"
                    );
                    self.state.write().store(skeleton);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(underlying = %underlying, %expiry, %source, error = %e, "Chain load failed");
                    last_error = Some(e);
                }
            }
        }

        if loaded == 0 {
            return Err(last_error.unwrap_or(CacheError::UnknownUnderlying(underlying)));
        }

        let now = self.clock.now();
        let mut state = self.state.write();
        let pruned = state.prune_expired(&underlying, now.date_naive());
        if pruned > 0 {
            info!(underlying = %underlying, pruned, "Dropped expired chains");
        }
        let ltp = state
            .chains
            .iter()
            .filter(|((u, _), _)| *u == underlying)
            .find_map(|(_, chain)| chain.underlying_ltp);
        state.sessions.insert(
            underlying,
            SessionState {
                source,
                checked_at: now,
                ltp,
            },
        );
        Ok(loaded)
    }

    /// Nearest configured number of listed expiries on or after today. When
    /// live, limited to what the broker still lists if it answers.
    async fn expiries_for(&self, underlying: &str, source: PriceSource) -> Vec<NaiveDate> {
        let wanted = self
            .config
            .tracked
            .iter()
            .find(|t| t.underlying == underlying)
            .map(|t| t.expiries)
            .unwrap_or(1);
        let today = self.clock.now().date_naive();
        let mut listed: Vec<NaiveDate> = self
            .registry
            .option_expiries(underlying)
            .into_iter()
            .filter(|e| *e >= today)
            .collect();

        if source == PriceSource::Live {
            if let Ok(instrument) = self.underlying_instrument(underlying) {
                match self.rest.fetch_expiry_list(instrument).await {
                    Ok(broker) if !broker.is_empty() => listed.retain(|e| broker.contains(e)),
                    Ok(_) => {}
                    Err(e) => debug!(underlying, error = %e, "Expiry list unavailable, using registry"),
                }
            }
        }

        listed.truncate(wanted);
        listed
    }

    /// The instrument the broker keys an underlying's chain on: its spot
    /// record, or the nearest future when it has none.
    fn underlying_instrument(&self, underlying: &str) -> CacheResult<FeedInstrument> {
        if let Some(spot) = self.registry.spot(underlying) {
            return Ok(FeedInstrument::new(spot.segment, spot.security_id));
        }
        self.registry
            .lookup(underlying)
            .into_iter()
            .filter(|r| !r.is_option() && r.expiry.is_some())
            .min_by_key(|r| r.expiry)
            .map(|r| FeedInstrument::new(r.segment, r.security_id))
            .ok_or_else(|| CacheError::UnknownUnderlying(underlying.to_string()))
    }

    async fn build_chain(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        source: PriceSource,
    ) -> CacheResult<OptionChainSkeleton> {
        let listed = self.registry.strikes(underlying, expiry);
        if listed.is_empty() {
            return Err(CacheError::NotFound {
                underlying: underlying.to_string(),
                expiry,
            });
        }

        let now = self.clock.now();
        let step = self
            .registry
            .strike_step(underlying)
            .unwrap_or(FALLBACK_STRIKE_STEP);

        let mut strikes: Vec<ChainStrike> = listed
            .iter()
            .filter_map(|(strike, legs)| {
                Some(ChainStrike {
                    strike: *strike,
                    call: ChainLeg::unpriced(legs.call?, source, now),
                    put: ChainLeg::unpriced(legs.put?, source, now),
                })
            })
            .collect();

        let underlying_ltp = match source {
            PriceSource::Live => {
                let instrument = self.underlying_instrument(underlying)?;
                let chain = self.rest.fetch_option_chain(instrument, expiry).await?;
                for strike in &mut strikes {
                    if let Some(row) = find_row(&chain.rows, strike.strike) {
                        apply_quote(&mut strike.call, row.call.as_ref(), now);
                        apply_quote(&mut strike.put, row.put.as_ref(), now);
                    }
                }
                positive(chain.underlying_ltp)
            }
            PriceSource::Closing => {
                let closes = self.closing.closing_chain(underlying, expiry).await?;
                for strike in &mut strikes {
                    for right in OptionRight::BOTH {
                        let leg = strike.leg_mut(right);
                        if let Some(close) = closes.legs.get(&leg.security_id) {
                            leg.last = Some(*close);
                        }
                    }
                }
                closes.underlying_close.and_then(positive)
            }
        };

        if let Some(spot) = underlying_ltp {
            for strike in &mut strikes {
                for right in OptionRight::BOTH {
                    let price = strike.strike;
                    let leg = strike.leg_mut(right);
                    if leg.last.is_none() {
                        estimate_leg(leg, &self.config.decay, spot, price, step, right, now);
                    }
                }
            }
        }

        let skeleton = OptionChainSkeleton {
            underlying: underlying.to_string(),
            expiry,
            strike_step: step,
            lot_size: self.registry.lot_size(underlying),
            atm_strike: underlying_ltp.map(|ltp| atm_strike(ltp, step)),
            underlying_ltp,
            source,
            updated_at: now,
            strikes,
        };

        if skeleton.priced_legs() == 0 {
            return Err(CacheError::NotFound {
                underlying: underlying.to_string(),
                expiry,
            });
        }
        Ok(skeleton)
    }

    /// Underlying price update. Re-centres the ATM strike and re-estimates
    /// every leg not quoted live by the broker. Returns the legs estimated.
    pub fn on_tick(&self, underlying: &str, ltp: f64) -> usize {
        if !(ltp.is_finite() && ltp > 0.0) {
            return 0;
        }
        let underlying = underlying.to_uppercase();
        let now = self.clock.now();
        let decay = self.config.decay;

        let mut state = self.state.write();
        if let Some(session) = state.sessions.get_mut(&underlying) {
            session.ltp = Some(ltp);
        }

        let mut estimated = 0;
        for ((u, _), chain) in state.chains.iter_mut() {
            if *u != underlying {
                continue;
            }
            chain.underlying_ltp = Some(ltp);
            chain.atm_strike = Some(atm_strike(ltp, chain.strike_step));
            chain.updated_at = now;

            let step = chain.strike_step;
            for strike in &mut chain.strikes {
                for right in OptionRight::BOTH {
                    let price = strike.strike;
                    let leg = strike.leg_mut(right);
                    if !leg.is_live_quote()
                        && estimate_leg(leg, &decay, ltp, price, step, right, now)
                    {
                        estimated += 1;
                    }
                }
            }
        }
        estimated
    }

    /// Broker-quoted leg price. Returns false for legs not in the cache.
    pub fn on_leg_tick(&self, security_id: SecurityId, ltp: f64) -> bool {
        if !(ltp.is_finite() && ltp >= 0.0) {
            return false;
        }
        let now = self.clock.now();
        let mut state = self.state.write();
        let Some(leg_ref) = state.legs.get(&security_id).cloned() else {
            return false;
        };
        let Some(chain) = state
            .chains
            .get_mut(&(leg_ref.underlying.clone(), leg_ref.expiry))
        else {
            return false;
        };
        let Some(strike) = chain
            .strikes
            .iter_mut()
            .find(|s| same_strike(s.strike, leg_ref.strike))
        else {
            return false;
        };

        let leg = strike.leg_mut(leg_ref.right);
        leg.last = Some(ltp);
        leg.provenance = PriceSource::Live;
        leg.estimated = false;
        leg.updated_at = now;
        chain.updated_at = now;
        true
    }

    /// Re-resolve the source of every tracked underlying and re-populate
    /// those whose session opened or closed. An underlying holding a chain
    /// past its expiry is re-populated on its current source, which rolls
    /// it onto the next listed expiries.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Vec<SourceTransition> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut transitions = Vec::new();

        for underlying in self.tracked_underlyings() {
            let resolved = self.resolve_source(&underlying);
            let current = {
                let mut state = self.state.write();
                match state.sessions.get_mut(&underlying) {
                    Some(session) => {
                        session.checked_at = now;
                        Some(session.source)
                    }
                    None => None,
                }
            };

            // Never populated: retry on the resolved source
            let from = current.unwrap_or(match resolved {
                PriceSource::Live => PriceSource::Closing,
                PriceSource::Closing => PriceSource::Live,
            });
            if current == Some(resolved) {
                if self.state.read().has_expired(&underlying, today) {
                    match self.populate_underlying(&underlying, resolved).await {
                        Ok(chains) => info!(underlying = %underlying, chains, "Rolled onto the next expiry"),
                        Err(e) => warn!(underlying = %underlying, error = %e, "Expiry roll failed, will retry"),
                    }
                }
                continue;
            }

            match self.populate_underlying(&underlying, resolved).await {
                Ok(chains) => {
                    info!(underlying = %underlying, %from, to = %resolved, chains, "Price source switched");
                    self.metrics.record_source_transition(&underlying, resolved.as_str());
                    transitions.push(SourceTransition {
                        underlying,
                        from,
                        to: resolved,
                        chains_repopulated: chains,
                    });
                }
                Err(e) => {
                    warn!(underlying = %underlying, to = %resolved, error = %e, "Price source switch failed, will retry");
                }
            }
        }
        transitions
    }

    pub fn get(&self, underlying: &str, expiry: NaiveDate) -> CacheResult<OptionChainSkeleton> {
        let underlying = underlying.to_uppercase();
        self.state
            .read()
            .chains
            .get(&(underlying.clone(), expiry))
            .cloned()
            .ok_or(CacheError::NotFound { underlying, expiry })
    }

    pub fn session(&self, underlying: &str) -> Option<SessionState> {
        self.state.read().sessions.get(&underlying.to_uppercase()).copied()
    }

    /// Cached expiries of an underlying, ascending.
    pub fn expiries(&self, underlying: &str) -> Vec<NaiveDate> {
        let underlying = underlying.to_uppercase();
        let mut expiries: Vec<NaiveDate> = self
            .state
            .read()
            .chains
            .keys()
            .filter(|(u, _)| *u == underlying)
            .map(|(_, e)| *e)
            .collect();
        expiries.sort();
        expiries
    }

    pub fn chain_count(&self) -> usize {
        self.state.read().chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().chains.is_empty()
    }
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

fn find_row(rows: &[ChainRow], strike: f64) -> Option<&ChainRow> {
    rows.iter().find(|r| same_strike(r.strike, strike))
}

fn apply_quote(leg: &mut ChainLeg, quote: Option<&LegQuote>, at: DateTime<Utc>) {
    let Some(quote) = quote else {
        return;
    };
    if !(quote.last.is_finite() && quote.last >= 0.0) {
        return;
    }
    leg.last = Some(quote.last);
    leg.bid = quote.bid;
    leg.ask = quote.ask;
    leg.provenance = PriceSource::Live;
    leg.estimated = false;
    leg.updated_at = at;
}

/// Returns whether an estimate was written.
fn estimate_leg(
    leg: &mut ChainLeg,
    decay: &DecayModel,
    spot: f64,
    strike: f64,
    step: f64,
    right: OptionRight,
    at: DateTime<Utc>,
) -> bool {
    match decay.estimate(spot, strike, step, right) {
        Some(premium) => {
            leg.last = Some(premium);
            leg.bid = None;
            leg.ask = None;
            leg.estimated = true;
            leg.updated_at = at;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closing::CsvClosingPriceSource;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use common::{ExchangeSegment, ManualClock};
    use instrument::testing::{nifty_expiry, nifty_next_expiry, sample_master_csv, NIFTY_SPOT_ID};
    use upstream::{ManualCalendar, MockBrokerClient, OptionChainQuote};

    const CRUDE_FIRST_ID: u64 = 50_000;

    fn crude_expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 16).unwrap()
    }

    /// Sample master plus CRUDEOIL options on MCX, so two underlyings sit
    /// on segments with independent sessions.
    fn registry() -> Arc<InstrumentRegistry> {
        let mut csv = sample_master_csv();
        csv.push_str("50999,MCX_COMM,FUTCOM,CRUDEOIL,CRUDEOIL-Apr2024-FUT,CRUDEOIL,2024-04-19,,,100\n");
        let mut id = CRUDE_FIRST_ID;
        for strike in (6_400..=6_600).step_by(50) {
            for right in ["CE", "PE"] {
                csv.push_str(&format!(
                    "{id},MCX_COMM,OPTFUT,CRUDEOIL,CRUDEOIL-Apr2024-{strike}-{right},CRUDEOIL,2024-04-16,{strike},{right},100\n"
                ));
                id += 1;
            }
        }
        Arc::new(InstrumentRegistry::load(csv.as_bytes()).unwrap())
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 20, 4, 0, 0).unwrap())
    }

    fn config(symbols: &[&str]) -> CacheServiceConfig {
        CacheServiceConfig {
            tracked: symbols
                .iter()
                .map(|s| TrackedChain {
                    underlying: s.to_string(),
                    expiries: 1,
                })
                .collect(),
            representative_underlying: None,
            decay: DecayModel {
                atm_premium_pct: 0.01,
                decay_width: 4.0,
            },
        }
    }

    /// Closing prices for every NIFTY nearest-expiry leg, the NIFTY spot
    /// and every CRUDEOIL leg.
    fn closing(registry: &Arc<InstrumentRegistry>) -> Arc<CsvClosingPriceSource> {
        let mut prices = vec![(NIFTY_SPOT_ID, 22_050.0)];
        for (underlying, expiry) in [("NIFTY", nifty_expiry()), ("CRUDEOIL", crude_expiry())] {
            for (strike, legs) in registry.strikes(underlying, expiry) {
                prices.push((legs.call.unwrap(), strike / 100.0));
                prices.push((legs.put.unwrap(), strike / 200.0));
            }
        }
        Arc::new(CsvClosingPriceSource::from_prices(registry.clone(), prices))
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
            underlying_ltp: 22_210.0,
            rows: vec![
                ChainRow {
                    strike: 22_200.0,
                    call: Some(leg(120.0)),
                    put: Some(leg(105.0)),
                },
                ChainRow {
                    strike: 22_300.0,
                    call: Some(leg(75.0)),
                    put: None,
                },
            ],
        }
    }

    struct Fixture {
        service: OptionChainCacheService,
        calendar: Arc<ManualCalendar>,
        broker: MockBrokerClient,
        clock: ManualClock,
    }

    fn fixture(symbols: &[&str]) -> Fixture {
        let registry = registry();
        let calendar = Arc::new(ManualCalendar::new());
        let broker = MockBrokerClient::new().with_chain(nifty_live_chain());
        let clock = clock();
        let service = OptionChainCacheService::new(
            registry.clone(),
            Arc::new(broker.clone()),
            closing(&registry),
            calendar.clone(),
            Arc::new(clock.clone()),
            config(symbols),
        );
        Fixture {
            service,
            calendar,
            broker,
            clock,
        }
    }

    #[tokio::test]
    async fn test_closed_populate_then_open_flips_only_that_underlying() {
        let f = fixture(&["NIFTY", "CRUDEOIL"]);

        assert_eq!(f.service.populate().await.unwrap(), 2);
        assert_eq!(f.broker.call_count(), 0);
        for u in ["NIFTY", "CRUDEOIL"] {
            assert_eq!(f.service.session(u).unwrap().source, PriceSource::Closing);
        }
        let nifty = f.service.get("NIFTY", nifty_expiry()).unwrap();
        assert_eq!(nifty.source, PriceSource::Closing);
        assert_eq!(nifty.atm_strike, Some(22_100.0));
        let leg = nifty.leg(22_200.0, OptionRight::Call).unwrap();
        assert_eq!(leg.last, Some(222.0));
        assert_eq!(leg.provenance, PriceSource::Closing);
        assert!(!leg.estimated);

        // NSE opens, MCX stays shut
        f.calendar.set_open(ExchangeSegment::NseFno, true);
        f.clock.advance_secs(60);
        let transitions = f.service.reconcile().await;
        assert_eq!(
            transitions,
            vec![SourceTransition {
                underlying: "NIFTY".to_string(),
                from: PriceSource::Closing,
                to: PriceSource::Live,
                chains_repopulated: 1,
            }]
        );

        let nifty = f.service.get("NIFTY", nifty_expiry()).unwrap();
        assert_eq!(nifty.source, PriceSource::Live);
        assert_eq!(nifty.underlying_ltp, Some(22_210.0));
        assert_eq!(nifty.atm_strike, Some(22_200.0));
        let quoted = nifty.leg(22_200.0, OptionRight::Call).unwrap();
        assert_eq!(quoted.last, Some(120.0));
        assert!(quoted.is_live_quote());
        // Missing from the broker chain: estimated
        let put = nifty.leg(22_300.0, OptionRight::Put).unwrap();
        assert!(put.estimated);

        let crude = f.service.get("crudeoil", crude_expiry()).unwrap();
        assert_eq!(crude.source, PriceSource::Closing);
        assert_eq!(f.service.session("CRUDEOIL").unwrap().source, PriceSource::Closing);

        // Nothing changed since
        assert!(f.service.reconcile().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_cache_fails_startup() {
        let registry = registry();
        let service = OptionChainCacheService::new(
            registry.clone(),
            Arc::new(MockBrokerClient::new()),
            Arc::new(CsvClosingPriceSource::empty(registry)),
            Arc::new(ManualCalendar::new()),
            Arc::new(clock()),
            config(&["NIFTY"]),
        );
        let err = service.populate().await.unwrap_err();
        assert_matches!(err, CacheError::StartupIntegrity(_));
        assert!(err.is_fatal());
        assert!(service.is_empty());
    }

    #[tokio::test]
    async fn test_live_failure_for_one_underlying_keeps_others() {
        let f = fixture(&["NIFTY", "BANKNIFTY"]);
        f.calendar.set_open(ExchangeSegment::NseFno, true);

        // No BANKNIFTY chain on the broker
        assert_eq!(f.service.populate().await.unwrap(), 1);
        assert!(f.service.get("NIFTY", nifty_expiry()).is_ok());
        assert_matches!(
            f.service.get("BANKNIFTY", instrument::testing::banknifty_expiry()),
            Err(CacheError::NotFound { .. })
        );
        assert!(f.service.session("BANKNIFTY").is_none());
    }

    #[tokio::test]
    async fn test_ticks_update_estimates_and_quotes() {
        let f = fixture(&["NIFTY"]);
        f.calendar.set_open(ExchangeSegment::NseFno, true);
        f.service.populate().await.unwrap();

        let before = f.service.get("NIFTY", nifty_expiry()).unwrap();
        let quoted_before = before.leg(22_200.0, OptionRight::Call).unwrap().clone();
        let estimated_before = before.leg(22_500.0, OptionRight::Call).unwrap().last;

        let updated = f.service.on_tick("NIFTY", 22_480.0);
        // Three legs came from the broker chain
        assert_eq!(updated, before.leg_count() - 3);

        let after = f.service.get("NIFTY", nifty_expiry()).unwrap();
        assert_eq!(after.atm_strike, Some(22_500.0));
        assert_eq!(after.underlying_ltp, Some(22_480.0));
        assert_eq!(after.leg(22_200.0, OptionRight::Call).unwrap().last, quoted_before.last);
        let moved = after.leg(22_500.0, OptionRight::Call).unwrap();
        assert!(moved.estimated);
        assert!(moved.last > estimated_before);

        let token = moved.security_id;
        assert!(f.service.on_leg_tick(token, 140.0));
        let leg = f.service.get("NIFTY", nifty_expiry()).unwrap();
        let leg = leg.leg(22_500.0, OptionRight::Call).unwrap();
        assert_eq!(leg.last, Some(140.0));
        assert!(leg.is_live_quote());

        assert!(!f.service.on_leg_tick(SecurityId(1), 1.0));
        assert_eq!(f.service.on_tick("NIFTY", f64::NAN), 0);
    }

    #[test]
    fn test_config_from_master_config() {
        let mut instruments = InstrumentsConfig::default();
        instruments.tracked.push(config::TrackedUnderlying {
            symbol: "nifty".to_string(),
            expiries: 0,
            always_on: true,
        });
        let config = CacheServiceConfig::from_config(&instruments, &CacheConfig::default());
        assert_eq!(
            config.tracked,
            vec![TrackedChain {
                underlying: "NIFTY".to_string(),
                expiries: 1,
            }]
        );
        assert_eq!(config.representative_underlying, None);
    }

    #[tokio::test]
    async fn test_reconcile_rolls_past_an_expired_chain() {
        let f = fixture(&["NIFTY"]);
        f.service.populate().await.unwrap();
        assert_eq!(f.service.expiries("NIFTY"), vec![nifty_expiry()]);
        let old_leg = f
            .service
            .get("NIFTY", nifty_expiry())
            .unwrap()
            .leg(22_000.0, OptionRight::Call)
            .unwrap()
            .security_id;

        // Day after expiry, sessions still closed
        f.clock.set(Utc.with_ymd_and_hms(2024, 3, 29, 4, 0, 0).unwrap());
        assert!(f.service.reconcile().await.is_empty());

        assert_eq!(f.service.expiries("NIFTY"), vec![nifty_next_expiry()]);
        assert_matches!(
            f.service.get("NIFTY", nifty_expiry()),
            Err(CacheError::NotFound { .. })
        );
        let rolled = f.service.get("NIFTY", nifty_next_expiry()).unwrap();
        assert_eq!(rolled.source, PriceSource::Closing);
        assert!(rolled.priced_legs() > 0);
        assert!(!f.service.on_leg_tick(old_leg, 10.0));

        // Nothing left to roll
        f.service.reconcile().await;
        assert_eq!(f.service.expiries("NIFTY"), vec![nifty_next_expiry()]);
    }
}
