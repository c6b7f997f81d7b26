//! ATM strike calculation and strike ladder generation.
//!
//! Rounding rule: the ATM strike is the multiple of the strike step nearest
//! to the underlying price, with exact ties going to the higher strike
//! (round half up). `23150.5` and `23150.0` with a step of `100` both give
//! `23200`.

use crate::error::{InstrumentError, InstrumentResult};
use crate::registry::InstrumentRegistry;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::{OptionRight, SecurityId, SharedClock};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Strike step used when none is configured or derivable.
pub const FALLBACK_STRIKE_STEP: f64 = 0.05;

/// Compute the ATM strike for `ltp` on a grid of `step`.
///
/// Non-positive or non-finite steps fall back to [`FALLBACK_STRIKE_STEP`].
/// The result is always a multiple of the step actually used, and applying
/// the function to its own output returns the same value.
pub fn atm_strike(ltp: f64, step: f64) -> f64 {
    let step = sane_step(step, FALLBACK_STRIKE_STEP);
    ((ltp / step) + 0.5).floor() * step
}

fn sane_step(step: f64, fallback: f64) -> f64 {
    if step.is_finite() && step > 0.0 {
        step
    } else if fallback.is_finite() && fallback > 0.0 {
        fallback
    } else {
        FALLBACK_STRIKE_STEP
    }
}

/// Why a ladder was (re)generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalcTrigger {
    Initial,
    PriceMove,
    ExpiryChange,
    Forced,
    Expired,
}

/// One strike of a ladder with both legs resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LadderStrike {
    pub strike: f64,
    pub call: SecurityId,
    pub put: SecurityId,
}

impl LadderStrike {
    pub fn leg(&self, right: OptionRight) -> SecurityId {
        match right {
            OptionRight::Call => self.call,
            OptionRight::Put => self.put,
        }
    }
}

/// Strikes around the ATM strike for one underlying and expiry.
///
/// Regenerated wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrikeLadder {
    pub underlying: String,
    pub expiry: NaiveDate,
    /// Underlying price the ladder was generated from
    pub ltp: f64,
    pub atm_strike: f64,
    pub strike_step: f64,
    pub strikes: Vec<LadderStrike>,
    pub generated_at: DateTime<Utc>,
    pub trigger: RecalcTrigger,
}

impl StrikeLadder {
    /// Every leg as (security id, strike, right).
    pub fn legs(&self) -> impl Iterator<Item = (SecurityId, f64, OptionRight)> + '_ {
        self.strikes.iter().flat_map(|s| {
            OptionRight::BOTH
                .into_iter()
                .map(move |right| (s.leg(right), s.strike, right))
        })
    }

    pub fn leg_count(&self) -> usize {
        self.strikes.len() * 2
    }
}

/// Tunables for the ATM engine.
#[derive(Debug, Clone)]
pub struct AtmEngineConfig {
    pub index_strikes_each_side: usize,
    pub stock_strikes_each_side: usize,
    pub min_strike_step: f64,
    /// Zero disables the age-based refresh
    pub ladder_ttl: Duration,
}

impl Default for AtmEngineConfig {
    fn default() -> Self {
        Self::from(&config::AtmConfig::default())
    }
}

impl From<&config::AtmConfig> for AtmEngineConfig {
    fn from(cfg: &config::AtmConfig) -> Self {
        Self {
            index_strikes_each_side: cfg.index_strikes_each_side as usize,
            stock_strikes_each_side: cfg.stock_strikes_each_side as usize,
            min_strike_step: cfg.min_strike_step,
            ladder_ttl: Duration::seconds(cfg.ladder_ttl_seconds as i64),
        }
    }
}

/// Computes ATM strikes and keeps the current ladder per underlying.
pub struct AtmEngine {
    registry: Arc<InstrumentRegistry>,
    config: AtmEngineConfig,
    clock: SharedClock,
    ladders: RwLock<HashMap<String, StrikeLadder>>,
}

impl AtmEngine {
    pub fn new(registry: Arc<InstrumentRegistry>, config: AtmEngineConfig, clock: SharedClock) -> Self {
        Self {
            registry,
            config,
            clock,
            ladders: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    /// Strike step for `underlying`: the registry's derived step, or the
    /// configured minimum when none exists.
    pub fn strike_step(&self, underlying: &str) -> f64 {
        sane_step(
            self.registry.strike_step(underlying).unwrap_or(0.0),
            self.config.min_strike_step,
        )
    }

    pub fn atm_for(&self, underlying: &str, ltp: f64) -> f64 {
        atm_strike(ltp, self.strike_step(underlying))
    }

    fn strikes_each_side(&self, underlying: &str) -> usize {
        if self.registry.is_index(underlying) {
            self.config.index_strikes_each_side
        } else {
            self.config.stock_strikes_each_side
        }
    }

    /// Build the ladder of listed strikes centred on the ATM strike.
    ///
    /// Only strikes listing both a call and a put are used, so every
    /// returned strike resolves to two registry tokens.
    pub fn generate_chain(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        ltp: f64,
    ) -> InstrumentResult<StrikeLadder> {
        self.build_ladder(underlying, expiry, ltp, RecalcTrigger::Initial)
    }

    fn build_ladder(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        ltp: f64,
        trigger: RecalcTrigger,
    ) -> InstrumentResult<StrikeLadder> {
        if !(ltp.is_finite() && ltp > 0.0) {
            return Err(InstrumentError::InvalidPrice(ltp));
        }

        let listed = self.registry.strikes(underlying, expiry);
        if listed.is_empty() {
            return Err(InstrumentError::NotFound {
                underlying: underlying.to_string(),
                expiry: expiry.to_string(),
            });
        }

        let step = self.strike_step(underlying);
        let atm = atm_strike(ltp, step);

        // Listed strike nearest the ATM; ties keep the lower one
        let center = listed
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (a.0 - atm).abs().total_cmp(&(b.0 - atm).abs()))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let n = self.strikes_each_side(underlying);
        let lo = center.saturating_sub(n);
        let hi = (center + n).min(listed.len() - 1);

        let strikes = listed[lo..=hi]
            .iter()
            .filter_map(|(strike, legs)| {
                Some(LadderStrike {
                    strike: *strike,
                    call: legs.call?,
                    put: legs.put?,
                })
            })
            .collect::<Vec<_>>();

        debug!(
            underlying,
            %expiry,
            ltp,
            atm,
            step,
            strikes = strikes.len(),
            "Generated strike ladder"
        );

        Ok(StrikeLadder {
            underlying: underlying.to_uppercase(),
            expiry,
            ltp,
            atm_strike: atm,
            strike_step: step,
            strikes,
            generated_at: self.clock.now(),
            trigger,
        })
    }

    fn recalc_reason(
        &self,
        cached: Option<&StrikeLadder>,
        expiry: NaiveDate,
        new_ltp: f64,
        force: bool,
    ) -> Option<RecalcTrigger> {
        let Some(ladder) = cached else {
            return Some(RecalcTrigger::Initial);
        };
        if force {
            return Some(RecalcTrigger::Forced);
        }
        if ladder.expiry != expiry {
            return Some(RecalcTrigger::ExpiryChange);
        }
        if (new_ltp - ladder.ltp).abs() >= ladder.strike_step {
            return Some(RecalcTrigger::PriceMove);
        }
        if self.config.ladder_ttl > Duration::zero()
            && self.clock.now() - ladder.generated_at >= self.config.ladder_ttl
        {
            return Some(RecalcTrigger::Expired);
        }
        None
    }

    /// Whether the cached ladder for `underlying` is stale for this price.
    ///
    /// True when nothing is cached, `force` is set, the expiry differs, the
    /// price moved by at least one strike step since generation, or the
    /// ladder outlived its TTL.
    pub fn should_recalculate(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        new_ltp: f64,
        force: bool,
    ) -> bool {
        let ladders = self.ladders.read();
        self.recalc_reason(ladders.get(&underlying.to_uppercase()), expiry, new_ltp, force)
            .is_some()
    }

    /// Regenerate and store the ladder if [`Self::should_recalculate`] says
    /// so. Returns the new ladder, or `None` when the cached one stands.
    pub fn refresh(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        ltp: f64,
        force: bool,
    ) -> InstrumentResult<Option<StrikeLadder>> {
        let key = underlying.to_uppercase();
        let mut ladders = self.ladders.write();

        let Some(trigger) = self.recalc_reason(ladders.get(&key), expiry, ltp, force) else {
            return Ok(None);
        };

        let ladder = self.build_ladder(&key, expiry, ltp, trigger)?;
        let previous_atm = ladders.get(&key).map(|l| l.atm_strike);
        info!(
            underlying = %key,
            %expiry,
            ltp,
            atm = ladder.atm_strike,
            ?previous_atm,
            ?trigger,
            "Strike ladder regenerated"
        );
        ladders.insert(key, ladder.clone());
        Ok(Some(ladder))
    }

    pub fn cached(&self, underlying: &str) -> Option<StrikeLadder> {
        self.ladders.read().get(&underlying.to_uppercase()).cloned()
    }

    pub fn invalidate(&self, underlying: &str) {
        self.ladders.write().remove(&underlying.to_uppercase());
    }
}
