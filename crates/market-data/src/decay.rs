//! Distance-from-ATM premium estimate.
//!
//! Not a pricing model. Fills chain legs that have no quote with
//! `intrinsic + spot * atm_premium_pct * exp(-(|K - S| / (step * width))^2)`,
//! so time value peaks at the money and fades over a few strike steps.

use common::OptionRight;
use config::DecayConfig;

pub fn intrinsic_value(spot: f64, strike: f64, right: OptionRight) -> f64 {
    match right {
        OptionRight::Call => (spot - strike).max(0.0),
        OptionRight::Put => (strike - spot).max(0.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayModel {
    pub atm_premium_pct: f64,
    pub decay_width: f64,
}

impl From<&DecayConfig> for DecayModel {
    fn from(config: &DecayConfig) -> Self {
        Self {
            atm_premium_pct: config.atm_premium_pct.max(0.0),
            decay_width: config.decay_width,
        }
    }
}

impl Default for DecayModel {
    fn default() -> Self {
        Self::from(&DecayConfig::default())
    }
}

impl DecayModel {
    /// Estimated premium of one leg. `None` for unusable inputs.
    pub fn estimate(&self, spot: f64, strike: f64, step: f64, right: OptionRight) -> Option<f64> {
        if !(spot.is_finite() && spot > 0.0 && strike.is_finite() && strike > 0.0) {
            return None;
        }
        let intrinsic = intrinsic_value(spot, strike, right);
        let width = step * self.decay_width;
        if !(width.is_finite() && width > 0.0) {
            return Some(intrinsic);
        }

        let distance = (strike - spot).abs() / width;
        let time_value = spot * self.atm_premium_pct * (-(distance * distance)).exp();
        Some(round_tick(intrinsic + time_value))
    }
}

/// Round to the exchange tick of 0.05.
fn round_tick(price: f64) -> f64 {
    (price * 20.0).round() / 20.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> DecayModel {
        DecayModel {
            atm_premium_pct: 0.01,
            decay_width: 3.0,
        }
    }

    #[test]
    fn test_atm_leg_is_pure_time_value() {
        let premium = model().estimate(22_000.0, 22_000.0, 100.0, OptionRight::Call).unwrap();
        assert_eq!(premium, 220.0);
        let put = model().estimate(22_000.0, 22_000.0, 100.0, OptionRight::Put).unwrap();
        assert_eq!(put, premium);
    }

    #[test]
    fn test_time_value_fades_with_distance() {
        let m = model();
        let premiums: Vec<f64> = [22_000.0, 22_100.0, 22_300.0, 22_600.0, 23_000.0]
            .iter()
            .map(|k| m.estimate(22_000.0, *k, 100.0, OptionRight::Call).unwrap())
            .collect();
        assert!(premiums.windows(2).all(|w| w[0] > w[1]), "{premiums:?}");
        // Far out of the money the call is worth next to nothing
        assert!(premiums[4] < 1.0);
    }

    #[test]
    fn test_in_the_money_keeps_intrinsic() {
        let premium = model().estimate(22_000.0, 21_000.0, 100.0, OptionRight::Call).unwrap();
        assert!(premium >= 1_000.0);
        assert!(premium < 1_001.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        let m = model();
        assert_eq!(m.estimate(0.0, 22_000.0, 100.0, OptionRight::Call), None);
        assert_eq!(m.estimate(f64::NAN, 22_000.0, 100.0, OptionRight::Put), None);
        // No usable width: intrinsic only
        assert_eq!(m.estimate(22_000.0, 21_900.0, 0.0, OptionRight::Call), Some(100.0));
    }
}
