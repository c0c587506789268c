//! Position sizing (§4.E formula, §4.C profile multiplier). Grounded on the
//! teacher's `application::risk_management::sizing_engine` layered-cap
//! pattern; here the cap applied on top of the base risk-based size is the
//! VRE per-profile position multiplier rather than a Kelly/correlation stack.

use rust_decimal::Decimal;

use crate::domain::errors::SizingError;
use crate::domain::vre::{InvestorProfile, Regime};

/// size = (equity * bps/10000) / |entry - sl|, then scaled by the investor
/// profile's regime-dependent multiplier (§4.C table).
pub fn compute_size(
    equity: Decimal,
    risk_per_trade_bps: u32,
    entry: Decimal,
    stop_loss: Decimal,
    profile: InvestorProfile,
    regime: Regime,
) -> Result<Decimal, SizingError> {
    let risk_distance = (entry - stop_loss).abs();
    if risk_distance.is_zero() {
        return Err(SizingError::InvalidSizing {
            entry: entry.to_string(),
            sl: stop_loss.to_string(),
        });
    }

    let risk_amount = equity * Decimal::from(risk_per_trade_bps) / Decimal::from(10_000);
    let base_size = risk_amount / risk_distance;

    let multiplier = profile.size_multiplier(regime);
    let size = base_size * multiplier;

    if size <= Decimal::ZERO {
        return Err(SizingError::NonPositiveSize);
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn basic_sizing_matches_formula() {
        let size = compute_size(
            dec!(10000),
            50,
            dec!(50250),
            dec!(50150),
            InvestorProfile::Moderate,
            Regime::Normal,
        )
        .unwrap();
        // risk_amount = 10000 * 50/10000 = 50; distance = 100; base = 0.5; mult(Moderate,Normal)=0.90
        assert_eq!(size, dec!(0.45));
    }

    #[test]
    fn zero_distance_is_rejected() {
        let err = compute_size(dec!(10000), 50, dec!(100), dec!(100), InvestorProfile::Moderate, Regime::Normal);
        assert!(err.is_err());
    }
}
