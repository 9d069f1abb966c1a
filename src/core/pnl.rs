//! Pure PnL and margin calculations (component C1).
//!
//! Every function here is pure: no I/O, no shared state, no panics on valid
//! `Decimal` input. `Direction` selects the long/short formula variant.
//!
//! Risk-limit tier tables are `(max_position_value, mmr_rate, deduction,
//! imr_rate)` tuples ordered ascending by cap, the last entry's cap pinned to
//! `Decimal::MAX` (the closest stable stand-in for the source's `Infinity`
//! sentinel, since `rust_decimal` has no infinity).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use super::error::{CoreError, CoreResult};
use super::types::Direction;

/// One maintenance/initial-margin tier: (cap, mmr_rate, deduction, imr_rate).
pub type RiskTier = (Decimal, Decimal, Decimal, Decimal);
pub type RiskTiers = Vec<RiskTier>;

/// Unrealized PnL in quote currency. Long: `(current - entry) * size`.
/// Short: `(entry - current) * size`.
pub fn unrealized_pnl(direction: Direction, entry: Decimal, current: Decimal, size: Decimal) -> Decimal {
    match direction {
        Direction::Long => (current - entry) * size,
        Direction::Short => (entry - current) * size,
    }
}

/// Unrealized PnL as ROE percent: `(delta / entry) * leverage * 100`.
/// Returns zero when entry or current price is non-positive.
pub fn unrealized_pnl_pct(direction: Direction, entry: Decimal, current: Decimal, leverage: Decimal) -> Decimal {
    if entry <= Decimal::ZERO || current <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let hundred = dec!(100);
    match direction {
        Direction::Long => (current - entry) / entry * leverage * hundred,
        Direction::Short => (entry - current) / entry * leverage * hundred,
    }
}

/// Position notional value: `size * entry`.
pub fn position_value(size: Decimal, entry: Decimal) -> Decimal {
    size * entry
}

/// Tier-based initial margin. Falls back to `position_value / leverage` when
/// no tier is provided or none matches (should not happen with a
/// `parse_risk_limit_tiers`-produced table, whose last cap is unbounded).
///
/// Returns `(im_amount, imr_rate_used)`.
pub fn initial_margin(position_value: Decimal, leverage: Decimal, tiers: &RiskTiers) -> (Decimal, Decimal) {
    if position_value <= Decimal::ZERO {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    for (cap, _mmr, _ded, imr_rate) in tiers {
        if position_value <= *cap {
            return (position_value * *imr_rate, *imr_rate);
        }
    }
    if leverage <= Decimal::ZERO {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    let imr_rate = Decimal::ONE / leverage;
    (position_value / leverage, imr_rate)
}

/// Tier-based maintenance margin: `max(0, position_value * mmr_rate - deduction)`.
/// Returns `(mm_amount, mmr_rate_used)`.
pub fn maintenance_margin(position_value: Decimal, tiers: &RiskTiers) -> (Decimal, Decimal) {
    if position_value <= Decimal::ZERO || tiers.is_empty() {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    for (cap, mmr_rate, deduction, _imr) in tiers {
        if position_value <= *cap {
            let mm = position_value * *mmr_rate - *deduction;
            return (mm.max(Decimal::ZERO), *mmr_rate);
        }
    }
    let (_, mmr_rate, deduction, _) = tiers[tiers.len() - 1];
    let mm = position_value * mmr_rate - deduction;
    (mm.max(Decimal::ZERO), mmr_rate)
}

/// Account-level initial margin rate percent; zero if margin_balance <= 0.
pub fn imr_pct(total_im: Decimal, margin_balance: Decimal) -> Decimal {
    if margin_balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    total_im / margin_balance * dec!(100)
}

/// Account-level maintenance margin rate percent; zero if margin_balance <= 0.
pub fn mmr_pct(total_mm: Decimal, margin_balance: Decimal) -> Decimal {
    if margin_balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    total_mm / margin_balance * dec!(100)
}

/// Liquidation ratio: `liq_price / current_price`, zero if current_price is zero.
pub fn liq_ratio(liq_price: Decimal, current_price: Decimal) -> Decimal {
    if current_price == Decimal::ZERO {
        return Decimal::ZERO;
    }
    liq_price / current_price
}

/// A single raw tier row as received from an exchange risk-limit endpoint,
/// before validation. Field names are generic (not Bybit's camelCase JSON
/// keys) so this can be parsed, tested, and round-tripped without an HTTP
/// client in the loop.
#[derive(Debug, Clone)]
pub struct RawRiskTier {
    pub max_position_value: Decimal,
    pub mmr_rate: Decimal,
    pub deduction: Decimal,
    pub imr_rate: Decimal,
}

/// Sentinel cap standing in for the source's `Decimal("Infinity")`: the last
/// tier in any valid table is rewritten to this value.
pub fn unbounded_cap() -> Decimal {
    Decimal::MAX
}

/// Validate and normalize a raw tier table into the internal `RiskTiers`
/// shape used by `initial_margin`/`maintenance_margin`.
///
/// Validation (spec §4.1 / §8):
/// - non-empty
/// - mmr_rate and imr_rate in `[0, 1]`
/// - deduction >= 0
/// - caps strictly ascending once sorted, no duplicate/near-duplicate caps
/// - the last cap is replaced with `unbounded_cap()`
pub fn parse_risk_limit_tiers(raw: &[RawRiskTier]) -> CoreResult<RiskTiers> {
    if raw.is_empty() {
        return Err(CoreError::InvalidInput("risk limit tiers must not be empty".into()));
    }

    let mut sorted: Vec<&RawRiskTier> = raw.iter().collect();
    sorted.sort_by(|a, b| a.max_position_value.cmp(&b.max_position_value));

    let epsilon = dec!(0.01);
    for window in sorted.windows(2) {
        let (prev, curr) = (window[0], window[1]);
        if curr.max_position_value < prev.max_position_value
            || (curr.max_position_value - prev.max_position_value).abs() < epsilon
        {
            return Err(CoreError::InvalidInput(format!(
                "duplicate or out-of-order tier boundary: {} vs {}",
                prev.max_position_value, curr.max_position_value
            )));
        }
    }

    let mut result = RiskTiers::with_capacity(sorted.len());
    for tier in &sorted {
        if !(Decimal::ZERO..=Decimal::ONE).contains(&tier.mmr_rate) {
            return Err(CoreError::InvalidInput(format!("mmr_rate out of [0,1]: {}", tier.mmr_rate)));
        }
        if !(Decimal::ZERO..=Decimal::ONE).contains(&tier.imr_rate) {
            return Err(CoreError::InvalidInput(format!("imr_rate out of [0,1]: {}", tier.imr_rate)));
        }
        if tier.deduction < Decimal::ZERO {
            return Err(CoreError::InvalidInput(format!("negative deduction: {}", tier.deduction)));
        }
        if tier.mmr_rate == Decimal::ZERO {
            warn!(cap = %tier.max_position_value, "zero mmr_rate tier");
        }
        result.push((tier.max_position_value, tier.mmr_rate, tier.deduction, tier.imr_rate));
    }

    if let Some(last) = result.last_mut() {
        last.0 = unbounded_cap();
    }

    Ok(result)
}

/// Hardcoded fallback tiers (last resort when no cache and no exchange call
/// succeed), grounded on Bybit's published BTCUSDT risk-limit table.
pub fn default_btcusdt_tiers() -> RiskTiers {
    vec![
        (dec!(2000000), dec!(0.005), dec!(0), dec!(0.01)),
        (dec!(10000000), dec!(0.01), dec!(10000), dec!(0.02)),
        (dec!(20000000), dec!(0.025), dec!(160000), dec!(0.05)),
        (dec!(40000000), dec!(0.05), dec!(660000), dec!(0.1)),
        (dec!(80000000), dec!(0.1), dec!(2660000), dec!(0.2)),
        (dec!(160000000), dec!(0.125), dec!(4660000), dec!(0.25)),
        (unbounded_cap(), dec!(0.15), dec!(8660000), dec!(0.3)),
    ]
}

/// Generic fallback tiers used for symbols without a dedicated table.
pub fn default_generic_tiers() -> RiskTiers {
    vec![
        (dec!(1000000), dec!(0.01), dec!(0), dec!(0.02)),
        (dec!(5000000), dec!(0.025), dec!(15000), dec!(0.05)),
        (dec!(10000000), dec!(0.05), dec!(140000), dec!(0.1)),
        (dec!(20000000), dec!(0.1), dec!(640000), dec!(0.2)),
        (unbounded_cap(), dec!(0.15), dec!(1640000), dec!(0.3)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrealized_pnl_long_and_short() {
        assert_eq!(
            unrealized_pnl(Direction::Long, dec!(50000), dec!(52000), dec!(0.1)),
            dec!(200)
        );
        assert_eq!(
            unrealized_pnl(Direction::Short, dec!(50000), dec!(52000), dec!(0.1)),
            dec!(-200)
        );
    }

    #[test]
    fn unrealized_pnl_pct_zero_on_nonpositive_entry() {
        assert_eq!(
            unrealized_pnl_pct(Direction::Long, dec!(0), dec!(100), dec!(10)),
            Decimal::ZERO
        );
        assert_eq!(
            unrealized_pnl_pct(Direction::Long, dec!(-5), dec!(100), dec!(10)),
            Decimal::ZERO
        );
    }

    #[test]
    fn unrealized_pnl_pct_matches_roe_formula() {
        // (51000-50000)/50000 * 10 * 100 = 20
        let pct = unrealized_pnl_pct(Direction::Long, dec!(50000), dec!(51000), dec!(10));
        assert_eq!(pct, dec!(20.00));
    }

    #[test]
    fn tier_selection_picks_smallest_matching_cap() {
        let tiers = default_btcusdt_tiers();
        let (im, imr) = initial_margin(dec!(5000000), dec!(10), &tiers);
        // tier 1 cap 10,000,000 >= 5,000,000 -> imr 0.02 (skips tier0 cap 2,000,000)
        assert_eq!(imr, dec!(0.02));
        assert_eq!(im, dec!(5000000) * dec!(0.02));
    }

    #[test]
    fn maintenance_margin_never_negative() {
        let tiers = vec![(unbounded_cap(), dec!(0.005), dec!(1000000), dec!(0.01))];
        let (mm, _) = maintenance_margin(dec!(1000), &tiers);
        assert_eq!(mm, Decimal::ZERO);
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(parse_risk_limit_tiers(&[]).is_err());
    }

    #[test]
    fn parse_rejects_duplicate_caps() {
        let raw = vec![
            RawRiskTier { max_position_value: dec!(1000), mmr_rate: dec!(0.01), deduction: dec!(0), imr_rate: dec!(0.02) },
            RawRiskTier { max_position_value: dec!(1000), mmr_rate: dec!(0.02), deduction: dec!(0), imr_rate: dec!(0.04) },
        ];
        assert!(parse_risk_limit_tiers(&raw).is_err());
    }

    #[test]
    fn parse_pins_last_cap_unbounded() {
        let raw = vec![
            RawRiskTier { max_position_value: dec!(1000), mmr_rate: dec!(0.01), deduction: dec!(0), imr_rate: dec!(0.02) },
            RawRiskTier { max_position_value: dec!(5000), mmr_rate: dec!(0.02), deduction: dec!(10), imr_rate: dec!(0.04) },
        ];
        let tiers = parse_risk_limit_tiers(&raw).unwrap();
        assert_eq!(tiers.last().unwrap().0, unbounded_cap());
    }

    #[test]
    fn imr_mmr_pct_zero_on_nonpositive_balance() {
        assert_eq!(imr_pct(dec!(10), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(mmr_pct(dec!(10), dec!(-5)), Decimal::ZERO);
    }

    #[test]
    fn liq_ratio_scenario_five() {
        // concrete scenario 5 from spec §8
        let ratio = liq_ratio(dec!(88000), dec!(100000));
        assert_eq!(ratio, dec!(0.88));
    }
}
