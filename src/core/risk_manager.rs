//! The risk-multiplier position manager (component C4, risk half).
//!
//! `PositionPair` owns both the long and short [`PositionTracker`]s for one
//! symbol and derives an order-size multiplier for each (direction, side)
//! combination from how close each side sits to liquidation relative to the
//! other. This is the "linked long/short object pair" from the source
//! project's `Position.set_opposite`, reimplemented as two fields on one
//! struct with explicit `(own, opposite)` argument passing instead of a
//! reference cycle — see DESIGN.md for why `Rc<RefCell<_>>` was rejected.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::error::DataQualityWarning;
use super::pnl::RiskTiers;
use super::position::PositionTracker;
use super::types::{Direction, Side};

/// Per-(grid-side) order-size multiplier for one direction's grid. `buy`
/// scales buy-side order qty, `sell` scales sell-side order qty, within
/// that direction's ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountMultiplier {
    pub buy: Decimal,
    pub sell: Decimal,
}

impl Default for AmountMultiplier {
    fn default() -> Self {
        Self { buy: Decimal::ONE, sell: Decimal::ONE }
    }
}

impl AmountMultiplier {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn for_side(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.buy,
            Side::Sell => self.sell,
        }
    }

    fn set(&mut self, side: Side, value: Decimal) {
        match side {
            Side::Buy => self.buy = value,
            Side::Sell => self.sell = value,
        }
    }
}

/// Thresholds controlling when the risk manager rebalances order sizing
/// between the long and short sides.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub min_liq_ratio: Decimal,
    pub max_liq_ratio: Decimal,
    pub max_margin: Decimal,
    pub min_total_margin: Decimal,
}

pub struct PositionPair {
    pub long: PositionTracker,
    pub short: PositionTracker,
    pub long_multiplier: AmountMultiplier,
    pub short_multiplier: AmountMultiplier,
    pub limits: RiskLimits,
    /// `long.size / short.size`, cached by `recalculate_multipliers`; `1`
    /// when the short side is empty (matches the source default of `1`
    /// before any position ratio has been observed).
    pub position_ratio: Decimal,
}

impl PositionPair {
    pub fn new(long: PositionTracker, short: PositionTracker, limits: RiskLimits) -> Self {
        Self {
            long,
            short,
            long_multiplier: AmountMultiplier::default(),
            short_multiplier: AmountMultiplier::default(),
            limits,
            position_ratio: Decimal::ONE,
        }
    }

    pub fn reset_multipliers(&mut self) {
        self.long_multiplier.reset();
        self.short_multiplier.reset();
    }

    fn margin(tracker: &PositionTracker, current_price: Decimal, wallet_balance: Decimal) -> Decimal {
        if wallet_balance == Decimal::ZERO || tracker.is_empty() {
            return Decimal::ZERO;
        }
        let value = tracker.state.total_size * current_price;
        value / wallet_balance
    }

    fn liq_ratio(tracker: &mut PositionTracker, current_price: Decimal, wallet_balance: Decimal, tiers: &RiskTiers) -> Decimal {
        if tracker.is_empty() || current_price == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let liq = tracker.calculate_liquidation_price(wallet_balance, tiers);
        liq / current_price
    }

    /// Recompute both directions' order-size multipliers from current
    /// market price and wallet balance. Mirrors `Position.calc_amount_multiplier`
    /// for the long and short sides in turn, each seeing the other's margin
    /// as its "opposite".
    ///
    /// `min_qty` and `qty_for` let rule 3 (the "compensate if the resulting
    /// quantity floors out at the instrument minimum" clause) ask what order
    /// size its own 0.5x multiplier would actually produce, without this
    /// pure module depending on the executor's `QtyCalculator` directly.
    pub fn recalculate_multipliers(
        &mut self,
        last_close: Decimal,
        wallet_balance: Decimal,
        tiers: &RiskTiers,
        min_qty: Decimal,
        qty_for: &dyn Fn(Direction, Side, Decimal) -> Decimal,
        warnings: &mut Vec<DataQualityWarning>,
    ) {
        let long_margin = Self::margin(&self.long, last_close, wallet_balance);
        let short_margin = Self::margin(&self.short, last_close, wallet_balance);

        if !self.long.is_empty() && long_margin == Decimal::ZERO {
            warnings.push(DataQualityWarning::NearZeroInitialMargin { initial_margin: long_margin });
        }
        if !self.short.is_empty() && short_margin == Decimal::ZERO {
            warnings.push(DataQualityWarning::NearZeroInitialMargin { initial_margin: short_margin });
        }

        // `own.margin / opposite.margin`, from the long side's perspective;
        // the short side's rule chain reads the reciprocal thresholds off
        // this same field (rule4/5's 0.5/0.20 mirrored as 2.0/5.0).
        self.position_ratio = if short_margin == Decimal::ZERO { Decimal::ONE } else { long_margin / short_margin };

        let long_upnl = if self.long.is_empty() { Decimal::ZERO } else { self.long.calculate_unrealized_pnl(last_close) };
        let short_upnl = if self.short.is_empty() { Decimal::ZERO } else { self.short.calculate_unrealized_pnl(last_close) };

        let total_margin = long_margin + short_margin;
        let is_equal = short_margin != Decimal::ZERO && {
            let ratio = long_margin / short_margin;
            ratio > dec!(0.94) && ratio < dec!(1.05)
        };

        // Reset before either rule chain runs so a multiplier one side's
        // rules write onto the *opposite* side's struct (rule 2, rule 3's
        // compensation clause) can't be clobbered by that side's own reset.
        if !self.long.is_empty() {
            self.long_multiplier.reset();
        }
        if !self.short.is_empty() {
            self.short_multiplier.reset();
        }

        if !self.long.is_empty() {
            let liq_ratio = Self::liq_ratio(&mut self.long, last_close, wallet_balance, tiers);
            self.recalc_long(liq_ratio, is_equal, total_margin, long_upnl, min_qty, qty_for);
        }
        if !self.short.is_empty() {
            let liq_ratio = Self::liq_ratio(&mut self.short, last_close, wallet_balance, tiers);
            self.recalc_short(liq_ratio, is_equal, total_margin, short_upnl, min_qty, qty_for);
        }
    }

    fn recalc_long(&mut self, liq_ratio: Decimal, is_equal: bool, total_margin: Decimal, upnl: Decimal, min_qty: Decimal, qty_for: &dyn Fn(Direction, Side, Decimal) -> Decimal) {
        let min_liq = self.limits.min_liq_ratio;
        if liq_ratio > dec!(1.05) * min_liq {
            self.long_multiplier.set(Side::Sell, dec!(1.5));
        } else if liq_ratio > min_liq {
            self.short_multiplier.set(Side::Buy, dec!(0.5));
        } else if is_equal && total_margin < self.limits.min_total_margin {
            self.long_multiplier.set(Side::Sell, dec!(0.5));
            if qty_for(Direction::Long, Side::Sell, dec!(0.5)) == min_qty {
                self.short_multiplier.set(Side::Sell, dec!(2));
            }
        } else if self.position_ratio < dec!(0.5) && upnl < Decimal::ZERO {
            self.long_multiplier.set(Side::Buy, dec!(2));
        } else if self.position_ratio < dec!(0.20) {
            self.long_multiplier.set(Side::Buy, dec!(2));
        }
    }

    fn recalc_short(&mut self, liq_ratio: Decimal, is_equal: bool, total_margin: Decimal, upnl: Decimal, min_qty: Decimal, qty_for: &dyn Fn(Direction, Side, Decimal) -> Decimal) {
        let max_liq = self.limits.max_liq_ratio;
        if liq_ratio > Decimal::ZERO && liq_ratio < dec!(0.95) * max_liq {
            self.short_multiplier.set(Side::Buy, dec!(1.5));
        } else if liq_ratio > Decimal::ZERO && liq_ratio < max_liq {
            self.long_multiplier.set(Side::Sell, dec!(0.5));
        } else if is_equal && total_margin < self.limits.min_total_margin {
            self.short_multiplier.set(Side::Buy, dec!(0.5));
            if qty_for(Direction::Short, Side::Buy, dec!(0.5)) == min_qty {
                self.long_multiplier.set(Side::Buy, dec!(2));
            }
        } else if self.position_ratio > dec!(2.0) && upnl < Decimal::ZERO {
            self.short_multiplier.set(Side::Sell, dec!(2));
        } else if self.position_ratio > dec!(5.0) {
            self.short_multiplier.set(Side::Sell, dec!(2));
        }
    }

    /// Multiplier to apply to a base order qty for `(direction, side)`.
    pub fn multiplier_for(&self, direction: Direction, side: Side) -> Decimal {
        match direction {
            Direction::Long => self.long_multiplier.for_side(side),
            Direction::Short => self.short_multiplier.for_side(side),
        }
    }

    pub fn tracker(&self, direction: Direction) -> &PositionTracker {
        match direction {
            Direction::Long => &self.long,
            Direction::Short => &self.short,
        }
    }

    pub fn tracker_mut(&mut self, direction: Direction) -> &mut PositionTracker {
        match direction {
            Direction::Long => &mut self.long,
            Direction::Short => &mut self.short,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RiskLimits {
        RiskLimits { min_liq_ratio: dec!(0.8), max_liq_ratio: dec!(1.2), max_margin: dec!(5), min_total_margin: Decimal::ZERO }
    }

    fn pair() -> PositionPair {
        let long = PositionTracker::new(Direction::Long, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        let short = PositionTracker::new(Direction::Short, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        PositionPair::new(long, short, limits())
    }

    fn no_compensation_check(_direction: Direction, _side: Side, _multiplier: Decimal) -> Decimal {
        Decimal::ZERO
    }

    #[test]
    fn empty_positions_leave_multipliers_at_default() {
        let mut p = pair();
        let mut warnings = Vec::new();
        p.recalculate_multipliers(dec!(50000), dec!(10000), &Vec::new(), dec!(0.001), &no_compensation_check, &mut warnings);
        assert_eq!(p.long_multiplier, AmountMultiplier::default());
        assert_eq!(p.short_multiplier, AmountMultiplier::default());
    }

    #[test]
    fn position_ratio_defaults_to_one_with_empty_short() {
        let mut p = pair();
        p.long.add_fill(dec!(0.01), dec!(50000), chrono::Utc::now(), "o1".into()).unwrap();
        let mut warnings = Vec::new();
        p.recalculate_multipliers(dec!(50000), dec!(10000), &super::super::pnl::default_btcusdt_tiers(), dec!(0.001), &no_compensation_check, &mut warnings);
        assert_eq!(p.position_ratio, Decimal::ONE);
    }

    #[test]
    fn rule3_compensates_opposite_side_when_qty_floors_to_minimum() {
        // Both sides open 0.01 at 50000; recalculating at 70000 keeps each
        // side's liq_ratio comfortably under its rule1/rule2 thresholds so
        // evaluation falls through to rule 3 for the long side.
        let mut p = pair();
        p.limits.min_total_margin = dec!(1000);
        p.long.add_fill(dec!(0.01), dec!(50000), chrono::Utc::now(), "o1".into()).unwrap();
        p.short.add_fill(dec!(0.01), dec!(50000), chrono::Utc::now(), "o2".into()).unwrap();
        let mut warnings = Vec::new();
        let always_min_qty = |_d: Direction, _s: Side, _m: Decimal| dec!(0.001);
        p.recalculate_multipliers(dec!(70000), dec!(10000), &super::super::pnl::default_btcusdt_tiers(), dec!(0.001), &always_min_qty, &mut warnings);
        assert_eq!(p.long_multiplier.sell, dec!(0.5));
        assert_eq!(p.short_multiplier.sell, dec!(2));
    }

    #[test]
    fn stale_multiplier_does_not_survive_a_tick_where_no_rule_fires() {
        // Tick A: price has dropped well below the long's 100000 entry, so
        // its liquidation ratio clears rule 1's 1.05*min_liq bar.
        let mut p = pair();
        p.long.add_fill(dec!(1), dec!(100000), chrono::Utc::now(), "o1".into()).unwrap();
        let mut warnings = Vec::new();
        let tiers = super::super::pnl::default_btcusdt_tiers();
        p.recalculate_multipliers(dec!(90000), dec!(100000), &tiers, dec!(0.001), &no_compensation_check, &mut warnings);
        assert_eq!(p.long_multiplier.sell, dec!(1.5));

        // Tick B: same still-open long, but price has since rallied well
        // above entry, pulling the liquidation ratio safely under min_liq.
        // No rule fires this time (short stays empty throughout), so the
        // multiplier must fall back to its 1.0 default rather than carrying
        // over rule 1's stale 1.5x from the previous call.
        let mut warnings = Vec::new();
        p.recalculate_multipliers(dec!(150000), dec!(100000), &tiers, dec!(0.001), &no_compensation_check, &mut warnings);
        assert_eq!(p.long_multiplier, AmountMultiplier::default());
    }

    #[test]
    fn position_ratio_matches_own_margin_over_opposite_margin() {
        // Long holds 1 unit, short holds 4, both marked at the same
        // current price against a 100000 wallet: own.margin / opposite.margin
        // (spec §4.4) works out to 0.25 here, and must come from the same
        // `margin()` values used for `total_margin`/`is_equal`, not a
        // separately recomputed size ratio.
        let mut p = pair();
        p.long.add_fill(dec!(1), dec!(50000), chrono::Utc::now(), "o1".into()).unwrap();
        p.short.add_fill(dec!(4), dec!(50000), chrono::Utc::now(), "o2".into()).unwrap();
        let mut warnings = Vec::new();
        let tiers = super::super::pnl::default_btcusdt_tiers();
        p.recalculate_multipliers(dec!(50000), dec!(100000), &tiers, dec!(0.001), &no_compensation_check, &mut warnings);
        assert_eq!(p.position_ratio, dec!(0.25));
    }

    #[test]
    fn near_zero_margin_on_a_nonempty_side_raises_a_warning() {
        let mut p = pair();
        p.long.add_fill(dec!(1), dec!(50000), chrono::Utc::now(), "o1".into()).unwrap();
        let mut warnings = Vec::new();
        p.recalculate_multipliers(dec!(50000), Decimal::ZERO, &super::super::pnl::default_btcusdt_tiers(), dec!(0.001), &no_compensation_check, &mut warnings);
        assert!(warnings.iter().any(|w| matches!(w, DataQualityWarning::NearZeroInitialMargin { .. })));
    }

    #[test]
    fn reset_multipliers_restores_defaults() {
        let mut p = pair();
        p.long_multiplier.set(Side::Buy, dec!(2));
        p.reset_multipliers();
        assert_eq!(p.long_multiplier, AmountMultiplier::default());
    }

    #[test]
    fn multiplier_for_routes_by_direction_and_side() {
        let mut p = pair();
        p.short_multiplier.set(Side::Sell, dec!(1.5));
        assert_eq!(p.multiplier_for(Direction::Short, Side::Sell), dec!(1.5));
        assert_eq!(p.multiplier_for(Direction::Long, Side::Buy), Decimal::ONE);
    }
}
