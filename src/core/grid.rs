//! The price ladder (component C2).
//!
//! A `Grid` is a symmetric ladder of price levels built around a center
//! price: `grid_count / 2` buy levels below center, a single wait level at
//! center, and `grid_count / 2` sell levels above center — `grid_count + 1`
//! levels total. Levels within a side are spaced evenly so the outermost
//! level lands exactly `grid_step` percent from center (e.g. `grid_count=4`,
//! `grid_step=0.5%` gives two levels per side at 0.25% and 0.5%).
//! `rebalance_threshold` controls how far the market may drift from the
//! ladder's own center before `update_grid` decides a rebuild is warranted
//! instead of an in-place shift.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use super::types::ZoneKind;

/// One level of the ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLevel {
    pub side: ZoneKind,
    pub price: Decimal,
}

/// The price ladder itself. Mirrors the shape of `grid.grid`,
/// `grid.grid_count`, `grid.grid_step`, `grid.anchor_price` used throughout
/// the engine and tests in the source project.
#[derive(Debug, Clone)]
pub struct Grid {
    pub tick_size: Decimal,
    pub grid_count: usize,
    /// Percent spacing between adjacent levels (e.g. `dec!(0.2)` == 0.2%).
    pub grid_step: Decimal,
    /// Percent drift from center before `update_grid` rebuilds in place.
    pub rebalance_threshold: Decimal,
    pub levels: Vec<GridLevel>,
    pub anchor_price: Option<Decimal>,
}

impl Grid {
    pub fn new(tick_size: Decimal, grid_count: usize, grid_step: Decimal, rebalance_threshold: Decimal) -> Self {
        Self {
            tick_size,
            grid_count,
            grid_step,
            rebalance_threshold,
            levels: Vec::new(),
            anchor_price: None,
        }
    }

    /// Levels per side: half of `grid_count`, so the ladder totals
    /// `grid_count + 1` levels (buy + wait + sell).
    fn levels_per_side(&self) -> usize {
        self.grid_count / 2
    }

    /// Percent spacing between two adjacent levels on one side, such that
    /// `levels_per_side` of them reach exactly `grid_step` percent from
    /// center at the outermost level.
    fn level_step_pct(&self) -> Decimal {
        let per_side = self.levels_per_side();
        if per_side == 0 {
            return Decimal::ZERO;
        }
        self.grid_step / Decimal::from(per_side)
    }

    /// Build a fresh symmetric ladder around `center`: `grid_count / 2` buy
    /// levels below, one wait level at center, `grid_count / 2` sell levels
    /// above — `grid_count + 1` levels total. Level `i` (`1..=per_side`) sits
    /// at `center * (1 - i * level_step/100)` on the buy side and `center *
    /// (1 + i * level_step/100)` on the sell side, each snapped to
    /// `tick_size`; the outermost level (`i == per_side`) lands exactly
    /// `grid_step` percent from center.
    pub fn build_grid(&mut self, center: Decimal) {
        let per_side = self.levels_per_side();
        let mut levels = Vec::with_capacity(per_side * 2 + 1);
        let step_fraction = self.level_step_pct() / dec!(100);

        for i in (1..=per_side).rev() {
            let raw = center * (Decimal::ONE - step_fraction * Decimal::from(i));
            levels.push(GridLevel { side: ZoneKind::Buy, price: self.snap(raw) });
        }

        levels.push(GridLevel { side: ZoneKind::Wait, price: self.snap(center) });

        for i in 1..=per_side {
            let raw = center * (Decimal::ONE + step_fraction * Decimal::from(i));
            levels.push(GridLevel { side: ZoneKind::Sell, price: self.snap(raw) });
        }

        self.levels = levels;
        self.anchor_price = Some(self.snap(center));
        info!(center = %center, count = per_side, "grid built");
    }

    /// Shift the wait band toward `last_filled_price` by at most one grid
    /// level once it has drifted from the current anchor by more than
    /// `rebalance_threshold` percent. The total level count and spacing are
    /// preserved — this rebuilds the ladder around a new anchor exactly one
    /// step closer to the fill, not at the fill price itself. A full
    /// discard-and-rebuild at the market price is a distinct operation
    /// (`build_grid` called directly) triggered externally by the engine's
    /// ladder/open-order mismatch check, not by this method.
    pub fn update_grid(&mut self, last_filled_price: Decimal, last_close: Decimal) {
        let Some(anchor) = self.anchor_price else {
            self.build_grid(last_close);
            return;
        };
        if anchor == Decimal::ZERO {
            self.build_grid(last_close);
            return;
        }
        let drift_pct = ((last_filled_price - anchor) / anchor * dec!(100)).abs();
        if drift_pct <= self.rebalance_threshold {
            return;
        }
        let step_fraction = self.level_step_pct() / dec!(100);
        let one_level = anchor * step_fraction;
        let new_anchor = if last_filled_price > anchor { anchor + one_level } else { anchor - one_level };
        info!(
            old_anchor = %anchor,
            new_anchor = %new_anchor,
            drift_pct = %drift_pct,
            threshold = %self.rebalance_threshold,
            "shifting grid by one level"
        );
        self.build_grid(new_anchor);
    }

    fn snap(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        (price / self.tick_size).round() * self.tick_size
    }

    /// Index of the center of the WAIT region: the midpoint of the
    /// contiguous run of `Wait` levels, or the midpoint of the whole ladder
    /// if there is no wait level.
    pub fn wait_center_index(&self) -> usize {
        let wait_indices: Vec<usize> = self
            .levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.side == ZoneKind::Wait)
            .map(|(i, _)| i)
            .collect();
        if let (Some(&first), Some(&last)) = (wait_indices.first(), wait_indices.last()) {
            (first + last) / 2
        } else if self.levels.is_empty() {
            0
        } else {
            self.levels.len() / 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::new(dec!(0.1), 50, dec!(0.2), dec!(5))
    }

    #[test]
    fn build_grid_produces_count_plus_1_levels() {
        let mut g = grid();
        g.build_grid(dec!(50000));
        assert_eq!(g.levels.len(), 51);
        let wait_count = g.levels.iter().filter(|l| l.side == ZoneKind::Wait).count();
        assert_eq!(wait_count, 1);
    }

    #[test]
    fn scenario_1_btcusdt_four_grid_levels() {
        // spec §8 scenario 1: symbol=BTCUSDT, tick_size=0.1, anchor=100000,
        // grid_count=4, grid_step=0.5% -> 99500/99750 Buy, 100000 Wait,
        // 100250/100500 Sell.
        let mut g = Grid::new(dec!(0.1), 4, dec!(0.5), dec!(5));
        g.build_grid(dec!(100000));
        let prices: Vec<Decimal> = g.levels.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![dec!(99500.0), dec!(99750.0), dec!(100000.0), dec!(100250.0), dec!(100500.0)]);
        assert_eq!(g.levels[0].side, ZoneKind::Buy);
        assert_eq!(g.levels[1].side, ZoneKind::Buy);
        assert_eq!(g.levels[2].side, ZoneKind::Wait);
        assert_eq!(g.levels[3].side, ZoneKind::Sell);
        assert_eq!(g.levels[4].side, ZoneKind::Sell);
    }

    #[test]
    fn wait_sits_at_center_index() {
        let mut g = grid();
        g.build_grid(dec!(50000));
        assert_eq!(g.wait_center_index(), 25);
        assert_eq!(g.levels[25].side, ZoneKind::Wait);
    }

    #[test]
    fn buy_levels_below_sell_levels_above() {
        let mut g = grid();
        g.build_grid(dec!(50000));
        for level in &g.levels[..25] {
            assert_eq!(level.side, ZoneKind::Buy);
            assert!(level.price < dec!(50000));
        }
        for level in &g.levels[26..] {
            assert_eq!(level.side, ZoneKind::Sell);
            assert!(level.price > dec!(50000));
        }
    }

    #[test]
    fn update_grid_holds_under_threshold() {
        let mut g = grid();
        g.build_grid(dec!(50000));
        let anchor_before = g.anchor_price;
        // 1% drift in the filled price, well under the 5% rebalance_threshold
        g.update_grid(dec!(50500), dec!(50000));
        assert_eq!(g.anchor_price, anchor_before);
    }

    #[test]
    fn update_grid_shifts_one_level_past_threshold() {
        let mut g = grid();
        g.build_grid(dec!(50000));
        // 10% drift in the filled price exceeds the 5% threshold: shift one
        // level (grid_step / levels_per_side percent of anchor) toward the
        // fill, not all the way to it.
        g.update_grid(dec!(55500), dec!(50000));
        let one_level = dec!(50000) * (dec!(0.2) / dec!(25) / dec!(100));
        assert_eq!(g.anchor_price, Some(dec!(50000) + one_level));
        assert_eq!(g.levels.len(), 51);
    }

    #[test]
    fn update_grid_shifts_down_toward_fill() {
        let mut g = grid();
        g.build_grid(dec!(50000));
        g.update_grid(dec!(44500), dec!(50000));
        let one_level = dec!(50000) * (dec!(0.2) / dec!(25) / dec!(100));
        assert_eq!(g.anchor_price, Some(dec!(50000) - one_level));
    }

    #[test]
    fn wait_center_index_fallback_when_no_wait() {
        let mut g = grid();
        g.levels = vec![
            GridLevel { side: ZoneKind::Buy, price: dec!(1) },
            GridLevel { side: ZoneKind::Buy, price: dec!(2) },
            GridLevel { side: ZoneKind::Sell, price: dec!(3) },
            GridLevel { side: ZoneKind::Sell, price: dec!(4) },
        ];
        assert_eq!(g.wait_center_index(), 2);
    }
}
