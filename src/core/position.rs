//! Position tracking (component C4, tracker half).
//!
//! `PositionTracker` accumulates fills into a single weighted-average
//! entry price, realizes PnL on reductions, and derives margin/liquidation
//! metrics on demand from the pure functions in [`super::pnl`]. It is
//! agnostic to *how* a fill arrived (live execution or simulated
//! trade-through) — both paths call `add_fill`/`reduce_fill`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::error::{CoreError, CoreResult, DataQualityWarning};
use super::pnl;
use super::types::Direction;

/// A single fill applied to a position (either an increase or a reduction).
#[derive(Debug, Clone)]
pub struct PositionEntry {
    pub size: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub order_id: String,
    pub is_increase: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PositionState {
    pub total_size: Decimal,
    pub average_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub commission_paid: Decimal,
    pub funding_payments: Decimal,
    pub last_funding_time: Option<DateTime<Utc>>,
    pub liquidation_price: Decimal,
    pub maintenance_margin: Decimal,
    pub margin_ratio: Option<Decimal>,
    pub entries: Vec<PositionEntry>,
}

pub struct PositionTracker {
    pub direction: Direction,
    pub commission_rate: Decimal,
    pub symbol: String,
    pub leverage: Decimal,
    pub state: PositionState,
}

impl PositionTracker {
    pub fn new(direction: Direction, commission_rate: Decimal, symbol: String, leverage: Decimal) -> Self {
        Self { direction, commission_rate, symbol, leverage, state: PositionState::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.state.total_size == Decimal::ZERO
    }

    /// Add to the position, recomputing the weighted-average entry price.
    /// Returns realized PnL for this call (always `-commission`, matching
    /// the source's convention that opening fills never realize directional
    /// PnL, only commission cost).
    pub fn add_fill(&mut self, size: Decimal, price: Decimal, timestamp: DateTime<Utc>, order_id: String) -> CoreResult<Decimal> {
        if size <= Decimal::ZERO {
            return Err(CoreError::InvalidInput("position size must be positive".into()));
        }

        let current_value = self.state.total_size * self.state.average_entry_price;
        let new_value = size * price;
        let new_total = self.state.total_size + size;

        if new_total > Decimal::ZERO {
            self.state.average_entry_price = (current_value + new_value) / new_total;
        }
        self.state.total_size = new_total;

        let commission = size * price * self.commission_rate;
        self.state.commission_paid += commission;
        self.state.realized_pnl -= commission;

        self.state.entries.push(PositionEntry { size, price, timestamp, order_id, is_increase: true });

        Ok(-commission)
    }

    /// Reduce the position. `size` exceeding the live position is clamped
    /// to the remaining size (Open Question in spec §9, resolved in favor
    /// of clamping over erroring — see DESIGN.md) and surfaced via
    /// `warnings`.
    pub fn reduce_fill(
        &mut self,
        mut size: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
        order_id: String,
        warnings: &mut Vec<DataQualityWarning>,
    ) -> CoreResult<Decimal> {
        if size <= Decimal::ZERO {
            return Err(CoreError::InvalidInput("reduction size must be positive".into()));
        }
        if self.state.total_size == Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        if size > self.state.total_size {
            warnings.push(DataQualityWarning::ReduceClampedToPositionSize { requested: size, clamped_to: self.state.total_size });
            size = self.state.total_size;
        }

        let pnl_per_unit = self.pnl_per_unit(price);
        let gross_pnl = pnl_per_unit * size;
        let commission = size * price * self.commission_rate;
        self.state.commission_paid += commission;
        let net_pnl = gross_pnl - commission;

        self.state.total_size -= size;
        self.state.realized_pnl += net_pnl;
        if self.state.total_size == Decimal::ZERO {
            self.state.average_entry_price = Decimal::ZERO;
        }

        self.state.entries.push(PositionEntry { size: -size, price, timestamp, order_id, is_increase: false });

        Ok(net_pnl)
    }

    fn pnl_per_unit(&self, current_price: Decimal) -> Decimal {
        match self.direction {
            Direction::Long => current_price - self.state.average_entry_price,
            Direction::Short => self.state.average_entry_price - current_price,
        }
    }

    pub fn calculate_unrealized_pnl(&mut self, current_price: Decimal) -> Decimal {
        if self.state.total_size == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let upnl = self.pnl_per_unit(current_price) * self.state.total_size;
        self.state.unrealized_pnl = upnl;
        upnl
    }

    pub fn calculate_total_pnl(&mut self, current_price: Decimal) -> Decimal {
        self.state.realized_pnl + self.calculate_unrealized_pnl(current_price)
    }

    /// ROE percent: `total_pnl / initial_margin * 100`, using `tiers` to
    /// derive the tier-based initial margin if `initial_margin` is `None`.
    pub fn calculate_roe(&mut self, current_price: Decimal, initial_margin: Option<Decimal>, tiers: &pnl::RiskTiers) -> Decimal {
        let im = initial_margin.unwrap_or_else(|| {
            let value = pnl::position_value(self.state.total_size, current_price);
            pnl::initial_margin(value, self.leverage, tiers).0
        });
        if im == Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.calculate_total_pnl(current_price) / im * dec!(100)
    }

    /// Apply one funding payment. Negative return = cost paid out, positive
    /// = income received, matching the signed `funding_paid` convention: a
    /// long pays (negative) and a short receives (positive) on a positive
    /// funding rate.
    pub fn apply_funding_payment(&mut self, funding_rate: Decimal, current_price: Decimal, timestamp: DateTime<Utc>) -> Decimal {
        if self.state.total_size == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let position_value = pnl::position_value(self.state.total_size, current_price);
        let payment = match self.direction {
            Direction::Long => -(position_value * funding_rate),
            Direction::Short => position_value * funding_rate,
        };
        self.state.funding_payments += payment;
        self.state.realized_pnl += payment;
        self.state.last_funding_time = Some(timestamp);
        payment
    }

    pub fn calculate_maintenance_margin(&mut self, current_price: Decimal, tiers: &pnl::RiskTiers, warnings: &mut Vec<DataQualityWarning>) -> Decimal {
        if self.state.total_size == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let position_value = pnl::position_value(self.state.total_size, current_price);
        let (mm, _) = pnl::maintenance_margin(position_value, tiers);
        if mm == Decimal::ZERO && position_value > Decimal::ZERO {
            warnings.push(DataQualityWarning::ZeroMaintenanceMargin { position_value });
        }
        self.state.maintenance_margin = mm;
        mm
    }

    /// Approximate liquidation price derived from the maintenance-margin
    /// breakeven condition: `equity_at_liq - MM(liq) == 0` for isolated
    /// margin, solved by holding MM's tier rate fixed at the current
    /// position value (adequate for the backtest's risk-monitoring use,
    /// not an order-book-exact exchange formula).
    pub fn calculate_liquidation_price(&mut self, wallet_balance: Decimal, tiers: &pnl::RiskTiers) -> Decimal {
        if self.state.total_size == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let entry = self.state.average_entry_price;
        let size = self.state.total_size;
        let position_value = pnl::position_value(size, entry);
        let (_, mmr_rate) = pnl::maintenance_margin(position_value, tiers);
        let (im, _) = pnl::initial_margin(position_value, self.leverage, tiers);
        let margin = im.min(wallet_balance.max(im));

        match self.direction {
            Direction::Long => entry - (margin - position_value * mmr_rate) / size,
            Direction::Short => entry + (margin - position_value * mmr_rate) / size,
        }
    }

    pub fn calculate_margin_ratio(&mut self, current_price: Decimal, wallet_balance: Decimal, tiers: &pnl::RiskTiers, warnings: &mut Vec<DataQualityWarning>) -> Option<Decimal> {
        if self.state.total_size == Decimal::ZERO {
            return None;
        }
        let position_value = pnl::position_value(self.state.total_size, current_price);
        let upnl = self.calculate_unrealized_pnl(current_price);
        let (mm, _) = pnl::maintenance_margin(position_value, tiers);
        if mm == Decimal::ZERO {
            warnings.push(DataQualityWarning::ZeroMaintenanceMargin { position_value });
        }
        let equity = wallet_balance + upnl;
        if equity == Decimal::ZERO {
            return Some(Decimal::ZERO);
        }
        let ratio = mm / equity;
        self.state.margin_ratio = Some(ratio);
        Some(ratio)
    }

    pub fn is_position_at_risk(&mut self, current_price: Decimal, wallet_balance: Decimal, tiers: &pnl::RiskTiers, risk_threshold: Decimal, warnings: &mut Vec<DataQualityWarning>) -> bool {
        match self.calculate_margin_ratio(current_price, wallet_balance, tiers, warnings) {
            Some(ratio) => ratio >= risk_threshold,
            None => false,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.state.entries.iter().filter(|e| e.is_increase).count()
    }

    pub fn exit_count(&self) -> usize {
        self.state.entries.iter().filter(|e| !e.is_increase).count()
    }

    pub fn reset(&mut self) {
        self.state = PositionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap()
    }

    #[test]
    fn add_fill_computes_weighted_average_entry() {
        let mut t = PositionTracker::new(Direction::Long, dec!(0.0002), "BTCUSDT".into(), dec!(10));
        t.add_fill(dec!(1), dec!(100), ts(), "o1".into()).unwrap();
        t.add_fill(dec!(1), dec!(200), ts(), "o2".into()).unwrap();
        assert_eq!(t.state.average_entry_price, dec!(150));
        assert_eq!(t.state.total_size, dec!(2));
    }

    #[test]
    fn reduce_fill_realizes_pnl_and_keeps_entry_price() {
        let mut t = PositionTracker::new(Direction::Long, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        t.add_fill(dec!(2), dec!(100), ts(), "o1".into()).unwrap();
        let mut warnings = Vec::new();
        let pnl = t.reduce_fill(dec!(1), dec!(110), ts(), "o2".into(), &mut warnings).unwrap();
        assert_eq!(pnl, dec!(10));
        assert_eq!(t.state.average_entry_price, dec!(100));
        assert_eq!(t.state.total_size, dec!(1));
        assert!(warnings.is_empty());
    }

    #[test]
    fn reduce_fill_clamps_oversized_reduction() {
        let mut t = PositionTracker::new(Direction::Long, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        t.add_fill(dec!(1), dec!(100), ts(), "o1".into()).unwrap();
        let mut warnings = Vec::new();
        t.reduce_fill(dec!(5), dec!(110), ts(), "o2".into(), &mut warnings).unwrap();
        assert_eq!(t.state.total_size, Decimal::ZERO);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], DataQualityWarning::ReduceClampedToPositionSize { .. }));
    }

    #[test]
    fn full_close_resets_average_entry_price() {
        let mut t = PositionTracker::new(Direction::Short, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        t.add_fill(dec!(1), dec!(100), ts(), "o1".into()).unwrap();
        let mut warnings = Vec::new();
        t.reduce_fill(dec!(1), dec!(90), ts(), "o2".into(), &mut warnings).unwrap();
        assert_eq!(t.state.average_entry_price, Decimal::ZERO);
    }

    #[test]
    fn unrealized_pnl_long_vs_short() {
        let mut long = PositionTracker::new(Direction::Long, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        long.add_fill(dec!(1), dec!(100), ts(), "o1".into()).unwrap();
        assert_eq!(long.calculate_unrealized_pnl(dec!(110)), dec!(10));

        let mut short = PositionTracker::new(Direction::Short, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        short.add_fill(dec!(1), dec!(100), ts(), "o1".into()).unwrap();
        assert_eq!(short.calculate_unrealized_pnl(dec!(110)), dec!(-10));
    }

    #[test]
    fn funding_payment_sign_convention() {
        let mut long = PositionTracker::new(Direction::Long, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        long.add_fill(dec!(1), dec!(100), ts(), "o1".into()).unwrap();
        let payment = long.apply_funding_payment(dec!(0.0001), dec!(100), ts());
        assert_eq!(payment, dec!(-0.01));
        assert_eq!(long.state.realized_pnl, dec!(-0.01));
    }

    #[test]
    fn reject_nonpositive_fill_size() {
        let mut t = PositionTracker::new(Direction::Long, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        assert!(t.add_fill(Decimal::ZERO, dec!(100), ts(), "o1".into()).is_err());
    }

    #[test]
    fn reject_reduce_on_empty_position_returns_zero() {
        let mut t = PositionTracker::new(Direction::Long, Decimal::ZERO, "BTCUSDT".into(), dec!(10));
        let mut warnings = Vec::new();
        let pnl = t.reduce_fill(dec!(1), dec!(100), ts(), "o1".into(), &mut warnings).unwrap();
        assert_eq!(pnl, Decimal::ZERO);
    }
}
