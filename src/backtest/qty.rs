//! The executor's quantity calculator (§4.4 "feedback into sizing", §6.5):
//! turns an `Intent::PlaceLimit`'s placeholder qty into the real order size
//! by resolving the strategy's amount expression, scaling by the risk
//! manager's current per-side multiplier, and rounding up to the
//! instrument's qty step.

use rust_decimal::Decimal;

use super::config::AmountExpr;
use super::instrument::InstrumentInfo;
use crate::core::types::{Direction, Side};

pub struct QtyCalculator {
    pub amount_expr: AmountExpr,
    pub instrument: InstrumentInfo,
}

impl QtyCalculator {
    pub fn new(amount_expr: AmountExpr, instrument: InstrumentInfo) -> Self {
        Self { amount_expr, instrument }
    }

    /// Resolve the final qty for a `(direction, side)` order at `price`,
    /// given the current wallet balance and the risk manager's multiplier
    /// for that (direction, side) pair.
    pub fn qty_for(&self, price: Decimal, wallet_balance: Decimal, _direction: Direction, _side: Side, multiplier: Decimal) -> Decimal {
        let base = self.amount_expr.qty_for(price, wallet_balance);
        let scaled = base * multiplier;
        self.instrument.round_qty_up(scaled)
    }
}
