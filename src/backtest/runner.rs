//! One strategy's runtime state for backtest/replay (§4.6): the grid
//! engine, the linked long/short position pair, the simulated order book,
//! and the qty calculator, wired together the way the orchestrator's
//! two-phase tick loop expects to drive them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::order_manager::BacktestOrderManager;
use super::qty::QtyCalculator;
use super::session::{BacktestSession, BacktestTrade};
use crate::core::engine::{Event, GridEngine, Intent, TickerEvent};
use crate::core::error::DataQualityWarning;
use crate::core::pnl::RiskTiers;
use crate::core::risk_manager::PositionPair;
use crate::core::types::{Direction, Side, Symbol};

/// One strategy's full runtime: pure engine + position pair + simulated
/// order book + qty sizing, all owned together so the orchestrator can
/// drive many of these per symbol without any shared mutable state between
/// them.
pub struct StrategyRunner {
    pub strat_id: String,
    pub symbol: Symbol,
    pub engine: GridEngine,
    pub positions: PositionPair,
    pub order_manager: BacktestOrderManager,
    pub qty_calc: QtyCalculator,
    pub risk_tiers: RiskTiers,
    pub enable_risk_multipliers: bool,
}

impl StrategyRunner {
    /// Phase 1: apply every fill crossed at this tick's price to the
    /// matching position tracker, and record a [`BacktestTrade`] in the
    /// session for each. Returns the warnings raised along the way
    /// (spec §7, `DataQualityWarning` side channel).
    pub fn process_fills(&mut self, price: Decimal, ts: DateTime<Utc>, session: &mut BacktestSession) -> Vec<DataQualityWarning> {
        let mut warnings = Vec::new();
        let fills = self.order_manager.check_fills(price, ts, Some(&self.symbol));
        for fill in fills {
            let tracker = self.positions.tracker_mut(fill.direction);
            let increases = matches!((fill.direction, fill.side), (Direction::Long, Side::Buy) | (Direction::Short, Side::Sell));
            let realized = if increases {
                match tracker.add_fill(fill.qty, fill.price, ts, fill.order_id.clone()) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, order_id = %fill.order_id, "rejected fill on add");
                        continue;
                    }
                }
            } else {
                match tracker.reduce_fill(fill.qty, fill.price, ts, fill.order_id.clone(), &mut warnings) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, order_id = %fill.order_id, "rejected fill on reduce");
                        continue;
                    }
                }
            };

            self.engine.on_event(
                Event::Execution(crate::core::engine::ExecutionEvent { symbol: self.symbol.clone(), price: fill.price, qty: fill.qty, side: fill.side }),
                None,
            );

            session.record_trade(BacktestTrade {
                client_order_id: fill.client_order_id,
                order_id: fill.order_id,
                symbol: fill.symbol,
                side: fill.side,
                direction: fill.direction,
                price: fill.price,
                qty: fill.qty,
                fee: fill.fee,
                realized_pnl: realized,
                grid_level: fill.grid_level,
                timestamp: ts,
            });
        }
        warnings
    }

    /// Phase 2 inputs: total unrealized PnL and total IM/MM across both
    /// directions at the current price.
    pub fn total_unrealized_pnl(&mut self, price: Decimal) -> Decimal {
        self.positions.long.calculate_unrealized_pnl(price) + self.positions.short.calculate_unrealized_pnl(price)
    }

    pub fn total_margin(&mut self, price: Decimal, warnings: &mut Vec<DataQualityWarning>) -> (Decimal, Decimal) {
        let long_value = crate::core::pnl::position_value(self.positions.long.state.total_size, price);
        let short_value = crate::core::pnl::position_value(self.positions.short.state.total_size, price);
        let (long_im, _) = crate::core::pnl::initial_margin(long_value, self.positions.long.leverage, &self.risk_tiers);
        let (short_im, _) = crate::core::pnl::initial_margin(short_value, self.positions.short.leverage, &self.risk_tiers);
        let long_mm = self.positions.long.calculate_maintenance_margin(price, &self.risk_tiers, warnings);
        let short_mm = self.positions.short.calculate_maintenance_margin(price, &self.risk_tiers, warnings);
        (long_im + short_im, long_mm + short_mm)
    }

    /// Phase 3: feed the ticker event to the engine and carry out every
    /// emitted intent against the simulated order book, sizing `PlaceLimit`
    /// intents via the qty calculator and the risk manager's current
    /// multiplier.
    pub fn execute_tick(&mut self, last_price: Decimal, ts: DateTime<Utc>, wallet_balance: Decimal, warnings: &mut Vec<DataQualityWarning>) {
        if self.enable_risk_multipliers {
            self.positions.reset_multipliers();
            let qty_calc = &self.qty_calc;
            let qty_for = |direction: Direction, side: Side, multiplier: Decimal| qty_calc.qty_for(last_price, wallet_balance, direction, side, multiplier);
            self.positions.recalculate_multipliers(last_price, wallet_balance, &self.risk_tiers, self.qty_calc.instrument.min_qty, &qty_for, warnings);
        }

        let limit_orders = self.order_manager.get_limit_orders(&self.symbol);
        let intents = self.engine.on_event(Event::Ticker(TickerEvent { symbol: self.symbol.clone(), last_price }), Some(limit_orders));

        for intent in intents {
            self.carry_out(intent, last_price, wallet_balance, ts);
        }
    }

    fn carry_out(&mut self, intent: Intent, last_price: Decimal, wallet_balance: Decimal, ts: DateTime<Utc>) {
        match intent {
            Intent::Cancel { order_id, reason, .. } => {
                let cancelled = self.order_manager.cancel_by_order_id(&order_id);
                debug!(order_id, ?reason, cancelled, "carried out cancel intent");
            }
            Intent::PlaceLimit { client_order_id, symbol, side, price, grid_level, direction, .. } => {
                let multiplier = self.positions.multiplier_for(direction, side);
                let qty = self.qty_calc.qty_for(price, wallet_balance, direction, side, multiplier);
                if qty <= Decimal::ZERO {
                    return;
                }
                if let Err(e) = self.order_manager.place(client_order_id, symbol, side, price, qty, direction, grid_level, ts) {
                    debug!(error = %e, "place intent rejected");
                }
            }
        }
    }

    /// Synthetic closing fill for wind-down `close_all` mode: reduces a
    /// non-empty side fully at `last_price`, the opposite side of its own
    /// direction (a long is closed by a sell, a short by a buy).
    pub fn close_all_positions(&mut self, last_price: Decimal, ts: DateTime<Utc>, session: &mut BacktestSession) {
        for direction in [Direction::Long, Direction::Short] {
            let tracker = self.positions.tracker_mut(direction);
            if tracker.is_empty() {
                continue;
            }
            let size = tracker.state.total_size;
            let mut warnings = Vec::new();
            let closing_side = match direction {
                Direction::Long => Side::Sell,
                Direction::Short => Side::Buy,
            };
            let order_id = format!("wind-down-{}-{direction:?}", self.strat_id);
            let realized = tracker.reduce_fill(size, last_price, ts, order_id.clone(), &mut warnings).unwrap_or(Decimal::ZERO);
            session.record_trade(BacktestTrade {
                client_order_id: order_id.clone(),
                order_id,
                symbol: self.symbol.clone(),
                side: closing_side,
                direction,
                price: last_price,
                qty: size,
                fee: Decimal::ZERO,
                realized_pnl: realized,
                grid_level: 0,
                timestamp: ts,
            });
        }
    }
}
