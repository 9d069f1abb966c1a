//! Simulated order book for the backtest/replay path (§4.5, "order
//! manager"). Tracks active orders by both `order_id` (generated here) and
//! `client_order_id` (assigned by the engine), applies the trade-through
//! rule from [`super::fill_simulator`] on each tick, and projects active
//! orders back into the shape [`crate::core::engine::GridEngine`] expects
//! to see.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use super::fill_simulator;
use crate::core::engine::{ExistingLimit, LimitOrdersByDirection};
use crate::core::error::{CoreError, CoreResult};
use crate::core::types::{Direction, LevelIndex, Side, Symbol};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOrderStatus {
    Active,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SimulatedOrder {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub direction: Direction,
    pub price: Decimal,
    pub qty: Decimal,
    pub grid_level: LevelIndex,
    pub status: SimOrderStatus,
    pub created_ts: DateTime<Utc>,
}

/// One simulated fill, produced by [`BacktestOrderManager::check_fills`].
/// Fee follows the flat `qty * price * commission_rate` convention used
/// throughout the backtest (spec §4.5).
#[derive(Debug, Clone)]
pub struct Fill {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub direction: Direction,
    pub price: Decimal,
    pub qty: Decimal,
    pub fee: Decimal,
    pub grid_level: LevelIndex,
    pub timestamp: DateTime<Utc>,
}

pub struct BacktestOrderManager {
    commission_rate: Decimal,
    active: HashMap<String, SimulatedOrder>,
    by_client_id: HashMap<String, String>,
    history: Vec<SimulatedOrder>,
    total_filled: usize,
}

impl BacktestOrderManager {
    pub fn new(commission_rate: Decimal) -> Self {
        Self { commission_rate, active: HashMap::new(), by_client_id: HashMap::new(), history: Vec::new(), total_filled: 0 }
    }

    /// Place a new resting order. Rejects a `client_order_id` that is
    /// currently live; a cancelled or filled id may be reused afterward
    /// (spec §3.2, tracked-order uniqueness invariant).
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &mut self,
        client_order_id: String,
        symbol: Symbol,
        side: Side,
        price: Decimal,
        qty: Decimal,
        direction: Direction,
        grid_level: LevelIndex,
        ts: DateTime<Utc>,
    ) -> CoreResult<SimulatedOrder> {
        if self.by_client_id.contains_key(&client_order_id) {
            return Err(CoreError::DuplicateClientId(client_order_id));
        }
        let order_id = Uuid::new_v4().to_string();
        let order = SimulatedOrder {
            order_id: order_id.clone(),
            client_order_id: client_order_id.clone(),
            symbol,
            side,
            direction,
            price,
            qty,
            grid_level,
            status: SimOrderStatus::Active,
            created_ts: ts,
        };
        self.by_client_id.insert(client_order_id, order_id.clone());
        self.active.insert(order_id, order.clone());
        Ok(order)
    }

    pub fn cancel_by_order_id(&mut self, order_id: &str) -> bool {
        match self.active.remove(order_id) {
            Some(mut order) => {
                order.status = SimOrderStatus::Cancelled;
                self.by_client_id.remove(&order.client_order_id);
                self.history.push(order);
                true
            }
            None => false,
        }
    }

    pub fn cancel_by_client_order_id(&mut self, client_order_id: &str) -> bool {
        match self.by_client_id.get(client_order_id).cloned() {
            Some(order_id) => self.cancel_by_order_id(&order_id),
            None => false,
        }
    }

    /// Scan active orders (optionally filtered to one `symbol`) for
    /// trade-throughs at `price`, move every filled order into history, and
    /// return one [`Fill`] per filled order.
    pub fn check_fills(&mut self, price: Decimal, ts: DateTime<Utc>, symbol: Option<&str>) -> Vec<Fill> {
        let crossed: Vec<String> = self
            .active
            .values()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .filter(|o| fill_simulator::crosses(o.side, o.price, price))
            .map(|o| o.order_id.clone())
            .collect();

        let mut fills = Vec::with_capacity(crossed.len());
        for order_id in crossed {
            let Some(mut order) = self.active.remove(&order_id) else { continue };
            self.by_client_id.remove(&order.client_order_id);
            let fill_price = fill_simulator::fill_price(order.price);
            let fee = order.qty * fill_price * self.commission_rate;
            fills.push(Fill {
                order_id: order.order_id.clone(),
                client_order_id: order.client_order_id.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                direction: order.direction,
                price: fill_price,
                qty: order.qty,
                fee,
                grid_level: order.grid_level,
                timestamp: ts,
            });
            order.status = SimOrderStatus::Filled;
            self.total_filled += 1;
            debug!(order_id = %order.order_id, price = %fill_price, qty = %order.qty, "simulated fill");
            self.history.push(order);
        }
        fills
    }

    /// Project active orders into the shape the engine's diff procedure
    /// consumes, split by grid direction.
    pub fn get_limit_orders(&self, symbol: &str) -> LimitOrdersByDirection {
        let mut result = LimitOrdersByDirection::default();
        for order in self.active.values() {
            if order.symbol != symbol {
                continue;
            }
            let limit = ExistingLimit { order_id: order.order_id.clone(), price: order.price, side: order.side };
            match order.direction {
                Direction::Long => result.long.push(limit),
                Direction::Short => result.short.push(limit),
            }
        }
        result
    }

    pub fn total_active_orders(&self) -> usize {
        self.active.len()
    }

    pub fn total_filled_orders(&self) -> usize {
        self.total_filled
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn duplicate_client_id_rejected_while_live() {
        let mut om = BacktestOrderManager::new(dec!(0.0002));
        om.place("c1".into(), "BTCUSDT".into(), Side::Buy, dec!(100), dec!(1), Direction::Long, 0, ts()).unwrap();
        let err = om.place("c1".into(), "BTCUSDT".into(), Side::Buy, dec!(99), dec!(1), Direction::Long, 0, ts()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateClientId(_)));
    }

    #[test]
    fn client_id_reusable_after_cancel() {
        let mut om = BacktestOrderManager::new(dec!(0.0002));
        om.place("c1".into(), "BTCUSDT".into(), Side::Buy, dec!(100), dec!(1), Direction::Long, 0, ts()).unwrap();
        assert!(om.cancel_by_client_order_id("c1"));
        assert!(om.place("c1".into(), "BTCUSDT".into(), Side::Buy, dec!(90), dec!(1), Direction::Long, 0, ts()).is_ok());
    }

    #[test]
    fn check_fills_trade_through_fills_at_limit_not_tick_price() {
        let mut om = BacktestOrderManager::new(Decimal::ZERO);
        om.place("c1".into(), "BTCUSDT".into(), Side::Buy, dec!(99800), dec!(0.001), Direction::Long, -1, ts()).unwrap();
        let fills = om.check_fills(dec!(99700), ts(), Some("BTCUSDT"));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(99800));
        assert_eq!(om.total_active_orders(), 0);
        assert_eq!(om.total_filled_orders(), 1);
    }

    #[test]
    fn check_fills_charges_commission() {
        let mut om = BacktestOrderManager::new(dec!(0.0002));
        om.place("c1".into(), "BTCUSDT".into(), Side::Sell, dec!(100), dec!(2), Direction::Long, 1, ts()).unwrap();
        let fills = om.check_fills(dec!(100), ts(), None);
        assert_eq!(fills[0].fee, dec!(100) * dec!(2) * dec!(0.0002));
    }

    #[test]
    fn get_limit_orders_splits_by_direction() {
        let mut om = BacktestOrderManager::new(Decimal::ZERO);
        om.place("c1".into(), "BTCUSDT".into(), Side::Buy, dec!(100), dec!(1), Direction::Long, 0, ts()).unwrap();
        om.place("c2".into(), "BTCUSDT".into(), Side::Sell, dec!(110), dec!(1), Direction::Short, 0, ts()).unwrap();
        let limits = om.get_limit_orders("BTCUSDT");
        assert_eq!(limits.long.len(), 1);
        assert_eq!(limits.short.len(), 1);
    }

    #[test]
    fn cancel_unknown_order_returns_false() {
        let mut om = BacktestOrderManager::new(Decimal::ZERO);
        assert!(!om.cancel_by_order_id("missing"));
        assert!(!om.cancel_by_client_order_id("missing"));
    }

    #[test]
    fn history_grows_on_cancel_and_fill() {
        let mut om = BacktestOrderManager::new(Decimal::ZERO);
        om.place("c1".into(), "BTCUSDT".into(), Side::Buy, dec!(100), dec!(1), Direction::Long, 0, ts()).unwrap();
        om.place("c2".into(), "BTCUSDT".into(), Side::Buy, dec!(90), dec!(1), Direction::Long, 0, ts()).unwrap();
        om.cancel_by_client_order_id("c1");
        om.check_fills(dec!(90), ts(), None);
        assert_eq!(om.history_len(), 2);
    }
}
