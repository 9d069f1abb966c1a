//! The grid trading strategy engine (component C3).
//!
//! `GridEngine::on_event` is a pure function: given an [`Event`] and the
//! execution layer's view of currently-open limit orders, it updates its own
//! ladder/price-tracking state and returns the [`Intent`]s the execution
//! layer should carry out. No network calls, no database access, no clock
//! reads — every side effect is pushed to the caller.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::info;

use super::grid::Grid;
use super::types::{Direction, LevelIndex, Side, Symbol, ZoneKind};

/// Configuration for one grid engine instance.
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub grid_count: usize,
    pub grid_step: Decimal,
    pub rebalance_threshold: Decimal,
}

/// Normalized market/account events the engine reacts to. A closed sum type
/// in place of dynamic dispatch by event-type tag.
#[derive(Debug, Clone)]
pub enum Event {
    Ticker(TickerEvent),
    Execution(ExecutionEvent),
    OrderUpdate(OrderUpdateEvent),
}

#[derive(Debug, Clone)]
pub struct TickerEvent {
    pub symbol: Symbol,
    pub last_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    pub symbol: Symbol,
    pub price: Decimal,
    pub qty: Decimal,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderUpdateEvent {
    pub order_id: String,
    pub order_link_id: String,
    pub status: OrderStatus,
}

/// An order currently resting on the exchange, as seen by the execution
/// layer (live order book or backtest order manager).
#[derive(Debug, Clone)]
pub struct ExistingLimit {
    pub order_id: String,
    pub price: Decimal,
    pub side: Side,
}

/// Currently-open limit orders split by grid direction, as handed to the
/// engine on each ticker event.
#[derive(Debug, Clone, Default)]
pub struct LimitOrdersByDirection {
    pub long: Vec<ExistingLimit>,
    pub short: Vec<ExistingLimit>,
}

/// An action the execution layer should carry out. The engine never places
/// or cancels orders itself.
#[derive(Debug, Clone)]
pub enum Intent {
    PlaceLimit {
        client_order_id: String,
        symbol: Symbol,
        side: Side,
        price: Decimal,
        /// Always zero here; the execution layer sizes the order via the
        /// risk manager before submitting it.
        qty: Decimal,
        grid_level: LevelIndex,
        direction: Direction,
        reduce_only: bool,
    },
    Cancel {
        symbol: Symbol,
        order_id: String,
        reason: CancelReason,
        price: Decimal,
        side: Side,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Rebuild,
    SideMismatch,
    OutsideGrid,
}

pub struct GridEngine {
    pub symbol: Symbol,
    pub config: GridConfig,
    pub tick_size: Decimal,
    pub strat_id: String,
    anchor_price: Option<Decimal>,
    pub grid: Grid,
    last_close: Option<Decimal>,
    last_filled_price: Option<Decimal>,
    pending_orders: HashMap<String, String>,
}

impl GridEngine {
    pub fn new(symbol: Symbol, tick_size: Decimal, config: GridConfig, strat_id: String, anchor_price: Option<Decimal>) -> Self {
        let grid = Grid::new(tick_size, config.grid_count, config.grid_step, config.rebalance_threshold);
        Self {
            symbol,
            tick_size,
            strat_id,
            anchor_price,
            grid,
            last_close: None,
            last_filled_price: None,
            pending_orders: HashMap::new(),
            config,
        }
    }

    pub fn anchor_price(&self) -> Option<Decimal> {
        self.grid.anchor_price
    }

    pub fn on_event(&mut self, event: Event, limit_orders: Option<LimitOrdersByDirection>) -> Vec<Intent> {
        match event {
            Event::Ticker(e) => self.handle_ticker_event(e, limit_orders.unwrap_or_default()),
            Event::Execution(e) => self.handle_execution_event(e),
            Event::OrderUpdate(e) => self.handle_order_update_event(e),
        }
    }

    fn handle_ticker_event(&mut self, event: TickerEvent, limit_orders: LimitOrdersByDirection) -> Vec<Intent> {
        let mut intents = Vec::new();
        self.last_close = Some(event.last_price);

        if self.grid.levels.len() <= 1 {
            let build_price = self.anchor_price.unwrap_or(event.last_price);
            if self.anchor_price.is_some() {
                info!(symbol = %self.symbol, price = %build_price, "building grid from anchor price");
            } else {
                info!(symbol = %self.symbol, price = %build_price, "building grid from market price");
            }
            self.grid.build_grid(build_price);
        }

        intents.extend(self.check_and_place(Direction::Long, limit_orders.long));
        intents.extend(self.check_and_place(Direction::Short, limit_orders.short));
        intents
    }

    fn handle_execution_event(&mut self, event: ExecutionEvent) -> Vec<Intent> {
        self.last_filled_price = Some(event.price);
        if let Some(last_close) = self.last_close {
            self.grid.update_grid(event.price, last_close);
        }
        Vec::new()
    }

    fn handle_order_update_event(&mut self, event: OrderUpdateEvent) -> Vec<Intent> {
        match event.status {
            OrderStatus::New | OrderStatus::PartiallyFilled => {
                self.pending_orders.insert(event.order_link_id, event.order_id);
            }
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected => {
                self.pending_orders.remove(&event.order_link_id);
            }
        }
        Vec::new()
    }

    fn check_and_place(&mut self, direction: Direction, limits: Vec<ExistingLimit>) -> Vec<Intent> {
        let mut intents = Vec::new();

        if limits.len() > self.grid.grid_count + 10 {
            info!(symbol = %self.symbol, count = limits.len(), "rebuild grid: too many orders");
            if let Some(last_close) = self.last_close {
                self.grid.build_grid(last_close);
            }
            for limit in limits {
                intents.push(Intent::Cancel {
                    symbol: self.symbol.clone(),
                    order_id: limit.order_id,
                    reason: CancelReason::Rebuild,
                    price: limit.price,
                    side: limit.side,
                });
            }
            return intents;
        }

        if !limits.is_empty() && limits.len() < self.grid.grid_count {
            if let (Some(last_filled), Some(last_close)) = (self.last_filled_price, self.last_close) {
                self.grid.update_grid(last_filled, last_close);
            }
        }

        intents.extend(self.place_grid_orders(&limits, direction));
        intents
    }

    fn place_grid_orders(&self, limits: &[ExistingLimit], direction: Direction) -> Vec<Intent> {
        let mut intents = Vec::new();

        let mut limit_by_price: HashMap<String, &ExistingLimit> = HashMap::new();
        for limit in limits {
            limit_by_price.insert(price_key(limit.price), limit);
        }

        let center_index = self.grid.wait_center_index();
        let mut indexed: Vec<(usize, &super::grid::GridLevel)> = self
            .grid
            .levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.side != ZoneKind::Wait)
            .collect();
        indexed.sort_by(|(ia, la), (ib, lb)| {
            let da = (*ia as i64 - center_index as i64).abs();
            let db = (*ib as i64 - center_index as i64).abs();
            da.cmp(&db).then(la.price.cmp(&lb.price))
        });

        for (index, level) in &indexed {
            let side = match level.side {
                ZoneKind::Buy => Side::Buy,
                ZoneKind::Sell => Side::Sell,
                ZoneKind::Wait => unreachable!(),
            };
            match limit_by_price.get(&price_key(level.price)) {
                Some(limit) => {
                    if limit.side != side {
                        intents.push(Intent::Cancel {
                            symbol: self.symbol.clone(),
                            order_id: limit.order_id.clone(),
                            reason: CancelReason::SideMismatch,
                            price: limit.price,
                            side: limit.side,
                        });
                        if let Some(place) = self.create_place_intent(level.price, side, direction, *index as LevelIndex) {
                            intents.push(place);
                        }
                    }
                }
                None => {
                    if let Some(place) = self.create_place_intent(level.price, side, direction, *index as LevelIndex) {
                        intents.push(place);
                    }
                }
            }
        }

        let grid_prices: std::collections::HashSet<String> = self.grid.levels.iter().map(|l| price_key(l.price)).collect();
        for limit in limits {
            if !grid_prices.contains(&price_key(limit.price)) {
                intents.push(Intent::Cancel {
                    symbol: self.symbol.clone(),
                    order_id: limit.order_id.clone(),
                    reason: CancelReason::OutsideGrid,
                    price: limit.price,
                    side: limit.side,
                });
            }
        }

        intents
    }

    fn create_place_intent(&self, price: Decimal, side: Side, direction: Direction, grid_level: LevelIndex) -> Option<Intent> {
        let last_close = self.last_close?;
        if last_close == Decimal::ZERO {
            return None;
        }

        let diff_pct = (last_close - price) / last_close * Decimal::from(100);

        if (side == Side::Buy && diff_pct <= Decimal::ZERO) || (side == Side::Sell && diff_pct >= Decimal::ZERO) {
            return None;
        }

        if diff_pct.abs() <= self.grid.grid_step / Decimal::from(2) {
            return None;
        }

        Some(Intent::PlaceLimit {
            client_order_id: self.deterministic_client_order_id(direction, grid_level, price),
            symbol: self.symbol.clone(),
            side,
            price,
            qty: Decimal::ZERO,
            grid_level,
            direction,
            reduce_only: false,
        })
    }

    /// Stable client order id derived from the strategy id, symbol, grid
    /// level and price: the same `(event sequence, open_orders)` input
    /// always yields the same id, which a random UUID would not (spec §8
    /// determinism: "identical intent sequences ... equal by field
    /// values"). The execution layer is free to suffix this with its own
    /// placement attempt counter if it needs per-attempt uniqueness.
    fn deterministic_client_order_id(&self, direction: Direction, grid_level: LevelIndex, price: Decimal) -> String {
        format!("{}-{}-{:?}-{}-{}", self.strat_id, self.symbol, direction, grid_level, price.normalize())
    }
}

/// 8-decimal rounding key so two prices that differ only in floating
/// representation noise compare equal, matching the source's `round(price,
/// 8)` grid-membership check.
fn price_key(price: Decimal) -> String {
    price.round_dp(8).normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> GridEngine {
        GridEngine::new(
            "BTCUSDT".to_string(),
            dec!(0.1),
            GridConfig { grid_count: 5, grid_step: dec!(0.2), rebalance_threshold: dec!(5) },
            "strat-1".to_string(),
            None,
        )
    }

    #[test]
    fn first_ticker_builds_grid_and_places_orders() {
        let mut e = engine();
        let intents = e.on_event(
            Event::Ticker(TickerEvent { symbol: "BTCUSDT".to_string(), last_price: dec!(50000) }),
            None,
        );
        assert!(e.grid.levels.len() > 1);
        assert!(!intents.is_empty());
    }

    #[test]
    fn order_update_tracks_pending_orders() {
        let mut e = engine();
        e.on_event(
            Event::OrderUpdate(OrderUpdateEvent {
                order_id: "o1".into(),
                order_link_id: "link1".into(),
                status: OrderStatus::New,
            }),
            None,
        );
        assert_eq!(e.pending_orders.get("link1"), Some(&"o1".to_string()));

        e.on_event(
            Event::OrderUpdate(OrderUpdateEvent {
                order_id: "o1".into(),
                order_link_id: "link1".into(),
                status: OrderStatus::Filled,
            }),
            None,
        );
        assert!(e.pending_orders.get("link1").is_none());
    }

    #[test]
    fn execution_event_updates_last_filled_and_tries_update_grid() {
        let mut e = engine();
        e.on_event(Event::Ticker(TickerEvent { symbol: "BTCUSDT".to_string(), last_price: dec!(50000) }), None);
        let intents = e.on_event(
            Event::Execution(ExecutionEvent { symbol: "BTCUSDT".to_string(), price: dec!(49800), qty: dec!(0.01), side: Side::Buy }),
            None,
        );
        assert!(intents.is_empty());
        assert_eq!(e.last_filled_price, Some(dec!(49800)));
    }

    #[test]
    fn too_many_orders_triggers_rebuild_with_cancels() {
        let mut e = engine();
        e.on_event(Event::Ticker(TickerEvent { symbol: "BTCUSDT".to_string(), last_price: dec!(50000) }), None);

        let many: Vec<ExistingLimit> = (0..20)
            .map(|i| ExistingLimit { order_id: format!("o{i}"), price: dec!(49000) + Decimal::from(i), side: Side::Buy })
            .collect();

        let intents = e.on_event(
            Event::Ticker(TickerEvent { symbol: "BTCUSDT".to_string(), last_price: dec!(50000) }),
            Some(LimitOrdersByDirection { long: many.clone(), short: Vec::new() }),
        );
        let cancels = intents
            .iter()
            .filter(|i| matches!(i, Intent::Cancel { reason: CancelReason::Rebuild, .. }))
            .count();
        assert_eq!(cancels, many.len());
    }

    #[test]
    fn no_place_intent_too_close_to_market() {
        let mut e = engine();
        e.on_event(Event::Ticker(TickerEvent { symbol: "BTCUSDT".to_string(), last_price: dec!(50000) }), None);
        // price at exactly market: diff_pct == 0, never eligible
        let intent = e.create_place_intent(dec!(50000), Side::Buy, Direction::Long, 0);
        assert!(intent.is_none());
    }
}
