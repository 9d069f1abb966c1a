//! One strategy's live runtime: the same [`GridEngine`]/[`PositionPair`]
//! the backtest path drives, wired to a concrete [`ExchangeAdapter`]
//! instead of the simulated order book (spec §4.6, §5, §6.2).
//!
//! Every exchange call the executor makes is `async` and is always awaited
//! from a dedicated task rather than inline on the event-handling path, so
//! one slow REST round-trip never blocks the run loop from draining events
//! for other symbols (spec §5: "REST calls... must be off the run loop").

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::fill_buffer::SameOrderErrorDetector;
use crate::backtest::qty::QtyCalculator;
use crate::core::engine::{Event, ExecutionEvent, ExistingLimit, GridEngine, Intent, LimitOrdersByDirection, OrderStatus, OrderUpdateEvent, TickerEvent};
use crate::core::error::DataQualityWarning;
use crate::core::pnl::RiskTiers;
use crate::core::risk_manager::PositionPair;
use crate::core::types::{Direction, Side, Symbol};
use crate::exchange::adapter::{ExchangeAdapter, NewOrderRequest, OpenOrderInfo};
use crate::exchange::events::ExchangeEvent;
use crate::storage::LiveRecorder;

/// One order the live runner believes is resting on the exchange, tracked
/// by `client_order_id` so fills/cancels can be matched back to the grid
/// level and direction that placed them.
#[derive(Debug, Clone)]
struct TrackedOrder {
    order_id: String,
    client_order_id: String,
    symbol: Symbol,
    price: Decimal,
    side: Side,
    direction: Direction,
}

/// Live counterpart to [`crate::backtest::runner::StrategyRunner`]: same
/// engine and position pair, but orders are placed/cancelled against a real
/// `ExchangeAdapter` instead of an in-memory simulated book.
pub struct LiveRunner {
    pub strat_id: String,
    pub symbol: Symbol,
    pub engine: GridEngine,
    pub positions: PositionPair,
    pub qty_calc: QtyCalculator,
    pub risk_tiers: RiskTiers,
    pub enable_risk_multipliers: bool,
    adapter: Arc<dyn ExchangeAdapter>,
    open_orders: Vec<TrackedOrder>,
    fill_guard: SameOrderErrorDetector,
    wallet_balance: Decimal,
    recorder: Option<LiveRecorder>,
}

impl LiveRunner {
    pub fn new(strat_id: String, symbol: Symbol, engine: GridEngine, positions: PositionPair, qty_calc: QtyCalculator, risk_tiers: RiskTiers, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self {
            strat_id,
            symbol,
            engine,
            positions,
            qty_calc,
            risk_tiers,
            enable_risk_multipliers: true,
            adapter,
            open_orders: Vec::new(),
            fill_guard: SameOrderErrorDetector::new(),
            wallet_balance: Decimal::ZERO,
            recorder: None,
        }
    }

    /// Attach persistence for this run. Without one, the runner still
    /// trades correctly; it just leaves the tables in [`crate::storage`]
    /// empty, which is fine for tests and never appropriate in production.
    pub fn with_recorder(mut self, recorder: LiveRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Cold-start reconciliation (spec §6.2): replace the in-memory
    /// open-order view with whatever the exchange reports as still open,
    /// so a restarted runner doesn't start from a falsely-empty book and
    /// spam duplicate placements on its first diff.
    pub async fn seed_open_orders(&mut self) {
        match self.adapter.get_open_orders(&self.symbol).await {
            Ok(orders) => {
                self.open_orders = orders
                    .into_iter()
                    .map(|o| TrackedOrder { order_id: o.order_id, client_order_id: o.client_order_id, symbol: o.symbol, price: o.price, side: o.side, direction: o.direction })
                    .collect();
                info!(symbol = %self.symbol, count = self.open_orders.len(), "seeded open orders from exchange");
            }
            Err(e) => warn!(error = %e, symbol = %self.symbol, "failed to seed open orders, starting from empty book"),
        }
    }

    /// Dispatch one normalized exchange event, returning any data-quality
    /// warnings raised while applying it.
    pub async fn handle_event(&mut self, event: ExchangeEvent, ts_recv: DateTime<Utc>) -> Vec<DataQualityWarning> {
        let mut warnings = Vec::new();
        match event {
            ExchangeEvent::Ticker(payload) => {
                if payload.symbol != self.symbol {
                    return warnings;
                }
                if let Some(recorder) = &self.recorder {
                    recorder.record_ticker(&payload.symbol, payload.exchange_ts, payload.local_ts, payload.last_price, payload.mark_price, payload.bid1_price, payload.ask1_price, payload.funding_rate);
                }
                if self.enable_risk_multipliers {
                    self.positions.reset_multipliers();
                    let qty_calc = &self.qty_calc;
                    let wallet_balance = self.wallet_balance;
                    let qty_for = |direction: Direction, side: Side, multiplier: Decimal| qty_calc.qty_for(payload.last_price, wallet_balance, direction, side, multiplier);
                    self.positions.recalculate_multipliers(payload.last_price, self.wallet_balance, &self.risk_tiers, self.qty_calc.instrument.min_qty, &qty_for, &mut warnings);
                }
                let limit_orders = self.limit_orders_by_direction();
                let intents = self.engine.on_event(Event::Ticker(TickerEvent { symbol: self.symbol.clone(), last_price: payload.last_price }), Some(limit_orders));
                for intent in intents {
                    self.carry_out(intent, payload.last_price, ts_recv).await;
                }
                self.record_position_snapshots(payload.last_price, payload.exchange_ts);
            }
            ExchangeEvent::Execution(payload) => {
                if payload.symbol != self.symbol {
                    return warnings;
                }
                if self.fill_guard.observe(payload.price, &payload.order_id) {
                    error!(order_id = %payload.order_id, price = %payload.price, "same_order_error: duplicate fill delivery suspected");
                }

                let direction = self.open_orders.iter().find(|o| o.order_id == payload.order_id).map(|o| o.direction).unwrap_or(Direction::Long);
                let increases = matches!((direction, payload.side), (Direction::Long, Side::Buy) | (Direction::Short, Side::Sell));
                let tracker = self.positions.tracker_mut(direction);
                let result = if increases {
                    tracker.add_fill(payload.qty, payload.price, payload.exchange_ts, payload.order_id.clone())
                } else {
                    tracker.reduce_fill(payload.qty, payload.price, payload.exchange_ts, payload.order_id.clone(), &mut warnings)
                };
                if let Err(e) = result {
                    warn!(error = %e, order_id = %payload.order_id, "rejected live fill");
                }
                if let Some(recorder) = &self.recorder {
                    recorder.record_execution(
                        &payload.symbol,
                        payload.exchange_ts,
                        &payload.order_id,
                        &payload.order_link_id,
                        &payload.exec_id,
                        payload.price,
                        payload.qty,
                        payload.side,
                        payload.fee,
                        payload.closed_pnl,
                        payload.closed_size,
                        payload.leaves_qty,
                        payload.is_maker,
                    );
                }

                self.engine.on_event(
                    Event::Execution(ExecutionEvent { symbol: self.symbol.clone(), price: payload.price, qty: payload.qty, side: payload.side }),
                    None,
                );
            }
            ExchangeEvent::OrderUpdate(payload) => {
                if payload.symbol != self.symbol {
                    return warnings;
                }
                let status = match payload.status.as_str() {
                    "New" | "PartiallyFilled" => OrderStatus::New,
                    "Filled" => OrderStatus::Filled,
                    "Cancelled" | "Deactivated" => OrderStatus::Cancelled,
                    "Rejected" => OrderStatus::Rejected,
                    other => {
                        debug!(status = other, "unrecognized order status, treating as Cancelled");
                        OrderStatus::Cancelled
                    }
                };
                if let Some(recorder) = &self.recorder {
                    recorder.record_order_update(&payload.symbol, payload.exchange_ts, &payload.order_id, &payload.order_link_id, &payload.status, payload.price, payload.qty, payload.leaves_qty, payload.side);
                }
                if matches!(status, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected) {
                    self.open_orders.retain(|o| o.order_id != payload.order_id);
                }
                self.engine.on_event(
                    Event::OrderUpdate(OrderUpdateEvent { order_id: payload.order_id, order_link_id: payload.order_link_id, status }),
                    None,
                );
            }
            ExchangeEvent::WalletUpdate(payload) => {
                self.wallet_balance = payload.wallet_balance;
                if let Some(recorder) = &self.recorder {
                    recorder.record_wallet(payload.exchange_ts, payload.wallet_balance, payload.available_balance);
                }
            }
            ExchangeEvent::PublicTrade(_) => {}
        }
        warnings
    }

    /// Snapshots both sides' position state at the current mark price, for
    /// whichever side actually has size open. Cheap relative to a ticker
    /// tick and gives the persistence layer a point-in-time view without
    /// needing to replay the execution stream.
    fn record_position_snapshots(&mut self, last_price: Decimal, exchange_ts: DateTime<Utc>) {
        let Some(recorder) = self.recorder.clone() else { return };
        let wallet_balance = self.wallet_balance;
        let risk_tiers = self.risk_tiers.clone();
        let mut warnings = Vec::new();
        for direction in [Direction::Long, Direction::Short] {
            let tracker = self.positions.tracker_mut(direction);
            if tracker.is_empty() {
                continue;
            }
            let size = tracker.state.total_size;
            let entry_price = tracker.state.average_entry_price;
            let unrealized_pnl = tracker.calculate_unrealized_pnl(last_price);
            let margin = tracker.calculate_maintenance_margin(last_price, &risk_tiers, &mut warnings);
            let liquidation_price = tracker.calculate_liquidation_price(wallet_balance, &risk_tiers);
            recorder.record_position_snapshot(&self.symbol, direction, exchange_ts, size, entry_price, last_price, unrealized_pnl, margin, liquidation_price);
        }
    }

    fn limit_orders_by_direction(&self) -> LimitOrdersByDirection {
        let mut result = LimitOrdersByDirection::default();
        for order in &self.open_orders {
            let limit = ExistingLimit { order_id: order.order_id.clone(), price: order.price, side: order.side };
            match order.direction {
                Direction::Long => result.long.push(limit),
                Direction::Short => result.short.push(limit),
            }
        }
        result
    }

    /// Carry out one intent against the exchange adapter. Awaited inline
    /// rather than fire-and-forget: per symbol, the run loop must not
    /// advance past this intent until it completes, but the call itself
    /// never blocks other symbols since each `LiveRunner` is driven
    /// independently (spec §5, "across symbols, operations are
    /// independent").
    async fn carry_out(&mut self, intent: Intent, last_price: Decimal, _ts: DateTime<Utc>) {
        match intent {
            Intent::Cancel { order_id, reason, .. } => {
                debug!(order_id, ?reason, "cancelling order");
                match self.adapter.cancel_order(&self.symbol, &order_id).await {
                    Ok(()) => self.open_orders.retain(|o| o.order_id != order_id),
                    Err(e) => warn!(error = %e, order_id, "cancel_order failed, will reconcile on next diff"),
                }
            }
            Intent::PlaceLimit { client_order_id, symbol, side, price, grid_level: _, direction, reduce_only } => {
                let multiplier = self.positions.multiplier_for(direction, side);
                let qty = self.qty_calc.qty_for(price, self.wallet_balance, direction, side, multiplier);
                if qty <= Decimal::ZERO {
                    return;
                }
                let req = NewOrderRequest { symbol: symbol.clone(), side, price, qty, client_order_id: client_order_id.clone(), reduce_only };
                match self.adapter.place_order(req).await {
                    Ok(resp) => {
                        self.open_orders.push(TrackedOrder { order_id: resp.order_id, client_order_id, symbol, price, side, direction });
                    }
                    Err(e) => warn!(error = %e, %client_order_id, "place_order failed"),
                }
            }
        }
        let _ = last_price;
    }

    /// Total unrealized PnL across both directions at `price`, for
    /// periodic equity logging/snapshotting.
    pub fn total_unrealized_pnl(&mut self, price: Decimal) -> Decimal {
        self.positions.long.calculate_unrealized_pnl(price) + self.positions.short.calculate_unrealized_pnl(price)
    }
}
