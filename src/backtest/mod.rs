//! The fill-accurate backtest/replay pipeline (components C5, C6):
//! historical tick ingestion, a trade-through limit-order fill simulator, a
//! two-phase tick loop (fills before intents) with funding payments,
//! position tracking, and PnL/risk metrics.
//!
//! None of this is exchange-specific beyond the funding-hour schedule in
//! [`funding`] — the same [`crate::core::engine::GridEngine`] and
//! [`crate::core::risk_manager::PositionPair`] the live runner would use
//! drive every tick here, which is what makes replay a faithfulness check
//! on the live path rather than a separate simulation.

pub mod cache_file;
pub mod config;
pub mod fill_simulator;
pub mod funding;
pub mod instrument;
pub mod order_manager;
pub mod orchestrator;
pub mod qty;
pub mod risk_limits;
pub mod runner;
pub mod session;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::types::Symbol;

/// One historical (or live-captured) tick, as consumed by the backtest/
/// replay orchestrator. A superset of [`crate::core::engine::TickerEvent`]
/// carrying the extra fields (mark price, funding rate, exchange
/// timestamp) the orchestrator needs for funding and equity bookkeeping
/// that the pure engine itself doesn't.
#[derive(Debug, Clone)]
pub struct BacktestTick {
    pub symbol: Symbol,
    pub exchange_ts: DateTime<Utc>,
    pub last_price: Decimal,
    pub mark_price: Decimal,
    pub funding_rate: Decimal,
}

/// End-of-run treatment of open positions (spec §4.6, §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindDownMode {
    #[default]
    LeaveOpen,
    CloseAll,
}
