//! Normalized market/account events as received from an exchange WebSocket
//! feed, before they are narrowed into the [`crate::core::engine::Event`]
//! the grid engine consumes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::types::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExchangeEvent {
    Ticker(TickerPayload),
    PublicTrade(PublicTradePayload),
    Execution(ExecutionPayload),
    OrderUpdate(OrderUpdatePayload),
    WalletUpdate(WalletPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerPayload {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub local_ts: DateTime<Utc>,
    pub last_price: Decimal,
    pub mark_price: Decimal,
    pub bid1_price: Decimal,
    pub ask1_price: Decimal,
    pub funding_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicTradePayload {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub price: Decimal,
    pub qty: Decimal,
    pub side: Side,
    pub trade_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPayload {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub exec_id: String,
    pub order_id: String,
    pub order_link_id: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub side: Side,
    pub fee: Decimal,
    pub closed_pnl: Decimal,
    /// Position size closed by this fill (0 for a fill that only opens/adds).
    pub closed_size: Decimal,
    /// Remaining unfilled qty on the parent order after this fill.
    pub leaves_qty: Decimal,
    pub is_maker: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdatePayload {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub order_id: String,
    pub order_link_id: String,
    pub status: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub leaves_qty: Decimal,
    pub side: Side,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletPayload {
    pub exchange_ts: DateTime<Utc>,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
}
