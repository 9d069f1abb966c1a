//! The outbound exchange contract (§6.2). `ExchangeAdapter` is the seam
//! between the live runner and a concrete REST/WebSocket client; it is never
//! implemented by the backtest path, which drives the engine directly from
//! persisted/in-memory ticks instead.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::core::error::CoreError;
use crate::core::types::Side;

#[derive(Debug, Clone)]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub client_order_id: String,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub struct NewOrderResponse {
    pub order_id: String,
    pub client_order_id: String,
}

/// One order the exchange reports as still open, in the shape the engine's
/// diff procedure consumes (spec §6.2: "returning a list in the shape the
/// engine's diff expects"). `direction` is recovered from the account's
/// hedge-mode position index, not inferred from price.
#[derive(Debug, Clone)]
pub struct OpenOrderInfo {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub direction: crate::core::types::Direction,
}

/// Outbound actions the live runner (or an order-management test double)
/// performs against an exchange. Kept small and REST-shaped: the engine
/// only ever needs place/cancel/query.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn place_order(&self, req: NewOrderRequest) -> Result<NewOrderResponse, CoreError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), CoreError>;

    async fn get_wallet_balance(&self) -> Result<Decimal, CoreError>;

    async fn get_risk_limit_tiers(&self, symbol: &str) -> Result<Vec<crate::core::pnl::RawRiskTier>, CoreError>;

    async fn get_instrument_info(&self, symbol: &str) -> Result<InstrumentInfoResponse, CoreError>;

    /// Cold-start reconciliation: every order the exchange still considers
    /// open for `symbol`, used to seed `LiveRunner`'s in-memory open-order
    /// view on startup instead of assuming an empty book (spec §6.2).
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrderInfo>, CoreError>;
}

#[derive(Debug, Clone)]
pub struct InstrumentInfoResponse {
    pub symbol: String,
    pub qty_step: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
}
