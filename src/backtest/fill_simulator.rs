//! Trade-through limit-order fill simulator (§4.5).
//!
//! A resting limit order fills the instant the tick's last price crosses
//! its limit; the fill price is always the order's own limit (no slippage,
//! no partial fills, no order-book depth). This is the single fill rule the
//! whole backtest/replay pipeline relies on.

use rust_decimal::Decimal;

use crate::core::types::Side;

/// Whether an order resting at `limit` fills when the market trades at
/// `last_price`: Buy fills on a trade-through from above (`last_price <=
/// limit`), Sell fills on a trade-through from below (`last_price >=
/// limit`).
pub fn crosses(side: Side, limit: Decimal, last_price: Decimal) -> bool {
    match side {
        Side::Buy => last_price <= limit,
        Side::Sell => last_price >= limit,
    }
}

/// The fill price for a crossed order: always the limit price itself,
/// never the tick price (spec §4.5, "no slippage").
pub fn fill_price(limit: Decimal) -> Decimal {
    limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_fills_when_price_trades_through_from_above() {
        assert!(crosses(Side::Buy, dec!(100), dec!(99)));
        assert!(crosses(Side::Buy, dec!(100), dec!(100)));
        assert!(!crosses(Side::Buy, dec!(100), dec!(101)));
    }

    #[test]
    fn sell_fills_when_price_trades_through_from_below() {
        assert!(crosses(Side::Sell, dec!(100), dec!(101)));
        assert!(crosses(Side::Sell, dec!(100), dec!(100)));
        assert!(!crosses(Side::Sell, dec!(100), dec!(99)));
    }

    #[test]
    fn fill_price_always_equals_limit() {
        assert_eq!(fill_price(dec!(99800)), dec!(99800));
    }
}
