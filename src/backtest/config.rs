//! Per-strategy amount expressions (§6.5): the three ways a grid level's
//! base order size can be specified in a strategy config document, resolved
//! to a concrete qty at intent-sizing time.

use rust_decimal::Decimal;

use crate::core::error::{CoreError, CoreResult};

/// A parsed `amount_expression` from a strategy config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmountExpr {
    /// `"<number>"` — fixed notional in quote currency; `qty = number / price`.
    FixedQuote(Decimal),
    /// `"x<fraction>"` — fraction of wallet balance; `qty = wallet * fraction / price`.
    WalletFraction(Decimal),
    /// `"b<number>"` — fixed base-currency size; `qty = number`.
    FixedBase(Decimal),
}

impl AmountExpr {
    /// Parse the three textual forms from spec §6.5. Whitespace around the
    /// expression is trimmed; anything else that doesn't parse as a decimal
    /// is `InvalidInput`.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix('x') {
            let fraction = parse_decimal(rest)?;
            return Ok(AmountExpr::WalletFraction(fraction));
        }
        if let Some(rest) = raw.strip_prefix('b') {
            let size = parse_decimal(rest)?;
            return Ok(AmountExpr::FixedBase(size));
        }
        let quote = parse_decimal(raw)?;
        Ok(AmountExpr::FixedQuote(quote))
    }

    /// Resolve the expression to a raw base-currency qty, before the
    /// per-side risk multiplier and qty_step rounding are applied.
    pub fn qty_for(&self, price: Decimal, wallet_balance: Decimal) -> Decimal {
        match self {
            AmountExpr::FixedQuote(notional) => {
                if price <= Decimal::ZERO {
                    Decimal::ZERO
                } else {
                    *notional / price
                }
            }
            AmountExpr::WalletFraction(fraction) => {
                if price <= Decimal::ZERO {
                    Decimal::ZERO
                } else {
                    wallet_balance * *fraction / price
                }
            }
            AmountExpr::FixedBase(size) => *size,
        }
    }
}

fn parse_decimal(raw: &str) -> CoreResult<Decimal> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|e| CoreError::InvalidInput(format!("malformed amount expression {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_fixed_quote() {
        assert_eq!(AmountExpr::parse("100").unwrap(), AmountExpr::FixedQuote(dec!(100)));
    }

    #[test]
    fn parses_wallet_fraction() {
        assert_eq!(AmountExpr::parse("x0.01").unwrap(), AmountExpr::WalletFraction(dec!(0.01)));
    }

    #[test]
    fn parses_fixed_base() {
        assert_eq!(AmountExpr::parse("b0.001").unwrap(), AmountExpr::FixedBase(dec!(0.001)));
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(AmountExpr::parse("not-a-number").is_err());
        assert!(AmountExpr::parse("xabc").is_err());
    }

    #[test]
    fn fixed_quote_qty_divides_by_price() {
        let expr = AmountExpr::parse("1000").unwrap();
        assert_eq!(expr.qty_for(dec!(50000), dec!(0)), dec!(0.02));
    }

    #[test]
    fn wallet_fraction_qty_uses_balance() {
        let expr = AmountExpr::parse("x0.1").unwrap();
        assert_eq!(expr.qty_for(dec!(50000), dec!(100000)), dec!(0.2));
    }

    #[test]
    fn fixed_base_qty_ignores_price_and_balance() {
        let expr = AmountExpr::parse("b0.5").unwrap();
        assert_eq!(expr.qty_for(dec!(1), dec!(0)), dec!(0.5));
    }
}
