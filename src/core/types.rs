//! Shared primitive types used across the pure core modules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Position/order side. `Long` buys low and sells high; `Short` is the
/// mirror image. Distinct from an individual order's buy/sell side because a
/// reduce-only sell can close a long position just as a reduce-only buy can
/// close a short one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

/// An individual order's exchange-facing side, independent of position
/// direction (a `Sell` can open a short or reduce a long).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Millisecond-resolution instant, represented with `chrono`'s
/// nanosecond-precision UTC timestamp throughout.
pub type Timestamp = DateTime<Utc>;

/// A trading symbol, e.g. `"BTCUSDT"`.
pub type Symbol = String;

/// A grid price level index, counted from the ladder's center outward.
/// Negative indices are below center (buy zone for a long-biased ladder),
/// positive indices are above center.
pub type LevelIndex = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Buy,
    Wait,
    Sell,
}

/// Wrapper kept for call sites that want to name a bare price/qty pair
/// without pulling in the full order/level types.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQty {
    pub price: Decimal,
    pub qty: Decimal,
}
