//! Instrument metadata (tick size, qty step, min/max qty) and a local
//! cache for it (§6.6), plus the rounding helpers the qty calculator and
//! grid ladder both need.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache_file;

/// Per-symbol exchange instrument metadata, cached locally so a cold-start
/// run doesn't need a live exchange call for every symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub symbol: String,
    pub qty_step: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub cached_at: DateTime<Utc>,
}

impl InstrumentInfo {
    /// Snap a price to the nearest multiple of `tick_size` (round-half-up).
    pub fn round_price(&self, price: Decimal) -> Decimal {
        round_to_step(price, self.tick_size)
    }

    /// Round a qty **up** to the nearest multiple of `qty_step`, per §6.5
    /// ("rounded up to qty_step"), then clamp to `[min_qty, max_qty]`.
    pub fn round_qty_up(&self, qty: Decimal) -> Decimal {
        if self.qty_step <= Decimal::ZERO {
            return qty.max(self.min_qty);
        }
        let steps = (qty / self.qty_step).ceil();
        let rounded = steps * self.qty_step;
        rounded.clamp(self.min_qty, self.max_qty.max(self.min_qty))
    }
}

fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).round() * step
}

/// JSON-on-disk instrument cache keyed by symbol (§6.6 layout), with a
/// hardcoded fallback for the common symbols when neither the cache nor an
/// exchange call is available.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstrumentCacheFile {
    #[serde(flatten)]
    entries: HashMap<String, InstrumentInfo>,
}

pub struct InstrumentCache {
    path: PathBuf,
    ttl_hours: i64,
}

impl InstrumentCache {
    pub fn new(path: PathBuf, ttl_hours: i64) -> Self {
        Self { path, ttl_hours }
    }

    /// Load a still-fresh cached entry for `symbol`, or `None` if missing,
    /// expired, or the cache file itself is unreadable.
    pub fn get(&self, symbol: &str) -> Option<InstrumentInfo> {
        let file: InstrumentCacheFile = cache_file::read_json(&self.path)?;
        let entry = file.entries.get(symbol)?.clone();
        let age_hours = (Utc::now() - entry.cached_at).num_hours();
        if age_hours > self.ttl_hours {
            debug!(symbol, age_hours, ttl_hours = self.ttl_hours, "instrument cache entry expired");
            return None;
        }
        Some(entry)
    }

    /// Insert/replace `info` in the cache file, preserving other symbols'
    /// entries. Failures are logged, never propagated (spec
    /// `CachePermissionError` policy: continue without caching).
    pub fn put(&self, info: InstrumentInfo) {
        let mut file: InstrumentCacheFile = cache_file::read_json(&self.path).unwrap_or_default();
        file.entries.insert(info.symbol.clone(), info);
        if let Err(e) = cache_file::write_json(&self.path, &file) {
            warn!(error = %e, path = %self.path.display(), "failed to persist instrument cache");
        }
    }

    /// Hardcoded fallback when no cache and no adapter call succeeds.
    pub fn fallback(symbol: &str) -> InstrumentInfo {
        let (qty_step, tick_size, min_qty, max_qty) = match symbol {
            "BTCUSDT" => (Decimal::new(1, 3), Decimal::new(1, 1), Decimal::new(1, 3), Decimal::new(1000, 0)),
            "ETHUSDT" => (Decimal::new(1, 2), Decimal::new(1, 2), Decimal::new(1, 2), Decimal::new(10000, 0)),
            _ => (Decimal::new(1, 2), Decimal::new(1, 4), Decimal::new(1, 2), Decimal::new(100000, 0)),
        };
        InstrumentInfo { symbol: symbol.to_string(), qty_step, tick_size, min_qty, max_qty, cached_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn info() -> InstrumentInfo {
        InstrumentInfo {
            symbol: "BTCUSDT".into(),
            qty_step: dec!(0.001),
            tick_size: dec!(0.1),
            min_qty: dec!(0.001),
            max_qty: dec!(1000),
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn round_qty_up_rounds_away_from_zero() {
        let i = info();
        assert_eq!(i.round_qty_up(dec!(0.0011)), dec!(0.002));
        assert_eq!(i.round_qty_up(dec!(0.001)), dec!(0.001));
    }

    #[test]
    fn round_qty_up_clamps_to_min() {
        let i = info();
        assert_eq!(i.round_qty_up(dec!(0.0001)), dec!(0.001));
    }

    #[test]
    fn round_price_snaps_to_tick() {
        let i = info();
        assert_eq!(i.round_price(dec!(100.06)), dec!(100.1));
    }

    #[test]
    fn cache_round_trips_and_respects_ttl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instruments.json");
        let cache = InstrumentCache::new(path, 24);
        cache.put(info());
        let loaded = cache.get("BTCUSDT").unwrap();
        assert_eq!(loaded.qty_step, dec!(0.001));

        let cache_expired = InstrumentCache::new(dir.path().join("instruments.json"), -1);
        assert!(cache_expired.get("BTCUSDT").is_none());
    }

    #[test]
    fn fallback_is_deterministic_per_symbol() {
        let a = InstrumentCache::fallback("BTCUSDT");
        let b = InstrumentCache::fallback("BTCUSDT");
        assert_eq!(a.qty_step, b.qty_step);
        assert_eq!(a.tick_size, b.tick_size);
    }
}
