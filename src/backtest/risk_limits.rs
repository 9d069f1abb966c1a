//! Risk-limit tier table cache (§6.6), with the same cache/fallback shape
//! as [`super::instrument::InstrumentCache`]: local JSON cache with TTL,
//! hardcoded fallback tiers when no cache and no exchange call succeed.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache_file;
use crate::core::pnl::{self, RawRiskTier, RiskTiers};

/// One tier row as persisted in the cache file — named fields per spec
/// §6.6's JSON layout, distinct from the `(cap, mmr, deduction, imr)` tuple
/// shape `core::pnl` works with internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTierRow {
    pub max_value: rust_decimal::Decimal,
    pub mmr_rate: rust_decimal::Decimal,
    pub deduction: rust_decimal::Decimal,
    pub imr_rate: rust_decimal::Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTierSet {
    pub tiers: Vec<CachedTierRow>,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RiskLimitCacheFile {
    #[serde(flatten)]
    entries: HashMap<String, CachedTierSet>,
}

pub struct RiskLimitCache {
    path: PathBuf,
    ttl_hours: i64,
}

impl RiskLimitCache {
    pub fn new(path: PathBuf, ttl_hours: i64) -> Self {
        Self { path, ttl_hours }
    }

    pub fn get(&self, symbol: &str) -> Option<RiskTiers> {
        let file: RiskLimitCacheFile = cache_file::read_json(&self.path)?;
        let entry = file.entries.get(symbol)?.clone();
        let age_hours = (Utc::now() - entry.cached_at).num_hours();
        if age_hours > self.ttl_hours {
            debug!(symbol, age_hours, ttl_hours = self.ttl_hours, "risk limit cache entry expired");
            return None;
        }
        let raw: Vec<RawRiskTier> = entry
            .tiers
            .into_iter()
            .map(|row| RawRiskTier {
                max_position_value: row.max_value,
                mmr_rate: row.mmr_rate,
                deduction: row.deduction,
                imr_rate: row.imr_rate,
            })
            .collect();
        pnl::parse_risk_limit_tiers(&raw).ok()
    }

    pub fn put(&self, symbol: &str, raw: &[RawRiskTier]) {
        let rows: Vec<CachedTierRow> = raw
            .iter()
            .map(|t| CachedTierRow { max_value: t.max_position_value, mmr_rate: t.mmr_rate, deduction: t.deduction, imr_rate: t.imr_rate })
            .collect();
        let mut file: RiskLimitCacheFile = cache_file::read_json(&self.path).unwrap_or_default();
        file.entries.insert(symbol.to_string(), CachedTierSet { tiers: rows, cached_at: Utc::now() });
        if let Err(e) = cache_file::write_json(&self.path, &file) {
            warn!(error = %e, path = %self.path.display(), "failed to persist risk limit cache");
        }
    }

    /// Hardcoded fallback tiers for symbols without a dedicated table.
    pub fn fallback(symbol: &str) -> RiskTiers {
        match symbol {
            "BTCUSDT" => pnl::default_btcusdt_tiers(),
            _ => pnl::default_generic_tiers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn raw_tiers() -> Vec<RawRiskTier> {
        vec![
            RawRiskTier { max_position_value: dec!(1000000), mmr_rate: dec!(0.01), deduction: dec!(0), imr_rate: dec!(0.02) },
            RawRiskTier { max_position_value: dec!(5000000), mmr_rate: dec!(0.025), deduction: dec!(15000), imr_rate: dec!(0.05) },
        ]
    }

    #[test]
    fn round_trips_through_cache_file() {
        let dir = tempdir().unwrap();
        let cache = RiskLimitCache::new(dir.path().join("risk_limits.json"), 24);
        cache.put("BTCUSDT", &raw_tiers());
        let loaded = cache.get("BTCUSDT").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.last().unwrap().0, pnl::unbounded_cap());
    }

    #[test]
    fn expired_entry_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("risk_limits.json");
        let cache = RiskLimitCache::new(path.clone(), 24);
        cache.put("BTCUSDT", &raw_tiers());

        let expired_cache = RiskLimitCache::new(path, -1);
        assert!(expired_cache.get("BTCUSDT").is_none());
    }

    #[test]
    fn fallback_matches_hardcoded_defaults() {
        assert_eq!(RiskLimitCache::fallback("BTCUSDT"), pnl::default_btcusdt_tiers());
        assert_eq!(RiskLimitCache::fallback("DOGEUSDT"), pnl::default_generic_tiers());
    }
}
