//! Run configuration (§6.4): a TOML document loaded with `serde` + `toml`,
//! with `dotenv` supplying environment overrides for credentials and the
//! database path — the same pattern as the teacher's `main.rs` (`dotenv::dotenv()`
//! called once at process start, before anything else touches the environment).

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

pub use crate::backtest::WindDownMode;

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub run_id: String,
    pub mode: RunMode,
    pub database_url: String,
    /// Tags rows written under this run (§6.1's "tags with user_id,
    /// account_id, run_id"); defaults to `run_id` when a config predates
    /// multi-account support.
    #[serde(default)]
    pub account_id: String,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Backtest/replay default is `false`; a live-mode config should set
    /// this explicitly (spec §6.4: "implied by mode").
    #[serde(default)]
    pub enable_funding: bool,
    #[serde(default = "default_funding_rate")]
    pub funding_rate: Decimal,
    #[serde(default)]
    pub wind_down_mode: WindDownMode,
    /// Sharpe resampling bucket width, in hours (spec §4.5, default 1h).
    #[serde(default = "default_sharpe_interval_hours")]
    pub sharpe_interval_hours: i64,
    #[serde(default = "default_instrument_cache_ttl_hours")]
    pub instrument_cache_ttl_hours: i64,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

fn default_initial_balance() -> Decimal {
    Decimal::new(10000, 0)
}

fn default_funding_rate() -> Decimal {
    Decimal::new(1, 4)
}

fn default_sharpe_interval_hours() -> i64 {
    1
}

fn default_instrument_cache_ttl_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    Backtest,
    Replay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub strat_id: String,
    pub symbol: String,
    pub grid_count: usize,
    pub grid_step: Decimal,
    pub rebalance_threshold: Decimal,
    pub leverage: Decimal,
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,
    pub min_liq_ratio: Decimal,
    pub max_liq_ratio: Decimal,
    pub max_margin: Decimal,
    pub min_total_margin: Decimal,
    #[serde(default = "default_true")]
    pub enable_risk_multipliers: bool,
    /// Parsed by `backtest::config::AmountExpr::parse` (§6.5).
    pub order_amount: String,
}

fn default_commission_rate() -> Decimal {
    Decimal::new(2, 4)
}

fn default_true() -> bool {
    true
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
        let config: RunConfig = toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn database_url_from_env_or(&self, default_url: &str) -> String {
        std::env::var("GRID_DATABASE_URL").unwrap_or_else(|_| default_url.to_string())
    }

    pub fn effective_account_id(&self) -> String {
        if self.account_id.is_empty() {
            self.run_id.clone()
        } else {
            self.account_id.clone()
        }
    }

    pub fn sharpe_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(self.sharpe_interval_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let toml_src = r#"
            run_id = "r1"
            mode = "backtest"
            database_url = "sqlite:///:memory:"

            [[strategies]]
            strat_id = "s1"
            symbol = "BTCUSDT"
            grid_count = 50
            grid_step = "0.2"
            rebalance_threshold = "5"
            leverage = "10"
            min_liq_ratio = "0.8"
            max_liq_ratio = "1.2"
            max_margin = "5"
            min_total_margin = "0"
            order_amount = "100"
        "#;
        let cfg: RunConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.mode, RunMode::Backtest);
        assert_eq!(cfg.strategies.len(), 1);
        assert_eq!(cfg.strategies[0].symbol, "BTCUSDT");
    }

    #[test]
    fn applies_documented_defaults() {
        let toml_src = r#"
            run_id = "r1"
            mode = "backtest"
            database_url = "sqlite:///:memory:"

            [[strategies]]
            strat_id = "s1"
            symbol = "BTCUSDT"
            grid_count = 50
            grid_step = "0.2"
            rebalance_threshold = "5"
            leverage = "10"
            min_liq_ratio = "0.8"
            max_liq_ratio = "1.2"
            max_margin = "5"
            min_total_margin = "0"
            order_amount = "100"
        "#;
        let cfg: RunConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.initial_balance, rust_decimal_macros::dec!(10000));
        assert!(!cfg.enable_funding);
        assert_eq!(cfg.funding_rate, rust_decimal_macros::dec!(0.0001));
        assert_eq!(cfg.wind_down_mode, WindDownMode::LeaveOpen);
        assert_eq!(cfg.sharpe_interval_hours, 1);
        assert_eq!(cfg.instrument_cache_ttl_hours, 24);
        assert_eq!(cfg.strategies[0].commission_rate, rust_decimal_macros::dec!(0.0002));
        assert!(cfg.strategies[0].enable_risk_multipliers);
    }
}
