//! Backtest runner CLI: loads a run configuration, replays the persisted
//! ticker stream for each configured symbol through [`BacktestOrchestrator`],
//! and prints the resulting session metrics as JSON.
//!
//! ```bash
//! backtest_run --config run.toml --start 2026-01-01T00:00:00Z --end 2026-01-02T00:00:00Z
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use grid_engine_core::backtest::instrument::InstrumentCache;
use grid_engine_core::backtest::orchestrator::{BacktestOrchestrator, OrchestratorConfig};
use grid_engine_core::backtest::order_manager::BacktestOrderManager;
use grid_engine_core::backtest::qty::QtyCalculator;
use grid_engine_core::backtest::risk_limits::RiskLimitCache;
use grid_engine_core::backtest::runner::StrategyRunner;
use grid_engine_core::backtest::{BacktestTick, WindDownMode};
use grid_engine_core::config::RunConfig;
use grid_engine_core::core::engine::{GridConfig, GridEngine};
use grid_engine_core::core::position::PositionTracker;
use grid_engine_core::core::risk_manager::{PositionPair, RiskLimits};
use grid_engine_core::core::types::Direction;
use grid_engine_core::storage::repository::{Db, RunRepository, TickerRepository};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "backtest_run")]
#[command(about = "Run a backtest from persisted ticker history against a grid strategy config")]
struct Args {
    /// Run configuration TOML document (§6.4).
    #[arg(long, env = "GRID_CONFIG")]
    config: PathBuf,

    /// Inclusive start of the tick window to replay (RFC3339).
    #[arg(long)]
    start: DateTime<Utc>,

    /// Inclusive end of the tick window to replay (RFC3339).
    #[arg(long)]
    end: DateTime<Utc>,

    /// Starting wallet balance; overrides `initial_balance` in the config file.
    #[arg(long)]
    initial_balance: Option<Decimal>,

    /// Directory holding the instrument/risk-limit JSON caches.
    #[arg(long, env = "GRID_CACHE_DIR", default_value = "./cache")]
    cache_dir: PathBuf,

    /// Whether to simulate funding payments; overrides `enable_funding` in the config file.
    #[arg(long)]
    enable_funding: Option<bool>,

    /// Close all open positions at the final tick instead of leaving them open;
    /// overrides `wind_down_mode` in the config file.
    #[arg(long)]
    close_all_at_end: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = RunConfig::load(&args.config)?;
    let db_url = config.database_url_from_env_or(&config.database_url);
    let db = Db::open(&db_url).context("opening run database")?;

    std::fs::create_dir_all(&args.cache_dir).context("creating cache directory")?;
    let instrument_cache = InstrumentCache::new(args.cache_dir.join("instruments.json"), config.instrument_cache_ttl_hours);
    let risk_limit_cache = RiskLimitCache::new(args.cache_dir.join("risk_limits.json"), config.instrument_cache_ttl_hours);

    let ticker_repo = TickerRepository::new(db.clone());
    let run_repo = RunRepository::new(db.clone());
    run_repo.insert_or_update(&config.run_id, &config.strategies.first().map(|s| s.symbol.clone()).unwrap_or_default(), "backtest", Utc::now(), "{}")?;

    for symbol in config.strategies.iter().map(|s| s.symbol.clone()).collect::<std::collections::BTreeSet<_>>() {
        info!(symbol, "loading ticker history");
        let rows = ticker_repo.load_range(&symbol, args.start, args.end).context("loading ticker history")?;
        if rows.is_empty() {
            warn!(symbol, "no ticker history in the requested window, skipping");
            continue;
        }
        let ticks: Vec<BacktestTick> = rows
            .iter()
            .map(|r| BacktestTick { symbol: r.symbol.clone(), exchange_ts: r.exchange_ts, last_price: r.last_price, mark_price: r.mark_price, funding_rate: r.funding_rate })
            .collect();

        let instrument = instrument_cache.get(&symbol).unwrap_or_else(|| InstrumentCache::fallback(&symbol));
        let risk_tiers = risk_limit_cache.get(&symbol).unwrap_or_else(|| RiskLimitCache::fallback(&symbol));

        let runners: Vec<StrategyRunner> = config
            .strategies
            .iter()
            .filter(|s| s.symbol == symbol)
            .map(|strat| {
                let engine = GridEngine::new(
                    strat.symbol.clone(),
                    instrument.tick_size,
                    GridConfig { grid_count: strat.grid_count, grid_step: strat.grid_step, rebalance_threshold: strat.rebalance_threshold },
                    strat.strat_id.clone(),
                    None,
                );
                let long = PositionTracker::new(Direction::Long, strat.commission_rate, strat.symbol.clone(), strat.leverage);
                let short = PositionTracker::new(Direction::Short, strat.commission_rate, strat.symbol.clone(), strat.leverage);
                let limits = RiskLimits {
                    min_liq_ratio: strat.min_liq_ratio,
                    max_liq_ratio: strat.max_liq_ratio,
                    max_margin: strat.max_margin,
                    min_total_margin: strat.min_total_margin,
                };
                StrategyRunner {
                    strat_id: strat.strat_id.clone(),
                    symbol: strat.symbol.clone(),
                    engine,
                    positions: PositionPair::new(long, short, limits),
                    order_manager: BacktestOrderManager::new(strat.commission_rate),
                    qty_calc: QtyCalculator::new(
                        grid_engine_core::backtest::config::AmountExpr::parse(&strat.order_amount).unwrap_or(grid_engine_core::backtest::config::AmountExpr::FixedQuote(dec!(100))),
                        instrument.clone(),
                    ),
                    risk_tiers: risk_tiers.clone(),
                    enable_risk_multipliers: strat.enable_risk_multipliers,
                }
            })
            .collect();

        if runners.is_empty() {
            continue;
        }

        let orchestrator_config = OrchestratorConfig {
            enable_funding: args.enable_funding.unwrap_or(config.enable_funding),
            wind_down_mode: if args.close_all_at_end { WindDownMode::CloseAll } else { config.wind_down_mode },
            sharpe_interval: config.sharpe_interval(),
        };
        let mut orchestrator = BacktestOrchestrator::new(orchestrator_config);
        let initial_balance = args.initial_balance.unwrap_or(config.initial_balance);
        let (session, metrics, warnings) = orchestrator.run(initial_balance, runners, &ticks);

        if !warnings.is_empty() {
            warn!(symbol, count = warnings.len(), "data quality warnings during backtest");
        }
        info!(symbol, trades = session.trades.len(), final_balance = %session.realized_balance(), "backtest run complete");

        let json = serde_json::to_string_pretty(&metrics).context("serializing session metrics")?;
        println!("{json}");
    }

    run_repo.mark_finished(&config.run_id, Utc::now())?;
    Ok(())
}
