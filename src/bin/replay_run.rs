//! Replay runner CLI: re-runs a recorded live session through the backtest
//! orchestrator against the same persisted ticker history, then compares
//! the replayed trades against the live executions recorded for the same
//! run_id/symbol (spec §4.6, §8).
//!
//! ```bash
//! replay_run --config run.toml --run-id live-run-42 --start ... --end ...
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
use grid_engine_core::replay::{compare_runs, MatchTolerances};
use grid_engine_core::storage::repository::{Db, ExecutionRepository, TickerRepository};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "replay_run")]
#[command(about = "Replay a recorded run and compare it against live executions")]
struct Args {
    #[arg(long, env = "GRID_CONFIG")]
    config: PathBuf,

    /// The live run_id whose executions this replay is checked against.
    #[arg(long)]
    run_id: String,

    #[arg(long)]
    start: DateTime<Utc>,

    #[arg(long)]
    end: DateTime<Utc>,

    /// Starting wallet balance; overrides `initial_balance` in the config file.
    #[arg(long)]
    initial_balance: Option<Decimal>,

    #[arg(long, env = "GRID_CACHE_DIR", default_value = "./cache")]
    cache_dir: PathBuf,

    /// Whether to simulate funding payments; overrides `enable_funding` in the config file.
    #[arg(long)]
    enable_funding: Option<bool>,

    /// Price tolerance below which a matched pair's price delta is not a breach.
    #[arg(long, default_value = "0")]
    price_tolerance: Decimal,

    /// Qty tolerance below which a matched pair's qty delta is not a breach.
    #[arg(long, default_value = "0.001")]
    qty_tolerance: Decimal,
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
    let execution_repo = ExecutionRepository::new(db.clone());

    let tolerances = MatchTolerances { price_tolerance: args.price_tolerance, qty_tolerance: args.qty_tolerance };

    for symbol in config.strategies.iter().map(|s| s.symbol.clone()).collect::<std::collections::BTreeSet<_>>() {
        info!(symbol, run_id = %args.run_id, "replaying recorded session");
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
            wind_down_mode: WindDownMode::LeaveOpen,
            sharpe_interval: config.sharpe_interval(),
        };
        let mut orchestrator = BacktestOrchestrator::new(orchestrator_config);
        let initial_balance = args.initial_balance.unwrap_or(config.initial_balance);
        let (session, _metrics, warnings) = orchestrator.run(initial_balance, runners, &ticks);
        if !warnings.is_empty() {
            warn!(symbol, count = warnings.len(), "data quality warnings during replay");
        }

        let recorded = execution_repo.load_for_run(&args.run_id, &symbol).context("loading recorded live executions")?;
        let report = compare_runs(&session.trades, &recorded, tolerances);

        info!(
            symbol,
            simulated = session.trades.len(),
            recorded = recorded.len(),
            matched = report.pairs.len(),
            match_rate = report.match_rate,
            phantom_rate = report.phantom_rate,
            "replay comparison complete"
        );

        let output = json!({
            "symbol": symbol,
            "run_id": args.run_id,
            "simulated_trade_count": session.trades.len(),
            "recorded_trade_count": recorded.len(),
            "matched_pair_count": report.pairs.len(),
            "phantom_simulated_count": report.phantom_simulated.len(),
            "phantom_recorded_count": report.phantom_recorded.len(),
            "match_rate": report.match_rate,
            "phantom_rate": report.phantom_rate,
            "cumulative_pnl_delta": report.cumulative_pnl_delta.to_string(),
            "pnl_correlation": report.pnl_correlation,
            "tolerance_breach_count": report.tolerance_breach_count,
            "long_short_breakdown": {
                "long_pairs": report.breakdown.long_pairs,
                "short_pairs": report.breakdown.short_pairs,
                "long_pnl_delta": report.breakdown.long_pnl_delta.to_string(),
                "short_pnl_delta": report.breakdown.short_pnl_delta.to_string(),
            },
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(())
}
