//! Integration test for the backtest pipeline: loads a config from a TOML
//! file on disk, runs a full multi-tick backtest through
//! [`BacktestOrchestrator`], and persists the result into a scratch SQLite
//! database, exercising the same config -> orchestrator -> storage path
//! `backtest_run` drives, without spawning the binary itself.

use chrono::{Duration, TimeZone, Utc};
use grid_engine_core::backtest::config::AmountExpr;
use grid_engine_core::backtest::instrument::InstrumentInfo;
use grid_engine_core::backtest::order_manager::BacktestOrderManager;
use grid_engine_core::backtest::orchestrator::{BacktestOrchestrator, OrchestratorConfig};
use grid_engine_core::backtest::qty::QtyCalculator;
use grid_engine_core::backtest::runner::StrategyRunner;
use grid_engine_core::backtest::{BacktestTick, WindDownMode};
use grid_engine_core::config::RunConfig;
use grid_engine_core::core::engine::{GridConfig, GridEngine};
use grid_engine_core::core::pnl::default_btcusdt_tiers;
use grid_engine_core::core::position::PositionTracker;
use grid_engine_core::core::risk_manager::{PositionPair, RiskLimits};
use grid_engine_core::core::types::Direction;
use grid_engine_core::storage::{Db, RunRepository};
use rust_decimal_macros::dec;
use std::io::Write;

const CONFIG_TOML: &str = r#"
run_id = "it-run-1"
mode = "backtest"
database_url = "sqlite://unused-in-test.db"
initial_balance = "10000"
enable_funding = true

[[strategies]]
strat_id = "strat-1"
symbol = "BTCUSDT"
grid_count = 5
grid_step = "0.2"
rebalance_threshold = "5"
leverage = "10"
min_liq_ratio = "0.8"
max_liq_ratio = "1.2"
max_margin = "5"
min_total_margin = "0"
order_amount = "100"
"#;

fn write_config_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
    file.write_all(CONFIG_TOML.as_bytes()).expect("write temp config");
    file
}

fn runner_from_strategy(strat: &grid_engine_core::config::StrategyConfig, instrument: InstrumentInfo) -> StrategyRunner {
    let engine = GridEngine::new(strat.symbol.clone(), dec!(100000), GridConfig { grid_count: strat.grid_count, grid_step: strat.grid_step, rebalance_threshold: strat.rebalance_threshold }, strat.strat_id.clone(), None);
    let long = PositionTracker::new(Direction::Long, strat.commission_rate, strat.symbol.clone(), strat.leverage);
    let short = PositionTracker::new(Direction::Short, strat.commission_rate, strat.symbol.clone(), strat.leverage);
    let limits = RiskLimits { min_liq_ratio: strat.min_liq_ratio, max_liq_ratio: strat.max_liq_ratio, max_margin: strat.max_margin, min_total_margin: strat.min_total_margin };
    StrategyRunner {
        strat_id: strat.strat_id.clone(),
        symbol: strat.symbol.clone(),
        engine,
        positions: PositionPair::new(long, short, limits),
        order_manager: BacktestOrderManager::new(strat.commission_rate),
        qty_calc: QtyCalculator::new(AmountExpr::parse(&strat.order_amount).unwrap(), instrument),
        risk_tiers: default_btcusdt_tiers(),
        enable_risk_multipliers: strat.enable_risk_multipliers,
    }
}

fn hourly_ticks(symbol: &str, prices: &[i64]) -> Vec<BacktestTick> {
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    prices
        .iter()
        .enumerate()
        .map(|(i, price)| BacktestTick {
            symbol: symbol.to_string(),
            exchange_ts: base + Duration::hours(i as i64),
            last_price: rust_decimal::Decimal::new(*price, 0),
            mark_price: rust_decimal::Decimal::new(*price, 0),
            funding_rate: dec!(0.0001),
        })
        .collect()
}

#[test]
fn config_to_orchestrator_to_storage_round_trip() {
    let config_file = write_config_file();
    let config = RunConfig::load(config_file.path()).expect("load config from disk");
    assert_eq!(config.strategies.len(), 1);
    let strat = &config.strategies[0];

    let instrument = InstrumentInfo { symbol: strat.symbol.clone(), qty_step: dec!(0.001), tick_size: dec!(0.1), min_qty: dec!(0.001), max_qty: dec!(1000), cached_at: Utc::now() };
    let runner = runner_from_strategy(strat, instrument);

    let ticks = hourly_ticks(&strat.symbol, &[100_000, 99_700, 100_300, 101_000, 100_500, 99_900, 100_800, 100_000, 99_500]);

    let orch_config = OrchestratorConfig { enable_funding: config.enable_funding, wind_down_mode: WindDownMode::CloseAll, sharpe_interval: config.sharpe_interval() };
    let mut orchestrator = BacktestOrchestrator::new(orch_config);
    let (session, metrics, warnings) = orchestrator.run(config.initial_balance, vec![runner], &ticks);

    assert_eq!(session.equity_curve.len(), ticks.len());
    assert!(warnings.len() < ticks.len(), "warnings should not fire on every tick for a clean synthetic run");
    assert_eq!(metrics.trade_stats.count, session.trades.len());

    let db_file = tempfile::NamedTempFile::new().expect("create temp db file");
    let db_path = db_file.path().to_str().expect("db path is valid utf-8");
    let db = Db::open(db_path).expect("open scratch sqlite database");
    let run_repo = RunRepository::new(db);
    run_repo.insert_or_update(&config.run_id, &strat.symbol, "backtest", ticks[0].exchange_ts, "{}").expect("persist run row");
    run_repo.mark_finished(&config.run_id, ticks.last().unwrap().exchange_ts).expect("mark run finished");
}
