//! Live grid-trading runner CLI: wires every strategy in a `mode = "live"`
//! run config to a [`BybitAdapter`] and drives each through
//! `live::run_loop` until Ctrl-C (spec §4.6, §5, §6.2).
//!
//! The event source is a poll loop over Bybit's public ticker endpoint
//! rather than a websocket client: the run loop itself is identical either
//! way, since both just push normalized `ExchangeEvent`s onto the channel
//! `run_loop` drains.
//!
//! ```bash
//! gridbot --config run.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use grid_engine_core::backtest::instrument::InstrumentCache;
use grid_engine_core::backtest::qty::QtyCalculator;
use grid_engine_core::backtest::risk_limits::RiskLimitCache;
use grid_engine_core::config::{RunConfig, RunMode};
use grid_engine_core::core::engine::{GridConfig, GridEngine};
use grid_engine_core::core::position::PositionTracker;
use grid_engine_core::core::risk_manager::{PositionPair, RiskLimits};
use grid_engine_core::core::types::Direction;
use grid_engine_core::exchange::bybit::BybitAdapter;
use grid_engine_core::exchange::events::{ExchangeEvent, WalletPayload};
use grid_engine_core::exchange::ExchangeAdapter;
use grid_engine_core::live::runner::LiveRunner;
use grid_engine_core::live::{cancellation_signal, event_channel, run_loop};
use grid_engine_core::storage::repository::{Db, RunRepository};
use grid_engine_core::storage::LiveRecorder;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gridbot")]
#[command(about = "Run grid strategies live against Bybit USDT-linear perpetuals")]
struct Args {
    /// Run configuration TOML document (§6.4); must have `mode = "live"`.
    #[arg(long, env = "GRID_CONFIG")]
    config: PathBuf,

    /// Directory holding the instrument/risk-limit JSON caches.
    #[arg(long, env = "GRID_CACHE_DIR", default_value = "./cache")]
    cache_dir: PathBuf,

    /// How often to poll each symbol's ticker snapshot.
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = RunConfig::load(&args.config)?;
    if config.mode != RunMode::Live {
        anyhow::bail!("gridbot requires mode = \"live\" in {}, got {:?}", args.config.display(), config.mode);
    }

    let db_url = config.database_url_from_env_or(&config.database_url);
    let db = Db::open(&db_url).context("opening run database")?;
    let run_repo = RunRepository::new(db.clone());
    run_repo.insert_or_update(&config.run_id, &config.strategies.first().map(|s| s.symbol.clone()).unwrap_or_default(), "live", Utc::now(), "{}")?;

    std::fs::create_dir_all(&args.cache_dir).context("creating cache directory")?;
    let instrument_cache = InstrumentCache::new(args.cache_dir.join("instruments.json"), config.instrument_cache_ttl_hours);
    let risk_limit_cache = RiskLimitCache::new(args.cache_dir.join("risk_limits.json"), config.instrument_cache_ttl_hours);

    let adapter = Arc::new(BybitAdapter::from_env().context("building Bybit adapter from BYBIT_API_KEY/BYBIT_API_SECRET")?);

    let wallet_balance = adapter.get_wallet_balance().await.context("fetching initial wallet balance")?;
    info!(wallet_balance = %wallet_balance, "connected to Bybit");

    let (cancel_tx, cancel_rx) = cancellation_signal();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received, winding down live runners");
        let _ = cancel_tx.send(true);
    });

    let mut handles = Vec::new();
    for strat in &config.strategies {
        let symbol = strat.symbol.clone();
        let instrument = match adapter.get_instrument_info(&symbol).await {
            Ok(info) => grid_engine_core::backtest::instrument::InstrumentInfo { symbol: symbol.clone(), qty_step: info.qty_step, tick_size: info.tick_size, min_qty: info.min_qty, max_qty: info.max_qty, cached_at: Utc::now() },
            Err(e) => {
                warn!(symbol, error = %e, "instrument info fetch failed, falling back to cache");
                instrument_cache.get(&symbol).unwrap_or_else(|| InstrumentCache::fallback(&symbol))
            }
        };
        let risk_tiers = match adapter
            .get_risk_limit_tiers(&symbol)
            .await
            .map_err(anyhow::Error::from)
            .and_then(|raw| grid_engine_core::core::pnl::parse_risk_limit_tiers(&raw).map_err(anyhow::Error::from))
        {
            Ok(tiers) => tiers,
            Err(e) => {
                warn!(symbol, error = %e, "risk-limit fetch failed, falling back to cache");
                risk_limit_cache.get(&symbol).unwrap_or_else(|| RiskLimitCache::fallback(&symbol))
            }
        };

        let engine = GridEngine::new(symbol.clone(), instrument.tick_size, GridConfig { grid_count: strat.grid_count, grid_step: strat.grid_step, rebalance_threshold: strat.rebalance_threshold }, strat.strat_id.clone(), None);
        let long = PositionTracker::new(Direction::Long, strat.commission_rate, symbol.clone(), strat.leverage);
        let short = PositionTracker::new(Direction::Short, strat.commission_rate, symbol.clone(), strat.leverage);
        let limits = RiskLimits { min_liq_ratio: strat.min_liq_ratio, max_liq_ratio: strat.max_liq_ratio, max_margin: strat.max_margin, min_total_margin: strat.min_total_margin };
        let qty_calc = QtyCalculator::new(
            grid_engine_core::backtest::config::AmountExpr::parse(&strat.order_amount).unwrap_or(grid_engine_core::backtest::config::AmountExpr::FixedQuote(dec!(100))),
            instrument,
        );

        let recorder = LiveRecorder::new(db.clone(), config.run_id.clone(), config.effective_account_id(), strat.strat_id.clone());
        let mut runner = LiveRunner::new(strat.strat_id.clone(), symbol.clone(), engine, PositionPair::new(long, short, limits), qty_calc, risk_tiers, adapter.clone() as Arc<dyn ExchangeAdapter>)
            .with_recorder(recorder);
        runner.enable_risk_multipliers = strat.enable_risk_multipliers;
        runner.seed_open_orders().await;

        let (tx, rx) = event_channel();
        let mut cancel_rx_for_runner = cancel_rx.clone();
        let poll_interval = Duration::from_millis(args.poll_interval_ms);
        let poll_adapter = adapter.clone();
        let poll_symbol = symbol.clone();
        let poll_tx = tx.clone();
        let mut poll_cancel = cancel_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = poll_cancel.changed() => {
                        if *poll_cancel.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {
                        match poll_adapter.get_wallet_balance().await {
                            Ok(wallet_balance) => {
                                let payload = WalletPayload { exchange_ts: Utc::now(), wallet_balance, available_balance: wallet_balance };
                                if poll_tx.send(ExchangeEvent::WalletUpdate(payload)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(symbol = %poll_symbol, error = %e, "wallet balance poll failed"),
                        }
                        match poll_adapter.fetch_ticker(&poll_symbol).await {
                            Ok(ticker) => {
                                if poll_tx.send(ExchangeEvent::Ticker(ticker)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(symbol = %poll_symbol, error = %e, "ticker poll failed"),
                        }
                    }
                }
            }
        });

        let strat_id = strat.strat_id.clone();
        let symbol_for_log = symbol.clone();
        handles.push(tokio::spawn(async move {
            let warnings = run_loop(runner, rx, cancel_rx_for_runner).await;
            if !warnings.is_empty() {
                warn!(strat_id, symbol = %symbol_for_log, count = warnings.len(), "data quality warnings over the live run");
            }
            info!(strat_id, symbol = %symbol_for_log, "live runner stopped");
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "live runner task panicked");
        }
    }

    run_repo.mark_finished(&config.run_id, Utc::now())?;
    Ok(())
}
