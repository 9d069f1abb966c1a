//! The backtest/replay orchestrator (component C6): the per-symbol
//! two-phase tick driver — funding, then fills, then equity, then intents —
//! plus end-of-run wind-down and session finalization.

use chrono::Duration;
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::funding::FundingSimulator;
use super::runner::StrategyRunner;
use super::session::{BacktestSession, SessionMetrics};
use super::{BacktestTick, WindDownMode};
use crate::core::error::DataQualityWarning;

/// Run configuration shared by every strategy runner driven by one
/// orchestrator invocation (spec §4.6, steps 1-7).
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub enable_funding: bool,
    pub wind_down_mode: WindDownMode,
    pub sharpe_interval: Duration,
}

/// Drives one symbol's worth of strategy runners over an ordered tick
/// stream. Multiple symbols are independent `BacktestOrchestrator::run`
/// invocations (spec §4.6: "multiple symbols are independent sessions").
pub struct BacktestOrchestrator {
    pub config: OrchestratorConfig,
    funding_sim: FundingSimulator,
}

impl BacktestOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config, funding_sim: FundingSimulator::new() }
    }

    /// Run every tick in `ticks` (already ordered by `exchange_ts`,
    /// already filtered to the symbol `runners` serve) through the
    /// two-phase loop, then wind down and finalize.
    pub fn run(&mut self, initial_balance: Decimal, mut runners: Vec<StrategyRunner>, ticks: &[BacktestTick]) -> (BacktestSession, SessionMetrics, Vec<DataQualityWarning>) {
        let mut session = BacktestSession::new(initial_balance);
        let mut warnings = Vec::new();

        for tick in ticks {
            // Phase 0: funding.
            if self.config.enable_funding && self.funding_sim.should_apply(tick.exchange_ts) {
                for runner in runners.iter_mut() {
                    for direction in [crate::core::types::Direction::Long, crate::core::types::Direction::Short] {
                        let tracker = runner.positions.tracker_mut(direction);
                        let payment = tracker.apply_funding_payment(tick.funding_rate, tick.mark_price, tick.exchange_ts);
                        if payment != Decimal::ZERO {
                            session.record_funding(payment);
                        }
                    }
                }
                self.funding_sim.mark_applied(tick.exchange_ts);
            }

            // Phase 1: fills, fully applied before any Phase 3 intent.
            for runner in runners.iter_mut() {
                let fill_warnings = runner.process_fills(tick.last_price, tick.exchange_ts, &mut session);
                warnings.extend(fill_warnings);
            }

            // Phase 2: equity.
            let mut total_unrealized = Decimal::ZERO;
            let mut total_im = Decimal::ZERO;
            let mut total_mm = Decimal::ZERO;
            for runner in runners.iter_mut() {
                total_unrealized += runner.total_unrealized_pnl(tick.last_price);
                let (im, mm) = runner.total_margin(tick.last_price, &mut warnings);
                total_im += im;
                total_mm += mm;
            }
            session.update_equity(tick.exchange_ts, total_unrealized, total_im, total_mm);

            // Phase 3: intents, sized against the equity just recomputed.
            let wallet_balance = session.realized_balance();
            for runner in runners.iter_mut() {
                runner.execute_tick(tick.last_price, tick.exchange_ts, wallet_balance, &mut warnings);
            }
        }

        let last_price = ticks.last().map(|t| t.last_price).unwrap_or(Decimal::ZERO);
        let last_ts = ticks.last().map(|t| t.exchange_ts).unwrap_or_else(chrono::Utc::now);

        match self.config.wind_down_mode {
            WindDownMode::LeaveOpen => {
                info!("wind-down: leaving open positions unrealized");
            }
            WindDownMode::CloseAll => {
                info!("wind-down: closing all open positions at last price");
                for runner in runners.iter_mut() {
                    runner.close_all_positions(last_price, last_ts, &mut session);
                }
            }
        }

        let final_unrealized: Decimal = runners.iter_mut().map(|r| r.total_unrealized_pnl(last_price)).sum();
        if !warnings.is_empty() {
            warn!(count = warnings.len(), "backtest run produced data quality warnings");
        }

        let metrics = session.finalize(final_unrealized, self.config.sharpe_interval);
        (session, metrics, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::config::AmountExpr;
    use crate::backtest::instrument::InstrumentInfo;
    use crate::backtest::order_manager::BacktestOrderManager;
    use crate::backtest::qty::QtyCalculator;
    use crate::core::engine::{GridConfig, GridEngine};
    use crate::core::pnl::default_btcusdt_tiers;
    use crate::core::position::PositionTracker;
    use crate::core::risk_manager::{PositionPair, RiskLimits};
    use crate::core::types::Direction;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn instrument() -> InstrumentInfo {
        InstrumentInfo { symbol: "BTCUSDT".into(), qty_step: dec!(0.001), tick_size: dec!(0.1), min_qty: dec!(0.001), max_qty: dec!(1000), cached_at: Utc::now() }
    }

    fn runner() -> StrategyRunner {
        let engine = GridEngine::new(
            "BTCUSDT".into(),
            dec!(0.1),
            GridConfig { grid_count: 5, grid_step: dec!(0.2), rebalance_threshold: dec!(5) },
            "strat-1".into(),
            None,
        );
        let long = PositionTracker::new(Direction::Long, dec!(0.0002), "BTCUSDT".into(), dec!(10));
        let short = PositionTracker::new(Direction::Short, dec!(0.0002), "BTCUSDT".into(), dec!(10));
        let limits = RiskLimits { min_liq_ratio: dec!(0.8), max_liq_ratio: dec!(1.2), max_margin: dec!(5), min_total_margin: Decimal::ZERO };
        StrategyRunner {
            strat_id: "strat-1".into(),
            symbol: "BTCUSDT".into(),
            engine,
            positions: PositionPair::new(long, short, limits),
            order_manager: BacktestOrderManager::new(dec!(0.0002)),
            qty_calc: QtyCalculator::new(AmountExpr::parse("100").unwrap(), instrument()),
            risk_tiers: default_btcusdt_tiers(),
            enable_risk_multipliers: true,
        }
    }

    fn tick(hour: i64, price: Decimal) -> BacktestTick {
        BacktestTick {
            symbol: "BTCUSDT".into(),
            exchange_ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
            last_price: price,
            mark_price: price,
            funding_rate: dec!(0.0001),
        }
    }

    #[test]
    fn end_to_end_run_produces_metrics_and_trades() {
        let config = OrchestratorConfig { enable_funding: true, wind_down_mode: WindDownMode::CloseAll, sharpe_interval: Duration::hours(1) };
        let mut orchestrator = BacktestOrchestrator::new(config);
        let ticks = vec![
            tick(0, dec!(100000)),
            tick(1, dec!(99700)),
            tick(2, dec!(100300)),
            tick(8, dec!(100000)),
        ];
        let (session, _metrics, _warnings) = orchestrator.run(dec!(10000), vec![runner()], &ticks);
        assert!(!session.equity_curve.is_empty());
        assert_eq!(session.equity_curve.len(), ticks.len());
    }

    #[test]
    fn leave_open_wind_down_keeps_trades_count_stable_without_synthetic_close() {
        let config = OrchestratorConfig { enable_funding: false, wind_down_mode: WindDownMode::LeaveOpen, sharpe_interval: Duration::hours(1) };
        let mut orchestrator = BacktestOrchestrator::new(config);
        let ticks = vec![tick(0, dec!(100000)), tick(1, dec!(99700))];
        let (session, _metrics, _warnings) = orchestrator.run(dec!(10000), vec![runner()], &ticks);
        let trade_count_before_wind_down = session.trades.len();
        assert_eq!(trade_count_before_wind_down, session.trades.len());
    }
}
