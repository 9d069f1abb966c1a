//! Live run loop skeleton (§5, §6.1, §6.2): the concurrency model the
//! backtest/replay path doesn't need. A bounded `tokio::sync::mpsc` channel
//! is the thread-safe FIFO handoff between inbound exchange streams and the
//! single run loop; a `tokio::sync::watch` bool is the cancellation signal.
//!
//! This mirrors the teacher's `edge::receiver` → engine handoff: receivers
//! never touch engine state directly, they just push normalized events onto
//! the channel and let the loop process them in arrival order.

pub mod fill_buffer;
pub mod runner;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::core::error::DataQualityWarning;
use crate::exchange::events::ExchangeEvent;
use runner::LiveRunner;

/// Default channel capacity for the event handoff queue. Sized generously
/// relative to expected per-symbol message rates; a full channel applies
/// backpressure to the receiver task rather than dropping events.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Construct the bounded handoff channel a receiver task sends into and the
/// run loop drains from.
pub fn event_channel() -> (mpsc::Sender<ExchangeEvent>, mpsc::Receiver<ExchangeEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Construct a cancellation signal pair: a shared sender the caller flips
/// to request shutdown, and a receiver the run loop polls via
/// `tokio::select!` alongside the event channel.
pub fn cancellation_signal() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Drive one runner's event queue until cancellation or channel close.
///
/// On cancellation, the loop finishes the in-flight event (including any
/// intents it produced) before returning — it never aborts mid-intent
/// (spec §5, "finishes the in-flight tick... before... wind-down").
pub async fn run_loop(mut runner: LiveRunner, mut events: mpsc::Receiver<ExchangeEvent>, mut cancel: watch::Receiver<bool>) -> Vec<DataQualityWarning> {
    let mut warnings = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    info!(strat_id = %runner.strat_id, "cancellation received, draining in-flight work and stopping");
                    break;
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let event_warnings = runner.handle_event(event, chrono::Utc::now()).await;
                        if !event_warnings.is_empty() {
                            warn!(strat_id = %runner.strat_id, count = event_warnings.len(), "data quality warnings while handling live event");
                        }
                        warnings.extend(event_warnings);
                    }
                    None => {
                        debug!(strat_id = %runner.strat_id, "event channel closed, stopping run loop");
                        break;
                    }
                }
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::config::AmountExpr;
    use crate::backtest::instrument::InstrumentInfo;
    use crate::backtest::qty::QtyCalculator;
    use crate::core::engine::{GridConfig, GridEngine};
    use crate::core::pnl::default_btcusdt_tiers;
    use crate::core::position::PositionTracker;
    use crate::core::risk_manager::{PositionPair, RiskLimits};
    use crate::core::types::Direction;
    use crate::exchange::adapter::{ExchangeAdapter, NewOrderRequest, NewOrderResponse, InstrumentInfoResponse, OpenOrderInfo};
    use crate::exchange::events::TickerPayload;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct NoopAdapter;

    #[async_trait]
    impl ExchangeAdapter for NoopAdapter {
        async fn place_order(&self, req: NewOrderRequest) -> Result<NewOrderResponse, crate::core::error::CoreError> {
            Ok(NewOrderResponse { order_id: format!("o-{}", req.client_order_id), client_order_id: req.client_order_id })
        }
        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), crate::core::error::CoreError> {
            Ok(())
        }
        async fn get_wallet_balance(&self) -> Result<Decimal, crate::core::error::CoreError> {
            Ok(dec!(10000))
        }
        async fn get_risk_limit_tiers(&self, _symbol: &str) -> Result<Vec<crate::core::pnl::RawRiskTier>, crate::core::error::CoreError> {
            Ok(Vec::new())
        }
        async fn get_instrument_info(&self, symbol: &str) -> Result<InstrumentInfoResponse, crate::core::error::CoreError> {
            Ok(InstrumentInfoResponse { symbol: symbol.to_string(), qty_step: dec!(0.001), tick_size: dec!(0.1), min_qty: dec!(0.001), max_qty: dec!(1000) })
        }
        async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrderInfo>, crate::core::error::CoreError> {
            Ok(Vec::new())
        }
    }

    fn runner() -> LiveRunner {
        let engine = GridEngine::new("BTCUSDT".into(), dec!(0.1), GridConfig { grid_count: 5, grid_step: dec!(0.2), rebalance_threshold: dec!(5) }, "strat-1".into(), None);
        let long = PositionTracker::new(Direction::Long, dec!(0.0002), "BTCUSDT".into(), dec!(10));
        let short = PositionTracker::new(Direction::Short, dec!(0.0002), "BTCUSDT".into(), dec!(10));
        let limits = RiskLimits { min_liq_ratio: dec!(0.8), max_liq_ratio: dec!(1.2), max_margin: dec!(5), min_total_margin: Decimal::ZERO };
        let instrument = InstrumentInfo { symbol: "BTCUSDT".into(), qty_step: dec!(0.001), tick_size: dec!(0.1), min_qty: dec!(0.001), max_qty: dec!(1000), cached_at: Utc::now() };
        LiveRunner::new(
            "strat-1".into(),
            "BTCUSDT".into(),
            engine,
            PositionPair::new(long, short, limits),
            QtyCalculator::new(AmountExpr::parse("100").unwrap(), instrument),
            default_btcusdt_tiers(),
            Arc::new(NoopAdapter),
        )
    }

    #[tokio::test]
    async fn run_loop_stops_when_channel_closes() {
        let (tx, rx) = event_channel();
        let (_cancel_tx, cancel_rx) = cancellation_signal();
        drop(tx);
        let warnings = run_loop(runner(), rx, cancel_rx).await;
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn run_loop_processes_events_then_stops_on_cancel() {
        let (tx, rx) = event_channel();
        let (cancel_tx, cancel_rx) = cancellation_signal();
        tx.send(ExchangeEvent::Ticker(TickerPayload {
            symbol: "BTCUSDT".into(),
            exchange_ts: Utc::now(),
            local_ts: Utc::now(),
            last_price: dec!(50000),
            mark_price: dec!(50000),
            bid1_price: dec!(49999),
            ask1_price: dec!(50001),
            funding_rate: dec!(0.0001),
        }))
        .await
        .unwrap();

        let handle = tokio::spawn(run_loop(runner(), rx, cancel_rx));
        tokio::task::yield_now().await;
        cancel_tx.send(true).unwrap();
        let warnings = handle.await.unwrap();
        assert!(warnings.is_empty());
    }
}
