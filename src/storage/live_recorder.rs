//! Coordinates the repositories a live runner writes through: one handle
//! bundling run/account identity with the per-table repositories, so
//! [`crate::live::runner::LiveRunner`] has a single thing to hold instead of
//! five. Mirrors the teacher's unified recorder pattern of fronting several
//! per-stream storages with one coordinator.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use super::repository::{
    Db, ExecutionRepository, ExecutionRow, OrderUpdateRepository, OrderUpdateRow, PositionSnapshotRepository, PositionSnapshotRow, TickerRepository, TickerRow, WalletSnapshotRepository,
    WalletSnapshotRow,
};
use crate::core::types::{Direction, Side};

#[derive(Clone)]
pub struct LiveRecorder {
    run_id: String,
    account_id: String,
    strat_id: String,
    ticker: TickerRepository,
    execution: ExecutionRepository,
    order_update: OrderUpdateRepository,
    wallet: WalletSnapshotRepository,
    position: PositionSnapshotRepository,
}

impl LiveRecorder {
    pub fn new(db: Db, run_id: String, account_id: String, strat_id: String) -> Self {
        Self {
            run_id,
            account_id,
            strat_id,
            ticker: TickerRepository::new(db.clone()),
            execution: ExecutionRepository::new(db.clone()),
            order_update: OrderUpdateRepository::new(db.clone()),
            wallet: WalletSnapshotRepository::new(db.clone()),
            position: PositionSnapshotRepository::new(db),
        }
    }

    /// Records are best-effort: a write failure is logged and swallowed
    /// rather than propagated, so a transient disk/lock error never takes
    /// down the run loop that is still placing/cancelling real orders.
    fn log_failure(&self, context: &str, err: anyhow::Error) {
        warn!(run_id = %self.run_id, strat_id = %self.strat_id, error = %err, context, "live persistence write failed");
    }

    pub fn record_ticker(&self, symbol: &str, exchange_ts: DateTime<Utc>, local_ts: DateTime<Utc>, last_price: Decimal, mark_price: Decimal, bid1_price: Decimal, ask1_price: Decimal, funding_rate: Decimal) {
        let row = TickerRow { symbol: symbol.to_string(), exchange_ts, local_ts, last_price, mark_price, bid1_price, ask1_price, funding_rate };
        if let Err(e) = self.ticker.insert_or_skip(&row) {
            self.log_failure("recording ticker snapshot", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_execution(
        &self,
        symbol: &str,
        exchange_ts: DateTime<Utc>,
        order_id: &str,
        client_order_id: &str,
        exec_id: &str,
        price: Decimal,
        qty: Decimal,
        side: Side,
        fee: Decimal,
        closed_pnl: Decimal,
        closed_size: Decimal,
        leaves_qty: Decimal,
        is_maker: bool,
    ) {
        let row = ExecutionRow {
            run_id: self.run_id.clone(),
            strat_id: self.strat_id.clone(),
            symbol: symbol.to_string(),
            exchange_ts,
            order_id: order_id.to_string(),
            client_order_id: client_order_id.to_string(),
            exec_id: exec_id.to_string(),
            price,
            qty,
            side,
            fee,
            closed_pnl,
            closed_size,
            leaves_qty,
            is_maker,
        };
        if let Err(e) = self.execution.insert_or_skip(&row) {
            self.log_failure("recording private execution", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_order_update(&self, symbol: &str, exchange_ts: DateTime<Utc>, order_id: &str, order_link_id: &str, status: &str, price: Decimal, qty: Decimal, leaves_qty: Decimal, side: Side) {
        let row = OrderUpdateRow {
            run_id: self.run_id.clone(),
            account_id: self.account_id.clone(),
            symbol: symbol.to_string(),
            exchange_ts,
            order_id: order_id.to_string(),
            order_link_id: order_link_id.to_string(),
            status: status.to_string(),
            price,
            qty,
            leaves_qty,
            side,
        };
        if let Err(e) = self.order_update.insert_or_update(&row) {
            self.log_failure("recording order update", e);
        }
    }

    pub fn record_wallet(&self, exchange_ts: DateTime<Utc>, wallet_balance: Decimal, available_balance: Decimal) {
        let row = WalletSnapshotRow { run_id: self.run_id.clone(), exchange_ts, wallet_balance, available_balance };
        if let Err(e) = self.wallet.insert(&row) {
            self.log_failure("recording wallet snapshot", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_position_snapshot(&self, symbol: &str, direction: Direction, exchange_ts: DateTime<Utc>, size: Decimal, entry_price: Decimal, current_price: Decimal, unrealized_pnl: Decimal, margin: Decimal, liquidation_price: Decimal) {
        let row = PositionSnapshotRow {
            run_id: self.run_id.clone(),
            strat_id: self.strat_id.clone(),
            symbol: symbol.to_string(),
            direction,
            exchange_ts,
            size,
            entry_price,
            current_price,
            unrealized_pnl,
            margin,
            liquidation_price,
        };
        if let Err(e) = self.position.insert(&row) {
            self.log_failure("recording position snapshot", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn recorder() -> LiveRecorder {
        let db = Db::open_memory().unwrap();
        let run_repo = super::super::repository::RunRepository::new(db.clone());
        run_repo.insert_or_update("r1", "BTCUSDT", "live", Utc::now(), "{}").unwrap();
        LiveRecorder::new(db, "r1".into(), "acct-1".into(), "strat-1".into())
    }

    #[test]
    fn records_every_stream_without_panicking() {
        let r = recorder();
        let ts = Utc::now();
        r.record_ticker("BTCUSDT", ts, ts, dec!(50000), dec!(50000), dec!(49999), dec!(50001), dec!(0.0001));
        r.record_execution("BTCUSDT", ts, "o1", "c1", "e1", dec!(50000), dec!(0.01), Side::Buy, dec!(0.01), dec!(0), dec!(0), dec!(0), true);
        r.record_order_update("BTCUSDT", ts, "o1", "c1", "New", dec!(50000), dec!(0.01), dec!(0.01), Side::Buy);
        r.record_order_update("BTCUSDT", ts, "o1", "c1", "Filled", dec!(50000), dec!(0.01), dec!(0), Side::Buy);
        r.record_wallet(ts, dec!(10000), dec!(9500));
        r.record_position_snapshot("BTCUSDT", Direction::Long, ts, dec!(0.01), dec!(50000), dec!(50100), dec!(1), dec!(50), dec!(45000));
    }
}
