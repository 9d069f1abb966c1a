//! Repository pattern over the schema in [`super::schema`]: one struct per
//! table, `insert_or_skip`/`insert_or_update` methods, matching the
//! `TradePrintStorage` shape in the teacher's `backtest_v2::trade_recorder`.
//! Every monetary field round-trips through `TEXT` (via `Decimal`'s
//! `Display`/`FromStr`) so no precision is lost to SQLite's `REAL`.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

use crate::core::types::Side;

fn dec_to_sql(d: Decimal) -> String {
    d.to_string()
}

fn dec_from_sql(s: String) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&s).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn ts_to_sql(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn ts_from_sql(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn side_to_sql(side: Side) -> &'static str {
    match side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

fn side_from_sql(s: &str) -> Side {
    if s.eq_ignore_ascii_case("buy") { Side::Buy } else { Side::Sell }
}

#[derive(Debug, Clone)]
pub struct TickerRow {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub local_ts: DateTime<Utc>,
    pub last_price: Decimal,
    pub mark_price: Decimal,
    pub bid1_price: Decimal,
    pub ask1_price: Decimal,
    pub funding_rate: Decimal,
}

/// Shared handle to the run's SQLite connection, cloned into every
/// repository. A single `Mutex<Connection>` (not a pool) is appropriate
/// here: the backtest/replay loop is single-threaded, and the live runner's
/// writer tasks are low-frequency enough not to contend.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| format!("creating db directory for {path}"))?;
                }
            }
        }
        let conn = Connection::open(path).with_context(|| format!("opening database {path}"))?;
        conn.execute_batch(super::schema::SCHEMA).context("applying schema")?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        conn.execute_batch(super::schema::SCHEMA).context("applying schema")?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }
}

pub struct TickerRepository {
    db: Db,
}

impl TickerRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn insert_or_skip(&self, row: &TickerRow) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            r#"INSERT OR IGNORE INTO ticker_snapshot
               (symbol, exchange_ts, local_ts, last_price, mark_price, bid1_price, ask1_price, funding_rate)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                row.symbol,
                ts_to_sql(row.exchange_ts),
                ts_to_sql(row.local_ts),
                dec_to_sql(row.last_price),
                dec_to_sql(row.mark_price),
                dec_to_sql(row.bid1_price),
                dec_to_sql(row.ask1_price),
                dec_to_sql(row.funding_rate),
            ],
        )?;
        Ok(())
    }

    pub fn load_range(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<TickerRow>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT symbol, exchange_ts, local_ts, last_price, mark_price, bid1_price, ask1_price, funding_rate
               FROM ticker_snapshot WHERE symbol = ?1 AND exchange_ts >= ?2 AND exchange_ts <= ?3
               ORDER BY exchange_ts ASC"#,
        )?;
        let rows = stmt
            .query_map(params![symbol, ts_to_sql(start), ts_to_sql(end)], |r| {
                Ok(TickerRow {
                    symbol: r.get(0)?,
                    exchange_ts: ts_from_sql(r.get(1)?),
                    local_ts: ts_from_sql(r.get(2)?),
                    last_price: dec_from_sql(r.get(3)?)?,
                    mark_price: dec_from_sql(r.get(4)?)?,
                    bid1_price: dec_from_sql(r.get(5)?)?,
                    ask1_price: dec_from_sql(r.get(6)?)?,
                    funding_rate: dec_from_sql(r.get(7)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRow {
    pub run_id: String,
    pub strat_id: String,
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub order_id: String,
    pub client_order_id: String,
    pub exec_id: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub side: Side,
    pub fee: Decimal,
    pub closed_pnl: Decimal,
    pub closed_size: Decimal,
    pub leaves_qty: Decimal,
    pub is_maker: bool,
}

pub struct ExecutionRepository {
    db: Db,
}

impl ExecutionRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn insert_or_skip(&self, row: &ExecutionRow) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            r#"INSERT OR IGNORE INTO private_execution
               (run_id, strat_id, symbol, exchange_ts, order_id, client_order_id, exec_id, price, qty, side, fee, closed_pnl, closed_size, leaves_qty, is_maker)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                row.run_id,
                row.strat_id,
                row.symbol,
                ts_to_sql(row.exchange_ts),
                row.order_id,
                row.client_order_id,
                row.exec_id,
                dec_to_sql(row.price),
                dec_to_sql(row.qty),
                side_to_sql(row.side),
                dec_to_sql(row.fee),
                dec_to_sql(row.closed_pnl),
                dec_to_sql(row.closed_size),
                dec_to_sql(row.leaves_qty),
                row.is_maker as i64,
            ],
        )?;
        Ok(())
    }

    /// Trades recorded during a live run, ordered the way the replay
    /// comparator needs them: chronological, then by insertion order for
    /// same-timestamp ties.
    pub fn load_for_run(&self, run_id: &str, symbol: &str) -> Result<Vec<ExecutionRow>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT run_id, strat_id, symbol, exchange_ts, order_id, client_order_id, exec_id, price, qty, side, fee, closed_pnl, closed_size, leaves_qty, is_maker
               FROM private_execution WHERE run_id = ?1 AND symbol = ?2 ORDER BY exchange_ts ASC, id ASC"#,
        )?;
        let rows = stmt
            .query_map(params![run_id, symbol], |r| {
                Ok(ExecutionRow {
                    run_id: r.get(0)?,
                    strat_id: r.get(1)?,
                    symbol: r.get(2)?,
                    exchange_ts: ts_from_sql(r.get(3)?),
                    order_id: r.get(4)?,
                    client_order_id: r.get(5)?,
                    exec_id: r.get(6)?,
                    price: dec_from_sql(r.get(7)?)?,
                    qty: dec_from_sql(r.get(8)?)?,
                    side: side_from_sql(&r.get::<_, String>(9)?),
                    fee: dec_from_sql(r.get(10)?)?,
                    closed_pnl: dec_from_sql(r.get(11)?)?,
                    closed_size: dec_from_sql(r.get(12)?)?,
                    leaves_qty: dec_from_sql(r.get(13)?)?,
                    is_maker: r.get::<_, i64>(14)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[derive(Debug, Clone)]
pub struct PublicTradeRow {
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub trade_id: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub side: Side,
}

pub struct PublicTradeRepository {
    db: Db,
}

impl PublicTradeRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Public trade prints arrive on a best-effort stream and may be
    /// redelivered; `trade_id` is the exchange's own dedup key.
    pub fn insert_or_skip(&self, row: &PublicTradeRow) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            r#"INSERT OR IGNORE INTO public_trade (symbol, exchange_ts, trade_id, price, qty, side)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![row.symbol, ts_to_sql(row.exchange_ts), row.trade_id, dec_to_sql(row.price), dec_to_sql(row.qty), side_to_sql(row.side)],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OrderUpdateRow {
    pub run_id: String,
    pub account_id: String,
    pub symbol: String,
    pub exchange_ts: DateTime<Utc>,
    pub order_id: String,
    pub order_link_id: String,
    pub status: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub leaves_qty: Decimal,
    pub side: Side,
}

pub struct OrderUpdateRepository {
    db: Db,
}

impl OrderUpdateRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Order status can be re-sent for the same `(account_id, order_id,
    /// exchange_ts)` with a later-arriving status (e.g. New then Filled at
    /// the same updatedTime resolution); the later write wins.
    pub fn insert_or_update(&self, row: &OrderUpdateRow) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            r#"INSERT INTO order_update (run_id, account_id, symbol, exchange_ts, order_id, order_link_id, status, price, qty, leaves_qty, side)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               ON CONFLICT(account_id, order_id, exchange_ts) DO UPDATE SET
                   status = excluded.status, price = excluded.price, qty = excluded.qty, leaves_qty = excluded.leaves_qty, side = excluded.side"#,
            params![
                row.run_id,
                row.account_id,
                row.symbol,
                ts_to_sql(row.exchange_ts),
                row.order_id,
                row.order_link_id,
                row.status,
                dec_to_sql(row.price),
                dec_to_sql(row.qty),
                dec_to_sql(row.leaves_qty),
                side_to_sql(row.side),
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WalletSnapshotRow {
    pub run_id: String,
    pub exchange_ts: DateTime<Utc>,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
}

pub struct WalletSnapshotRepository {
    db: Db,
}

impl WalletSnapshotRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn insert(&self, row: &WalletSnapshotRow) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            r#"INSERT INTO wallet_snapshot (run_id, exchange_ts, wallet_balance, available_balance) VALUES (?1, ?2, ?3, ?4)"#,
            params![row.run_id, ts_to_sql(row.exchange_ts), dec_to_sql(row.wallet_balance), dec_to_sql(row.available_balance)],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PositionSnapshotRow {
    pub run_id: String,
    pub strat_id: String,
    pub symbol: String,
    pub direction: crate::core::types::Direction,
    pub exchange_ts: DateTime<Utc>,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub margin: Decimal,
    pub liquidation_price: Decimal,
}

pub struct PositionSnapshotRepository {
    db: Db,
}

impl PositionSnapshotRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Point-in-time position snapshots are append-only; there is nothing to
    /// skip or upsert on, unlike the event-sourced tables above.
    pub fn insert(&self, row: &PositionSnapshotRow) -> Result<()> {
        let conn = self.db.conn.lock();
        let direction = match row.direction {
            crate::core::types::Direction::Long => "Long",
            crate::core::types::Direction::Short => "Short",
        };
        conn.execute(
            r#"INSERT INTO position_snapshot
               (run_id, strat_id, symbol, direction, exchange_ts, size, entry_price, current_price, unrealized_pnl, margin, liquidation_price)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                row.run_id,
                row.strat_id,
                row.symbol,
                direction,
                ts_to_sql(row.exchange_ts),
                dec_to_sql(row.size),
                dec_to_sql(row.entry_price),
                dec_to_sql(row.current_price),
                dec_to_sql(row.unrealized_pnl),
                dec_to_sql(row.margin),
                dec_to_sql(row.liquidation_price),
            ],
        )?;
        Ok(())
    }
}

pub struct RunRepository {
    db: Db,
}

impl RunRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn insert_or_update(&self, run_id: &str, symbol: &str, mode: &str, started_at: DateTime<Utc>, config_json: &str) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            r#"INSERT INTO run (run_id, symbol, mode, started_at, config_json) VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(run_id) DO UPDATE SET symbol = excluded.symbol, mode = excluded.mode, config_json = excluded.config_json"#,
            params![run_id, symbol, mode, ts_to_sql(started_at), config_json],
        )?;
        Ok(())
    }

    pub fn mark_finished(&self, run_id: &str, finished_at: DateTime<Utc>) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute("UPDATE run SET finished_at = ?1 WHERE run_id = ?2", params![ts_to_sql(finished_at), run_id])?;
        Ok(())
    }
}
