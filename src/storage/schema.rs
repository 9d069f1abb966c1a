//! Flat SQLite schema, applied once at startup via `CREATE TABLE IF NOT
//! EXISTS` (§6.3 — no migration engine, by explicit Non-goal). Every table
//! keyed so that repeated ingestion of the same exchange stream is
//! idempotent (insert-or-skip on a natural unique key).

pub const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS run (
    run_id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    mode TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    config_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS strategy (
    strat_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES run(run_id),
    symbol TEXT NOT NULL,
    config_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ticker_snapshot (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    exchange_ts INTEGER NOT NULL,
    local_ts INTEGER NOT NULL,
    last_price TEXT NOT NULL,
    mark_price TEXT NOT NULL,
    bid1_price TEXT NOT NULL,
    ask1_price TEXT NOT NULL,
    funding_rate TEXT NOT NULL,
    UNIQUE(symbol, exchange_ts)
);
CREATE INDEX IF NOT EXISTS idx_ticker_symbol_ts ON ticker_snapshot(symbol, exchange_ts);

CREATE TABLE IF NOT EXISTS public_trade (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    exchange_ts INTEGER NOT NULL,
    trade_id TEXT NOT NULL,
    price TEXT NOT NULL,
    qty TEXT NOT NULL,
    side TEXT NOT NULL,
    UNIQUE(symbol, trade_id)
);
CREATE INDEX IF NOT EXISTS idx_public_trade_symbol_ts ON public_trade(symbol, exchange_ts);

CREATE TABLE IF NOT EXISTS private_execution (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES run(run_id),
    account_id TEXT NOT NULL DEFAULT '',
    strat_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    exchange_ts INTEGER NOT NULL,
    order_id TEXT NOT NULL,
    client_order_id TEXT NOT NULL,
    exec_id TEXT NOT NULL,
    price TEXT NOT NULL,
    qty TEXT NOT NULL,
    side TEXT NOT NULL,
    fee TEXT NOT NULL,
    closed_pnl TEXT NOT NULL DEFAULT '0',
    closed_size TEXT NOT NULL DEFAULT '0',
    leaves_qty TEXT NOT NULL DEFAULT '0',
    is_maker INTEGER NOT NULL,
    UNIQUE(symbol, exec_id)
);
CREATE INDEX IF NOT EXISTS idx_execution_run_symbol ON private_execution(run_id, symbol, exchange_ts);
CREATE INDEX IF NOT EXISTS idx_execution_client_order ON private_execution(client_order_id);
CREATE INDEX IF NOT EXISTS idx_execution_account_ts ON private_execution(account_id, exchange_ts);

CREATE TABLE IF NOT EXISTS order_update (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES run(run_id),
    account_id TEXT NOT NULL DEFAULT '',
    symbol TEXT NOT NULL,
    exchange_ts INTEGER NOT NULL,
    order_id TEXT NOT NULL,
    order_link_id TEXT NOT NULL,
    status TEXT NOT NULL,
    price TEXT NOT NULL,
    qty TEXT NOT NULL,
    leaves_qty TEXT NOT NULL DEFAULT '0',
    side TEXT NOT NULL,
    UNIQUE(account_id, order_id, exchange_ts)
);
CREATE INDEX IF NOT EXISTS idx_order_update_link ON order_update(order_link_id);

CREATE TABLE IF NOT EXISTS wallet_snapshot (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES run(run_id),
    exchange_ts INTEGER NOT NULL,
    wallet_balance TEXT NOT NULL,
    available_balance TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS position_snapshot (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES run(run_id),
    strat_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    exchange_ts INTEGER NOT NULL,
    size TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    current_price TEXT NOT NULL,
    unrealized_pnl TEXT NOT NULL,
    margin TEXT NOT NULL,
    liquidation_price TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_position_snapshot_run ON position_snapshot(run_id, strat_id, exchange_ts);

CREATE TABLE IF NOT EXISTS account (
    account_id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user (
    user_id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES account(account_id),
    username TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);
"#;
