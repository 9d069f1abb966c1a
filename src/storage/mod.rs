//! SQLite-backed persistence (§6.3): a flat schema applied once via
//! `CREATE TABLE IF NOT EXISTS`, no runtime migration engine, and a
//! repository struct per table offering insert-or-skip / insert-or-update
//! semantics so re-ingesting the same exchange stream is always safe.

pub mod live_recorder;
pub mod repository;
pub mod schema;

pub use live_recorder::LiveRecorder;
pub use repository::{
    Db, ExecutionRepository, ExecutionRow, OrderUpdateRepository, OrderUpdateRow, PositionSnapshotRepository, PositionSnapshotRow, PublicTradeRepository, PublicTradeRow, RunRepository,
    TickerRepository, TickerRow, WalletSnapshotRepository, WalletSnapshotRow,
};
