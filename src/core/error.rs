//! Error taxonomy shared by every pure core module (C1-C4).
//!
//! Pure functions never perform I/O and never panic on bad input; they return
//! `Result<_, CoreError>` so callers (backtest orchestrator, live runner) can
//! decide policy (log-and-continue, reject, retry).

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate client_order_id: {0}")]
    DuplicateClientId(String),

    #[error("state invariant violated: {0}")]
    StateInvariantViolation(String),

    #[error("exchange error: {0}")]
    ExchangeError(String),

    #[error("cache permission error: {0}")]
    CachePermissionError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Non-fatal quality issue surfaced alongside an otherwise-successful
/// calculation result (see spec §7, `DataQualityWarning`).
#[derive(Debug, Clone, PartialEq)]
pub enum DataQualityWarning {
    /// Maintenance margin computed as zero for a non-zero position.
    ZeroMaintenanceMargin { position_value: Decimal },
    /// Initial margin is near zero, making PnL% unstable.
    NearZeroInitialMargin { initial_margin: Decimal },
    /// A reduce-side fill's qty exceeded the live position size and was clamped.
    ReduceClampedToPositionSize { requested: Decimal, clamped_to: Decimal },
}
