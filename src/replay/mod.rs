//! Replay-only concerns layered on top of [`crate::backtest`]: comparing a
//! replayed run's simulated trades against the live trades captured for the
//! same `run_id`/symbol, to validate that replay faithfully reproduces live
//! behavior (spec §4.6, §8).

pub mod comparator;

pub use comparator::{compare_runs, ComparisonReport, MatchTolerances};
