//! Funding-period gating (§4.6, "funding simulator"): decides *when* a
//! funding payment should be applied during backtest/replay, exchange-
//! specific to Bybit's {00, 08, 16} UTC funding hours.

use chrono::{DateTime, Timelike, Utc};

/// Minimum gap, in hours, between two funding applications before a tick in
/// the same funding hour is allowed to apply again. Named so the heuristic
/// (spec §9, "funding idempotence") is easy to find and retune.
const MIN_FUNDING_PERIOD_HOURS: i64 = 7;

const FUNDING_HOURS: [u32; 3] = [0, 8, 16];

#[derive(Debug, Clone, Default)]
pub struct FundingSimulator {
    last_funding_time: Option<DateTime<Utc>>,
}

impl FundingSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `ts` qualifies for a funding application: its hour must be a
    /// funding hour, and either no funding has ever been applied, or the
    /// previous application was far enough in the past (>= 7h) *and* in a
    /// different hour-of-day than `ts` (guards against the same funding
    /// hour being re-applied across multiple ticks within it).
    pub fn should_apply(&self, ts: DateTime<Utc>) -> bool {
        if !FUNDING_HOURS.contains(&ts.hour()) {
            return false;
        }
        match self.last_funding_time {
            None => true,
            Some(last) => {
                let distance_hours = (ts - last).num_hours();
                distance_hours >= MIN_FUNDING_PERIOD_HOURS && last.hour() != ts.hour()
            }
        }
    }

    pub fn mark_applied(&mut self, ts: DateTime<Utc>) {
        self.last_funding_time = Some(ts);
    }
}
