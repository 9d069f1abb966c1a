//! Faithfulness check for replay: zips a backtest session's simulated
//! trades against the live trades recorded for the same run_id/symbol and
//! reports how closely they agree (spec §4.6).
//!
//! Matching is positional within `client_order_id` groups rather than a
//! general reconciliation — the live runner and the replay runner are
//! expected to place orders with the same client_order_id scheme, so the
//! N-th fill recorded live against a given client_order_id should line up
//! with the N-th simulated fill against that same id.

use std::collections::HashMap;

use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::backtest::session::BacktestTrade;
use crate::core::types::Direction;
use crate::storage::repository::ExecutionRow;

/// Per-field tolerances below which a matched pair counts as agreeing
/// rather than a breach (spec §4.6: "tolerances configurable, default
/// price_tolerance = 0 exact, qty_tolerance = 0.001").
#[derive(Debug, Clone, Copy)]
pub struct MatchTolerances {
    pub price_tolerance: Decimal,
    pub qty_tolerance: Decimal,
}

impl Default for MatchTolerances {
    fn default() -> Self {
        Self { price_tolerance: Decimal::ZERO, qty_tolerance: dec!(0.001) }
    }
}

/// Deltas for one (simulated, recorded) matched pair, `simulated - recorded`.
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub client_order_id: String,
    pub simulated: BacktestTrade,
    pub recorded: ExecutionRow,
    pub price_delta: Decimal,
    pub qty_delta: Decimal,
    pub fee_delta: Decimal,
    pub pnl_delta: Decimal,
    pub time_delta: Duration,
    pub breaches_tolerance: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LongShortBreakdown {
    pub long_pairs: usize,
    pub short_pairs: usize,
    pub long_pnl_delta: Decimal,
    pub short_pnl_delta: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonReport {
    pub pairs: Vec<MatchedPair>,
    /// Simulated trades with no recorded counterpart at the same occurrence index.
    pub phantom_simulated: Vec<BacktestTrade>,
    /// Recorded trades with no simulated counterpart at the same occurrence index.
    pub phantom_recorded: Vec<ExecutionRow>,
    pub match_rate: f64,
    pub phantom_rate: f64,
    pub cumulative_pnl_delta: Decimal,
    pub pnl_correlation: f64,
    pub breakdown: LongShortBreakdown,
    pub tolerance_breach_count: usize,
}

fn group_by_client_order_id<T, F: Fn(&T) -> &str>(items: &[T], key: F) -> HashMap<String, Vec<&T>> {
    let mut groups: HashMap<String, Vec<&T>> = HashMap::new();
    for item in items {
        groups.entry(key(item).to_string()).or_default().push(item);
    }
    groups
}

/// Pearson correlation coefficient of two equal-length samples. Returns
/// `0.0` for fewer than two points or zero variance in either sample,
/// matching the documented float exception used for [`crate::backtest::session::sharpe_ratio`].
fn pearson_correlation(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 || n != ys.len() {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Compare a replayed session's simulated trades against the live trades
/// recorded for the same run_id/symbol.
///
/// `simulated` and `recorded` need not be pre-sorted by client_order_id,
/// but each should already be in chronological order per spec §4.6's
/// "matched pairs are zipped by occurrence index" — this function groups
/// by client_order_id while preserving each input's relative order within
/// a group, then zips same-index entries within each group.
pub fn compare_runs(simulated: &[BacktestTrade], recorded: &[ExecutionRow], tolerances: MatchTolerances) -> ComparisonReport {
    let sim_groups = group_by_client_order_id(simulated, |t| &t.client_order_id);
    let rec_groups = group_by_client_order_id(recorded, |r| &r.client_order_id);

    let mut pairs = Vec::new();
    let mut phantom_simulated = Vec::new();
    let mut phantom_recorded = Vec::new();

    let mut client_order_ids: Vec<&String> = sim_groups.keys().chain(rec_groups.keys()).collect();
    client_order_ids.sort();
    client_order_ids.dedup();

    for client_order_id in client_order_ids {
        let empty_sim: Vec<&BacktestTrade> = Vec::new();
        let empty_rec: Vec<&ExecutionRow> = Vec::new();
        let sims = sim_groups.get(client_order_id).unwrap_or(&empty_sim);
        let recs = rec_groups.get(client_order_id).unwrap_or(&empty_rec);
        let matched_len = sims.len().min(recs.len());

        for i in 0..matched_len {
            let sim = sims[i];
            let rec = recs[i];
            let price_delta = sim.price - rec.price;
            let qty_delta = sim.qty - rec.qty;
            let fee_delta = sim.fee - rec.fee;
            let pnl_delta = sim.realized_pnl - rec.closed_pnl;
            let time_delta = sim.timestamp - rec.exchange_ts;
            let breaches = price_delta.abs() > tolerances.price_tolerance || qty_delta.abs() > tolerances.qty_tolerance;
            pairs.push(MatchedPair {
                client_order_id: client_order_id.clone(),
                simulated: sim.clone(),
                recorded: rec.clone(),
                price_delta,
                qty_delta,
                fee_delta,
                pnl_delta,
                time_delta,
                breaches_tolerance: breaches,
            });
        }
        for sim in sims.iter().skip(matched_len) {
            phantom_simulated.push((*sim).clone());
        }
        for rec in recs.iter().skip(matched_len) {
            phantom_recorded.push((*rec).clone());
        }
    }

    let total_sim = simulated.len();
    let total_candidates = total_sim + phantom_recorded.len();
    let match_rate = if total_candidates == 0 { 1.0 } else { pairs.len() as f64 / total_candidates as f64 };
    let phantom_rate = if total_sim == 0 { 0.0 } else { phantom_simulated.len() as f64 / total_sim as f64 };

    let cumulative_pnl_delta: Decimal = pairs.iter().map(|p| p.pnl_delta).sum();
    let tolerance_breach_count = pairs.iter().filter(|p| p.breaches_tolerance).count();

    let sim_pnls: Vec<f64> = pairs.iter().filter_map(|p| p.simulated.realized_pnl.to_f64()).collect();
    let rec_pnls: Vec<f64> = pairs.iter().filter_map(|p| p.recorded.closed_pnl.to_f64()).collect();
    let pnl_correlation = pearson_correlation(&sim_pnls, &rec_pnls);

    let mut breakdown = LongShortBreakdown::default();
    for pair in &pairs {
        match pair.simulated.direction {
            Direction::Long => {
                breakdown.long_pairs += 1;
                breakdown.long_pnl_delta += pair.pnl_delta;
            }
            Direction::Short => {
                breakdown.short_pairs += 1;
                breakdown.short_pnl_delta += pair.pnl_delta;
            }
        }
    }

    ComparisonReport {
        pairs,
        phantom_simulated,
        phantom_recorded,
        match_rate,
        phantom_rate,
        cumulative_pnl_delta,
        pnl_correlation,
        breakdown,
        tolerance_breach_count,
    }
}
