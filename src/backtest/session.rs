//! Backtest session: the run-scoped aggregate that records trades and
//! funding, tracks the equity curve, and produces the final metrics
//! snapshot (§4.5, "backtest session").

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::info;

use crate::core::types::{Direction, Side};

/// One completed trade recorded into the session, either a simulated fill
/// or (in replay) a ground-truth live execution.
#[derive(Debug, Clone)]
pub struct BacktestTrade {
    pub client_order_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub direction: Direction,
    pub price: Decimal,
    pub qty: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub grid_level: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionTotals {
    pub realized_pnl: Decimal,
    pub commission: Decimal,
    pub funding: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Copy)]
struct DrawdownState {
    peak_equity: Decimal,
    current_drawdown_start_tick: Option<usize>,
    max_drawdown: Decimal,
    max_drawdown_duration_ticks: usize,
}

impl Default for DrawdownState {
    fn default() -> Self {
        Self { peak_equity: Decimal::ZERO, current_drawdown_start_tick: None, max_drawdown: Decimal::ZERO, max_drawdown_duration_ticks: 0 }
    }
}

pub struct BacktestSession {
    pub initial_balance: Decimal,
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<(DateTime<Utc>, Decimal)>,
    pub totals: SessionTotals,
    pub peak_equity: Decimal,
    pub peak_im: Decimal,
    pub peak_mm: Decimal,
    pub peak_imr_pct: Decimal,
    pub peak_mmr_pct: Decimal,
    drawdown: DrawdownState,
    tick_count: usize,
}

impl BacktestSession {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            totals: SessionTotals::default(),
            peak_equity: initial_balance,
            peak_im: Decimal::ZERO,
            peak_mm: Decimal::ZERO,
            peak_imr_pct: Decimal::ZERO,
            peak_mmr_pct: Decimal::ZERO,
            drawdown: DrawdownState { peak_equity: initial_balance, ..DrawdownState::default() },
            tick_count: 0,
        }
    }

    pub fn record_trade(&mut self, trade: BacktestTrade) {
        self.totals.realized_pnl += trade.realized_pnl;
        self.totals.commission += trade.fee;
        self.totals.volume += trade.qty * trade.price;
        self.trades.push(trade);
    }

    pub fn record_funding(&mut self, amount: Decimal) {
        self.totals.funding += amount;
    }

    /// Current realized equity identity (spec §3.2), excluding the current
    /// tick's unrealized PnL — used as the base that `update_equity` adds
    /// unrealized PnL onto.
    pub fn realized_balance(&self) -> Decimal {
        self.initial_balance + self.totals.realized_pnl + self.totals.funding - self.totals.commission
    }

    /// Recompute equity for this tick, push an equity-curve point, and
    /// update peak/drawdown and peak-margin tracking.
    pub fn update_equity(&mut self, ts: DateTime<Utc>, unrealized_pnl: Decimal, total_im: Decimal, total_mm: Decimal) -> Decimal {
        self.tick_count += 1;
        let equity = self.realized_balance() + unrealized_pnl;
        self.equity_curve.push((ts, equity));

        if equity > self.drawdown.peak_equity {
            self.drawdown.peak_equity = equity;
            self.drawdown.current_drawdown_start_tick = None;
        } else if equity < self.drawdown.peak_equity {
            let start = *self.drawdown.current_drawdown_start_tick.get_or_insert(self.tick_count);
            let duration = self.tick_count - start;
            let drawdown = self.drawdown.peak_equity - equity;
            if drawdown > self.drawdown.max_drawdown {
                self.drawdown.max_drawdown = drawdown;
            }
            if duration > self.drawdown.max_drawdown_duration_ticks {
                self.drawdown.max_drawdown_duration_ticks = duration;
            }
        }

        self.peak_im = self.peak_im.max(total_im);
        self.peak_mm = self.peak_mm.max(total_mm);
        if equity > Decimal::ZERO {
            self.peak_imr_pct = self.peak_imr_pct.max(total_im / equity * dec!(100));
            self.peak_mmr_pct = self.peak_mmr_pct.max(total_mm / equity * dec!(100));
        }

        equity
    }

    pub fn finalize(&self, final_unrealized: Decimal, sharpe_interval: chrono::Duration) -> SessionMetrics {
        let final_equity = self.realized_balance() + final_unrealized;
        let trade_stats = TradeStats::compute(&self.trades);
        let pnl = PnlBreakdown {
            realized: self.totals.realized_pnl,
            unrealized: final_unrealized,
            commission: self.totals.commission,
            funding: self.totals.funding,
            net: self.totals.realized_pnl + final_unrealized + self.totals.funding - self.totals.commission,
        };
        let risk = RiskMetrics {
            max_drawdown: self.drawdown.max_drawdown,
            max_drawdown_pct: if self.drawdown.peak_equity > Decimal::ZERO {
                self.drawdown.max_drawdown / self.drawdown.peak_equity * dec!(100)
            } else {
                Decimal::ZERO
            },
            max_drawdown_duration_ticks: self.drawdown.max_drawdown_duration_ticks,
            sharpe_ratio: sharpe_ratio(&self.equity_curve, sharpe_interval),
        };
        let margin = MarginMetrics { peak_im: self.peak_im, peak_mm: self.peak_mm, peak_imr_pct: self.peak_imr_pct, peak_mmr_pct: self.peak_mmr_pct };
        let balance = BalanceMetrics {
            initial: self.initial_balance,
            r#final: final_equity,
            return_pct: if self.initial_balance > Decimal::ZERO {
                (final_equity - self.initial_balance) / self.initial_balance * dec!(100)
            } else {
                Decimal::ZERO
            },
        };
        let turnover = TurnoverMetrics {
            total_volume: self.totals.volume,
            turnover_ratio: if self.initial_balance > Decimal::ZERO { self.totals.volume / self.initial_balance } else { Decimal::ZERO },
        };
        let long_short = LongShortBreakdown::compute(&self.trades);

        info!(final_equity = %final_equity, trades = self.trades.len(), "backtest session finalized");

        SessionMetrics { trade_stats, pnl, risk, margin, balance, turnover, long_short }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeStats {
    pub count: usize,
    pub wins: usize,
    pub losses: usize,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
}

impl TradeStats {
    fn compute(trades: &[BacktestTrade]) -> Self {
        let count = trades.len();
        let wins: Vec<Decimal> = trades.iter().map(|t| t.realized_pnl).filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = trades.iter().map(|t| t.realized_pnl).filter(|p| *p < Decimal::ZERO).collect();
        let win_count = wins.len();
        let loss_count = losses.len();
        let gross_win: Decimal = wins.iter().sum();
        let gross_loss: Decimal = losses.iter().sum::<Decimal>().abs();

        Self {
            count,
            wins: win_count,
            losses: loss_count,
            avg_win: if win_count > 0 { gross_win / Decimal::from(win_count) } else { Decimal::ZERO },
            avg_loss: if loss_count > 0 { gross_loss / Decimal::from(loss_count) } else { Decimal::ZERO },
            win_rate: if count > 0 { Decimal::from(win_count) / Decimal::from(count) * dec!(100) } else { Decimal::ZERO },
            profit_factor: if gross_loss > Decimal::ZERO { gross_win / gross_loss } else { Decimal::ZERO },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PnlBreakdown {
    pub realized: Decimal,
    pub unrealized: Decimal,
    pub commission: Decimal,
    pub funding: Decimal,
    pub net: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskMetrics {
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: Decimal,
    pub max_drawdown_duration_ticks: usize,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarginMetrics {
    pub peak_im: Decimal,
    pub peak_mm: Decimal,
    pub peak_imr_pct: Decimal,
    pub peak_mmr_pct: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BalanceMetrics {
    pub initial: Decimal,
    pub r#final: Decimal,
    pub return_pct: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnoverMetrics {
    pub total_volume: Decimal,
    pub turnover_ratio: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SideBreakdown {
    pub trade_count: usize,
    pub realized_pnl: Decimal,
    pub profit_factor: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LongShortBreakdown {
    pub long: SideBreakdown,
    pub short: SideBreakdown,
}

impl LongShortBreakdown {
    fn compute(trades: &[BacktestTrade]) -> Self {
        Self { long: side_breakdown(trades, Direction::Long), short: side_breakdown(trades, Direction::Short) }
    }
}

fn side_breakdown(trades: &[BacktestTrade], direction: Direction) -> SideBreakdown {
    let filtered: Vec<&BacktestTrade> = trades.iter().filter(|t| t.direction == direction).collect();
    let realized: Decimal = filtered.iter().map(|t| t.realized_pnl).sum();
    let gross_win: Decimal = filtered.iter().map(|t| t.realized_pnl).filter(|p| *p > Decimal::ZERO).sum();
    let gross_loss: Decimal = filtered.iter().map(|t| t.realized_pnl).filter(|p| *p < Decimal::ZERO).sum::<Decimal>().abs();
    SideBreakdown {
        trade_count: filtered.len(),
        realized_pnl: realized,
        profit_factor: if gross_loss > Decimal::ZERO { gross_win / gross_loss } else { Decimal::ZERO },
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionMetrics {
    pub trade_stats: TradeStats,
    pub pnl: PnlBreakdown,
    pub risk: RiskMetrics,
    pub margin: MarginMetrics,
    pub balance: BalanceMetrics,
    pub turnover: TurnoverMetrics,
    pub long_short: LongShortBreakdown,
}

/// Resample the equity curve into fixed-width time buckets (default 1h),
/// taking the last value observed in each non-empty bucket, then compute
/// the annualized Sharpe ratio of returns between consecutive buckets.
/// Float arithmetic is used deliberately here (spec §9): this is the one
/// documented exception to "no floats in monetary fields", confined to
/// the sharpe ratio's mean/variance/sqrt.
fn sharpe_ratio(equity_curve: &[(DateTime<Utc>, Decimal)], interval: chrono::Duration) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let interval_seconds = interval.num_seconds().max(1);
    let first_ts = equity_curve[0].0.timestamp();

    let mut resampled: Vec<f64> = Vec::new();
    let mut current_bucket: Option<i64> = None;
    let mut current_value: f64 = 0.0;
    for (ts, equity) in equity_curve {
        let bucket = (ts.timestamp() - first_ts) / interval_seconds;
        let value = equity.to_f64().unwrap_or(0.0);
        match current_bucket {
            Some(b) if b == bucket => {
                current_value = value;
            }
            Some(_) => {
                resampled.push(current_value);
                current_bucket = Some(bucket);
                current_value = value;
            }
            None => {
                current_bucket = Some(bucket);
                current_value = value;
            }
        }
    }
    resampled.push(current_value);

    let mut returns: Vec<f64> = Vec::new();
    for window in resampled.windows(2) {
        let (prev, curr) = (window[0], window[1]);
        if prev == 0.0 {
            continue;
        }
        returns.push((curr - prev) / prev);
    }

    if returns.len() < 2 {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return 0.0;
    }

    let periods_per_year = (365.25 * 86400.0) / interval_seconds as f64;
    (mean / stddev) * periods_per_year.sqrt()
}
