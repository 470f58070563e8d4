//! Performance metrics over a finished backtest run.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{EquityPoint, TradeOutcome};

/// Profit factor reported when there are no losing trades; infinity is not
/// valid JSON.
const MAX_PROFIT_FACTOR: f64 = 999.99;

#[derive(Debug, Clone, Serialize)]
pub struct StrategyStats {
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_pnl_eur: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_r_multiple: f64,
    /// Sharpe on week-over-week equity returns, annualized with √52.
    pub weekly_sharpe: f64,
    pub max_drawdown: f64,
    pub best_trade_eur: f64,
    pub worst_trade_eur: f64,
    pub total_pnl_eur: f64,
    pub total_return_pct: f64,
    pub cagr: f64,
    pub per_strategy: BTreeMap<String, StrategyStats>,
    pub per_regime_trades: BTreeMap<String, usize>,
    pub exit_reasons: BTreeMap<String, usize>,
}

impl PerformanceMetrics {
    pub fn empty() -> Self {
        Self {
            total_trades: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            avg_r_multiple: 0.0,
            weekly_sharpe: 0.0,
            max_drawdown: 0.0,
            best_trade_eur: 0.0,
            worst_trade_eur: 0.0,
            total_pnl_eur: 0.0,
            total_return_pct: 0.0,
            cagr: 0.0,
            per_strategy: BTreeMap::new(),
            per_regime_trades: BTreeMap::new(),
            exit_reasons: BTreeMap::new(),
        }
    }
}

pub fn calculate(
    trades: &[TradeOutcome],
    equity_curve: &[EquityPoint],
    initial_capital: f64,
) -> PerformanceMetrics {
    let mut metrics = PerformanceMetrics::empty();
    if initial_capital <= 0.0 {
        return metrics;
    }

    if !trades.is_empty() {
        let total = trades.len();
        let mut wins = 0usize;
        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        let mut r_sum = 0.0;
        let mut best = f64::NEG_INFINITY;
        let mut worst = f64::INFINITY;

        for trade in trades {
            metrics.total_pnl_eur += trade.pnl_eur;
            r_sum += trade.r_multiple;
            best = best.max(trade.pnl_eur);
            worst = worst.min(trade.pnl_eur);
            if trade.pnl_eur > 0.0 {
                wins += 1;
                gross_profit += trade.pnl_eur;
            } else {
                gross_loss += -trade.pnl_eur;
            }

            let strategy_stats = metrics
                .per_strategy
                .entry(trade.strategy.to_string())
                .or_insert(StrategyStats {
                    trades: 0,
                    wins: 0,
                    win_rate: 0.0,
                    total_pnl_eur: 0.0,
                });
            strategy_stats.trades += 1;
            strategy_stats.total_pnl_eur += trade.pnl_eur;
            if trade.pnl_eur > 0.0 {
                strategy_stats.wins += 1;
            }

            *metrics
                .per_regime_trades
                .entry(trade.regime_at_entry.to_string())
                .or_default() += 1;
            *metrics
                .exit_reasons
                .entry(trade.exit_reason.to_string())
                .or_default() += 1;
        }

        metrics.total_trades = total;
        metrics.win_rate = wins as f64 / total as f64;
        metrics.profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            MAX_PROFIT_FACTOR
        } else {
            0.0
        };
        metrics.avg_r_multiple = r_sum / total as f64;
        metrics.best_trade_eur = best;
        metrics.worst_trade_eur = worst;

        for stats in metrics.per_strategy.values_mut() {
            stats.win_rate = stats.wins as f64 / stats.trades as f64;
        }
    }

    if equity_curve.len() >= 2 {
        let returns: Vec<f64> = equity_curve
            .windows(2)
            .filter(|w| w[0].equity > 0.0)
            .map(|w| (w[1].equity - w[0].equity) / w[0].equity)
            .collect();
        metrics.weekly_sharpe = sharpe(&returns, 52.0);
        metrics.max_drawdown = max_drawdown(equity_curve);

        let final_equity = equity_curve.last().unwrap().equity;
        metrics.total_return_pct = (final_equity - initial_capital) / initial_capital * 100.0;

        let days = (equity_curve.last().unwrap().date - equity_curve[0].date).num_days();
        if days > 0 && final_equity > 0.0 {
            let years = days as f64 / 365.0;
            metrics.cagr = (final_equity / initial_capital).powf(1.0 / years) - 1.0;
        }
    }

    metrics
}

fn sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let std = variance.sqrt();
    if std > 0.0 {
        mean / std * periods_per_year.sqrt()
    } else {
        0.0
    }
}

fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = equity_curve[0].equity;
    let mut max_dd = 0.0;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            let dd = (peak - point.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}
