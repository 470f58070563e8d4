//! Weekly-cadence backtest: types shared by the simulator and its metrics.

pub mod metrics;
pub mod simulator;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{BearMarketMode, FilterConfig, RiskConfig};
use crate::regime::Regime;
use crate::strategies::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    MaxHold,
    ForcedClose,
    BearMarketExit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::MaxHold => "max_hold",
            ExitReason::ForcedClose => "forced_close",
            ExitReason::BearMarketExit => "bear_market_exit",
        };
        f.write_str(name)
    }
}

/// An open simulated trade. `stop_loss` and `highest_price` mutate daily;
/// everything else is fixed at entry.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target_price: f64,
    pub quantity: u32,
    pub original_quantity: u32,
    /// Risk at entry, EUR. Denominator of the R multiple.
    pub risk_amount: f64,
    /// Capital committed at entry, EUR.
    pub capital_allocated: f64,
    pub highest_price: f64,
    pub atr: f64,
    pub trailing_active: bool,
    pub breakeven_active: bool,
    pub tp1_hit: bool,
    pub tp1_pnl: f64,
    pub regime_at_entry: Regime,
    /// Most recent close, for mark-to-market.
    pub last_close: f64,
}

impl Position {
    pub fn market_value_eur(&self, rate: f64) -> f64 {
        f64::from(self.quantity) * self.last_close * rate
    }

    pub fn weeks_held(&self, today: NaiveDate) -> i64 {
        (today - self.entry_date).num_days() / 7
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u32,
    pub exit_reason: ExitReason,
    pub pnl_usd: f64,
    pub pnl_eur: f64,
    pub r_multiple: f64,
    pub weeks_held: i64,
    pub regime_at_entry: Regime,
}

#[derive(Debug, Clone, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital_eur: f64,
    pub slots: u32,
    pub max_hold_weeks: u32,
    pub entry_slippage_pct: f64,
    pub exit_slippage_pct: f64,
    pub trailing_trigger_pct: f64,
    pub trailing_distance_pct: f64,
    pub trailing_min_lock_pct: f64,
    pub bear_market_protection: bool,
    pub bear_market_mode: BearMarketMode,
    pub bear_market_exit_positions: bool,
    pub commission_per_trade_eur: f64,
    /// Compound risk per trade as a fraction of current equity.
    pub risk_fraction: f64,
    /// Mondays with benchmark ADX below this skip the whole week.
    pub min_adx: f64,
    pub benchmark_symbol: String,
    /// USD → EUR, held constant across the run.
    pub rate: f64,
}

impl BacktestConfig {
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        initial_capital_eur: f64,
        slots: u32,
        risk: &RiskConfig,
        filters: &FilterConfig,
        rate: f64,
    ) -> Self {
        Self {
            start,
            end,
            initial_capital_eur,
            slots,
            max_hold_weeks: risk.max_hold_weeks,
            entry_slippage_pct: risk.entry_slippage_pct,
            exit_slippage_pct: risk.exit_slippage_pct,
            trailing_trigger_pct: risk.trailing_trigger_pct,
            trailing_distance_pct: risk.trailing_distance_pct,
            trailing_min_lock_pct: risk.trailing_min_lock_pct,
            bear_market_protection: risk.bear_market_protection,
            bear_market_mode: risk.bear_market_mode,
            bear_market_exit_positions: risk.bear_market_exit_positions,
            commission_per_trade_eur: risk.commission_per_trade,
            risk_fraction: 0.015,
            min_adx: 15.0,
            benchmark_symbol: filters.benchmark_symbol.clone(),
            rate,
        }
    }

    pub fn entry_multiplier(&self) -> f64 {
        1.0 + self.entry_slippage_pct / 100.0
    }

    pub fn exit_multiplier(&self) -> f64 {
        1.0 - self.exit_slippage_pct / 100.0
    }
}

#[derive(Debug, Serialize)]
pub struct BacktestReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub metrics: metrics::PerformanceMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeOutcome>,
}
