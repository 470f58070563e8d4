//! The three entry strategies and their shared signal plumbing.
//!
//! Each strategy is a pass/fail filter chain over one symbol's history:
//! every filter either rejects the symbol for this cycle or lets it through,
//! and a symbol that clears the whole chain becomes a [`Signal`]. Dispatch is
//! by [`StrategyKind`] tag; strategies never reach back into the portfolio
//! manager or the stores.

pub mod breakout;
pub mod mean_reversion;
pub mod momentum;

use std::collections::{BTreeMap, HashMap};

use anyhow::{ensure, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::Series;
use crate::risk;

/// Stop: the tighter of a 2-ATR stop and a 5 % cap below entry.
const STOP_ATR_MULTIPLIER: f64 = 2.0;
const STOP_MAX_LOSS_FRACTION: f64 = 0.95;
/// Target: 3 ATR, floored at +4 %.
const TARGET_ATR_MULTIPLIER: f64 = 3.0;
const TARGET_MIN_GAIN_FRACTION: f64 = 1.04;

/// Bars of slack demanded beyond the longest moving-average window.
pub(crate) const HISTORY_MARGIN: usize = 60;
/// Trading days in three months.
pub(crate) const THREE_MONTHS_BARS: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Momentum,
    MeanReversion,
    Breakout,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Momentum,
        StrategyKind::MeanReversion,
        StrategyKind::Breakout,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Momentum => "momentum",
            StrategyKind::MeanReversion => "mean_reversion",
            StrategyKind::Breakout => "breakout",
        }
    }

    /// Run this strategy over the prepared per-symbol history map.
    pub fn generate_signals(
        self,
        bars: &HashMap<String, Series>,
        benchmark: Option<&Series>,
        as_of: NaiveDate,
        ctx: &StrategyContext,
    ) -> Vec<Signal> {
        match self {
            StrategyKind::Momentum => momentum::generate_signals(bars, benchmark, as_of, ctx),
            StrategyKind::MeanReversion => mean_reversion::generate_signals(bars, as_of, ctx),
            StrategyKind::Breakout => breakout::generate_signals(bars, as_of, ctx),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Strategy-specific measurements carried on a signal for ranking and
/// downstream filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalMetrics {
    /// Three-month return as a fraction (momentum).
    pub return_3m: Option<f64>,
    /// Wilder RSI at signal time (mean reversion).
    pub rsi: Option<f64>,
    /// Volume over its 20-day average on the breakout bar (breakout).
    pub volume_ratio: Option<f64>,
    pub natr: f64,
    pub atr: f64,
    /// Stop distance as a percentage of entry.
    pub atr_stop_pct: f64,
    pub dollar_volume: f64,
}

/// A proposed, not-yet-executed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target_price: f64,
    pub position_size: u32,
    /// Risk at stake, in EUR.
    pub risk_amount: f64,
    pub signal_date: NaiveDate,
    pub metrics: SignalMetrics,
    /// Filter name → human-readable evidence it passed.
    pub filters_passed: BTreeMap<String, String>,
    /// 1.2 when the strategy matches the detected regime, else 1.0.
    pub regime_boost: f64,
}

impl Signal {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.stop_loss < self.entry_price && self.entry_price < self.target_price,
            "{}: signal prices out of order (stop {} entry {} target {})",
            self.symbol,
            self.stop_loss,
            self.entry_price,
            self.target_price
        );
        ensure!(self.position_size >= 1, "{}: empty position", self.symbol);
        ensure!(self.risk_amount > 0.0, "{}: non-positive risk", self.symbol);
        Ok(())
    }
}

/// Plain-value context injected into strategies; keeps them free of store
/// and configuration dependencies.
#[derive(Debug, Clone, Copy)]
pub struct StrategyContext {
    pub risk_per_trade_eur: f64,
    /// USD → EUR rate.
    pub rate: f64,
    pub min_dollar_volume: f64,
    pub min_trade_value_eur: f64,
    pub commission_round_trip_eur: f64,
}

impl Default for StrategyContext {
    fn default() -> Self {
        Self {
            risk_per_trade_eur: 20.0,
            rate: crate::data::currency::FALLBACK_RATE,
            min_dollar_volume: 3_000_000.0,
            min_trade_value_eur: 50.0,
            commission_round_trip_eur: 2.0,
        }
    }
}

/// Shared stop/target rule: stop is the tighter of 2·ATR and −5 %; target is
/// 3·ATR floored at +4 %.
pub fn stop_and_target(entry: f64, atr: f64) -> (f64, f64) {
    let stop = (entry - atr * STOP_ATR_MULTIPLIER).max(entry * STOP_MAX_LOSS_FRACTION);
    let target = (entry + atr * TARGET_ATR_MULTIPLIER).max(entry * TARGET_MIN_GAIN_FRACTION);
    (stop, target)
}

/// Shared signal epilogue: compute stop/target, size at the default risk, and
/// apply the trade-economics gate. `None` when the trade is too small to be
/// worth its commissions.
#[allow(clippy::too_many_arguments)]
pub(crate) fn finalize_signal(
    symbol: &str,
    strategy: StrategyKind,
    as_of: NaiveDate,
    entry: f64,
    atr: f64,
    mut metrics: SignalMetrics,
    mut filters_passed: BTreeMap<String, String>,
    ctx: &StrategyContext,
) -> Option<Signal> {
    let (stop_loss, target_price) = stop_and_target(entry, atr);
    let risk_per_share_eur = (entry - stop_loss) * ctx.rate;
    if risk_per_share_eur <= 0.0 {
        return None;
    }

    let quantity = (ctx.risk_per_trade_eur / risk_per_share_eur).floor() as i64;
    if quantity < 1 {
        tracing::debug!(%symbol, "Risk budget too small for one share");
        return None;
    }
    let quantity = quantity as u32;

    let economics = risk::trade_economics(
        entry,
        quantity,
        ctx.rate,
        ctx.min_trade_value_eur,
        ctx.commission_round_trip_eur,
    );
    if !economics.viable {
        tracing::debug!(
            %symbol,
            value_eur = format!("{:.2}", economics.trade_value_eur),
            commission_pct = format!("{:.2}", economics.commission_percent),
            "Trade economics gate failed"
        );
        return None;
    }
    filters_passed.insert(
        "trade_economics".to_string(),
        format!(
            "value {:.0} EUR, commission {:.2}%",
            economics.trade_value_eur, economics.commission_percent
        ),
    );

    metrics.atr = atr;
    metrics.atr_stop_pct = (entry - stop_loss) / entry * 100.0;

    let signal = Signal {
        symbol: symbol.to_string(),
        strategy,
        entry_price: entry,
        stop_loss,
        target_price,
        position_size: quantity,
        risk_amount: ctx.risk_per_trade_eur,
        signal_date: as_of,
        metrics,
        filters_passed,
        regime_boost: 1.0,
    };
    debug_assert!(signal.validate().is_ok());
    Some(signal)
}

/// N-month simple return as a fraction, using 21 trading days per month.
pub(crate) fn trailing_return(closes: &[f64], bars_back: usize) -> Option<f64> {
    if closes.len() <= bars_back {
        return None;
    }
    let current = *closes.last()?;
    let past = closes[closes.len() - 1 - bars_back];
    (past > 0.0).then(|| current / past - 1.0)
}
