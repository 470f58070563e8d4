//! The weekly state machine.
//!
//! Monday generates and filters a plan as of the close; Tuesday enters at
//! the open plus slippage; Wednesday through Friday manage trailing stops;
//! Friday additionally enforces the max-hold limit. Winners are never
//! force-closed on Friday; they ride until stopped, trailed out, or aged
//! out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};

use super::metrics;
use super::{BacktestConfig, BacktestReport, EquityPoint, ExitReason, Position, TradeOutcome};
use crate::config::BearMarketMode;
use crate::data::market::MarketStore;
use crate::data::Bar;
use crate::portfolio::{OpenExposure, PortfolioManager};
use crate::regime::{Regime, RegimeSnapshot};
use crate::risk::MAX_POSITION_FRACTION;
use crate::strategies::Signal;

/// Monday's verdict for the coming week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WeekPlan {
    slots: u32,
    exit_all: bool,
    skipped: bool,
}

/// Slot budget for the week from the regime snapshot: a listless benchmark
/// (ADX under the floor) skips the week; a bear market (close below both
/// moving averages) goes to cash or a single slot; close below only the
/// 200-day average gives up one slot.
fn weekly_slots(snapshot: &RegimeSnapshot, base_slots: u32, config: &BacktestConfig) -> WeekPlan {
    if snapshot.adx < config.min_adx {
        return WeekPlan {
            slots: 0,
            exit_all: false,
            skipped: true,
        };
    }
    if config.bear_market_protection && snapshot.price > 0.0 {
        let below_50 = snapshot.price < snapshot.sma_50;
        let below_200 = snapshot.price < snapshot.sma_200;
        if below_50 && below_200 {
            let slots = match config.bear_market_mode {
                BearMarketMode::Cash => 0,
                BearMarketMode::Reduced => 1,
            };
            return WeekPlan {
                slots,
                exit_all: config.bear_market_exit_positions,
                skipped: false,
            };
        }
        if below_200 {
            return WeekPlan {
                slots: base_slots.saturating_sub(1).max(1),
                exit_all: false,
                skipped: false,
            };
        }
    }
    WeekPlan {
        slots: base_slots,
        exit_all: false,
        skipped: false,
    }
}

/// Daily position management: track the high, ratchet the trailing stop
/// (never down), and report a stop hit. Returns the exit fill and reason
/// when the day's low touches the stop.
fn manage_position(
    position: &mut Position,
    bar: &Bar,
    config: &BacktestConfig,
) -> Option<(f64, ExitReason)> {
    position.highest_price = position.highest_price.max(bar.high);
    position.last_close = bar.close;

    let run_up_pct = (position.highest_price / position.entry_price - 1.0) * 100.0;
    if run_up_pct >= config.trailing_trigger_pct {
        position.trailing_active = true;
        let candidate = (position.highest_price * (1.0 - config.trailing_distance_pct / 100.0))
            .max(position.entry_price * (1.0 + config.trailing_min_lock_pct / 100.0));
        if candidate > position.stop_loss {
            position.stop_loss = candidate;
        }
    }

    if bar.low <= position.stop_loss {
        let exit_price = position.stop_loss * config.exit_multiplier();
        let reason = if position.trailing_active {
            ExitReason::TrailingStop
        } else {
            ExitReason::StopLoss
        };
        return Some((exit_price, reason));
    }
    None
}

pub struct WeeklySimulator {
    store: Arc<MarketStore>,
    portfolio: PortfolioManager,
    config: BacktestConfig,
    universe: Option<Vec<String>>,

    cash: f64,
    positions: Vec<Position>,
    pending: Vec<Signal>,
    week_slots: u32,
    current_regime: Regime,
    trades: Vec<TradeOutcome>,
    equity_curve: Vec<EquityPoint>,
}

impl WeeklySimulator {
    pub fn new(
        store: Arc<MarketStore>,
        portfolio: PortfolioManager,
        config: BacktestConfig,
        universe: Option<Vec<String>>,
    ) -> Self {
        let cash = config.initial_capital_eur;
        let week_slots = config.slots;
        Self {
            store,
            portfolio,
            config,
            universe,
            cash,
            positions: Vec::new(),
            pending: Vec::new(),
            week_slots,
            current_regime: Regime::Choppy,
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    /// Walk day by day over the window and produce the report.
    pub fn run(mut self) -> BacktestReport {
        tracing::info!(
            start = %self.config.start,
            end = %self.config.end,
            capital = self.config.initial_capital_eur,
            slots = self.config.slots,
            "Backtest starting"
        );
        self.equity_curve.push(EquityPoint {
            date: self.config.start,
            equity: self.config.initial_capital_eur,
        });

        let mut date = self.config.start;
        while date <= self.config.end {
            match date.weekday() {
                Weekday::Mon => self.monday(date),
                Weekday::Tue => self.tuesday(date),
                Weekday::Wed | Weekday::Thu => self.check_open_positions(date),
                Weekday::Fri => self.friday(date),
                Weekday::Sat | Weekday::Sun => {}
            }
            date += Duration::days(1);
        }

        // Whatever is still open goes out at the last seen close
        let remaining: Vec<Position> = self.positions.drain(..).collect();
        for position in remaining {
            let exit_price = position.last_close * self.config.exit_multiplier();
            self.finalize_exit(position, self.config.end, exit_price, ExitReason::ForcedClose);
        }
        self.equity_curve.push(EquityPoint {
            date: self.config.end,
            equity: self.equity(),
        });

        let metrics = metrics::calculate(
            &self.trades,
            &self.equity_curve,
            self.config.initial_capital_eur,
        );
        tracing::info!(
            trades = metrics.total_trades,
            win_rate = format!("{:.1}%", metrics.win_rate * 100.0),
            pnl = format!("{:.2} EUR", metrics.total_pnl_eur),
            "Backtest finished"
        );

        BacktestReport {
            start: self.config.start,
            end: self.config.end,
            initial_capital: self.config.initial_capital_eur,
            final_capital: self.equity(),
            metrics,
            equity_curve: self.equity_curve,
            trades: self.trades,
        }
    }

    fn equity(&self) -> f64 {
        let positions_value: f64 = self
            .positions
            .iter()
            .map(|p| p.market_value_eur(self.config.rate))
            .sum();
        self.cash + positions_value
    }

    /// Monday: plan as of the close; decide the week's slot budget.
    fn monday(&mut self, date: NaiveDate) {
        let exposures: Vec<OpenExposure> = self
            .positions
            .iter()
            .map(|p| OpenExposure {
                symbol: p.symbol.clone(),
                value_eur: p.market_value_eur(self.config.rate),
            })
            .collect();

        let plan = match self.portfolio.generate_plan(
            date,
            self.universe.clone(),
            &exposures,
            self.config.rate,
            1.0,
        ) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!("Plan generation failed on {date}: {e:#}");
                self.pending.clear();
                self.week_slots = 0;
                return;
            }
        };
        self.current_regime = plan.regime.regime;

        let week = weekly_slots(&plan.regime, self.config.slots, &self.config);
        if week.skipped {
            tracing::info!(
                adx = format!("{:.1}", plan.regime.adx),
                "Week of {date} skipped: benchmark trendless"
            );
        }

        if week.exit_all && !self.positions.is_empty() {
            tracing::warn!("Bear market on {date}: exiting all open positions");
            let open: Vec<Position> = self.positions.drain(..).collect();
            for position in open {
                // Exit at the last close before this Monday
                let prev_close = self
                    .store
                    .get(&position.symbol, None, Some(date - Duration::days(1)))
                    .last()
                    .map_or(position.last_close, |bar| bar.close);
                let exit_price = prev_close * self.config.exit_multiplier();
                self.finalize_exit(position, date, exit_price, ExitReason::BearMarketExit);
            }
        }

        self.week_slots = week.slots;
        self.pending = if week.slots == 0 {
            Vec::new()
        } else {
            plan.stock_signals
        };
        tracing::info!(
            signals = self.pending.len(),
            slots = self.week_slots,
            regime = %self.current_regime,
            "Monday plan for {date}"
        );
    }

    /// Tuesday: carry-over stop check, then entries at the open plus
    /// slippage, then a stop check on the freshly opened positions.
    fn tuesday(&mut self, date: NaiveDate) {
        self.check_open_positions(date);

        let free = self
            .week_slots
            .saturating_sub(self.positions.len() as u32);
        if free > 0 && !self.pending.is_empty() {
            let signals = std::mem::take(&mut self.pending);
            let mut opened = 0u32;
            for signal in signals {
                if opened >= free {
                    break;
                }
                if self.open_position(&signal, date) {
                    opened += 1;
                }
            }
        } else {
            self.pending.clear();
        }

        self.check_open_positions(date);
    }

    /// Entry fill and compound-equity sizing. Returns false when the symbol
    /// has no bar today or sizing leaves less than one share.
    fn open_position(&mut self, signal: &Signal, date: NaiveDate) -> bool {
        if self.positions.iter().any(|p| p.symbol == signal.symbol) {
            tracing::debug!(symbol = %signal.symbol, "Already holding this symbol; signal dropped");
            return false;
        }
        let Some(bar) = self.store.bar_for_date(&signal.symbol, date) else {
            tracing::debug!(symbol = %signal.symbol, "No bar on entry day; signal dropped");
            return false;
        };

        let entry = bar.open * self.config.entry_multiplier();
        // Re-anchor the stop to the actual fill; Monday's close is stale by
        // one open
        let atr = signal.metrics.atr;
        let stop = (entry - 2.0 * atr).max(entry * 0.95);
        let risk_per_share_eur = (entry - stop) * self.config.rate;
        if risk_per_share_eur <= 0.0 {
            return false;
        }

        let equity = self.equity();
        let risk_eur = equity * self.config.risk_fraction;
        let share_value_eur = entry * self.config.rate;

        let mut quantity = (risk_eur / risk_per_share_eur).floor() as i64;
        let max_value = equity * MAX_POSITION_FRACTION;
        if quantity as f64 * share_value_eur > max_value {
            quantity = (max_value / share_value_eur).floor() as i64;
        }
        if quantity as f64 * share_value_eur > self.cash {
            quantity = (self.cash / share_value_eur).floor() as i64;
        }
        if quantity < 1 {
            tracing::debug!(symbol = %signal.symbol, "Sizing left no affordable share");
            return false;
        }
        let quantity = quantity as u32;
        let value_eur = f64::from(quantity) * share_value_eur;

        self.cash -= value_eur;
        self.positions.push(Position {
            symbol: signal.symbol.clone(),
            strategy: signal.strategy,
            entry_date: date,
            entry_price: entry,
            stop_loss: stop,
            target_price: signal.target_price,
            quantity,
            original_quantity: quantity,
            risk_amount: f64::from(quantity) * risk_per_share_eur,
            capital_allocated: value_eur,
            highest_price: entry,
            atr,
            trailing_active: false,
            breakeven_active: false,
            tp1_hit: false,
            tp1_pnl: 0.0,
            regime_at_entry: self.current_regime,
            last_close: bar.close,
        });
        tracing::info!(
            symbol = %signal.symbol,
            strategy = %signal.strategy,
            entry = format!("{entry:.2}"),
            stop = format!("{stop:.2}"),
            quantity,
            "Entered position on {date}"
        );
        true
    }

    /// Friday: the usual stop management, then the max-hold cut, then the
    /// weekly equity sample.
    fn friday(&mut self, date: NaiveDate) {
        self.check_open_positions(date);

        let max_hold = i64::from(self.config.max_hold_weeks);
        let aged: Vec<usize> = self
            .positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.weeks_held(date) >= max_hold)
            .map(|(i, _)| i)
            .collect();
        for i in aged.into_iter().rev() {
            let position = self.positions.remove(i);
            let exit_price = position.last_close * self.config.exit_multiplier();
            tracing::info!(
                symbol = %position.symbol,
                weeks = position.weeks_held(date),
                "Max hold reached; closing at Friday close"
            );
            self.finalize_exit(position, date, exit_price, ExitReason::MaxHold);
        }

        self.equity_curve.push(EquityPoint {
            date,
            equity: self.equity(),
        });
    }

    /// Per-position daily check. A symbol with no bar today is skipped and
    /// the rest of the loop continues.
    fn check_open_positions(&mut self, date: NaiveDate) {
        let mut exits: Vec<(usize, f64, ExitReason)> = Vec::new();
        for (i, position) in self.positions.iter_mut().enumerate() {
            let Some(bar) = self.store.bar_for_date(&position.symbol, date) else {
                tracing::debug!(symbol = %position.symbol, "No bar for {date}; skipped");
                continue;
            };
            if let Some((exit_price, reason)) = manage_position(position, &bar, &self.config) {
                exits.push((i, exit_price, reason));
            }
        }
        for (i, exit_price, reason) in exits.into_iter().rev() {
            let position = self.positions.remove(i);
            self.finalize_exit(position, date, exit_price, reason);
        }
    }

    fn finalize_exit(
        &mut self,
        position: Position,
        date: NaiveDate,
        exit_price: f64,
        reason: ExitReason,
    ) {
        let quantity = f64::from(position.quantity);
        let pnl_usd = (exit_price - position.entry_price) * quantity;
        let pnl_eur = pnl_usd * self.config.rate - self.config.commission_per_trade_eur
            + position.tp1_pnl;
        self.cash += quantity * exit_price * self.config.rate - self.config.commission_per_trade_eur;

        let r_multiple = if position.risk_amount > 0.0 {
            pnl_eur / position.risk_amount
        } else {
            0.0
        };
        tracing::info!(
            symbol = %position.symbol,
            %reason,
            pnl = format!("{pnl_eur:.2} EUR"),
            "Exited position on {date}"
        );
        self.trades.push(TradeOutcome {
            symbol: position.symbol,
            strategy: position.strategy,
            entry_date: position.entry_date,
            exit_date: date,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            exit_reason: reason,
            pnl_usd,
            pnl_eur,
            r_multiple,
            weeks_held: (date - position.entry_date).num_days() / 7,
            regime_at_entry: position.regime_at_entry,
        });
    }
}

/// Serialize the report next to the other run artifacts. The backtest always
/// produces a result file unless the directory itself is unwritable.
pub fn write_report(report: &BacktestReport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results dir: {}", dir.display()))?;
    let path = dir.join(format!(
        "backtest_{}_{}.json",
        report.start.format("%Y%m%d"),
        report.end.format("%Y%m%d")
    ));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create result file: {}", path.display()))?;
    serde_json::to_writer_pretty(file, report).context("Failed to serialize backtest report")?;
    Ok(path)
}
