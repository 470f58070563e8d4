//! Drawdown protection: a persisted state machine that throttles risk after
//! losing streaks and halts trading on deep monthly drawdowns.
//!
//! | Trigger | Effect | Recovery |
//! |---|---|---|
//! | 3 consecutive losses | risk ×0.5 | 2 consecutive wins |
//! | 5 consecutive losses | risk ×0.5 and max 1 position | 3 consecutive wins |
//! | 6 % monthly drawdown | paused (paper only) | month rollover |
//! | 10 % monthly drawdown | stopped | manual reset |

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::data::user::UserStore;

const LOSSES_REDUCE_RISK: u32 = 3;
const LOSSES_CAP_POSITIONS: u32 = 5;
const WINS_RESTORE_RISK: u32 = 2;
const WINS_RESTORE_POSITIONS: u32 = 3;
const MONTHLY_DD_PAUSE: f64 = 6.0;
const MONTHLY_DD_STOP: f64 = 10.0;

const KEY_LOSSES: &str = "drawdown_consecutive_losses";
const KEY_WINS: &str = "drawdown_consecutive_wins";
const KEY_RISK_REDUCED: &str = "drawdown_risk_reduced";
const KEY_POSITION_CAPPED: &str = "drawdown_position_capped";
const KEY_STOPPED: &str = "drawdown_stopped";
const KEY_MONTH_EQUITY: &str = "drawdown_monthly_start_equity";
const KEY_MONTH_DATE: &str = "drawdown_monthly_start_date";
const KEY_EQUITY: &str = "drawdown_current_equity";

#[derive(Debug, Clone, Serialize)]
pub struct ProtectionStatus {
    pub risk_multiplier: f64,
    pub max_positions: u32,
    pub is_paused: bool,
    pub is_stopped: bool,
    pub is_trading_allowed: bool,
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
    pub monthly_drawdown_percent: f64,
    pub reasons: Vec<String>,
}

pub struct DrawdownProtection {
    consecutive_losses: u32,
    consecutive_wins: u32,
    risk_reduced: bool,
    position_capped: bool,
    stopped: bool,
    monthly_start_equity: Option<f64>,
    monthly_start: Option<NaiveDate>,
    current_equity: Option<f64>,
    store: Option<Arc<UserStore>>,
}

impl DrawdownProtection {
    /// Ephemeral instance (backtests).
    pub fn in_memory() -> Self {
        Self {
            consecutive_losses: 0,
            consecutive_wins: 0,
            risk_reduced: false,
            position_capped: false,
            stopped: false,
            monthly_start_equity: None,
            monthly_start: None,
            current_equity: None,
            store: None,
        }
    }

    /// Load persisted state from the user store; missing keys start clean.
    pub fn load(store: Arc<UserStore>) -> Self {
        let mut protection = Self::in_memory();
        protection.consecutive_losses = store.setting_u32(KEY_LOSSES).unwrap_or(0);
        protection.consecutive_wins = store.setting_u32(KEY_WINS).unwrap_or(0);
        protection.risk_reduced = store.setting_bool(KEY_RISK_REDUCED).unwrap_or(false);
        protection.position_capped = store.setting_bool(KEY_POSITION_CAPPED).unwrap_or(false);
        protection.stopped = store.setting_bool(KEY_STOPPED).unwrap_or(false);
        protection.monthly_start_equity = store.setting_f64(KEY_MONTH_EQUITY);
        protection.monthly_start = store
            .setting(KEY_MONTH_DATE)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok());
        protection.current_equity = store.setting_f64(KEY_EQUITY);
        protection.store = Some(store);
        protection
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let result = store
            .set_setting(KEY_LOSSES, &self.consecutive_losses.to_string())
            .and_then(|()| store.set_setting(KEY_WINS, &self.consecutive_wins.to_string()))
            .and_then(|()| store.set_setting(KEY_RISK_REDUCED, &self.risk_reduced.to_string()))
            .and_then(|()| {
                store.set_setting(KEY_POSITION_CAPPED, &self.position_capped.to_string())
            })
            .and_then(|()| store.set_setting(KEY_STOPPED, &self.stopped.to_string()));
        if let Err(e) = result {
            tracing::warn!("Could not persist drawdown protection state: {e:#}");
            return;
        }
        if let Some(equity) = self.monthly_start_equity {
            let _ = store.set_setting(KEY_MONTH_EQUITY, &equity.to_string());
        }
        if let Some(date) = self.monthly_start {
            let _ = store.set_setting(KEY_MONTH_DATE, &date.to_string());
        }
        if let Some(equity) = self.current_equity {
            let _ = store.set_setting(KEY_EQUITY, &equity.to_string());
        }
    }

    /// Record a closed trade and advance the streak machinery.
    pub fn record_trade_result(&mut self, is_winner: bool, pnl_eur: f64) {
        if is_winner {
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
            if self.risk_reduced && self.consecutive_wins >= WINS_RESTORE_RISK {
                self.risk_reduced = false;
                tracing::info!("Risk multiplier restored after winning streak");
            }
            if self.position_capped && self.consecutive_wins >= WINS_RESTORE_POSITIONS {
                self.position_capped = false;
                tracing::info!("Position cap lifted after winning streak");
            }
        } else {
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
            if self.consecutive_losses >= LOSSES_CAP_POSITIONS {
                self.position_capped = true;
                self.risk_reduced = true;
            } else if self.consecutive_losses >= LOSSES_REDUCE_RISK {
                self.risk_reduced = true;
            }
        }

        if let Some(equity) = self.current_equity.as_mut() {
            *equity += pnl_eur;
        }
        self.persist();
    }

    fn start_month(&mut self, equity: f64, today: NaiveDate) {
        self.monthly_start_equity = Some(equity);
        self.monthly_start = today.with_day(1);
        self.current_equity = Some(equity);
        tracing::info!(equity, "New month started for drawdown tracking");
    }

    /// Refresh equity; rolls the monthly baseline over when the month changes
    /// and latches the stop flag at 10 % drawdown.
    pub fn update_equity(&mut self, equity: f64, today: NaiveDate) {
        self.current_equity = Some(equity);
        match self.monthly_start {
            None => self.start_month(equity, today),
            Some(start) => {
                if (start.year(), start.month()) != (today.year(), today.month()) {
                    self.start_month(equity, today);
                }
            }
        }
        if self.monthly_drawdown_percent() >= MONTHLY_DD_STOP {
            if !self.stopped {
                tracing::warn!("Monthly drawdown at stop threshold; trading halted");
            }
            self.stopped = true;
        }
        self.persist();
    }

    /// Current monthly drawdown, floored at zero (gains don't count).
    pub fn monthly_drawdown_percent(&self) -> f64 {
        let (Some(start), Some(current)) = (self.monthly_start_equity, self.current_equity) else {
            return 0.0;
        };
        if start <= 0.0 {
            return 0.0;
        }
        ((start - current) / start * 100.0).max(0.0)
    }

    /// Current restrictions given the configured position limit.
    pub fn status(&self, configured_max_positions: u32) -> ProtectionStatus {
        let mut reasons = Vec::new();
        let mut risk_multiplier = 1.0;
        let mut max_positions = configured_max_positions;

        if self.risk_reduced {
            risk_multiplier = 0.5;
            reasons.push(format!(
                "{LOSSES_REDUCE_RISK}+ consecutive losses: risk halved"
            ));
        }
        if self.position_capped {
            max_positions = 1;
            reasons.push(format!(
                "{LOSSES_CAP_POSITIONS}+ consecutive losses: max 1 position"
            ));
        }

        let monthly_dd = self.monthly_drawdown_percent();
        let is_paused = monthly_dd >= MONTHLY_DD_PAUSE && !self.stopped;
        if self.stopped {
            reasons.push("monthly drawdown at stop threshold: all trading stopped".to_string());
        } else if is_paused {
            reasons.push("monthly drawdown at pause threshold: paper trading only".to_string());
        }

        ProtectionStatus {
            risk_multiplier,
            max_positions,
            is_paused,
            is_stopped: self.stopped,
            is_trading_allowed: !self.stopped,
            consecutive_losses: self.consecutive_losses,
            consecutive_wins: self.consecutive_wins,
            monthly_drawdown_percent: monthly_dd,
            reasons,
        }
    }

    /// Manual reset after review; the only way out of the stopped state.
    pub fn reset(&mut self) {
        self.consecutive_losses = 0;
        self.consecutive_wins = 0;
        self.risk_reduced = false;
        self.position_capped = false;
        self.stopped = false;
        self.persist();
        tracing::info!("Drawdown protection state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_POSITIONS: u32 = 5;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn loss_streak_walks_through_both_tiers() {
        let mut p = DrawdownProtection::in_memory();
        p.update_equity(10_000.0, d(2024, 3, 1));

        // 3 losses: risk halves, positions untouched
        for _ in 0..3 {
            p.record_trade_result(false, -200.0);
        }
        let status = p.status(MAX_POSITIONS);
        assert!((status.risk_multiplier - 0.5).abs() < f64::EPSILON);
        assert_eq!(status.max_positions, MAX_POSITIONS);

        // 4th loss: unchanged
        p.record_trade_result(false, -200.0);
        let status = p.status(MAX_POSITIONS);
        assert!((status.risk_multiplier - 0.5).abs() < f64::EPSILON);
        assert_eq!(status.max_positions, MAX_POSITIONS);

        // 5th loss: single-position cap kicks in
        p.record_trade_result(false, -200.0);
        let status = p.status(MAX_POSITIONS);
        assert_eq!(status.max_positions, 1);
        assert!((status.risk_multiplier - 0.5).abs() < f64::EPSILON);

        // 2 wins: risk restored, cap still on
        p.record_trade_result(true, 100.0);
        p.record_trade_result(true, 100.0);
        let status = p.status(MAX_POSITIONS);
        assert!((status.risk_multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(status.max_positions, 1);

        // 3rd win: everything restored
        p.record_trade_result(true, 100.0);
        let status = p.status(MAX_POSITIONS);
        assert_eq!(status.max_positions, MAX_POSITIONS);
        assert!((status.risk_multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn one_win_does_not_restore_risk() {
        let mut p = DrawdownProtection::in_memory();
        for _ in 0..3 {
            p.record_trade_result(false, -50.0);
        }
        p.record_trade_result(true, 50.0);
        let status = p.status(MAX_POSITIONS);
        assert!((status.risk_multiplier - 0.5).abs() < f64::EPSILON);
        assert_eq!(status.consecutive_losses, 0);
        assert_eq!(status.consecutive_wins, 1);
    }

    #[test]
    fn monthly_drawdown_pause_and_stop() {
        let mut p = DrawdownProtection::in_memory();
        p.update_equity(10_000.0, d(2024, 3, 1));

        p.update_equity(9_350.0, d(2024, 3, 15)); // -6.5%
        let status = p.status(MAX_POSITIONS);
        assert!(status.is_paused);
        assert!(!status.is_stopped);
        assert!(status.is_trading_allowed);

        p.update_equity(8_900.0, d(2024, 3, 20)); // -11%
        let status = p.status(MAX_POSITIONS);
        assert!(status.is_stopped);
        assert!(!status.is_trading_allowed);
    }

    #[test]
    fn stop_latches_until_manual_reset() {
        let mut p = DrawdownProtection::in_memory();
        p.update_equity(10_000.0, d(2024, 3, 1));
        p.update_equity(8_900.0, d(2024, 3, 20));
        assert!(p.status(MAX_POSITIONS).is_stopped);

        // Equity recovery does not clear the stop
        p.update_equity(10_500.0, d(2024, 3, 25));
        assert!(p.status(MAX_POSITIONS).is_stopped);

        p.reset();
        assert!(!p.status(MAX_POSITIONS).is_stopped);
    }

    #[test]
    fn month_rollover_resets_baseline() {
        let mut p = DrawdownProtection::in_memory();
        p.update_equity(10_000.0, d(2024, 3, 1));
        p.update_equity(9_400.0, d(2024, 3, 29)); // -6%: paused
        assert!(p.status(MAX_POSITIONS).is_paused);

        // New month: baseline resets to current equity, pause clears
        p.update_equity(9_400.0, d(2024, 4, 1));
        let status = p.status(MAX_POSITIONS);
        assert!(!status.is_paused);
        assert!((status.monthly_drawdown_percent - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gains_do_not_count_as_drawdown() {
        let mut p = DrawdownProtection::in_memory();
        p.update_equity(10_000.0, d(2024, 3, 1));
        p.update_equity(11_000.0, d(2024, 3, 15));
        assert!((p.monthly_drawdown_percent() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn state_persists_through_user_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(UserStore::open(dir.path().join("user.sqlite")).unwrap());

        {
            let mut p = DrawdownProtection::load(store.clone());
            p.update_equity(10_000.0, d(2024, 3, 1));
            for _ in 0..3 {
                p.record_trade_result(false, -100.0);
            }
        }

        let p = DrawdownProtection::load(store);
        let status = p.status(MAX_POSITIONS);
        assert_eq!(status.consecutive_losses, 3);
        assert!((status.risk_multiplier - 0.5).abs() < f64::EPSILON);
        assert!((p.monthly_drawdown_percent() - 3.0).abs() < 1e-9);
    }
}
