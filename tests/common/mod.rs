#![allow(dead_code)]

//! Shared fixtures: synthetic bar generation and a seeded on-disk world.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::sync::Arc;

use swingdesk::config::{FilterConfig, PortfolioConfig};
use swingdesk::data::market::MarketStore;
use swingdesk::data::user::{Settings, UserStore};
use swingdesk::data::Bar;
use swingdesk::portfolio::PortfolioManager;

/// Bars over consecutive weekdays: open tracks the previous close, high/low
/// bracket the move by half a point.
pub fn bars_from_closes(symbol: &str, start: NaiveDate, closes: &[f64]) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(closes.len());
    let mut date = start;
    let mut prev_close = closes.first().copied().unwrap_or(0.0);
    for &close in closes {
        while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            date += Duration::days(1);
        }
        let open = prev_close;
        bars.push(Bar {
            date,
            symbol: symbol.to_string(),
            open,
            high: open.max(close) + 0.5,
            low: (open.min(close) - 0.5).max(0.0),
            close,
            volume: 1_000_000,
        });
        prev_close = close;
        date += Duration::days(1);
    }
    bars
}

/// Linear ramp of closes.
pub fn ramp(base: f64, step: f64, len: usize) -> Vec<f64> {
    (0..len).map(|i| base + i as f64 * step).collect()
}

pub struct World {
    pub store: Arc<MarketStore>,
    pub user: Arc<UserStore>,
    _dir: tempfile::TempDir,
}

impl World {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = MarketStore::open(dir.path()).unwrap();
        let user = Arc::new(UserStore::open(dir.path().join("user.sqlite")).unwrap());
        Self {
            store,
            user,
            _dir: dir,
        }
    }

    pub fn seed(&self, symbol: &str, start: NaiveDate, closes: &[f64]) {
        self.store
            .insert(&bars_from_closes(symbol, start, closes))
            .unwrap();
    }

    pub fn portfolio_manager(&self) -> PortfolioManager {
        let settings = Settings::load(&self.user, &PortfolioConfig::default());
        PortfolioManager::new(
            self.store.clone(),
            settings,
            FilterConfig::default(),
            20.0,
        )
    }
}

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}
