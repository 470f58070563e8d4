//! User store: settings, trade journal, executed orders, signal history, and
//! alert de-duplication keys, in a single SQLite file.
//!
//! Connections are opened per call and writes run in transactions. Schema
//! upgrades are embedded refinery migrations applied idempotently at open.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::PortfolioConfig;

mod embedded {
    refinery::embed_migrations!("migrations");
}

pub struct UserStore {
    path: PathBuf,
}

/// Open journal row, as the portfolio manager and monitor see it.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalPosition {
    pub id: i64,
    pub symbol: String,
    pub strategy: Option<String>,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub quantity: u32,
    pub stop_loss: Option<f64>,
    pub current_stop_loss: Option<f64>,
    pub target_price: Option<f64>,
}

/// Position-sizing method. Legacy spellings (`slots`, `slot-based`) are
/// accepted on read and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizingMethod {
    #[default]
    RiskBased,
    SlotBased,
}

impl FromStr for SizingMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "risk_based" => Ok(SizingMethod::RiskBased),
            "slot_based" | "slot-based" | "slots" => Ok(SizingMethod::SlotBased),
            _ => Err(()),
        }
    }
}

/// Typed view of the settings table, with config defaults filled in.
#[derive(Debug, Clone)]
pub struct Settings {
    pub total_capital: f64,
    pub stock_allocation: f64,
    pub max_stock_positions: u32,
    pub risk_per_trade_eur: Option<f64>,
    pub risk_percent: Option<f64>,
    pub sizing_method: SizingMethod,
    pub slots_count: u32,
    pub max_symbols_per_sector: u32,
    /// Raise strategy stops to support/volume-profile levels when tighter.
    pub use_smart_stops: bool,
}

impl Settings {
    pub fn cash_reserve(&self) -> f64 {
        1.0 - self.stock_allocation
    }

    pub fn load(store: &UserStore, defaults: &PortfolioConfig) -> Settings {
        Settings {
            total_capital: store
                .setting_f64("portfolio_total_capital")
                .unwrap_or(defaults.total_capital),
            stock_allocation: store
                .setting_f64("portfolio_stock_allocation")
                .unwrap_or(defaults.stock_allocation),
            max_stock_positions: store
                .setting_u32("portfolio_max_stock_positions")
                .unwrap_or(defaults.max_stock_positions),
            risk_per_trade_eur: store.setting_f64("risk_per_stock_trade"),
            risk_percent: store.setting_f64("risk_percent"),
            sizing_method: store
                .setting("sizing_method")
                .ok()
                .flatten()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            slots_count: store.setting_u32("slots_count").unwrap_or(3).max(1),
            max_symbols_per_sector: store
                .setting_u32("max_symbols_per_sector")
                .unwrap_or(defaults.max_symbols_per_sector),
            use_smart_stops: store.setting_bool("use_smart_stop_loss").unwrap_or(false),
        }
    }
}

impl UserStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create user store dir: {}", parent.display())
                })?;
            }
        }
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let mut conn = store.conn()?;
        embedded::migrations::runner()
            .run(&mut conn)
            .context("User store migrations failed")?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .with_context(|| format!("Failed to open user store: {}", self.path.display()))
    }

    // -- settings -----------------------------------------------------------

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM user_settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("Settings read failed")
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_settings (key, value, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = CURRENT_TIMESTAMP",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM user_settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Typed decoders: unparseable values read as absent.
    pub fn setting_f64(&self, key: &str) -> Option<f64> {
        self.setting(key).ok().flatten()?.trim().parse().ok()
    }

    pub fn setting_u32(&self, key: &str) -> Option<u32> {
        self.setting(key).ok().flatten()?.trim().parse().ok()
    }

    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        match self.setting(key).ok().flatten()?.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn setting_datetime(&self, key: &str) -> Option<NaiveDateTime> {
        let raw = self.setting(key).ok().flatten()?;
        NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S%.f").ok()
    }

    // -- watchlist ----------------------------------------------------------

    pub fn add_to_watchlist(&self, symbol: &str, notes: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO watchlist (symbol, notes) VALUES (?1, ?2)",
            params![symbol.to_uppercase(), notes],
        )?;
        Ok(())
    }

    pub fn remove_from_watchlist(&self, symbol: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM watchlist WHERE symbol = ?1",
            params![symbol.to_uppercase()],
        )?;
        Ok(())
    }

    pub fn watchlist(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT symbol FROM watchlist ORDER BY symbol")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Watchlist read failed")
    }

    // -- trade journal ------------------------------------------------------

    /// Register an entry; returns the journal row id.
    pub fn record_entry(
        &self,
        symbol: &str,
        strategy: &str,
        entry_date: NaiveDate,
        entry_price: f64,
        quantity: u32,
        stop_loss: f64,
        target_price: f64,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trading_journal
                 (symbol, strategy, entry_date, entry_price, quantity,
                  stop_loss, current_stop_loss, target_price, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, 'open', CURRENT_TIMESTAMP)",
            params![
                symbol.to_uppercase(),
                strategy,
                entry_date.to_string(),
                entry_price,
                quantity,
                stop_loss,
                target_price
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn open_positions(&self) -> Result<Vec<JournalPosition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, symbol, strategy, entry_date, entry_price, quantity,
                    stop_loss, current_stop_loss, target_price
             FROM trading_journal
             WHERE status = 'open'
             ORDER BY entry_date, id",
        )?;
        let rows = stmt.query_map([], |row| {
            let raw_date: String = row.get(3)?;
            Ok(JournalPosition {
                id: row.get(0)?,
                symbol: row.get(1)?,
                strategy: row.get(2)?,
                entry_date: parse_journal_date(&raw_date),
                entry_price: row.get(4)?,
                quantity: row.get::<_, i64>(5)?.max(0) as u32,
                stop_loss: row.get(6)?,
                current_stop_loss: row.get(7)?,
                target_price: row.get(8)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Journal read failed")
    }

    /// Ratchet the tracked stop for an open position. Never lowers it.
    pub fn update_position_stop(&self, symbol: &str, new_stop: f64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE trading_journal
             SET current_stop_loss = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE symbol = ?1 AND status = 'open'
               AND (current_stop_loss IS NULL OR current_stop_loss < ?2)",
            params![symbol.to_uppercase(), new_stop],
        )?;
        Ok(changed > 0)
    }

    pub fn close_position(
        &self,
        symbol: &str,
        exit_date: NaiveDate,
        exit_price: f64,
        reason: &str,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE trading_journal
             SET status = 'closed', exit_date = ?2, exit_price = ?3, exit_reason = ?4,
                 updated_at = CURRENT_TIMESTAMP
             WHERE symbol = ?1 AND status = 'open'",
            params![symbol.to_uppercase(), exit_date.to_string(), exit_price, reason],
        )?;
        tx.execute(
            "DELETE FROM alert_sent WHERE symbol = ?1",
            params![symbol.to_uppercase()],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -- executed orders ----------------------------------------------------

    pub fn record_order(
        &self,
        symbol: &str,
        order_type: &str,
        price: f64,
        quantity: u32,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO executed_orders (symbol, order_type, price, quantity)
             VALUES (?1, ?2, ?3, ?4)",
            params![symbol.to_uppercase(), order_type, price, quantity],
        )?;
        Ok(())
    }

    // -- signal history -----------------------------------------------------

    pub fn record_signal(
        &self,
        symbol: &str,
        signal_date: NaiveDate,
        strategy: &str,
        entry_price: f64,
        stop_loss: f64,
        position_size: u32,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO signal_history
                 (symbol, signal_date, strategy, entry_price, stop_loss, position_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                symbol.to_uppercase(),
                signal_date.to_string(),
                strategy,
                entry_price,
                stop_loss,
                position_size
            ],
        )?;
        Ok(())
    }

    // -- alert de-duplication -----------------------------------------------

    pub fn was_alert_sent(&self, symbol: &str, level_type: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM alert_sent WHERE symbol = ?1 AND level_type = ?2",
                params![symbol.to_uppercase(), level_type],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn mark_alert_sent(&self, symbol: &str, level_type: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO alert_sent (symbol, level_type) VALUES (?1, ?2)",
            params![symbol.to_uppercase(), level_type],
        )?;
        Ok(())
    }

    pub fn clear_alerts(&self, symbol: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM alert_sent WHERE symbol = ?1",
            params![symbol.to_uppercase()],
        )?;
        Ok(())
    }
}

fn parse_journal_date(raw: &str) -> NaiveDate {
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(dir.path().join("user.sqlite")).unwrap();
        (dir, store)
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.sqlite");
        UserStore::open(&path).unwrap();
        // Re-open runs the runner again without error
        UserStore::open(&path).unwrap();
    }

    #[test]
    fn settings_round_trip_and_typed_decoders() {
        let (_dir, store) = open_store();
        assert!(store.setting("missing").unwrap().is_none());

        store.set_setting("portfolio_total_capital", "12500.5").unwrap();
        assert_eq!(store.setting_f64("portfolio_total_capital"), Some(12500.5));

        store.set_setting("portfolio_total_capital", "9000").unwrap();
        assert_eq!(store.setting_f64("portfolio_total_capital"), Some(9000.0));

        store.set_setting("bad_number", "not-a-number").unwrap();
        assert_eq!(store.setting_f64("bad_number"), None);

        store.set_setting("flag", "True").unwrap();
        assert_eq!(store.setting_bool("flag"), Some(true));
    }

    #[test]
    fn settings_typed_view_with_defaults() {
        let (_dir, store) = open_store();
        let defaults = PortfolioConfig::default();

        let settings = Settings::load(&store, &defaults);
        assert!((settings.total_capital - 10_000.0).abs() < f64::EPSILON);
        assert_eq!(settings.sizing_method, SizingMethod::RiskBased);
        assert!((settings.cash_reserve() - 0.10).abs() < 1e-12);

        store.set_setting("portfolio_total_capital", "2000").unwrap();
        store.set_setting("sizing_method", "slot-based").unwrap();
        store.set_setting("portfolio_max_stock_positions", "3").unwrap();

        let settings = Settings::load(&store, &defaults);
        assert!((settings.total_capital - 2000.0).abs() < f64::EPSILON);
        assert_eq!(settings.sizing_method, SizingMethod::SlotBased);
        assert_eq!(settings.max_stock_positions, 3);
    }

    #[test]
    fn sizing_method_accepts_legacy_spellings() {
        assert_eq!("slots".parse(), Ok(SizingMethod::SlotBased));
        assert_eq!("slot-based".parse(), Ok(SizingMethod::SlotBased));
        assert_eq!("slot_based".parse(), Ok(SizingMethod::SlotBased));
        assert_eq!("risk_based".parse(), Ok(SizingMethod::RiskBased));
        assert!("banana".parse::<SizingMethod>().is_err());
    }

    #[test]
    fn journal_lifecycle() {
        let (_dir, store) = open_store();

        store
            .record_entry("nvda", "momentum", d(2024, 3, 5), 100.0, 10, 95.0, 110.0)
            .unwrap();
        let open = store.open_positions().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "NVDA");
        assert_eq!(open[0].current_stop_loss, Some(95.0));

        // Trailing ratchet: raise sticks, lower is ignored
        assert!(store.update_position_stop("NVDA", 98.0).unwrap());
        assert!(!store.update_position_stop("NVDA", 90.0).unwrap());
        let open = store.open_positions().unwrap();
        assert_eq!(open[0].current_stop_loss, Some(98.0));

        store
            .close_position("NVDA", d(2024, 3, 12), 104.0, "trailing_stop")
            .unwrap();
        assert!(store.open_positions().unwrap().is_empty());
    }

    #[test]
    fn alert_dedup_per_symbol_and_level() {
        let (_dir, store) = open_store();

        assert!(!store.was_alert_sent("AAPL", "stop_loss").unwrap());
        store.mark_alert_sent("AAPL", "stop_loss").unwrap();
        assert!(store.was_alert_sent("AAPL", "stop_loss").unwrap());
        // Different level type is independent
        assert!(!store.was_alert_sent("AAPL", "target").unwrap());
        // Marking twice is a no-op
        store.mark_alert_sent("AAPL", "stop_loss").unwrap();

        store.clear_alerts("AAPL").unwrap();
        assert!(!store.was_alert_sent("AAPL", "stop_loss").unwrap());
    }

    #[test]
    fn closing_position_clears_its_alerts() {
        let (_dir, store) = open_store();
        store
            .record_entry("AMD", "breakout", d(2024, 3, 5), 100.0, 5, 95.0, 110.0)
            .unwrap();
        store.mark_alert_sent("AMD", "stop_loss").unwrap();

        store
            .close_position("AMD", d(2024, 3, 8), 96.0, "stop_loss")
            .unwrap();
        assert!(!store.was_alert_sent("AMD", "stop_loss").unwrap());
    }

    #[test]
    fn watchlist_round_trip() {
        let (_dir, store) = open_store();
        store.add_to_watchlist("msft", "").unwrap();
        store.add_to_watchlist("AAPL", "core holding").unwrap();
        assert_eq!(store.watchlist().unwrap(), vec!["AAPL", "MSFT"]);
        store.remove_from_watchlist("AAPL").unwrap();
        assert_eq!(store.watchlist().unwrap(), vec!["MSFT"]);
    }
}
