//! Long-running position monitor.
//!
//! Polls vendor snapshots for open journal positions, raises stop/target
//! alerts de-duplicated per (symbol, level type) through the user store, and
//! emits a heartbeat line every few cycles while positions are open.
//! Delivery of notifications is someone else's job; the monitor logs and
//! records.

use std::sync::Arc;

use anyhow::Result;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::data::polygon::DataProvider;
use crate::data::user::{JournalPosition, UserStore};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Heartbeat every N cycles while holding positions.
    pub heartbeat_every: u32,
    /// Warn when price is within this percentage of the stop.
    pub stop_proximity_pct: f64,
    /// Warn when price is within this percentage of the target.
    pub target_proximity_pct: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            heartbeat_every: 12,
            stop_proximity_pct: 1.0,
            target_proximity_pct: 1.0,
        }
    }
}

/// A raised (and not previously sent) alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub symbol: String,
    pub level_type: String,
    pub message: String,
}

/// Classify the price against the position's levels. The tracked trailing
/// stop takes precedence over the entry stop.
fn evaluate_position(
    position: &JournalPosition,
    last_price: f64,
    config: &MonitorConfig,
) -> Option<(String, String)> {
    let stop = position.current_stop_loss.or(position.stop_loss);

    if let Some(stop) = stop {
        if last_price <= stop {
            return Some((
                "stop_hit".to_string(),
                format!(
                    "{}: price {last_price:.2} at or below stop {stop:.2}, exit now",
                    position.symbol
                ),
            ));
        }
        if last_price <= stop * (1.0 + config.stop_proximity_pct / 100.0) {
            return Some((
                "stop_near".to_string(),
                format!(
                    "{}: price {last_price:.2} within {:.1}% of stop {stop:.2}",
                    position.symbol, config.stop_proximity_pct
                ),
            ));
        }
    }

    if let Some(target) = position.target_price {
        if last_price >= target {
            return Some((
                "target_hit".to_string(),
                format!(
                    "{}: price {last_price:.2} reached target {target:.2}",
                    position.symbol
                ),
            ));
        }
        if last_price >= target * (1.0 - config.target_proximity_pct / 100.0) {
            return Some((
                "target_near".to_string(),
                format!(
                    "{}: price {last_price:.2} within {:.1}% of target {target:.2}",
                    position.symbol, config.target_proximity_pct
                ),
            ));
        }
    }

    None
}

pub struct PriceMonitor {
    provider: Arc<dyn DataProvider>,
    user: Arc<UserStore>,
    config: MonitorConfig,
}

impl PriceMonitor {
    pub fn new(provider: Arc<dyn DataProvider>, user: Arc<UserStore>, config: MonitorConfig) -> Self {
        Self {
            provider,
            user,
            config,
        }
    }

    /// One polling pass over the open positions. Per-symbol failures are
    /// logged and skipped; the cycle continues.
    pub async fn check_cycle(&self) -> Result<Vec<Alert>> {
        let positions = self.user.open_positions()?;
        let mut alerts = Vec::new();

        for position in &positions {
            let snapshot = match self.provider.get_latest_snapshot(&position.symbol).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    tracing::debug!(symbol = %position.symbol, "No snapshot available");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(symbol = %position.symbol, "Snapshot failed: {e:#}");
                    continue;
                }
            };

            let Some((level_type, message)) =
                evaluate_position(position, snapshot.last_price, &self.config)
            else {
                continue;
            };

            if self.user.was_alert_sent(&position.symbol, &level_type)? {
                continue;
            }
            self.user.mark_alert_sent(&position.symbol, &level_type)?;
            tracing::warn!(alert = %message, "Price alert");
            alerts.push(Alert {
                symbol: position.symbol.clone(),
                level_type,
                message,
            });
        }

        Ok(alerts)
    }

    /// Poll until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            "Monitor started"
        );
        let mut cycles: u32 = 0;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Monitor cancelled; shutting down");
                    return Ok(());
                }
                () = sleep(self.config.interval) => {}
            }

            cycles += 1;
            match self.check_cycle().await {
                Ok(alerts) if !alerts.is_empty() => {
                    tracing::info!("Cycle {cycles}: {} new alert(s)", alerts.len());
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Monitor cycle failed: {e:#}"),
            }

            if self.config.heartbeat_every > 0 && cycles % self.config.heartbeat_every == 0 {
                match self.user.open_positions() {
                    Ok(positions) if !positions.is_empty() => {
                        tracing::info!(
                            open_positions = positions.len(),
                            "Monitor heartbeat: cycle {cycles}"
                        );
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::polygon::{Snapshot, TickerDetails, Timeframe};
    use crate::data::Bar;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn position(stop: f64, target: f64) -> JournalPosition {
        JournalPosition {
            id: 1,
            symbol: "NVDA".into(),
            strategy: Some("momentum".into()),
            entry_date: d(2024, 3, 5),
            entry_price: 100.0,
            quantity: 10,
            stop_loss: Some(stop),
            current_stop_loss: Some(stop),
            target_price: Some(target),
        }
    }

    #[test]
    fn stop_hit_beats_everything() {
        let config = MonitorConfig::default();
        let (level, _) = evaluate_position(&position(95.0, 110.0), 94.0, &config).unwrap();
        assert_eq!(level, "stop_hit");
    }

    #[test]
    fn stop_proximity_warns() {
        let config = MonitorConfig::default();
        let (level, _) = evaluate_position(&position(95.0, 110.0), 95.5, &config).unwrap();
        assert_eq!(level, "stop_near");
    }

    #[test]
    fn target_levels() {
        let config = MonitorConfig::default();
        let (level, _) = evaluate_position(&position(95.0, 110.0), 110.5, &config).unwrap();
        assert_eq!(level, "target_hit");
        let (level, _) = evaluate_position(&position(95.0, 110.0), 109.5, &config).unwrap();
        assert_eq!(level, "target_near");
    }

    #[test]
    fn calm_price_raises_nothing() {
        let config = MonitorConfig::default();
        assert!(evaluate_position(&position(95.0, 110.0), 102.0, &config).is_none());
    }

    #[test]
    fn trailing_stop_takes_precedence() {
        let config = MonitorConfig::default();
        let mut p = position(95.0, 120.0);
        p.current_stop_loss = Some(105.0);
        // Above the entry stop but below the tracked trailing stop
        let (level, _) = evaluate_position(&p, 104.0, &config).unwrap();
        assert_eq!(level, "stop_hit");
    }

    struct FakeProvider {
        prices: HashMap<String, f64>,
    }

    #[async_trait]
    impl DataProvider for FakeProvider {
        async fn get_historical(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
            _timeframe: Timeframe,
        ) -> Result<Vec<Bar>> {
            Ok(Vec::new())
        }

        async fn get_latest_snapshot(&self, symbol: &str) -> Result<Option<Snapshot>> {
            Ok(self.prices.get(symbol).map(|price| Snapshot {
                last_price: *price,
                updated_utc: 0,
            }))
        }

        async fn get_ticker_details(&self, _symbol: &str) -> Result<Option<TickerDetails>> {
            Ok(None)
        }
    }

    fn monitor_with(price: f64) -> (tempfile::TempDir, PriceMonitor, Arc<UserStore>) {
        let dir = tempfile::tempdir().unwrap();
        let user = Arc::new(UserStore::open(dir.path().join("user.sqlite")).unwrap());
        user.record_entry("NVDA", "momentum", d(2024, 3, 5), 100.0, 10, 95.0, 110.0)
            .unwrap();
        let mut prices = HashMap::new();
        prices.insert("NVDA".to_string(), price);
        let monitor = PriceMonitor::new(
            Arc::new(FakeProvider { prices }),
            user.clone(),
            MonitorConfig::default(),
        );
        (dir, monitor, user)
    }

    #[tokio::test]
    async fn alert_raised_once_then_deduplicated() {
        let (_dir, monitor, _user) = monitor_with(94.0);

        let alerts = monitor.check_cycle().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level_type, "stop_hit");

        // Same condition on the next cycle: suppressed
        let alerts = monitor.check_cycle().await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn quiet_market_raises_nothing() {
        let (_dir, monitor, _user) = monitor_with(102.0);
        assert!(monitor.check_cycle().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_on_cancellation() {
        let (_dir, monitor, _user) = monitor_with(102.0);
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };
        tokio::time::advance(Duration::from_millis(10)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
