//! Ingestion orchestrator: walks the watchlist, chooses per-symbol date
//! ranges, fetches with exponential-backoff retries, validates, and upserts
//! into the market store.
//!
//! Concurrency is plan-tier batching; the provider's token bucket remains the
//! authoritative throttle whatever the batch width.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::market::MarketStore;
use super::polygon::{DataProvider, Timeframe};
use crate::config::ProviderConfig;

const MAX_RETRIES: u32 = 4;
const BACKOFF_BASE_SECS: u64 = 2;

/// Result of one full update pass, for the CLI summary line.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub updated: usize,
    pub total: usize,
    pub failed: Vec<String>,
}

impl UpdateOutcome {
    pub fn summary(&self) -> String {
        format!("{}/{} symbols updated", self.updated, self.total)
    }
}

/// Parse a watchlist file: one ticker per line, `#` comments, blank lines
/// skipped, symbols uppercased.
pub fn parse_watchlist(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_uppercase)
        .collect()
}

/// Per-symbol fetch window: resume from the stored history, or backfill
/// `historical_years` when the symbol is new or a full refresh is forced.
fn plan_range(
    last_stored: Option<NaiveDate>,
    today: NaiveDate,
    historical_years: u32,
    force_full: bool,
) -> (NaiveDate, NaiveDate) {
    let backfill_start = today - Duration::days(i64::from(historical_years) * 365);
    let start = if force_full {
        backfill_start
    } else {
        match last_stored {
            Some(last) => last + Duration::days(1),
            None => backfill_start,
        }
    };
    (start, today)
}

pub struct DataUpdater {
    provider: Arc<dyn DataProvider>,
    store: Arc<MarketStore>,
    historical_years: u32,
    batch_size: usize,
    watchlist_path: PathBuf,
}

impl DataUpdater {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        store: Arc<MarketStore>,
        config: &ProviderConfig,
    ) -> Self {
        Self {
            provider,
            store,
            historical_years: config.historical_years,
            batch_size: config.plan.batch_size(),
            watchlist_path: config.symbols_file.clone(),
        }
    }

    pub fn load_watchlist(&self) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(&self.watchlist_path).with_context(|| {
            format!("Watchlist file not found: {}", self.watchlist_path.display())
        })?;
        Ok(parse_watchlist(&content))
    }

    async fn fetch_with_retry(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<crate::data::Bar>> {
        let mut last_error = None;
        for attempt in 1..=MAX_RETRIES {
            match self
                .provider
                .get_historical(symbol, start, end, Timeframe::Daily)
                .await
            {
                Ok(bars) => return Ok(bars),
                Err(e) => {
                    let wait = BACKOFF_BASE_SECS.pow(attempt);
                    tracing::warn!(
                        %symbol,
                        "Fetch attempt {attempt}/{MAX_RETRIES} failed: {e:#}; retrying in {wait}s"
                    );
                    last_error = Some(e);
                    if attempt < MAX_RETRIES {
                        sleep(std::time::Duration::from_secs(wait)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap().context(format!("{symbol}: all fetch attempts failed")))
    }

    /// Update one symbol. `Ok(true)` when the store changed or was already
    /// current; `Ok(false)` when the vendor had nothing for the window.
    pub async fn update_symbol(&self, symbol: &str, force_full: bool) -> Result<bool> {
        let today = Local::now().date_naive();
        let last = self.store.last_date(symbol);
        let (start, end) = plan_range(last, today, self.historical_years, force_full);

        if start > end {
            tracing::info!(%symbol, "Already up to date");
            return Ok(true);
        }
        if last.is_some() && !force_full {
            tracing::info!(%symbol, %start, "Incremental update");
        } else {
            tracing::info!(%symbol, %start, years = self.historical_years, "Full historical download");
        }

        let bars = self.fetch_with_retry(symbol, start, end).await?;
        if bars.is_empty() {
            tracing::warn!(%symbol, "No new data available");
            return Ok(false);
        }

        self.store.insert(&bars)?;
        tracing::info!(%symbol, "Inserted {} bars", bars.len());
        Ok(true)
    }

    /// Update every symbol (watchlist when none given), batched by plan tier.
    /// Per-symbol failures are recorded and the pass continues; cancellation
    /// stops between batches and returns the partial outcome.
    pub async fn update_all(
        &self,
        symbols: Option<Vec<String>>,
        force_full: bool,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        let symbols = match symbols {
            Some(s) => s,
            None => self.load_watchlist()?,
        };
        let mut outcome = UpdateOutcome {
            total: symbols.len(),
            ..UpdateOutcome::default()
        };
        tracing::info!("Starting data update for {} symbols", symbols.len());

        let pb = ProgressBar::new(symbols.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {prefix:.bold} [{bar:30.cyan/dim}] {pos}/{len}  {msg}")
                .expect("valid template")
                .progress_chars("=> "),
        );
        pb.set_prefix("update");

        for batch in symbols.chunks(self.batch_size.max(1)) {
            if cancel.is_cancelled() {
                tracing::warn!("Update cancelled; stopping after current batch");
                break;
            }

            let updates = batch.iter().map(|sym| self.update_symbol(sym, force_full));
            let results = futures::future::join_all(updates).await;

            for (symbol, result) in batch.iter().zip(results) {
                pb.set_message(symbol.clone());
                pb.inc(1);
                match result {
                    Ok(true) => outcome.updated += 1,
                    Ok(false) => outcome.failed.push(symbol.clone()),
                    Err(e) => {
                        tracing::error!(%symbol, "Update failed: {e:#}");
                        outcome.failed.push(symbol.clone());
                    }
                }
            }
        }

        pb.finish_with_message(outcome.summary());
        tracing::info!("Update complete: {}", outcome.summary());
        Ok(outcome)
    }
}
