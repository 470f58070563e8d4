//! Polygon.io daily-bar provider.
//!
//! Every outgoing request takes one token from the shared bucket; the bucket
//! is sized from the subscription plan (or an explicit requests-per-minute
//! override). A 429 sleeps 60 s and retries once. Other non-success statuses
//! surface as errors for the orchestrator to classify.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDate, Timelike};
use reqwest::Client;
use serde::Deserialize;
use tokio::time::sleep;

use super::rate_limit::TokenBucket;
use super::Bar;
use crate::config::ProviderConfig;

const BASE_URL: &str = "https://api.polygon.io";
const RATE_LIMIT_PAUSE_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Daily,
    Weekly,
}

impl Timeframe {
    fn path_segment(self) -> &'static str {
        match self {
            Timeframe::Daily => "day",
            Timeframe::Weekly => "week",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub last_price: f64,
    pub updated_utc: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerDetails {
    pub ticker: String,
    pub name: Option<String>,
    pub market_cap: Option<f64>,
    pub primary_exchange: Option<String>,
    #[serde(rename = "type")]
    pub ticker_type: Option<String>,
    pub currency_name: Option<String>,
    pub sic_code: Option<String>,
}

/// Seam between the ingestion orchestrator and the concrete vendor.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn get_historical(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>>;

    async fn get_latest_snapshot(&self, symbol: &str) -> Result<Option<Snapshot>>;

    async fn get_ticker_details(&self, symbol: &str) -> Result<Option<TickerDetails>>;
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AggsResponse {
    status: Option<String>,
    #[serde(rename = "resultsCount")]
    results_count: Option<u64>,
    results: Option<Vec<AggRow>>,
}

#[derive(Debug, Deserialize)]
struct AggRow {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    status: Option<String>,
    ticker: Option<SnapshotTicker>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotTicker {
    #[serde(rename = "lastTrade")]
    last_trade: Option<PricePoint>,
    min: Option<ClosePoint>,
    day: Option<ClosePoint>,
    #[serde(rename = "prevDay")]
    prev_day: Option<ClosePoint>,
    updated: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PricePoint {
    p: Option<f64>,
    t: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ClosePoint {
    c: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ReferenceResponse {
    status: Option<String>,
    results: Option<TickerDetails>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct PolygonProvider {
    client: Client,
    api_key: String,
    limiter: TokenBucket,
    batch_size: usize,
    base_url: String,
}

impl PolygonProvider {
    pub fn new(api_key: String, config: &ProviderConfig) -> Result<Self> {
        if api_key.is_empty() {
            bail!("Polygon API key required");
        }
        let rpm = config.effective_requests_per_minute();
        tracing::info!(
            plan = %config.plan,
            rpm,
            "Polygon provider initialized"
        );
        Ok(Self {
            client: Client::builder()
                .build()
                .context("Failed to build HTTP client")?,
            api_key,
            limiter: TokenBucket::for_requests_per_minute(rpm),
            batch_size: config.plan.batch_size(),
            base_url: BASE_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Fetch many symbols, chunked to the plan's batch size. The token bucket
    /// stays authoritative whatever the chunk size; symbols that fail resolve
    /// to an empty series and are logged.
    pub async fn get_multiple(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> HashMap<String, Vec<Bar>> {
        let mut results = HashMap::with_capacity(symbols.len());
        let total_batches = symbols.len().div_ceil(self.batch_size.max(1));

        for (batch_num, batch) in symbols.chunks(self.batch_size.max(1)).enumerate() {
            tracing::info!(
                "Fetching batch {}/{} ({} symbols)",
                batch_num + 1,
                total_batches,
                batch.len()
            );
            let fetches = batch
                .iter()
                .map(|sym| self.get_historical(sym, start, end, Timeframe::Daily));
            let batch_results = futures::future::join_all(fetches).await;
            for (symbol, result) in batch.iter().zip(batch_results) {
                match result {
                    Ok(bars) => {
                        results.insert(symbol.clone(), bars);
                    }
                    Err(e) => {
                        tracing::error!(%symbol, "Fetch failed: {e:#}");
                        results.insert(symbol.clone(), Vec::new());
                    }
                }
            }
        }
        results
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.limiter.wait_for_token().await;
        let resp = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .context("Request failed")?;

        let resp = if resp.status().as_u16() == 429 {
            tracing::warn!("Rate limit exceeded; pausing {RATE_LIMIT_PAUSE_SECS}s before retry");
            sleep(std::time::Duration::from_secs(RATE_LIMIT_PAUSE_SECS)).await;
            self.limiter.wait_for_token().await;
            self.client
                .get(url)
                .query(params)
                .send()
                .await
                .context("Retry after rate limit failed")?
        } else {
            resp
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
        }
        resp.json::<T>().await.context("JSON decode failed")
    }
}

#[async_trait]
impl DataProvider for PolygonProvider {
    async fn get_historical(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>> {
        let end = clamp_end_date(end, timeframe, Local::now());
        if end < start {
            tracing::warn!(%symbol, %start, %end, "End date precedes start date");
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/{}/{}/{}",
            self.base_url,
            symbol,
            timeframe.path_segment(),
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        );
        let params = [
            ("adjusted", "true".to_string()),
            ("sort", "asc".to_string()),
            ("limit", "50000".to_string()),
            ("apiKey", self.api_key.clone()),
        ];

        let body: AggsResponse = self.get_json(&url, &params).await?;
        if body.status.as_deref() != Some("OK") || body.results_count.unwrap_or(0) == 0 {
            tracing::warn!(
                %symbol,
                status = body.status.as_deref().unwrap_or("UNKNOWN"),
                results = body.results_count.unwrap_or(0),
                "No data in range {start}..{end}"
            );
            return Ok(Vec::new());
        }

        Ok(normalize_rows(symbol, &body.results.unwrap_or_default()))
    }

    async fn get_latest_snapshot(&self, symbol: &str) -> Result<Option<Snapshot>> {
        let url = format!(
            "{}/v2/snapshot/locale/us/markets/stocks/tickers/{}",
            self.base_url,
            symbol.to_uppercase()
        );
        let params = [("apiKey", self.api_key.clone())];

        let body: SnapshotResponse = self.get_json(&url, &params).await?;
        if body.status.as_deref() != Some("OK") {
            return Ok(None);
        }
        let ticker = body.ticker.unwrap_or_default();
        Ok(extract_snapshot(&ticker))
    }

    async fn get_ticker_details(&self, symbol: &str) -> Result<Option<TickerDetails>> {
        let url = format!(
            "{}/v3/reference/tickers/{}",
            self.base_url,
            symbol.to_uppercase()
        );
        let params = [("apiKey", self.api_key.clone())];

        let body: ReferenceResponse = self.get_json(&url, &params).await?;
        if body.status.as_deref() != Some("OK") {
            return Ok(None);
        }
        Ok(body.results)
    }
}

/// Daily bars: cap the end date to yesterday unless the local clock is past
/// the US close (22:00). Weekly bars: cap to last week.
fn clamp_end_date(end: NaiveDate, timeframe: Timeframe, now: DateTime<Local>) -> NaiveDate {
    let cap = match timeframe {
        Timeframe::Daily => {
            if now.hour() >= 22 {
                now.date_naive()
            } else {
                now.date_naive() - Duration::days(1)
            }
        }
        Timeframe::Weekly => now.date_naive() - Duration::days(7),
    };
    end.min(cap)
}

/// Map Polygon aggregate rows into bars, sorted ascending by date.
fn normalize_rows(symbol: &str, rows: &[AggRow]) -> Vec<Bar> {
    let mut bars: Vec<Bar> = rows
        .iter()
        .filter_map(|row| {
            let date = DateTime::from_timestamp_millis(row.t)?.date_naive();
            Some(Bar {
                date,
                symbol: symbol.to_string(),
                open: row.o,
                high: row.h,
                low: row.l,
                close: row.c,
                volume: row.v.max(0.0) as u64,
            })
        })
        .collect();
    bars.sort_by_key(|b| b.date);
    bars
}

/// First non-null of lastTrade.p, min.c, day.c, prevDay.c.
fn extract_snapshot(ticker: &SnapshotTicker) -> Option<Snapshot> {
    let last_price = ticker
        .last_trade
        .as_ref()
        .and_then(|lt| lt.p)
        .or_else(|| ticker.min.as_ref().and_then(|m| m.c))
        .or_else(|| ticker.day.as_ref().and_then(|d| d.c))
        .or_else(|| ticker.prev_day.as_ref().and_then(|d| d.c))?;
    let updated = ticker
        .updated
        .or_else(|| ticker.last_trade.as_ref().and_then(|lt| lt.t))
        .unwrap_or(0);
    Some(Snapshot {
        last_price,
        updated_utc: updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn local(y: i32, m: u32, day: u32, hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn daily_end_capped_to_yesterday_before_close() {
        let clamped = clamp_end_date(d(2024, 3, 15), Timeframe::Daily, local(2024, 3, 15, 10));
        assert_eq!(clamped, d(2024, 3, 14));
    }

    #[test]
    fn daily_end_allows_today_after_close() {
        let clamped = clamp_end_date(d(2024, 3, 15), Timeframe::Daily, local(2024, 3, 15, 22));
        assert_eq!(clamped, d(2024, 3, 15));
    }

    #[test]
    fn daily_end_in_past_untouched() {
        let clamped = clamp_end_date(d(2024, 1, 10), Timeframe::Daily, local(2024, 3, 15, 10));
        assert_eq!(clamped, d(2024, 1, 10));
    }

    #[test]
    fn weekly_end_capped_to_last_week() {
        let clamped = clamp_end_date(d(2024, 3, 15), Timeframe::Weekly, local(2024, 3, 15, 23));
        assert_eq!(clamped, d(2024, 3, 8));
    }

    #[test]
    fn normalize_rows_sorted_and_dated() {
        let raw = serde_json::json!([
            {"t": 1_704_412_800_000_i64, "o": 11.0, "h": 12.0, "l": 10.5, "c": 11.5, "v": 2000.0},
            {"t": 1_704_326_400_000_i64, "o": 10.0, "h": 11.0, "l": 9.5, "c": 10.5, "v": 1000.0}
        ]);
        let rows: Vec<AggRow> = serde_json::from_value(raw).unwrap();
        let bars = normalize_rows("AAPL", &rows);

        assert_eq!(bars.len(), 2);
        assert!(bars[0].date < bars[1].date);
        assert_eq!(bars[0].date, d(2024, 1, 4));
        assert_eq!(bars[0].symbol, "AAPL");
        assert_eq!(bars[0].volume, 1000);
    }

    #[test]
    fn snapshot_prefers_last_trade() {
        let ticker: SnapshotTicker = serde_json::from_value(serde_json::json!({
            "lastTrade": {"p": 101.5, "t": 42},
            "min": {"c": 100.0},
            "day": {"c": 99.0}
        }))
        .unwrap();
        let snap = extract_snapshot(&ticker).unwrap();
        assert!((snap.last_price - 101.5).abs() < f64::EPSILON);
        assert_eq!(snap.updated_utc, 42);
    }

    #[test]
    fn snapshot_falls_through_to_prev_day() {
        let ticker: SnapshotTicker = serde_json::from_value(serde_json::json!({
            "prevDay": {"c": 88.25}
        }))
        .unwrap();
        let snap = extract_snapshot(&ticker).unwrap();
        assert!((snap.last_price - 88.25).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_none_when_all_null() {
        let ticker = SnapshotTicker::default();
        assert!(extract_snapshot(&ticker).is_none());
    }

    #[test]
    fn provider_rejects_empty_key() {
        let config = ProviderConfig::default();
        assert!(PolygonProvider::new(String::new(), &config).is_err());
    }

    #[test]
    fn base_url_override_for_tests() {
        let config = ProviderConfig::default();
        let provider = PolygonProvider::new("key".into(), &config)
            .unwrap()
            .with_base_url("http://localhost:1");
        assert_eq!(provider.base_url, "http://localhost:1");
    }
}
