//! Columnar market store: one parquet file per symbol under `<root>/bars/`.
//!
//! Upsert semantics: incoming bars replace stored rows with the same date,
//! implemented as concat → dedup-keep-last → sort → atomic rename, so an
//! interrupted write leaves the previous file untouched.
//!
//! The store is a process-wide singleton per root path; the backing files are
//! not safe for concurrent same-process writers, and a second OS process
//! holding a file gets degraded reads (retry, then empty) instead of a crash.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use dashmap::DashMap;
use polars::prelude::*;

use super::{validate_batch, Bar, Series};

const CONTENTION_RETRIES: u32 = 3;
const CONTENTION_BACKOFF: Duration = Duration::from_secs(1);

static REGISTRY: LazyLock<DashMap<PathBuf, Arc<MarketStore>>> = LazyLock::new(DashMap::new);

pub struct MarketStore {
    root: PathBuf,
    // Serializes same-process writers; cross-process writers rely on the
    // atomic rename and the read retry path.
    write_lock: Mutex<()>,
}

impl MarketStore {
    /// Open (or reuse) the store rooted at `root`. One instance per path per
    /// process; repeated opens return the same handle.
    pub fn open(root: impl AsRef<Path>) -> Result<Arc<Self>> {
        let bars_dir = root.as_ref().join("bars");
        std::fs::create_dir_all(&bars_dir)
            .with_context(|| format!("Failed to create store dir: {}", bars_dir.display()))?;
        let canon = root
            .as_ref()
            .canonicalize()
            .with_context(|| format!("Failed to resolve store root: {}", root.as_ref().display()))?;

        let store = REGISTRY
            .entry(canon.clone())
            .or_insert_with(|| {
                Arc::new(Self {
                    root: canon,
                    write_lock: Mutex::new(()),
                })
            })
            .clone();
        Ok(store)
    }

    fn symbol_path(&self, symbol: &str) -> PathBuf {
        self.root.join("bars").join(format!("{symbol}.parquet"))
    }

    /// Upsert a batch of bars. The batch is grouped by symbol, validated, and
    /// merged file-by-file; a validation failure rejects the whole batch
    /// before any file is touched.
    pub fn insert(&self, bars: &[Bar]) -> Result<()> {
        if bars.is_empty() {
            return Ok(());
        }

        let mut by_symbol: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
        for bar in bars {
            by_symbol.entry(bar.symbol.clone()).or_default().push(bar.clone());
        }

        for (symbol, group) in &mut by_symbol {
            // Within one batch the last row for a date wins, matching the
            // store-level upsert rule.
            let mut by_date: BTreeMap<NaiveDate, Bar> = BTreeMap::new();
            for bar in group.drain(..) {
                by_date.insert(bar.date, bar);
            }
            *group = by_date.into_values().collect();
            validate_batch(symbol, group)?;
        }

        let _guard = self.write_lock.lock().expect("market store write lock");
        for (symbol, group) in &by_symbol {
            self.merge_and_save(symbol, group)
                .with_context(|| format!("Upsert failed for {symbol}"))?;
        }
        Ok(())
    }

    fn merge_and_save(&self, symbol: &str, bars: &[Bar]) -> Result<()> {
        let new_df = bars_to_frame(bars)?;
        let merged = if let Some(existing) = self.read_frame(symbol) {
            concat(
                [existing.lazy(), new_df.lazy()],
                UnionArgs {
                    rechunk: true,
                    to_supertypes: true,
                    ..Default::default()
                },
            )?
            .collect()?
        } else {
            new_df
        };

        let key: Vec<String> = vec!["date".to_string()];
        let mut deduped = merged
            .unique::<String, String>(Some(&key), UniqueKeepStrategy::Last, None)?
            .lazy()
            .sort(["date"], SortMultipleOptions::default())
            .collect()?;

        self.save_parquet(symbol, &mut deduped)
    }

    fn save_parquet(&self, symbol: &str, df: &mut DataFrame) -> Result<()> {
        let path = self.symbol_path(symbol);
        // Write to a temp file then atomically rename so readers never see a
        // partially written file.
        let tmp_path = path.with_extension("parquet.tmp");
        let file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp file: {}", tmp_path.display()))?;
        ParquetWriter::new(file)
            .finish(df)
            .context("Failed to write parquet")?;
        std::fs::rename(&tmp_path, &path).with_context(|| {
            format!("Failed to rename {} -> {}", tmp_path.display(), path.display())
        })?;
        Ok(())
    }

    fn read_frame(&self, symbol: &str) -> Option<DataFrame> {
        let path = self.symbol_path(symbol);
        if !path.exists() {
            return None;
        }
        let path_str = path.to_string_lossy().to_string();
        for attempt in 0..CONTENTION_RETRIES {
            let result = LazyFrame::scan_parquet(path_str.as_str().into(), ScanArgsParquet::default())
                .and_then(polars::prelude::LazyFrame::collect);
            match result {
                Ok(df) => return Some(df),
                Err(e) => {
                    tracing::warn!(
                        %symbol,
                        attempt = attempt + 1,
                        "Market store read failed ({e}); retrying"
                    );
                    std::thread::sleep(CONTENTION_BACKOFF);
                }
            }
        }
        tracing::warn!(%symbol, "Market store still unreadable after retries; returning empty");
        None
    }

    /// Range query, ascending. Contended or missing files yield an empty
    /// series rather than an error.
    pub fn get(&self, symbol: &str, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Series {
        let Some(df) = self.read_frame(symbol) else {
            return Series::empty(symbol);
        };
        match frame_to_series(symbol, &df, start, end) {
            Ok(series) => series,
            Err(e) => {
                tracing::warn!(%symbol, "Failed to decode stored bars: {e}");
                Series::empty(symbol)
            }
        }
    }

    pub fn last_date(&self, symbol: &str) -> Option<NaiveDate> {
        self.get(symbol, None, None).last_date()
    }

    pub fn all_symbols(&self) -> Vec<String> {
        let bars_dir = self.root.join("bars");
        let mut symbols = Vec::new();
        let Ok(entries) = std::fs::read_dir(&bars_dir) else {
            return symbols;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "parquet") {
                if let Some(stem) = path.file_stem() {
                    symbols.push(stem.to_string_lossy().to_string());
                }
            }
        }
        symbols.sort();
        symbols
    }

    /// Batch as-of query: for each symbol, bars within `lookback_days` of
    /// `end_inclusive`, up to and including that day. Used by the backtest.
    pub fn bars_until(
        &self,
        symbols: &[String],
        end_inclusive: NaiveDate,
        lookback_days: i64,
    ) -> HashMap<String, Series> {
        let start = end_inclusive - chrono::Duration::days(lookback_days);
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            let series = self.get(symbol, Some(start), Some(end_inclusive));
            if !series.is_empty() {
                out.insert(symbol.clone(), series);
            }
        }
        out
    }

    /// Single trading day, for stop checking.
    pub fn bar_for_date(&self, symbol: &str, date: NaiveDate) -> Option<Bar> {
        self.get(symbol, Some(date), Some(date)).last()
    }
}

fn bars_to_frame(bars: &[Bar]) -> Result<DataFrame> {
    let dates: Vec<NaiveDate> = bars.iter().map(|b| b.date).collect();
    let columns = vec![
        DateChunked::from_naive_date(PlSmallStr::from("date"), dates)
            .into_series()
            .into_column(),
        Column::new("open".into(), bars.iter().map(|b| b.open).collect::<Vec<f64>>()),
        Column::new("high".into(), bars.iter().map(|b| b.high).collect::<Vec<f64>>()),
        Column::new("low".into(), bars.iter().map(|b| b.low).collect::<Vec<f64>>()),
        Column::new("close".into(), bars.iter().map(|b| b.close).collect::<Vec<f64>>()),
        Column::new(
            "volume".into(),
            bars.iter().map(|b| b.volume as i64).collect::<Vec<i64>>(),
        ),
    ];
    DataFrame::new(bars.len(), columns).context("Failed to build bar DataFrame")
}

fn frame_to_series(
    symbol: &str,
    df: &DataFrame,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Series> {
    let dates = df.column("date")?.date()?;
    let open = df.column("open")?.f64()?;
    let high = df.column("high")?.f64()?;
    let low = df.column("low")?.f64()?;
    let close = df.column("close")?.f64()?;
    let volume = df.column("volume")?.i64()?;

    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let Some(days) = dates.phys.get(i) else {
            continue;
        };
        let date = NaiveDate::from_num_days_from_ce_opt(days + 719_163)
            .with_context(|| format!("Invalid stored date at row {i}"))?;
        if start.is_some_and(|s| date < s) || end.is_some_and(|e| date > e) {
            continue;
        }
        bars.push(Bar {
            date,
            symbol: symbol.to_string(),
            open: open.get(i).unwrap_or(f64::NAN),
            high: high.get(i).unwrap_or(f64::NAN),
            low: low.get(i).unwrap_or(f64::NAN),
            close: close.get(i).unwrap_or(f64::NAN),
            volume: volume.get(i).unwrap_or(0).max(0) as u64,
        });
    }
    Series::from_bars(symbol, &bars).map_err(Into::into)
}
