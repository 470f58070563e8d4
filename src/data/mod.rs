pub mod currency;
pub mod ingest;
pub mod market;
pub mod polygon;
pub mod rate_limit;
pub mod user;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One daily OHLCV bar, keyed by (symbol, date). Prices are split/dividend
/// adjusted by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("{symbol}: missing required column '{column}'")]
    MissingColumn { symbol: String, column: String },
    #[error("{symbol}: timestamps not strictly increasing at row {row}")]
    NonMonotonic { symbol: String, row: usize },
    #[error("{symbol}: invalid bar at {date}: {reason}")]
    InvalidBar {
        symbol: String,
        date: NaiveDate,
        reason: String,
    },
}

impl Bar {
    /// OHLC sanity: low is the floor, high is the ceiling, nothing negative.
    pub fn validate(&self) -> Result<(), DataError> {
        let fields = [self.open, self.high, self.low, self.close];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(DataError::InvalidBar {
                symbol: self.symbol.clone(),
                date: self.date,
                reason: "non-finite price".into(),
            });
        }
        if self.low < 0.0 {
            return Err(DataError::InvalidBar {
                symbol: self.symbol.clone(),
                date: self.date,
                reason: format!("negative low {}", self.low),
            });
        }
        if self.low > self.open.min(self.close) || self.high < self.open.max(self.close) {
            return Err(DataError::InvalidBar {
                symbol: self.symbol.clone(),
                date: self.date,
                reason: format!(
                    "ohlc out of range (o={} h={} l={} c={})",
                    self.open, self.high, self.low, self.close
                ),
            });
        }
        Ok(())
    }

    pub fn dollar_volume(&self) -> f64 {
        self.close * self.volume as f64
    }
}

/// Validate a batch of bars for one symbol: all invariants hold and dates are
/// strictly increasing. A failed batch must never reach the store.
pub fn validate_batch(symbol: &str, bars: &[Bar]) -> Result<(), DataError> {
    for (row, bar) in bars.iter().enumerate() {
        bar.validate()?;
        if row > 0 && bar.date <= bars[row - 1].date {
            return Err(DataError::NonMonotonic {
                symbol: symbol.to_string(),
                row,
            });
        }
    }
    Ok(())
}

/// Dense per-symbol series of daily bars, sorted strictly ascending by date.
///
/// Column-major so the indicator engine can borrow whole columns as `&[f64]`.
/// Value-typed: slicing clones the requested range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    symbol: String,
    dates: Vec<NaiveDate>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<u64>,
}

impl Series {
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Self::default()
        }
    }

    /// Build from bars already sorted ascending; validates the batch.
    pub fn from_bars(symbol: &str, bars: &[Bar]) -> Result<Self, DataError> {
        validate_batch(symbol, bars)?;
        let mut s = Self::empty(symbol);
        for bar in bars {
            s.dates.push(bar.date);
            s.open.push(bar.open);
            s.high.push(bar.high);
            s.low.push(bar.low);
            s.close.push(bar.close);
            s.volume.push(bar.volume);
        }
        Ok(s)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn open(&self) -> &[f64] {
        &self.open
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    pub fn volume(&self) -> &[u64] {
        &self.volume
    }

    pub fn volume_f64(&self) -> Vec<f64> {
        self.volume.iter().map(|v| *v as f64).collect()
    }

    pub fn bar(&self, i: usize) -> Bar {
        Bar {
            date: self.dates[i],
            symbol: self.symbol.clone(),
            open: self.open[i],
            high: self.high[i],
            low: self.low[i],
            close: self.close[i],
            volume: self.volume[i],
        }
    }

    pub fn last(&self) -> Option<Bar> {
        if self.is_empty() {
            None
        } else {
            Some(self.bar(self.len() - 1))
        }
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Index of the given trading day, if present.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    pub fn bar_for(&self, date: NaiveDate) -> Option<Bar> {
        self.index_of(date).map(|i| self.bar(i))
    }

    /// As-of slice: every bar with `date <= cutoff`.
    pub fn up_to(&self, cutoff: NaiveDate) -> Series {
        let end = self.dates.partition_point(|d| *d <= cutoff);
        self.slice(0, end)
    }

    /// Last `n` bars (fewer if the series is shorter).
    pub fn tail(&self, n: usize) -> Series {
        let start = self.len().saturating_sub(n);
        self.slice(start, self.len())
    }

    fn slice(&self, start: usize, end: usize) -> Series {
        Series {
            symbol: self.symbol.clone(),
            dates: self.dates[start..end].to_vec(),
            open: self.open[start..end].to_vec(),
            high: self.high[start..end].to_vec(),
            low: self.low[start..end].to_vec(),
            close: self.close[start..end].to_vec(),
            volume: self.volume[start..end].to_vec(),
        }
    }

    pub fn bars(&self) -> Vec<Bar> {
        (0..self.len()).map(|i| self.bar(i)).collect()
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use chrono::{Datelike, Duration, Weekday};

    /// Synthetic bars over consecutive weekdays starting at `start`, with the
    /// given closes. Open tracks the previous close; high/low bracket the move.
    pub fn bars_from_closes(symbol: &str, start: NaiveDate, closes: &[f64]) -> Vec<Bar> {
        let mut bars = Vec::with_capacity(closes.len());
        let mut date = start;
        let mut prev_close = closes.first().copied().unwrap_or(0.0);
        for &close in closes {
            while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                date += Duration::days(1);
            }
            let open = prev_close;
            let high = open.max(close) + 0.5;
            let low = (open.min(close) - 0.5).max(0.0);
            bars.push(Bar {
                date,
                symbol: symbol.to_string(),
                open,
                high,
                low,
                close,
                volume: 1_000_000,
            });
            prev_close = close;
            date += Duration::days(1);
        }
        bars
    }

    pub fn series_from_closes(symbol: &str, start: NaiveDate, closes: &[f64]) -> Series {
        Series::from_bars(symbol, &bars_from_closes(symbol, start, closes)).unwrap()
    }
}
