//! Market regime detection on the benchmark series.
//!
//! The regime directs which strategy leads the ranking: trending markets
//! favor momentum, choppy markets mean reversion, and a volatility squeeze
//! precedes breakouts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::Series;
use crate::indicators;

const ADX_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;

const ADX_TRENDING: f64 = 25.0;
const ADX_STRONG: f64 = 30.0;
const ADX_CHOPPY: f64 = 20.0;
const BB_SQUEEZE_THRESHOLD: f64 = 0.02;
const STRONG_TREND_MAX_ATR_PCT: f64 = 2.5;

const MIN_BARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Trending,
    StrongTrend,
    Choppy,
    Breakout,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Regime::Trending => "trending",
            Regime::StrongTrend => "strong_trend",
            Regime::Choppy => "choppy",
            Regime::Breakout => "breakout",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub date: NaiveDate,
    pub regime: Regime,
    pub adx: f64,
    pub atr_pct: f64,
    pub trend_direction: TrendDirection,
    pub bb_bandwidth: f64,
    /// Classification confidence, 0–100.
    pub confidence: f64,
    pub sma_50: f64,
    pub sma_200: f64,
    pub price: f64,
}

impl RegimeSnapshot {
    fn default_for(date: NaiveDate) -> Self {
        Self {
            date,
            regime: Regime::Choppy,
            adx: 20.0,
            atr_pct: 1.5,
            trend_direction: TrendDirection::Neutral,
            bb_bandwidth: 0.05,
            confidence: 50.0,
            sma_50: 0.0,
            sma_200: 0.0,
            price: 0.0,
        }
    }
}

/// Classify the benchmark as of `as_of`. Under 50 bars of history the
/// detector refuses to guess and returns the neutral default.
pub fn detect(benchmark: &Series, as_of: NaiveDate) -> RegimeSnapshot {
    let series = benchmark.up_to(as_of);
    if series.len() < MIN_BARS {
        tracing::warn!(
            rows = series.len(),
            "Insufficient data for regime detection"
        );
        return RegimeSnapshot::default_for(as_of);
    }

    let close = series.close();
    let high = series.high();
    let low = series.low();

    let adx_out = indicators::adx(high, low, close, ADX_PERIOD);
    let atr_values = indicators::atr(high, low, close, ATR_PERIOD);
    let natr_values = indicators::natr(&atr_values, close);
    let bb = indicators::bollinger(close, BB_PERIOD, 2.0);

    let adx = indicators::last_valid(&adx_out.adx).unwrap_or(20.0);
    let atr_pct = indicators::last_valid(&natr_values).unwrap_or(1.0);
    let bb_bandwidth = indicators::last_valid(&bb.bandwidth).unwrap_or(0.05);

    let price = *close.last().expect("non-empty series");
    let sma_50 = indicators::last_valid(&indicators::sma(close, 50)).unwrap_or(price);
    let sma_200 = if series.len() >= 200 {
        indicators::last_valid(&indicators::sma(close, 200)).unwrap_or(sma_50)
    } else {
        sma_50
    };

    let trend_direction = if price > sma_50 && price > sma_200 {
        TrendDirection::Up
    } else if price < sma_50 && price < sma_200 {
        TrendDirection::Down
    } else {
        TrendDirection::Neutral
    };

    let (regime, confidence) = classify(adx, atr_pct, bb_bandwidth, trend_direction);

    tracing::info!(
        %regime,
        adx = format!("{adx:.1}"),
        bandwidth = format!("{bb_bandwidth:.3}"),
        direction = ?trend_direction,
        "Regime detected"
    );

    RegimeSnapshot {
        date: series.last_date().unwrap_or(as_of),
        regime,
        adx,
        atr_pct,
        trend_direction,
        bb_bandwidth,
        confidence,
        sma_50,
        sma_200,
        price,
    }
}

/// First matching rule wins.
fn classify(
    adx: f64,
    atr_pct: f64,
    bb_bandwidth: f64,
    direction: TrendDirection,
) -> (Regime, f64) {
    if adx > ADX_STRONG && direction == TrendDirection::Up && atr_pct < STRONG_TREND_MAX_ATR_PCT {
        return (Regime::StrongTrend, 90.0);
    }
    if bb_bandwidth < BB_SQUEEZE_THRESHOLD && adx < ADX_CHOPPY {
        return (Regime::Breakout, 75.0);
    }
    if adx > ADX_TRENDING {
        let confidence = if adx > ADX_STRONG { 80.0 } else { 70.0 };
        return (Regime::Trending, confidence);
    }
    if adx < ADX_CHOPPY {
        return (Regime::Choppy, 65.0);
    }
    // ADX between 20 and 25: uncertain, default to mean reversion territory
    (Regime::Choppy, 50.0)
}
