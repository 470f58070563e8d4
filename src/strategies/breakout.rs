//! Breakout: volatility expansion out of a consolidation, confirmed by
//! volume.
//!
//! Signals are generated on a weekly cadence, so the breakout may sit up to
//! three bars back; the squeeze and volume filters are checked on the
//! breakout bar itself, not on the latest bar.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use super::{finalize_signal, Signal, SignalMetrics, StrategyContext, StrategyKind, HISTORY_MARGIN};
use crate::data::Series;
use crate::indicators;

const BREAKOUT_PERIOD: usize = 20;
const SMA_PERIOD: usize = 50;
const VOLUME_SPIKE_MULTIPLIER: f64 = 1.3;
const BB_SQUEEZE_THRESHOLD: f64 = 0.05;
/// Bars to look back for the breakout close.
const BREAKOUT_WINDOW: usize = 3;

pub fn generate_signals(
    bars: &HashMap<String, Series>,
    as_of: NaiveDate,
    ctx: &StrategyContext,
) -> Vec<Signal> {
    let mut signals = Vec::new();
    for (symbol, series) in bars {
        if let Some(signal) = analyze_symbol(symbol, series, as_of, ctx) {
            tracing::debug!(
                %symbol,
                volume_ratio = signal.metrics.volume_ratio.unwrap_or(f64::NAN),
                "Breakout signal"
            );
            signals.push(signal);
        }
    }
    tracing::info!(
        "Breakout: {} signals from {} symbols",
        signals.len(),
        bars.len()
    );
    signals
}

fn analyze_symbol(
    symbol: &str,
    series: &Series,
    as_of: NaiveDate,
    ctx: &StrategyContext,
) -> Option<Signal> {
    let series = series.up_to(as_of);
    if series.len() < SMA_PERIOD + HISTORY_MARGIN {
        return None;
    }

    let close = series.close();
    let high = series.high();
    let volume = series.volume_f64();
    let latest = series.last()?;
    let mut filters_passed = BTreeMap::new();

    let dollar_volume = latest.dollar_volume();
    if dollar_volume < ctx.min_dollar_volume {
        tracing::debug!(%symbol, dollar_volume, "Liquidity filter failed");
        return None;
    }
    filters_passed.insert("liquidity".to_string(), format!("${dollar_volume:.0}/day"));

    // Trend context
    let sma_50 = indicators::last_valid(&indicators::sma(close, SMA_PERIOD))?;
    if latest.close <= sma_50 {
        tracing::debug!(%symbol, "Below SMA50");
        return None;
    }
    filters_passed.insert(
        "trend".to_string(),
        format!("${:.2} > SMA{SMA_PERIOD} ${sma_50:.2}", latest.close),
    );

    // Breakout: within the last 3 bars, a close above the previous bar's
    // 20-day high
    let high_20 = indicators::overlap::rolling_max(high, BREAKOUT_PERIOD);
    let len = series.len();
    let mut breakout_idx = None;
    for offset in 0..BREAKOUT_WINDOW.min(len - 1) {
        let i = len - 1 - offset;
        if i == 0 {
            break;
        }
        let prev_high_20 = high_20[i - 1];
        if !prev_high_20.is_nan() && close[i] > prev_high_20 {
            breakout_idx = Some(i);
            break;
        }
    }
    let breakout_idx = breakout_idx?;
    filters_passed.insert(
        "breakout".to_string(),
        format!(
            "${:.2} > {BREAKOUT_PERIOD}d high ${:.2}",
            close[breakout_idx],
            high_20[breakout_idx - 1]
        ),
    );

    // Prior squeeze, checked on the breakout bar
    let bb = indicators::bollinger(close, 20, 2.0);
    let bandwidth = bb.bandwidth[breakout_idx];
    if bandwidth.is_nan() || bandwidth > BB_SQUEEZE_THRESHOLD {
        tracing::debug!(%symbol, bandwidth, "No squeeze on breakout bar");
        return None;
    }
    filters_passed.insert(
        "bb_squeeze".to_string(),
        format!("width {bandwidth:.4} < {BB_SQUEEZE_THRESHOLD}"),
    );

    // Volume spike, checked on the breakout bar
    let volume_sma = indicators::sma(&volume, 20);
    let avg_volume = volume_sma[breakout_idx];
    if avg_volume.is_nan() || avg_volume <= 0.0 {
        return None;
    }
    let volume_ratio = volume[breakout_idx] / avg_volume;
    if volume_ratio < VOLUME_SPIKE_MULTIPLIER {
        tracing::debug!(%symbol, volume_ratio, "No volume spike on breakout bar");
        return None;
    }
    filters_passed.insert(
        "volume_spike".to_string(),
        format!("{volume_ratio:.1}x > {VOLUME_SPIKE_MULTIPLIER}x"),
    );

    let atr = indicators::last_valid(&indicators::atr(high, series.low(), close, 14))?;
    let natr = atr / latest.close * 100.0;

    let metrics = SignalMetrics {
        volume_ratio: Some(volume_ratio),
        natr,
        dollar_volume,
        ..SignalMetrics::default()
    };
    finalize_signal(
        symbol,
        StrategyKind::Breakout,
        as_of,
        latest.close,
        atr,
        metrics,
        filters_passed,
        ctx,
    )
}
