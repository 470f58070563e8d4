//! Mean reversion: buy oversold dips inside a long-term uptrend.
//!
//! The SMA(200) floor is the guardrail; without it, "oversold" is just a
//! falling knife. RSI uses Wilder smoothing, which reacts faster to the most
//! recent run of losses than a plain rolling mean.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use super::{finalize_signal, Signal, SignalMetrics, StrategyContext, StrategyKind, HISTORY_MARGIN};
use crate::data::Series;
use crate::indicators;

const SMA_PERIOD: usize = 200;
const RSI_PERIOD: usize = 14;
const RSI_OVERSOLD: f64 = 40.0;

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
                rsi = signal.metrics.rsi.unwrap_or(f64::NAN),
                "Oversold signal"
            );
            signals.push(signal);
        }
    }
    tracing::info!(
        "Mean reversion: {} signals from {} symbols",
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
    let latest = series.last()?;
    let mut filters_passed = BTreeMap::new();

    let dollar_volume = latest.dollar_volume();
    if dollar_volume < ctx.min_dollar_volume {
        tracing::debug!(%symbol, dollar_volume, "Liquidity filter failed");
        return None;
    }
    filters_passed.insert("liquidity".to_string(), format!("${dollar_volume:.0}/day"));

    // Long-term uptrend intact
    let sma_floor = indicators::last_valid(&indicators::sma(close, SMA_PERIOD))?;
    if latest.close <= sma_floor {
        tracing::debug!(%symbol, close = latest.close, sma = sma_floor, "Below long-term floor");
        return None;
    }
    filters_passed.insert(
        "uptrend_floor".to_string(),
        format!("${:.2} > SMA{SMA_PERIOD} ${sma_floor:.2}", latest.close),
    );

    // Oversold
    let rsi = indicators::last_valid(&indicators::rsi(close, RSI_PERIOD))?;
    if rsi >= RSI_OVERSOLD {
        return None;
    }
    filters_passed.insert(
        "oversold".to_string(),
        format!("RSI {rsi:.1} < {RSI_OVERSOLD}"),
    );

    let atr = indicators::last_valid(&indicators::atr(series.high(), series.low(), close, 14))?;
    let natr = atr / latest.close * 100.0;

    let metrics = SignalMetrics {
        rsi: Some(rsi),
        natr,
        dollar_volume,
        ..SignalMetrics::default()
    };
    finalize_signal(
        symbol,
        StrategyKind::MeanReversion,
        as_of,
        latest.close,
        atr,
        metrics,
        filters_passed,
        ctx,
    )
}
