//! Momentum: trend continuation with relative strength vs the benchmark.
//!
//! Entry filters, in order: liquidity, close above SMA(100), and a 3-month
//! return no worse than 3 points under the benchmark's. The benchmark return
//! is computed once per batch, not per symbol.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use super::{
    finalize_signal, trailing_return, Signal, SignalMetrics, StrategyContext, StrategyKind,
    HISTORY_MARGIN, THREE_MONTHS_BARS,
};
use crate::data::Series;
use crate::indicators;

const SMA_PERIOD: usize = 100;
/// A stock may underperform the benchmark by at most 3 points.
const MIN_RELATIVE_PERFORMANCE: f64 = -0.03;

pub fn generate_signals(
    bars: &HashMap<String, Series>,
    benchmark: Option<&Series>,
    as_of: NaiveDate,
    ctx: &StrategyContext,
) -> Vec<Signal> {
    let benchmark_return = benchmark.and_then(|series| {
        let sliced = series.up_to(as_of);
        trailing_return(sliced.close(), THREE_MONTHS_BARS)
    });
    if benchmark_return.is_none() {
        tracing::warn!("Benchmark 3m return unavailable; relative-strength filter skipped");
    }

    let mut signals = Vec::new();
    for (symbol, series) in bars {
        match analyze_symbol(symbol, series, benchmark_return, as_of, ctx) {
            Some(signal) => {
                tracing::debug!(%symbol, entry = signal.entry_price, "Momentum signal");
                signals.push(signal);
            }
            None => continue,
        }
    }
    tracing::info!("Momentum: {} signals from {} symbols", signals.len(), bars.len());
    signals
}

fn analyze_symbol(
    symbol: &str,
    series: &Series,
    benchmark_return: Option<f64>,
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

    // Liquidity
    let dollar_volume = latest.dollar_volume();
    if dollar_volume < ctx.min_dollar_volume {
        tracing::debug!(%symbol, dollar_volume, "Liquidity filter failed");
        return None;
    }
    filters_passed.insert("liquidity".to_string(), format!("${dollar_volume:.0}/day"));

    // Trend: close above the long moving average
    let sma_trend = indicators::last_valid(&indicators::sma(close, SMA_PERIOD))?;
    if latest.close <= sma_trend {
        tracing::debug!(%symbol, close = latest.close, sma = sma_trend, "Trend filter failed");
        return None;
    }
    filters_passed.insert(
        "trend".to_string(),
        format!("${:.2} > SMA{SMA_PERIOD} ${sma_trend:.2}", latest.close),
    );

    // Relative strength vs benchmark (skipped when benchmark data is absent)
    let return_3m = trailing_return(close, THREE_MONTHS_BARS)?;
    if let Some(bench) = benchmark_return {
        let relative = return_3m - bench;
        if relative < MIN_RELATIVE_PERFORMANCE {
            tracing::debug!(
                %symbol,
                stock = format!("{:.2}%", return_3m * 100.0),
                bench = format!("{:.2}%", bench * 100.0),
                "Relative strength filter failed"
            );
            return None;
        }
        filters_passed.insert(
            "relative_strength".to_string(),
            format!(
                "{:.1}% vs benchmark {:.1}%",
                return_3m * 100.0,
                bench * 100.0
            ),
        );
    }

    let atr = indicators::last_valid(&indicators::atr(
        series.high(),
        series.low(),
        close,
        14,
    ))?;
    let natr = atr / latest.close * 100.0;

    let metrics = SignalMetrics {
        return_3m: Some(return_3m),
        natr,
        dollar_volume,
        ..SignalMetrics::default()
    };
    finalize_signal(
        symbol,
        StrategyKind::Momentum,
        as_of,
        latest.close,
        atr,
        metrics,
        filters_passed,
        ctx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_fixtures::series_from_closes;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ctx() -> StrategyContext {
        StrategyContext {
            rate: 1.0,
            risk_per_trade_eur: 100.0,
            ..StrategyContext::default()
        }
    }

    /// Steady riser: clears SMA(100) and beats a flat benchmark.
    fn uptrend() -> Series {
        let closes: Vec<f64> = (0..200).map(|i| 50.0 + f64::from(i) * 0.25).collect();
        series_from_closes("WINNER", d(2023, 6, 1), &closes)
    }

    fn flat_benchmark() -> Series {
        let closes: Vec<f64> = vec![400.0; 200];
        series_from_closes("SPY", d(2023, 6, 1), &closes)
    }

    #[test]
    fn uptrend_emits_signal() {
        let series = uptrend();
        let as_of = series.last_date().unwrap();
        let mut bars = HashMap::new();
        bars.insert("WINNER".to_string(), series);
        let benchmark = flat_benchmark();

        let signals = generate_signals(&bars, Some(&benchmark), as_of, &ctx());
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.strategy, StrategyKind::Momentum);
        signal.validate().unwrap();
        assert!(signal.metrics.return_3m.unwrap() > 0.0);
        assert!(signal.filters_passed.contains_key("relative_strength"));
        assert!(signal.stop_loss >= signal.entry_price * 0.95 - 1e-9);
    }

    #[test]
    fn below_trend_rejected() {
        // Long decline: close far under SMA(100)
        let closes: Vec<f64> = (0..200).map(|i| 200.0 - f64::from(i) * 0.5).collect();
        let series = series_from_closes("LOSER", d(2023, 6, 1), &closes);
        let as_of = series.last_date().unwrap();
        let mut bars = HashMap::new();
        bars.insert("LOSER".to_string(), series);

        let signals = generate_signals(&bars, Some(&flat_benchmark()), as_of, &ctx());
        assert!(signals.is_empty());
    }

    #[test]
    fn underperformer_rejected_by_relative_strength() {
        // Mild riser against a benchmark rising much faster
        let closes: Vec<f64> = (0..200).map(|i| 100.0 + f64::from(i) * 0.02).collect();
        let series = series_from_closes("SLOW", d(2023, 6, 1), &closes);
        let bench_closes: Vec<f64> = (0..200).map(|i| 300.0 + f64::from(i) * 2.0).collect();
        let benchmark = series_from_closes("SPY", d(2023, 6, 1), &bench_closes);
        let as_of = series.last_date().unwrap();
        let mut bars = HashMap::new();
        bars.insert("SLOW".to_string(), series);

        let signals = generate_signals(&bars, Some(&benchmark), as_of, &ctx());
        assert!(signals.is_empty());
    }

    #[test]
    fn missing_benchmark_skips_relative_strength() {
        let series = uptrend();
        let as_of = series.last_date().unwrap();
        let mut bars = HashMap::new();
        bars.insert("WINNER".to_string(), series);

        let signals = generate_signals(&bars, None, as_of, &ctx());
        assert_eq!(signals.len(), 1);
        assert!(!signals[0].filters_passed.contains_key("relative_strength"));
    }

    #[test]
    fn insufficient_history_rejected() {
        let closes: Vec<f64> = (0..120).map(|i| 50.0 + f64::from(i)).collect();
        let series = series_from_closes("YOUNG", d(2024, 1, 2), &closes);
        let as_of = series.last_date().unwrap();
        let mut bars = HashMap::new();
        bars.insert("YOUNG".to_string(), series);

        let signals = generate_signals(&bars, None, as_of, &ctx());
        assert!(signals.is_empty());
    }

    #[test]
    fn illiquid_symbol_rejected() {
        // Same shape as the winner but with negligible volume
        let closes: Vec<f64> = (0..200).map(|i| 50.0 + f64::from(i) * 0.25).collect();
        let mut bars_vec = crate::data::test_fixtures::bars_from_closes("THIN", d(2023, 6, 1), &closes);
        for bar in &mut bars_vec {
            bar.volume = 100;
        }
        let series = Series::from_bars("THIN", &bars_vec).unwrap();
        let as_of = series.last_date().unwrap();
        let mut bars = HashMap::new();
        bars.insert("THIN".to_string(), series);

        let signals = generate_signals(&bars, None, as_of, &ctx());
        assert!(signals.is_empty());
    }
}
