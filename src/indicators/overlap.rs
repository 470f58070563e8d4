//! Moving averages and channel overlays.

use super::{nan_vec, rolling_std};
use crate::indicators::volatility::atr;

/// Simple moving average: NaN for the first n−1 positions.
pub fn sma(values: &[f64], n: usize) -> Vec<f64> {
    let mut out = nan_vec(values.len());
    if n == 0 || values.len() < n {
        return out;
    }
    let mut sum: f64 = values[..n].iter().sum();
    out[n - 1] = sum / n as f64;
    for i in n..values.len() {
        sum += values[i] - values[i - n];
        out[i] = sum / n as f64;
    }
    out
}

/// Exponential moving average with α = 2/(n+1), seeded at the first value.
pub fn ema(values: &[f64], n: usize) -> Vec<f64> {
    let mut out = nan_vec(values.len());
    if values.is_empty() || n == 0 {
        return out;
    }
    let alpha = 2.0 / (n as f64 + 1.0);
    let mut prev = values[0];
    out[0] = prev;
    for i in 1..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub bandwidth: Vec<f64>,
    pub percent_b: Vec<f64>,
}

/// Bollinger bands: middle = SMA(n), bands = ±k·rolling sample std.
pub fn bollinger(closes: &[f64], n: usize, k: f64) -> Bollinger {
    let middle = sma(closes, n);
    let std = rolling_std(closes, n);
    let len = closes.len();
    let mut upper = nan_vec(len);
    let mut lower = nan_vec(len);
    let mut bandwidth = nan_vec(len);
    let mut percent_b = nan_vec(len);

    for i in 0..len {
        if middle[i].is_nan() || std[i].is_nan() {
            continue;
        }
        upper[i] = middle[i] + k * std[i];
        lower[i] = middle[i] - k * std[i];
        if middle[i] != 0.0 {
            bandwidth[i] = (upper[i] - lower[i]) / middle[i];
        }
        let width = upper[i] - lower[i];
        if width != 0.0 {
            percent_b[i] = (closes[i] - lower[i]) / width;
        }
    }

    Bollinger {
        middle,
        upper,
        lower,
        bandwidth,
        percent_b,
    }
}

#[derive(Debug, Clone)]
pub struct Keltner {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Keltner channels: middle = EMA(close, n), bands = ±mult·ATR(n).
pub fn keltner(high: &[f64], low: &[f64], close: &[f64], n: usize, mult: f64) -> Keltner {
    let middle = ema(close, n);
    let atr_values = atr(high, low, close, n);
    let len = close.len();
    let mut upper = nan_vec(len);
    let mut lower = nan_vec(len);
    for i in 0..len {
        if middle[i].is_nan() || atr_values[i].is_nan() {
            continue;
        }
        upper[i] = middle[i] + mult * atr_values[i];
        lower[i] = middle[i] - mult * atr_values[i];
    }
    Keltner {
        middle,
        upper,
        lower,
    }
}

#[derive(Debug, Clone)]
pub struct Donchian {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub middle: Vec<f64>,
}

/// Donchian channels: rolling max of highs / min of lows over n bars.
pub fn donchian(high: &[f64], low: &[f64], n: usize) -> Donchian {
    let upper = rolling_max(high, n);
    let lower = rolling_min(low, n);
    let middle = upper
        .iter()
        .zip(&lower)
        .map(|(u, l)| (u + l) / 2.0)
        .collect();
    Donchian {
        upper,
        lower,
        middle,
    }
}

pub fn rolling_max(values: &[f64], n: usize) -> Vec<f64> {
    let mut out = nan_vec(values.len());
    if n == 0 || values.len() < n {
        return out;
    }
    for i in (n - 1)..values.len() {
        out[i] = values[i + 1 - n..=i]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
    }
    out
}

pub fn rolling_min(values: &[f64], n: usize) -> Vec<f64> {
    let mut out = nan_vec(values.len());
    if n == 0 || values.len() < n {
        return out;
    }
    for i in (n - 1)..values.len() {
        out[i] = values[i + 1 - n..=i]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
    }
    out
}

/// Rolling VWAP over the last `w` bars: Σ(typical·volume)/Σ(volume).
pub fn rolling_vwap(high: &[f64], low: &[f64], close: &[f64], volume: &[f64], w: usize) -> Vec<f64> {
    let len = close.len();
    let mut out = nan_vec(len);
    if w == 0 || len < w {
        return out;
    }
    let typical: Vec<f64> = (0..len)
        .map(|i| (high[i] + low[i] + close[i]) / 3.0)
        .collect();
    for i in (w - 1)..len {
        let range = i + 1 - w..=i;
        let pv: f64 = range.clone().map(|j| typical[j] * volume[j]).sum();
        let v: f64 = range.map(|j| volume[j]).sum();
        if v > 0.0 {
            out[i] = pv / v;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_warmup_and_values() {
        let values: Vec<f64> = (1..=5).map(f64::from).collect();
        let out = sma(&values, 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!((out[2] - 2.0).abs() < 1e-12);
        assert!((out[3] - 3.0).abs() < 1e-12);
        assert!((out[4] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn sma_window_equals_mean_of_trailing_values() {
        // SMA(50) of closes 100..=159 at the last bar: mean(110..=159) = 134.5
        let closes: Vec<f64> = (100..160).map(f64::from).collect();
        let out = sma(&closes, 50);
        assert!((out[59] - 134.5).abs() < 1e-9);
    }

    #[test]
    fn sma_shorter_than_window_is_all_nan() {
        let out = sma(&[1.0, 2.0], 5);
        assert!(out.iter().all(|v| v.is_nan()));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn ema_seeds_at_first_value() {
        let out = ema(&[10.0, 10.0, 10.0], 5);
        assert!((out[0] - 10.0).abs() < 1e-12);
        assert!((out[2] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn ema_moves_toward_new_level() {
        let mut values = vec![10.0; 10];
        values.extend(std::iter::repeat_n(20.0, 30));
        let out = ema(&values, 5);
        assert!(out.last().unwrap() > &19.9);
        assert!(out.last().unwrap() <= &20.0);
    }

    #[test]
    fn bollinger_band_ordering_and_percent_b() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (f64::from(i) * 0.7).sin() * 3.0).collect();
        let bb = bollinger(&closes, 20, 2.0);
        for i in 19..closes.len() {
            assert!(bb.lower[i] <= bb.middle[i] && bb.middle[i] <= bb.upper[i]);
            let width = bb.upper[i] - bb.lower[i];
            let expected = (closes[i] - bb.lower[i]) / width;
            assert!((bb.percent_b[i] - expected).abs() < 1e-12);
            assert!((bb.bandwidth[i] - width / bb.middle[i]).abs() < 1e-12);
        }
        assert!(bb.upper[18].is_nan());
    }

    #[test]
    fn bollinger_flat_series_collapses_bands() {
        let closes = vec![50.0; 25];
        let bb = bollinger(&closes, 20, 2.0);
        let last = closes.len() - 1;
        assert!((bb.upper[last] - bb.lower[last]).abs() < 1e-12);
        assert!((bb.bandwidth[last]).abs() < 1e-12);
        // %B undefined when the bands collapse
        assert!(bb.percent_b[last].is_nan());
    }

    #[test]
    fn donchian_tracks_extremes() {
        let high = vec![10.0, 12.0, 11.0, 15.0, 14.0];
        let low = vec![9.0, 10.0, 8.0, 13.0, 12.0];
        let dc = donchian(&high, &low, 3);
        assert!(dc.upper[1].is_nan());
        assert!((dc.upper[2] - 12.0).abs() < 1e-12);
        assert!((dc.lower[2] - 8.0).abs() < 1e-12);
        assert!((dc.upper[4] - 15.0).abs() < 1e-12);
        assert!((dc.lower[4] - 8.0).abs() < 1e-12);
    }

    #[test]
    fn rolling_vwap_weighted_by_volume() {
        let high = vec![11.0, 21.0];
        let low = vec![9.0, 19.0];
        let close = vec![10.0, 20.0];
        let volume = vec![1.0, 3.0];
        let out = rolling_vwap(&high, &low, &close, &volume, 2);
        assert!(out[0].is_nan());
        // typical prices 10 and 20, weights 1 and 3 -> 17.5
        assert!((out[1] - 17.5).abs() < 1e-12);
    }

    #[test]
    fn keltner_wraps_ema_with_atr() {
        let n = 20;
        let len = 40;
        let close: Vec<f64> = (0..len).map(|i| 100.0 + f64::from(i)).collect();
        let high: Vec<f64> = close.iter().map(|c| c + 1.0).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 1.0).collect();
        let kc = keltner(&high, &low, &close, n, 1.5);
        let last = len as usize - 1;
        assert!(kc.upper[last] > kc.middle[last]);
        assert!(kc.lower[last] < kc.middle[last]);
        // Bands are symmetric around the middle
        let up = kc.upper[last] - kc.middle[last];
        let down = kc.middle[last] - kc.lower[last];
        assert!((up - down).abs() < 1e-9);
    }
}
