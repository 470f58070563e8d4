//! Pure indicator functions over price/volume slices.
//!
//! Every function returns a vector aligned 1-to-1 by index with its input.
//! Positions inside the warmup window are `f64::NAN`; once the window is
//! satisfied no NaN is ever emitted. Callers test warmup with
//! [`is_warm`], never by comparing against a default value.

pub mod momentum;
pub mod overlap;
pub mod volatility;
pub mod volume;

pub use momentum::{adx, rsi, Adx};
pub use overlap::{bollinger, donchian, ema, keltner, rolling_vwap, sma, Bollinger, Donchian, Keltner};
pub use volatility::{atr, natr, true_range};
pub use volume::{volume_profile, VolumeProfile};

pub(crate) fn nan_vec(len: usize) -> Vec<f64> {
    vec![f64::NAN; len]
}

/// True once the indicator has left its warmup window at `index`.
pub fn is_warm(values: &[f64], index: usize) -> bool {
    values.get(index).is_some_and(|v| !v.is_nan())
}

/// Last value if it is out of warmup.
pub fn last_valid(values: &[f64]) -> Option<f64> {
    values.last().copied().filter(|v| !v.is_nan())
}

/// Rolling sample standard deviation (ddof = 1), NaN for the first n−1.
pub(crate) fn rolling_std(values: &[f64], n: usize) -> Vec<f64> {
    let mut out = nan_vec(values.len());
    if n < 2 {
        return out;
    }
    for i in (n - 1)..values.len() {
        let window = &values[i + 1 - n..=i];
        let mean = window.iter().sum::<f64>() / n as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        out[i] = var.sqrt();
    }
    out
}
