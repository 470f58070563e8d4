//! True range and average true range.

use super::nan_vec;

/// True range: max(high−low, |high−prev_close|, |low−prev_close|).
/// The first bar has no previous close and uses high−low.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let len = close.len();
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let hl = high[i] - low[i];
        let tr = if i == 0 {
            hl
        } else {
            let prev = close[i - 1];
            hl.max((high[i] - prev).abs()).max((low[i] - prev).abs())
        };
        out.push(tr);
    }
    out
}

/// ATR(n): rolling mean of true range, NaN for the first n−1 positions.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], n: usize) -> Vec<f64> {
    let tr = true_range(high, low, close);
    let len = tr.len();
    let mut out = nan_vec(len);
    if n == 0 || len < n {
        return out;
    }
    let mut sum: f64 = tr[..n].iter().sum();
    out[n - 1] = sum / n as f64;
    for i in n..len {
        sum += tr[i] - tr[i - n];
        out[i] = sum / n as f64;
    }
    out
}

/// Normalized ATR: ATR as a percentage of the close.
pub fn natr(atr_values: &[f64], close: &[f64]) -> Vec<f64> {
    atr_values
        .iter()
        .zip(close)
        .map(|(a, c)| {
            if a.is_nan() || *c == 0.0 {
                f64::NAN
            } else {
                a / c * 100.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn true_range_uses_gap_from_previous_close() {
        let high = vec![11.0, 15.0];
        let low = vec![9.0, 14.0];
        let close = vec![10.0, 14.5];
        let tr = true_range(&high, &low, &close);
        assert!((tr[0] - 2.0).abs() < 1e-12);
        // gap up: high - prev_close = 5 dominates high - low = 1
        assert!((tr[1] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn atr_constant_range_converges_to_range() {
        // Every bar: high = close, low = close - 1, close steps +1
        // TR = max(1, |c - pc|=1, |c-1-pc|=0) = 1 everywhere
        let close: Vec<f64> = (100..160).map(f64::from).collect();
        let high = close.clone();
        let low: Vec<f64> = close.iter().map(|c| c - 1.0).collect();
        let out = atr(&high, &low, &close, 14);
        assert!(out[12].is_nan());
        assert!((out[13] - 1.0).abs() < 1e-9);
        assert!((out[59] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn natr_scales_by_close() {
        let atr_values = vec![f64::NAN, 2.0];
        let close = vec![100.0, 100.0];
        let out = natr(&atr_values, &close);
        assert!(out[0].is_nan());
        assert!((out[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn atr_insufficient_data_all_nan() {
        let close = vec![1.0, 2.0];
        let out = atr(&close, &close, &close, 14);
        assert!(out.iter().all(|v| v.is_nan()));
    }
}
