//! Wilder momentum indicators: RSI and the ADX directional system.
//!
//! Both use Wilder's smoothing (EMA with α = 1/n). The smoothing reacts
//! faster than a plain rolling mean to recent moves, which the
//! mean-reversion entry rule depends on.

use super::nan_vec;
use crate::indicators::volatility::true_range;

/// RSI(n) with Wilder smoothing. NaN for the first n positions (the seed
/// needs n price changes); a pure monotone run pins the value at 100 or 0.
pub fn rsi(closes: &[f64], n: usize) -> Vec<f64> {
    let len = closes.len();
    let mut out = nan_vec(len);
    if n == 0 || len <= n {
        return out;
    }

    // Seed: simple mean of the first n gains/losses
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=n {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= n as f64;
    avg_loss /= n as f64;
    out[n] = rsi_value(avg_gain, avg_loss);

    for i in (n + 1)..len {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (n as f64 - 1.0) + gain) / n as f64;
        avg_loss = (avg_loss * (n as f64 - 1.0) + loss) / n as f64;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

fn di_dx(sm_tr: f64, sm_plus: f64, sm_minus: f64) -> (f64, f64, f64) {
    let (plus_di, minus_di) = if sm_tr > 0.0 {
        (100.0 * sm_plus / sm_tr, 100.0 * sm_minus / sm_tr)
    } else {
        (0.0, 0.0)
    };
    let di_sum = plus_di + minus_di;
    let dx = if di_sum > 0.0 {
        100.0 * (plus_di - minus_di).abs() / di_sum
    } else {
        0.0
    };
    (plus_di, minus_di, dx)
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// ADX output. All three vectors share the source index: ±DI warm from
/// index n, ADX from index 2n−1; no NaN after that.
#[derive(Debug, Clone)]
pub struct Adx {
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
    pub adx: Vec<f64>,
}

/// Wilder DMI/ADX(n): smoothed ±DM and TR, DI = 100·DM/TR,
/// DX = 100·|+DI − −DI| / (+DI + −DI), ADX = Wilder-smoothed DX.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], n: usize) -> Adx {
    let len = close.len();
    let mut result = Adx {
        plus_di: nan_vec(len),
        minus_di: nan_vec(len),
        adx: nan_vec(len),
    };
    if n == 0 || len <= 2 * n - 1 {
        return result;
    }

    let tr = true_range(high, low, close);
    let mut plus_dm = vec![0.0; len];
    let mut minus_dm = vec![0.0; len];
    for i in 1..len {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    // Wilder accumulation: seed with the sum of the first n movement values,
    // then sm[i] = sm[i-1] - sm[i-1]/n + x[i]
    let mut sm_tr: f64 = tr[1..=n].iter().sum();
    let mut sm_plus: f64 = plus_dm[1..=n].iter().sum();
    let mut sm_minus: f64 = minus_dm[1..=n].iter().sum();

    let mut dx = nan_vec(len);
    let (p, m, d) = di_dx(sm_tr, sm_plus, sm_minus);
    result.plus_di[n] = p;
    result.minus_di[n] = m;
    dx[n] = d;
    for i in (n + 1)..len {
        sm_tr = sm_tr - sm_tr / n as f64 + tr[i];
        sm_plus = sm_plus - sm_plus / n as f64 + plus_dm[i];
        sm_minus = sm_minus - sm_minus / n as f64 + minus_dm[i];
        let (p, m, d) = di_dx(sm_tr, sm_plus, sm_minus);
        result.plus_di[i] = p;
        result.minus_di[i] = m;
        dx[i] = d;
    }

    // ADX seeds as the mean of the first n DX values, then Wilder recurrence
    let seed_end = 2 * n - 1;
    let mut adx_value = dx[n..=seed_end].iter().sum::<f64>() / n as f64;
    result.adx[seed_end] = adx_value;
    for i in (seed_end + 1)..len {
        adx_value = (adx_value * (n as f64 - 1.0) + dx[i]) / n as f64;
        result.adx[i] = adx_value;
    }

    result
}
