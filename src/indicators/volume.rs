//! Volume distribution over price: point of control, value area, shelves.

use serde::Serialize;

/// Volume profile of a bar window.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeProfile {
    /// Price bin (midpoint) with the highest traded volume.
    pub poc_price: f64,
    pub poc_volume: f64,
    /// Bounds of the smallest bin set covering 70 % of total volume.
    pub value_area_high: f64,
    pub value_area_low: f64,
    /// Bin midpoints with volume > 1.5× the mean bin volume, ascending.
    pub shelves: Vec<f64>,
}

const VALUE_AREA_FRACTION: f64 = 0.70;
const SHELF_MULTIPLIER: f64 = 1.5;

/// Build a volume profile over the window, distributing each bar's volume
/// across `bins` price bins in proportion to the overlap of its high-low
/// range with each bin. Returns `None` for an empty window or one with no
/// price range.
pub fn volume_profile(high: &[f64], low: &[f64], volume: &[f64], bins: usize) -> Option<VolumeProfile> {
    if high.is_empty() || bins == 0 {
        return None;
    }
    let min_price = low.iter().copied().fold(f64::INFINITY, f64::min);
    let max_price = high.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max_price - min_price;
    if !(range.is_finite() && range > 0.0) {
        return None;
    }
    let bin_size = range / bins as f64;

    let mut bin_volume = vec![0.0_f64; bins];
    for i in 0..high.len() {
        let (bar_low, bar_high, bar_vol) = (low[i], high[i], volume[i]);
        let bar_span = bar_high - bar_low;
        for (b, slot) in bin_volume.iter_mut().enumerate() {
            let bin_low = min_price + b as f64 * bin_size;
            let bin_high = bin_low + bin_size;
            if bar_low <= bin_high && bar_high >= bin_low {
                let overlap = (bar_high.min(bin_high) - bar_low.max(bin_low)).max(0.0);
                let ratio = if bar_span > 0.0 { overlap / bar_span } else { 1.0 };
                *slot += bar_vol * ratio;
            }
        }
    }

    let total_volume: f64 = bin_volume.iter().sum();
    if total_volume <= 0.0 {
        return None;
    }

    let mid = |b: usize| min_price + (b as f64 + 0.5) * bin_size;

    let poc_bin = bin_volume
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(b, _)| b)?;

    // Value area: take bins by descending volume until 70% is covered
    let mut by_volume: Vec<usize> = (0..bins).collect();
    by_volume.sort_by(|a, b| {
        bin_volume[*b]
            .partial_cmp(&bin_volume[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut covered = 0.0;
    let mut value_bins = Vec::new();
    for b in by_volume {
        covered += bin_volume[b];
        value_bins.push(b);
        if covered >= total_volume * VALUE_AREA_FRACTION {
            break;
        }
    }
    let value_area_high = value_bins.iter().map(|b| mid(*b)).fold(f64::NEG_INFINITY, f64::max);
    let value_area_low = value_bins.iter().map(|b| mid(*b)).fold(f64::INFINITY, f64::min);

    let mean_volume = total_volume / bins as f64;
    let mut shelves: Vec<f64> = bin_volume
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > mean_volume * SHELF_MULTIPLIER)
        .map(|(b, _)| mid(b))
        .collect();
    shelves.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    Some(VolumeProfile {
        poc_price: mid(poc_bin),
        poc_volume: bin_volume[poc_bin],
        value_area_high,
        value_area_low,
        shelves,
    })
}
