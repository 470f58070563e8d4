//! Stop selection, position sizing, and trade economics.

pub mod drawdown;

use serde::Serialize;

use crate::data::Series;
use crate::indicators::VolumeProfile;

/// Fraction of total equity any single position may consume.
pub const MAX_POSITION_FRACTION: f64 = 0.33;
/// Buffer placed below a detected support level.
const SUPPORT_BUFFER: f64 = 0.995;
/// Swing lows are confirmed with this many lower-low bars on each side.
const SWING_FLANK: usize = 2;
/// Support detection window, in bars.
const SUPPORT_LOOKBACK: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeType {
    Swing,
    Intraday,
}

impl TradeType {
    fn default_atr_multiplier(self) -> f64 {
        match self {
            TradeType::Swing => 1.5,
            TradeType::Intraday => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMethod {
    Atr,
    Support,
    VolumeProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopSelection {
    pub stop_loss: f64,
    pub method: StopMethod,
    pub atr_stop: f64,
    pub support_stop: Option<f64>,
    pub volume_profile_stop: Option<f64>,
}

/// ATR stop: entry − multiplier·ATR, floored at zero.
pub fn atr_stop(entry: f64, atr: f64, multiplier: f64) -> f64 {
    (entry - atr * multiplier).max(0.0)
}

/// Support stop: nearest swing low below the entry over the last 50 bars,
/// with a 0.5 % buffer underneath. A swing low is a local minimum with two
/// strictly higher lows on each side.
pub fn support_stop(series: &Series, entry: f64) -> Option<f64> {
    let window = series.tail(SUPPORT_LOOKBACK);
    let lows = window.low();
    if lows.len() < 2 * SWING_FLANK + 1 {
        return None;
    }

    let mut nearest: Option<f64> = None;
    for i in SWING_FLANK..lows.len() - SWING_FLANK {
        let candidate = lows[i];
        let is_swing_low = (1..=SWING_FLANK)
            .all(|k| candidate < lows[i - k] && candidate < lows[i + k]);
        if is_swing_low && candidate < entry {
            nearest = Some(nearest.map_or(candidate, |n: f64| n.max(candidate)));
        }
    }
    nearest.map(|support| support * SUPPORT_BUFFER)
}

/// Volume-profile stop: VAL or POC, whichever sits below the entry closer to
/// it, with the same 0.5 % buffer.
pub fn volume_profile_stop(profile: &VolumeProfile, entry: f64) -> Option<f64> {
    [profile.value_area_low, profile.poc_price]
        .into_iter()
        .filter(|level| *level < entry)
        .fold(None, |acc: Option<f64>, level| {
            Some(acc.map_or(level, |a| a.max(level)))
        })
        .map(|support| support * SUPPORT_BUFFER)
}

/// Pick the tightest stop (highest price, least risk) among the ATR,
/// support, and volume-profile candidates.
pub fn optimal_stop(
    entry: f64,
    atr: f64,
    series: Option<&Series>,
    profile: Option<&VolumeProfile>,
    trade_type: TradeType,
    atr_multiplier: Option<f64>,
) -> StopSelection {
    let multiplier = atr_multiplier.unwrap_or_else(|| trade_type.default_atr_multiplier());
    let atr_candidate = atr_stop(entry, atr, multiplier);

    let mut selection = StopSelection {
        stop_loss: atr_candidate,
        method: StopMethod::Atr,
        atr_stop: atr_candidate,
        support_stop: None,
        volume_profile_stop: None,
    };

    if let Some(series) = series {
        if let Some(candidate) = support_stop(series, entry) {
            selection.support_stop = Some(candidate);
            if candidate > selection.stop_loss {
                selection.stop_loss = candidate;
                selection.method = StopMethod::Support;
            }
        }
    }

    if let Some(profile) = profile {
        if let Some(candidate) = volume_profile_stop(profile, entry) {
            selection.volume_profile_stop = Some(candidate);
            if candidate > selection.stop_loss {
                selection.stop_loss = candidate;
                selection.method = StopMethod::VolumeProfile;
            }
        }
    }

    selection
}

/// Inputs to risk-based sizing, in EUR.
#[derive(Debug, Clone, Copy)]
pub struct SizingInputs {
    pub risk_eur: f64,
    /// USD → EUR rate.
    pub rate: f64,
    pub total_capital_eur: f64,
    /// Capital already committed to open positions.
    pub allocated_capital_eur: f64,
    /// Drawdown-protection multiplier (1.0 or 0.5).
    pub risk_multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedPosition {
    pub quantity: u32,
    /// Risk actually taken after caps, in EUR.
    pub risk_eur: f64,
    pub position_value_eur: f64,
    pub capped: bool,
}

/// Risk-based sizing: quantity from the per-share risk, then two caps applied
/// in order: position value ≤ 33 % of equity, then ≤ remaining available
/// capital. Returns `None` when capping leaves less than one share.
pub fn risk_based_size(entry: f64, stop: f64, inputs: &SizingInputs) -> Option<SizedPosition> {
    if entry <= stop || entry <= 0.0 || inputs.rate <= 0.0 {
        return None;
    }
    let risk_per_share_eur = (entry - stop) * inputs.rate;
    let adjusted_risk = inputs.risk_eur * inputs.risk_multiplier;
    let mut quantity = (adjusted_risk / risk_per_share_eur).floor() as i64;
    if quantity < 1 {
        return None;
    }
    let mut capped = false;

    let share_value_eur = entry * inputs.rate;
    let max_position_value = inputs.total_capital_eur * MAX_POSITION_FRACTION;
    if quantity as f64 * share_value_eur > max_position_value {
        quantity = (max_position_value / share_value_eur).floor() as i64;
        capped = true;
    }

    let available = inputs.total_capital_eur - inputs.allocated_capital_eur;
    if quantity as f64 * share_value_eur > available {
        quantity = (available / share_value_eur).floor() as i64;
        capped = true;
    }

    if quantity < 1 {
        return None;
    }
    let quantity = quantity as u32;
    Some(SizedPosition {
        quantity,
        risk_eur: if capped {
            f64::from(quantity) * risk_per_share_eur
        } else {
            adjusted_risk
        },
        position_value_eur: f64::from(quantity) * share_value_eur,
        capped,
    })
}

/// Slot-based sizing: one slot's worth of capital at the entry price.
pub fn slot_based_size(entry: f64, rate: f64, available_eur: f64, slots: u32) -> Option<u32> {
    if entry <= 0.0 || rate <= 0.0 || slots == 0 {
        return None;
    }
    let slot_value_eur = available_eur / f64::from(slots);
    let quantity = (slot_value_eur / (entry * rate)).floor() as i64;
    (quantity >= 1).then(|| quantity as u32)
}

#[derive(Debug, Clone, Copy)]
pub struct TradeEconomics {
    pub trade_value_eur: f64,
    pub commission_percent: f64,
    pub viable: bool,
}

/// Gate out trades too small to survive fixed commissions: trade value must
/// reach the minimum and the round-trip commission must stay under 2 % of it.
pub fn trade_economics(
    entry: f64,
    quantity: u32,
    rate: f64,
    min_trade_value_eur: f64,
    commission_round_trip_eur: f64,
) -> TradeEconomics {
    let trade_value_eur = entry * f64::from(quantity) * rate;
    let commission_percent = if trade_value_eur > 0.0 {
        commission_round_trip_eur / trade_value_eur * 100.0
    } else {
        100.0
    };
    TradeEconomics {
        trade_value_eur,
        commission_percent,
        viable: trade_value_eur >= min_trade_value_eur && commission_percent < 2.0,
    }
}

/// Take-profit ladder for live workflows; the primary backtest
/// keeps it disabled.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TpLadder {
    /// Sell 50 % here and move the stop to breakeven.
    pub tp1: f64,
    /// Close the remainder.
    pub tp2: f64,
    pub breakeven: f64,
}

pub fn partial_exits(entry: f64, atr: f64) -> TpLadder {
    TpLadder {
        tp1: entry + 1.5 * atr,
        tp2: entry + 3.0 * atr,
        breakeven: entry,
    }
}
