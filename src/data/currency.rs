//! USD→EUR conversion for display and risk accounting.
//!
//! Rate resolution order: manual override setting, fresh 24 h cache, live
//! fetch from a free USD-base rates API, stale cache, hardcoded 0.92.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Deserialize;

use super::user::UserStore;

pub const FALLBACK_RATE: f64 = 0.92;
const CACHE_TTL_HOURS: i64 = 24;
const RATES_URL: &str = "https://api.exchangerate-api.com/v4/latest/USD";
const FETCH_TIMEOUT_SECS: u64 = 5;

const RATE_KEY: &str = "cached_exchange_rate";
const RATE_TS_KEY: &str = "cached_exchange_rate_timestamp";
const OVERRIDE_KEY: &str = "exchange_rate";

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

/// Resolve the USD→EUR rate. Never fails: falls back through progressively
/// staler sources down to the hardcoded rate.
pub async fn get_exchange_rate(store: Option<&UserStore>) -> f64 {
    let now = chrono::Local::now().naive_local();

    if let Some(store) = store {
        if let Some(rate) = store.setting_f64(OVERRIDE_KEY) {
            return rate;
        }
        if let Some(rate) = fresh_cached_rate(store, now) {
            return rate;
        }
    }

    if let Some(rate) = fetch_rate_from_api().await {
        if let Some(store) = store {
            cache_rate(store, rate, now);
        }
        return rate;
    }

    // Stale cache beats the hardcoded constant
    if let Some(store) = store {
        if let Some(rate) = any_cached_rate(store) {
            tracing::warn!(rate, "Exchange-rate API unreachable; using stale cached rate");
            return rate;
        }
    }

    tracing::warn!("Exchange-rate API unreachable and no cache; using fallback {FALLBACK_RATE}");
    FALLBACK_RATE
}

fn fresh_cached_rate(store: &UserStore, now: NaiveDateTime) -> Option<f64> {
    let rate = store.setting_f64(RATE_KEY)?;
    let cached_at = store.setting_datetime(RATE_TS_KEY)?;
    let age_hours = (now - cached_at).num_seconds() as f64 / 3600.0;
    (age_hours >= 0.0 && age_hours < CACHE_TTL_HOURS as f64).then_some(rate)
}

fn any_cached_rate(store: &UserStore) -> Option<f64> {
    store.setting_f64(RATE_KEY)
}

fn cache_rate(store: &UserStore, rate: f64, now: NaiveDateTime) {
    let wrote = store
        .set_setting(RATE_KEY, &rate.to_string())
        .and_then(|()| store.set_setting(RATE_TS_KEY, &now.format("%Y-%m-%dT%H:%M:%S%.f").to_string()));
    if let Err(e) = wrote {
        tracing::debug!("Could not cache exchange rate: {e:#}");
    }
}

async fn fetch_rate_from_api() -> Option<f64> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
        .ok()?;
    let response = match client.get(RATES_URL).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            tracing::debug!(status = %r.status(), "Exchange-rate API returned an error status");
            return None;
        }
        Err(e) => {
            tracing::debug!("Exchange-rate API request failed: {e}");
            return None;
        }
    };
    let body: RatesResponse = response.json().await.ok()?;
    let rate = body.rates.get("EUR").copied()?;
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

pub fn usd_to_eur(amount_usd: f64, rate: f64) -> f64 {
    amount_usd * rate
}
