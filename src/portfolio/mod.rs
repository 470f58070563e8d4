//! Portfolio manager: regime detection, multi-strategy signal generation,
//! ranking, diversification, and dynamic sizing into an executable plan.
//!
//! The regime never silences a strategy; it boosts the ranking of the one
//! that matches. Capital rules are enforced sequentially in ranked order, so
//! the best signals claim capital and sector room first.

pub mod sectors;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::data::market::MarketStore;
use crate::data::user::{Settings, SizingMethod};
use crate::data::Series;
use crate::regime::{self, Regime, RegimeSnapshot};
use crate::risk::{self, SizingInputs};
use crate::strategies::{Signal, StrategyContext, StrategyKind};

/// Calendar lookback fetched per symbol; covers SMA(200) + margin in
/// trading days.
const LOOKBACK_DAYS: i64 = 450;
/// No sector may claim more than this share of total portfolio capital.
const MAX_SECTOR_CONCENTRATION: f64 = 0.40;
/// Dynamic risk per trade when no explicit setting exists.
const DEFAULT_RISK_FRACTION: f64 = 0.015;

/// An already-committed position, reduced to what the capital rules need.
#[derive(Debug, Clone)]
pub struct OpenExposure {
    pub symbol: String,
    pub value_eur: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalAllocation {
    pub stock: f64,
    pub cash: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioPlan {
    pub as_of: NaiveDate,
    pub regime: RegimeSnapshot,
    pub primary_strategy: StrategyKind,
    pub stock_signals: Vec<Signal>,
    pub capital_allocation: CapitalAllocation,
}

/// Regime → lead strategy.
pub fn primary_strategy(regime: Regime) -> StrategyKind {
    match regime {
        Regime::Trending | Regime::StrongTrend => StrategyKind::Momentum,
        Regime::Choppy => StrategyKind::MeanReversion,
        Regime::Breakout => StrategyKind::Breakout,
    }
}

/// Strategy-specific ranking score; the regime boost multiplies it.
fn score(signal: &Signal) -> f64 {
    let base = match signal.strategy {
        StrategyKind::Momentum => signal.metrics.return_3m.unwrap_or(0.0) * 100.0,
        StrategyKind::MeanReversion => 100.0 - signal.metrics.rsi.unwrap_or(50.0),
        StrategyKind::Breakout => signal.metrics.volume_ratio.unwrap_or(1.0) * 50.0,
    };
    base * signal.regime_boost
}

fn rank(mut signals: Vec<Signal>) -> Vec<Signal> {
    signals.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    signals
}

/// One signal per symbol, keeping the most-boosted candidate.
fn dedup_by_symbol(signals: Vec<Signal>) -> Vec<Signal> {
    let mut best: HashMap<String, Signal> = HashMap::new();
    for signal in signals {
        match best.get(&signal.symbol) {
            Some(existing) if existing.regime_boost >= signal.regime_boost => {}
            _ => {
                best.insert(signal.symbol.clone(), signal);
            }
        }
    }
    best.into_values().collect()
}

/// Drop candidates volatile enough to gap through their stops. Signals with
/// no NATR reading pass.
fn filter_high_volatility(signals: Vec<Signal>, max_natr: f64) -> Vec<Signal> {
    signals
        .into_iter()
        .filter(|signal| {
            let keep = signal.metrics.natr <= max_natr
                || signal.metrics.natr.is_nan()
                || signal.metrics.natr == 0.0;
            if !keep {
                tracing::info!(
                    symbol = %signal.symbol,
                    natr = format!("{:.1}%", signal.metrics.natr),
                    "Volatility filter: signal removed"
                );
            }
            keep
        })
        .collect()
}

/// Opt-in stop refinement: raise each signal's stop to the tightest of the
/// ATR, swing-low, and volume-profile candidates, never loosening it and
/// never crossing the entry.
fn enhance_stop_losses(signals: &mut [Signal], bars: &HashMap<String, Series>) {
    for signal in signals.iter_mut() {
        let Some(series) = bars.get(&signal.symbol) else {
            continue;
        };
        let window = series.tail(100);
        let profile = crate::indicators::volume_profile(
            window.high(),
            window.low(),
            &window.volume_f64(),
            20,
        );
        let selection = risk::optimal_stop(
            signal.entry_price,
            signal.metrics.atr,
            Some(series),
            profile.as_ref(),
            risk::TradeType::Swing,
            None,
        );
        if selection.stop_loss > signal.stop_loss && selection.stop_loss < signal.entry_price {
            tracing::debug!(
                symbol = %signal.symbol,
                method = ?selection.method,
                from = format!("{:.2}", signal.stop_loss),
                to = format!("{:.2}", selection.stop_loss),
                "Stop tightened"
            );
            signal.stop_loss = selection.stop_loss;
        }
    }
}

pub struct PortfolioManager {
    store: Arc<MarketStore>,
    settings: Settings,
    filters: FilterConfig,
    /// Fixed risk used inside strategies before dynamic re-sizing.
    strategy_risk_eur: f64,
}

impl PortfolioManager {
    pub fn new(
        store: Arc<MarketStore>,
        settings: Settings,
        filters: FilterConfig,
        strategy_risk_eur: f64,
    ) -> Self {
        Self {
            store,
            settings,
            filters,
            strategy_risk_eur,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Build the plan as of a date. `open_positions` are current commitments
    /// (journal or simulator); `risk_multiplier` comes from drawdown
    /// protection.
    pub fn generate_plan(
        &self,
        as_of: NaiveDate,
        universe: Option<Vec<String>>,
        open_positions: &[OpenExposure],
        rate: f64,
        risk_multiplier: f64,
    ) -> Result<PortfolioPlan> {
        let benchmark_symbol = self.filters.benchmark_symbol.clone();
        let bench_map = self
            .store
            .bars_until(std::slice::from_ref(&benchmark_symbol), as_of, LOOKBACK_DAYS);
        let benchmark = bench_map.get(&benchmark_symbol);

        let empty = Series::empty(&benchmark_symbol);
        let regime_snapshot = regime::detect(benchmark.unwrap_or(&empty), as_of);
        let primary = primary_strategy(regime_snapshot.regime);
        tracing::info!(
            regime = %regime_snapshot.regime,
            %primary,
            confidence = regime_snapshot.confidence,
            "Portfolio plan {as_of}"
        );

        let universe: Vec<String> = universe
            .unwrap_or_else(|| self.store.all_symbols())
            .into_iter()
            .filter(|s| !sectors::is_excluded_etf(s) && *s != benchmark_symbol)
            .collect();
        let bars = self.store.bars_until(&universe, as_of, LOOKBACK_DAYS);

        let ctx = StrategyContext {
            risk_per_trade_eur: self.strategy_risk_eur,
            rate,
            min_dollar_volume: self.filters.min_dollar_volume,
            ..StrategyContext::default()
        };

        let mut all_signals = Vec::new();
        for kind in StrategyKind::ALL {
            let mut signals = kind.generate_signals(&bars, benchmark, as_of, &ctx);
            for signal in &mut signals {
                signal.regime_boost = if kind == primary { 1.2 } else { 1.0 };
            }
            tracing::info!("  {kind}: {} signals", signals.len());
            all_signals.extend(signals);
        }

        let deduped = dedup_by_symbol(all_signals);
        let calm = filter_high_volatility(deduped, self.filters.max_natr);
        let mut ranked = rank(calm);
        if self.settings.use_smart_stops {
            enhance_stop_losses(&mut ranked, &bars);
        }
        let stock_signals = self.accept_and_size(ranked, open_positions, rate, risk_multiplier);

        let total = self.settings.total_capital;
        Ok(PortfolioPlan {
            as_of,
            regime: regime_snapshot,
            primary_strategy: primary,
            stock_signals,
            capital_allocation: CapitalAllocation {
                stock: total * self.settings.stock_allocation,
                cash: total * self.settings.cash_reserve(),
                total,
            },
        })
    }

    /// Sequential accept-or-skip over ranked signals: each accepted signal is
    /// re-sized at the configured risk (33 % equity cap, remaining-capital
    /// cap), then checked against the sector rules with its sized value.
    /// Stops once the position limit is reached.
    fn accept_and_size(
        &self,
        ranked: Vec<Signal>,
        open_positions: &[OpenExposure],
        rate: f64,
        risk_multiplier: f64,
    ) -> Vec<Signal> {
        let total_capital = self.settings.total_capital;
        let dynamic_risk = self
            .settings
            .risk_per_trade_eur
            .unwrap_or(total_capital * DEFAULT_RISK_FRACTION);

        let mut allocated: f64 = open_positions.iter().map(|p| p.value_eur).sum();
        let mut sector_values: HashMap<&str, f64> = HashMap::new();
        let mut sector_counts: HashMap<&str, u32> = HashMap::new();
        for position in open_positions {
            if let Some(sector) = sectors::sector_for(&position.symbol) {
                *sector_values.entry(sector).or_default() += position.value_eur;
                *sector_counts.entry(sector).or_default() += 1;
            }
        }

        let max_positions = self.settings.max_stock_positions as usize;
        let mut accepted: Vec<Signal> = Vec::new();

        for mut signal in ranked {
            if accepted.len() >= max_positions {
                break;
            }

            let sized = match self.settings.sizing_method {
                SizingMethod::RiskBased => risk::risk_based_size(
                    signal.entry_price,
                    signal.stop_loss,
                    &SizingInputs {
                        risk_eur: dynamic_risk,
                        rate,
                        total_capital_eur: total_capital,
                        allocated_capital_eur: allocated,
                        risk_multiplier,
                    },
                ),
                SizingMethod::SlotBased => risk::slot_based_size(
                    signal.entry_price,
                    rate,
                    total_capital - allocated,
                    self.settings.slots_count,
                )
                .map(|quantity| risk::SizedPosition {
                    quantity,
                    risk_eur: f64::from(quantity)
                        * (signal.entry_price - signal.stop_loss)
                        * rate,
                    position_value_eur: f64::from(quantity) * signal.entry_price * rate,
                    capped: false,
                }),
            };
            let Some(sized) = sized else {
                tracing::info!(symbol = %signal.symbol, "Skipped: insufficient capital for one share");
                continue;
            };

            if let Some(sector) = sectors::sector_for(&signal.symbol) {
                let count = sector_counts.get(sector).copied().unwrap_or(0);
                if count >= self.settings.max_symbols_per_sector {
                    tracing::info!(
                        symbol = %signal.symbol,
                        sector,
                        "Skipped: sector already holds {count} position(s)"
                    );
                    continue;
                }
                let projected = sector_values.get(sector).copied().unwrap_or(0.0)
                    + sized.position_value_eur;
                if projected > total_capital * MAX_SECTOR_CONCENTRATION {
                    tracing::info!(
                        symbol = %signal.symbol,
                        sector,
                        projected = format!("{:.0}%", projected / total_capital * 100.0),
                        "Skipped: sector concentration limit"
                    );
                    continue;
                }
                *sector_values.entry(sector).or_default() += sized.position_value_eur;
                *sector_counts.entry(sector).or_default() += 1;
            }

            signal.position_size = sized.quantity;
            signal.risk_amount = sized.risk_eur;
            allocated += sized.position_value_eur;
            accepted.push(signal);
        }

        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortfolioConfig;
    use crate::data::test_fixtures::bars_from_closes;
    use crate::strategies::SignalMetrics;
    use std::collections::BTreeMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn make_signal(symbol: &str, strategy: StrategyKind, boost: f64) -> Signal {
        let metrics = match strategy {
            StrategyKind::Momentum => SignalMetrics {
                return_3m: Some(0.10),
                natr: 2.0,
                ..SignalMetrics::default()
            },
            StrategyKind::MeanReversion => SignalMetrics {
                rsi: Some(30.0),
                natr: 2.0,
                ..SignalMetrics::default()
            },
            StrategyKind::Breakout => SignalMetrics {
                volume_ratio: Some(2.0),
                natr: 2.0,
                ..SignalMetrics::default()
            },
        };
        Signal {
            symbol: symbol.to_string(),
            strategy,
            entry_price: 100.0,
            stop_loss: 96.0,
            target_price: 110.0,
            position_size: 5,
            risk_amount: 20.0,
            signal_date: d(2024, 3, 4),
            metrics,
            filters_passed: BTreeMap::new(),
            regime_boost: boost,
        }
    }

    fn manager(settings_override: impl FnOnce(&mut Settings)) -> PortfolioManager {
        let dir = tempfile::tempdir().unwrap();
        let store = MarketStore::open(dir.path()).unwrap();
        // Keep the tempdir alive for the process; tests that need store data
        // build their own manager.
        std::mem::forget(dir);
        let user_dir = tempfile::tempdir().unwrap();
        let user = crate::data::user::UserStore::open(user_dir.path().join("u.sqlite")).unwrap();
        std::mem::forget(user_dir);
        let mut settings = Settings::load(&user, &PortfolioConfig::default());
        settings_override(&mut settings);
        PortfolioManager::new(store, settings, FilterConfig::default(), 20.0)
    }

    #[test]
    fn primary_strategy_by_regime() {
        assert_eq!(primary_strategy(Regime::Trending), StrategyKind::Momentum);
        assert_eq!(primary_strategy(Regime::StrongTrend), StrategyKind::Momentum);
        assert_eq!(primary_strategy(Regime::Choppy), StrategyKind::MeanReversion);
        assert_eq!(primary_strategy(Regime::Breakout), StrategyKind::Breakout);
    }

    #[test]
    fn scores_follow_strategy_metrics() {
        // momentum 10% -> 10; mean reversion RSI 30 -> 70; breakout 2x -> 100
        let momentum = make_signal("A", StrategyKind::Momentum, 1.0);
        let mean_rev = make_signal("B", StrategyKind::MeanReversion, 1.0);
        let breakout = make_signal("C", StrategyKind::Breakout, 1.0);
        assert!((score(&momentum) - 10.0).abs() < 1e-9);
        assert!((score(&mean_rev) - 70.0).abs() < 1e-9);
        assert!((score(&breakout) - 100.0).abs() < 1e-9);

        let ranked = rank(vec![momentum, mean_rev, breakout]);
        assert_eq!(ranked[0].symbol, "C");
        assert_eq!(ranked[1].symbol, "B");
        assert_eq!(ranked[2].symbol, "A");
    }

    #[test]
    fn boost_reorders_ranking() {
        let plain = make_signal("B", StrategyKind::Breakout, 1.0); // 100
        let boosted = make_signal("M", StrategyKind::MeanReversion, 1.2); // 84
        let ranked = rank(vec![boosted.clone(), plain.clone()]);
        assert_eq!(ranked[0].symbol, "B");

        // A stronger boost flips the order
        let mut boosted = boosted;
        boosted.metrics.rsi = Some(10.0); // 90 * 1.2 = 108
        let ranked = rank(vec![plain, boosted]);
        assert_eq!(ranked[0].symbol, "M");
    }

    #[test]
    fn dedup_keeps_highest_boost() {
        let low = make_signal("NVDA", StrategyKind::Momentum, 1.0);
        let high = make_signal("NVDA", StrategyKind::Breakout, 1.2);
        let deduped = dedup_by_symbol(vec![low, high]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].strategy, StrategyKind::Breakout);
    }

    #[test]
    fn volatility_filter_drops_explosive_names() {
        let mut wild = make_signal("WILD", StrategyKind::Momentum, 1.0);
        wild.metrics.natr = 9.5;
        let calm = make_signal("CALM", StrategyKind::Momentum, 1.0);
        let mut unknown = make_signal("MYSTERY", StrategyKind::Momentum, 1.0);
        unknown.metrics.natr = 0.0;

        let kept = filter_high_volatility(vec![wild, calm, unknown], 8.0);
        let symbols: Vec<&str> = kept.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["CALM", "MYSTERY"]);
    }

    #[test]
    fn sector_concentration_blocks_second_semi() {
        let pm = manager(|s| {
            s.risk_per_trade_eur = Some(400.0); // sizes to the 33% cap
        });
        // Both semiconductors: each would size to 33% of capital; two would
        // put the sector at 66% > 40%
        let signals = vec![
            make_signal("NVDA", StrategyKind::Momentum, 1.2),
            make_signal("AMD", StrategyKind::Momentum, 1.0),
            make_signal("JPM", StrategyKind::Momentum, 1.0),
        ];
        let accepted = pm.accept_and_size(signals, &[], 1.0, 1.0);
        let symbols: Vec<&str> = accepted.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["NVDA", "JPM"]);
    }

    #[test]
    fn sector_cap_counts_open_positions() {
        let pm = manager(|s| {
            s.risk_per_trade_eur = Some(400.0);
        });
        let open = vec![OpenExposure {
            symbol: "MU".to_string(),
            value_eur: 3_500.0,
        }];
        let signals = vec![make_signal("NVDA", StrategyKind::Momentum, 1.0)];
        let accepted = pm.accept_and_size(signals, &open, 1.0, 1.0);
        assert!(accepted.is_empty(), "semis already near the cap");
    }

    #[test]
    fn unknown_sector_bypasses_sector_rules() {
        let pm = manager(|s| {
            s.risk_per_trade_eur = Some(400.0);
        });
        let signals = vec![
            make_signal("ZZZA", StrategyKind::Momentum, 1.0),
            make_signal("ZZZB", StrategyKind::Momentum, 1.0),
        ];
        let accepted = pm.accept_and_size(signals, &[], 1.0, 1.0);
        assert_eq!(accepted.len(), 2);
    }

    #[test]
    fn capital_consumed_sequentially() {
        let pm = manager(|s| {
            s.total_capital = 10_000.0;
            s.risk_per_trade_eur = Some(400.0);
        });
        // Different sectors so only capital limits apply: each sizes to 33%
        let signals = vec![
            make_signal("JPM", StrategyKind::Momentum, 1.0),
            make_signal("XOM", StrategyKind::Momentum, 1.0),
            make_signal("UNH", StrategyKind::Momentum, 1.0),
            make_signal("CAT", StrategyKind::Momentum, 1.0),
        ];
        let accepted = pm.accept_and_size(signals, &[], 1.0, 1.0);
        // First three size to the 33% cap; the fourth gets the leftovers
        assert_eq!(accepted.len(), 4);
        assert_eq!(accepted[0].position_size, 33);
        assert_eq!(accepted[3].position_size, 1);
        let total_value: f64 = accepted
            .iter()
            .map(|s| f64::from(s.position_size) * s.entry_price)
            .sum();
        assert!(total_value <= 10_000.0);
        for signal in &accepted {
            assert!(f64::from(signal.position_size) * signal.entry_price <= 3_300.0);
        }
    }

    #[test]
    fn position_limit_truncates() {
        let pm = manager(|s| {
            s.max_stock_positions = 2;
            s.risk_per_trade_eur = Some(50.0);
        });
        let signals = vec![
            make_signal("JPM", StrategyKind::Momentum, 1.0),
            make_signal("XOM", StrategyKind::Momentum, 1.0),
            make_signal("UNH", StrategyKind::Momentum, 1.0),
        ];
        let accepted = pm.accept_and_size(signals, &[], 1.0, 1.0);
        assert_eq!(accepted.len(), 2);
    }

    #[test]
    fn risk_multiplier_halves_dynamic_size() {
        let pm = manager(|s| {
            s.risk_per_trade_eur = Some(100.0);
        });
        let full = pm.accept_and_size(
            vec![make_signal("JPM", StrategyKind::Momentum, 1.0)],
            &[],
            1.0,
            1.0,
        );
        let reduced = pm.accept_and_size(
            vec![make_signal("JPM", StrategyKind::Momentum, 1.0)],
            &[],
            1.0,
            0.5,
        );
        assert_eq!(full[0].position_size, 25); // 100 EUR / 4 EUR per share
        assert_eq!(reduced[0].position_size, 12);
    }

    #[test]
    fn smart_stops_tighten_but_never_cross_entry() {
        use crate::data::test_fixtures::series_from_closes;

        // Price history well below the entry: only the ATR candidate is usable
        let series = series_from_closes("NVDA", d(2023, 6, 1), &[90.0; 120]);
        let mut bars = HashMap::new();
        bars.insert("NVDA".to_string(), series);

        let mut signal = make_signal("NVDA", StrategyKind::Momentum, 1.0);
        signal.metrics.atr = 2.0; // 1.5·ATR stop at 97, tighter than 96
        let mut signals = vec![signal];
        enhance_stop_losses(&mut signals, &bars);
        assert!((signals[0].stop_loss - 97.0).abs() < 1e-9);

        // Unknown symbol: untouched
        let mut signals = vec![make_signal("ZZZZ", StrategyKind::Momentum, 1.0)];
        enhance_stop_losses(&mut signals, &bars);
        assert!((signals[0].stop_loss - 96.0).abs() < 1e-9);

        // Zero ATR degenerates to the entry price and must be rejected
        let mut degenerate = make_signal("NVDA", StrategyKind::Momentum, 1.0);
        degenerate.metrics.atr = 0.0;
        let mut signals = vec![degenerate];
        enhance_stop_losses(&mut signals, &bars);
        assert!(signals[0].stop_loss < signals[0].entry_price);
    }

    #[test]
    fn end_to_end_plan_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarketStore::open(dir.path()).unwrap();

        // Benchmark: slow riser. Stock: strong riser clearing every filter.
        let bench_closes: Vec<f64> = (0..220).map(|i| 400.0 + f64::from(i) * 0.1).collect();
        store
            .insert(&bars_from_closes("SPY", d(2023, 6, 1), &bench_closes))
            .unwrap();
        let stock_closes: Vec<f64> = (0..220).map(|i| 50.0 + f64::from(i) * 0.4).collect();
        store
            .insert(&bars_from_closes("WINNER", d(2023, 6, 1), &stock_closes))
            .unwrap();

        let user_dir = tempfile::tempdir().unwrap();
        let user = crate::data::user::UserStore::open(user_dir.path().join("u.sqlite")).unwrap();
        let settings = Settings::load(&user, &PortfolioConfig::default());
        let pm = PortfolioManager::new(store.clone(), settings, FilterConfig::default(), 20.0);

        let as_of = store.last_date("WINNER").unwrap();
        let plan = pm.generate_plan(as_of, None, &[], 0.92, 1.0).unwrap();

        assert_eq!(plan.primary_strategy, primary_strategy(plan.regime.regime));
        assert!((plan.capital_allocation.total - 10_000.0).abs() < 1e-9);
        assert!((plan.capital_allocation.stock - 9_000.0).abs() < 1e-9);
        assert!((plan.capital_allocation.cash - 1_000.0).abs() < 1e-9);
        assert!(plan.stock_signals.len() <= 5);
        // The winner passes momentum's filters and survives sizing
        assert!(plan
            .stock_signals
            .iter()
            .any(|s| s.symbol == "WINNER" && s.position_size >= 1));
        for signal in &plan.stock_signals {
            signal.validate().unwrap();
        }
    }
}
