//! Typed configuration tree.
//!
//! The tree is deserialized from TOML and validated once at startup; numerical
//! code receives plain values from it, never the tree itself.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use garde::Validate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[garde(dive)]
    pub data_provider: ProviderConfig,
    #[garde(dive)]
    pub filters: FilterConfig,
    #[garde(dive)]
    pub risk: RiskConfig,
    #[garde(dive)]
    pub portfolio: PortfolioConfig,
    #[garde(skip)]
    pub paths: PathsConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Starter,
    Developer,
    Advanced,
}

impl Plan {
    /// Vendor-published request budget for the tier.
    pub fn requests_per_minute(self) -> u32 {
        match self {
            Plan::Free => 5,
            Plan::Starter => 200,
            Plan::Developer => 1000,
            Plan::Advanced => 2000,
        }
    }

    /// Ingestion fan-out width. The rate limiter stays authoritative; this
    /// only bounds how many fetches are in flight at once.
    pub fn batch_size(self) -> usize {
        match self {
            Plan::Free => 1,
            Plan::Starter => 10,
            Plan::Developer | Plan::Advanced => 50,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Developer => "developer",
            Plan::Advanced => "advanced",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProviderConfig {
    #[garde(skip)]
    pub plan: Plan,
    /// Overrides the plan default when set.
    #[garde(inner(range(min = 1)))]
    pub requests_per_minute: Option<u32>,
    #[garde(range(min = 1, max = 30))]
    pub historical_years: u32,
    #[garde(skip)]
    pub symbols_file: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            plan: Plan::Free,
            requests_per_minute: None,
            historical_years: 5,
            symbols_file: PathBuf::from("config/watchlist.txt"),
        }
    }
}

impl ProviderConfig {
    pub fn effective_requests_per_minute(&self) -> u32 {
        self.requests_per_minute
            .unwrap_or_else(|| self.plan.requests_per_minute())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FilterConfig {
    #[garde(inner(range(min = 0.0)))]
    pub min_price: Option<f64>,
    #[garde(inner(range(min = 0.0)))]
    pub max_price: Option<f64>,
    #[garde(inner(range(min = 0.0)))]
    pub min_avg_volume: Option<f64>,
    #[garde(inner(range(min = 0.0)))]
    pub min_market_cap: Option<f64>,
    #[garde(inner(range(min = 0.0)))]
    pub min_natr: Option<f64>,
    /// Signals above this normalized ATR are dropped (gap-through-stop risk).
    #[garde(range(min = 0.0, max = 100.0))]
    pub max_natr: f64,
    #[garde(range(min = 0.0))]
    pub min_dollar_volume: f64,
    #[garde(inner(range(min = 0.0)))]
    pub max_spread_percent: Option<f64>,
    #[garde(length(min = 1))]
    pub benchmark_symbol: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_price: None,
            max_price: None,
            min_avg_volume: None,
            min_market_cap: None,
            min_natr: None,
            max_natr: 8.0,
            min_dollar_volume: 3_000_000.0,
            max_spread_percent: None,
            benchmark_symbol: "SPY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BearMarketMode {
    /// No new entries while the benchmark is in a bear market.
    #[default]
    Cash,
    /// A single slot stays available.
    Reduced,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RiskConfig {
    #[garde(range(min = 1, max = 52))]
    pub max_hold_weeks: u32,
    #[garde(range(min = 0.0, max = 5.0))]
    pub entry_slippage_pct: f64,
    #[garde(range(min = 0.0, max = 5.0))]
    pub exit_slippage_pct: f64,
    #[garde(range(min = 0.0, max = 50.0))]
    pub trailing_trigger_pct: f64,
    #[garde(range(min = 0.0, max = 50.0))]
    pub trailing_distance_pct: f64,
    #[garde(range(min = 0.0, max = 50.0))]
    pub trailing_min_lock_pct: f64,
    #[garde(skip)]
    pub bear_market_protection: bool,
    #[garde(skip)]
    pub bear_market_mode: BearMarketMode,
    #[garde(skip)]
    pub bear_market_exit_positions: bool,
    #[garde(range(min = 0.1, max = 10.0))]
    pub atr_multiplier: f64,
    #[garde(range(min = 0.0))]
    pub commission_per_trade: f64,
    #[garde(range(min = 0.0))]
    pub min_trade_value: f64,
    #[garde(skip)]
    pub use_fixed_risk: bool,
    #[garde(range(min = 0.0))]
    pub max_risk_per_trade_fixed: f64,
    #[garde(range(min = 0.0, max = 100.0))]
    pub max_risk_per_trade_percent: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_hold_weeks: 8,
            entry_slippage_pct: 0.2,
            exit_slippage_pct: 0.1,
            trailing_trigger_pct: 6.0,
            trailing_distance_pct: 1.5,
            trailing_min_lock_pct: 3.5,
            bear_market_protection: true,
            bear_market_mode: BearMarketMode::Cash,
            bear_market_exit_positions: true,
            atr_multiplier: 1.5,
            commission_per_trade: 1.0,
            min_trade_value: 50.0,
            use_fixed_risk: true,
            max_risk_per_trade_fixed: 100.0,
            max_risk_per_trade_percent: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PortfolioConfig {
    /// Total account capital in EUR.
    #[garde(range(min = 0.0))]
    pub total_capital: f64,
    #[garde(range(min = 0.0, max = 1.0))]
    pub stock_allocation: f64,
    #[garde(range(min = 1, max = 50))]
    pub max_stock_positions: u32,
    #[garde(range(min = 1))]
    pub max_symbols_per_sector: u32,
    /// Default per-trade risk used by strategies before dynamic sizing.
    #[garde(range(min = 0.0))]
    pub risk_per_trade_eur: f64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            total_capital: 10_000.0,
            stock_allocation: 0.90,
            max_stock_positions: 5,
            // Effectively unlimited: the 40% capital rule is the binding one
            max_symbols_per_sector: 99,
            risk_per_trade_eur: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub market_store: PathBuf,
    pub user_store: PathBuf,
    pub results_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            market_store: PathBuf::from("data/market"),
            user_store: PathBuf::from("data/user.sqlite"),
            results_dir: PathBuf::from("results"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn plan_rate_limits() {
        assert_eq!(Plan::Free.requests_per_minute(), 5);
        assert_eq!(Plan::Starter.requests_per_minute(), 200);
        assert_eq!(Plan::Developer.requests_per_minute(), 1000);
        assert_eq!(Plan::Advanced.requests_per_minute(), 2000);
    }

    #[test]
    fn plan_batch_sizes() {
        assert_eq!(Plan::Free.batch_size(), 1);
        assert_eq!(Plan::Starter.batch_size(), 10);
        assert_eq!(Plan::Developer.batch_size(), 50);
        assert_eq!(Plan::Advanced.batch_size(), 50);
    }

    #[test]
    fn rpm_override_beats_plan_default() {
        let config = ProviderConfig {
            requests_per_minute: Some(42),
            ..ProviderConfig::default()
        };
        assert_eq!(config.effective_requests_per_minute(), 42);
        assert_eq!(ProviderConfig::default().effective_requests_per_minute(), 5);
    }

    #[test]
    fn parse_partial_toml_fills_defaults() {
        let raw = r#"
            [data_provider]
            plan = "starter"
            historical_years = 3

            [risk]
            max_hold_weeks = 4
            bear_market_mode = "reduced"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.data_provider.plan, Plan::Starter);
        assert_eq!(config.data_provider.historical_years, 3);
        assert_eq!(config.risk.max_hold_weeks, 4);
        assert_eq!(config.risk.bear_market_mode, BearMarketMode::Reduced);
        // Untouched sections keep defaults
        assert_eq!(config.portfolio.max_stock_positions, 5);
        assert!((config.filters.max_natr - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_allocation_rejected() {
        let config = Config {
            portfolio: PortfolioConfig {
                stock_allocation: 1.5,
                ..PortfolioConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
