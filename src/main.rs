// float_cmp: only in tests where assert_eq! on f64 is intentional.
#![cfg_attr(test, allow(clippy::float_cmp))]

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use swingdesk::backtest::simulator::{write_report, WeeklySimulator};
use swingdesk::backtest::BacktestConfig;
use swingdesk::config::Config;
use swingdesk::data::currency;
use swingdesk::data::ingest::DataUpdater;
use swingdesk::data::market::MarketStore;
use swingdesk::data::polygon::PolygonProvider;
use swingdesk::data::user::{Settings, UserStore};
use swingdesk::monitor::{MonitorConfig, PriceMonitor};
use swingdesk::portfolio::{OpenExposure, PortfolioManager};
use swingdesk::risk::drawdown::DrawdownProtection;

const USAGE: &str = "\
swingdesk - swing-trading decision support

USAGE:
    swingdesk <command> [options]

COMMANDS:
    update      Backfill and incrementally update market data
                  [--force-full] [--years N]
    signals     Generate a one-shot trading plan for today
    backtest    Run the weekly workflow simulator
                  --start YYYY-MM-DD --end YYYY-MM-DD
                  [--capital EUR] [--slots N]
    monitor     Watch open positions and raise stop/target alerts
";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn load_config() -> Result<Config> {
    let path = std::env::var("SWINGDESK_CONFIG").unwrap_or_else(|_| "config/swingdesk.toml".into());
    let path = Path::new(&path);
    if path.exists() {
        Config::load(path)
    } else {
        Ok(Config::default())
    }
}

fn flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn option_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{raw}' (expected YYYY-MM-DD)"))
}

fn api_key() -> Result<String> {
    std::env::var("POLYGON_API_KEY").context("POLYGON_API_KEY not set")
}

async fn run(args: &[String]) -> Result<i32> {
    let Some(command) = args.first() else {
        eprint!("{USAGE}");
        return Ok(2);
    };
    let rest = &args[1..];

    match command.as_str() {
        "update" => cmd_update(rest).await,
        "signals" => cmd_signals().await,
        "backtest" => cmd_backtest(rest).await,
        "monitor" => cmd_monitor().await,
        other => {
            eprintln!("unknown command: {other}\n");
            eprint!("{USAGE}");
            Ok(2)
        }
    }
}

/// Cancellation token that trips on ctrl-c.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        trigger.cancel();
    });
    cancel
}

async fn cmd_update(args: &[String]) -> Result<i32> {
    let mut config = load_config()?;
    if let Some(raw) = option_value(args, "--years") {
        config.data_provider.historical_years = raw
            .parse()
            .with_context(|| format!("Invalid --years value '{raw}'"))?;
    }
    let force_full = flag(args, "--force-full");

    let store = MarketStore::open(&config.paths.market_store)?;
    let provider = Arc::new(PolygonProvider::new(api_key()?, &config.data_provider)?);
    let updater = DataUpdater::new(provider, store, &config.data_provider);

    let outcome = updater.update_all(None, force_full, &ctrl_c_token()).await?;
    println!("{}", outcome.summary());
    Ok(0)
}

async fn cmd_signals() -> Result<i32> {
    let config = load_config()?;
    let store = MarketStore::open(&config.paths.market_store)?;
    let user = Arc::new(UserStore::open(&config.paths.user_store)?);

    let rate = currency::get_exchange_rate(Some(user.as_ref())).await;
    let settings = Settings::load(&user, &config.portfolio);
    let protection = DrawdownProtection::load(user.clone());
    let status = protection.status(settings.max_stock_positions);
    if !status.is_trading_allowed {
        println!("Trading is stopped by drawdown protection; reset required.");
        return Ok(0);
    }

    let open_positions = user.open_positions()?;
    let exposures: Vec<OpenExposure> = open_positions
        .iter()
        .map(|p| OpenExposure {
            symbol: p.symbol.clone(),
            value_eur: p.entry_price * f64::from(p.quantity) * rate,
        })
        .collect();

    let pm = PortfolioManager::new(
        store,
        settings,
        config.filters.clone(),
        config.portfolio.risk_per_trade_eur,
    );
    let as_of = Local::now().date_naive();
    let plan = pm.generate_plan(as_of, None, &exposures, rate, status.risk_multiplier)?;

    println!(
        "Regime: {} (confidence {:.0}%), primary strategy: {}",
        plan.regime.regime, plan.regime.confidence, plan.primary_strategy
    );
    println!(
        "Capital: {:.0} EUR stock / {:.0} EUR cash",
        plan.capital_allocation.stock, plan.capital_allocation.cash
    );
    if plan.stock_signals.is_empty() {
        println!("No signals today.");
    }
    for signal in &plan.stock_signals {
        println!(
            "  {:<6} {:<14} entry {:>8.2}  stop {:>8.2}  target {:>8.2}  qty {:>4}  risk {:>6.2} EUR",
            signal.symbol,
            signal.strategy.to_string(),
            signal.entry_price,
            signal.stop_loss,
            signal.target_price,
            signal.position_size,
            signal.risk_amount
        );
        user.record_signal(
            &signal.symbol,
            signal.signal_date,
            signal.strategy.name(),
            signal.entry_price,
            signal.stop_loss,
            signal.position_size,
        )?;
    }
    Ok(0)
}

async fn cmd_backtest(args: &[String]) -> Result<i32> {
    let config = load_config()?;

    let (Some(start_raw), Some(end_raw)) =
        (option_value(args, "--start"), option_value(args, "--end"))
    else {
        eprintln!("backtest requires --start and --end\n");
        eprint!("{USAGE}");
        return Ok(2);
    };
    let start = parse_date(start_raw)?;
    let end = parse_date(end_raw)?;
    if end < start {
        bail!("--end precedes --start");
    }

    let capital = match option_value(args, "--capital") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid --capital value '{raw}'"))?,
        None => config.portfolio.total_capital,
    };
    let slots = match option_value(args, "--slots") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid --slots value '{raw}'"))?,
        None => config.portfolio.max_stock_positions,
    };

    let store = MarketStore::open(&config.paths.market_store)?;
    let user = Arc::new(UserStore::open(&config.paths.user_store)?);
    let rate = currency::get_exchange_rate(Some(user.as_ref())).await;

    let mut settings = Settings::load(&user, &config.portfolio);
    settings.total_capital = capital;
    settings.max_stock_positions = slots;
    let pm = PortfolioManager::new(
        store.clone(),
        settings,
        config.filters.clone(),
        config.portfolio.risk_per_trade_eur,
    );

    let backtest_config =
        BacktestConfig::new(start, end, capital, slots, &config.risk, &config.filters, rate);
    let report = WeeklySimulator::new(store, pm, backtest_config, None).run();
    let path = write_report(&report, &config.paths.results_dir)?;

    println!(
        "Backtest {start} -> {end}: {} trades, win rate {:.1}%, PF {:.2}, total P&L {:.2} EUR",
        report.metrics.total_trades,
        report.metrics.win_rate * 100.0,
        report.metrics.profit_factor,
        report.metrics.total_pnl_eur
    );
    println!("Report written to {}", path.display());
    Ok(0)
}

async fn cmd_monitor() -> Result<i32> {
    let config = load_config()?;
    let user = Arc::new(UserStore::open(&config.paths.user_store)?);
    let provider = Arc::new(PolygonProvider::new(api_key()?, &config.data_provider)?);

    let monitor = PriceMonitor::new(provider, user, MonitorConfig::default());
    monitor.run(ctrl_c_token()).await?;
    Ok(0)
}
