//! Static symbol → sector map for the diversification filter.
//!
//! Tightly correlated groups (semiconductors, airlines, EV/auto, clean
//! energy, e-commerce) are carved out as their own sub-sectors so the
//! concentration cap treats them as one bucket. Symbols outside the map
//! resolve to `None` and bypass the sector rules.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Leveraged/index ETFs excluded from the stock universe even when present
/// in the market store.
pub const ETF_EXCLUSIONS: &[&str] = &[
    "SPXL", "TQQQ", "UPRO", "SOXL", "FNGU", "TECL", "LABU", "TNA", "FAS", "SPY", "QQQ", "IWM",
    "DIA", "VOO", "VTI", "ARKK",
];

pub fn is_excluded_etf(symbol: &str) -> bool {
    ETF_EXCLUSIONS.contains(&symbol)
}

static SECTOR_MAP: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| SECTORS.iter().copied().collect());

pub fn sector_for(symbol: &str) -> Option<&'static str> {
    SECTOR_MAP.get(symbol).copied()
}

const SECTORS: &[(&str, &str)] = &[
    // Semiconductors (high correlation sub-sector)
    ("NVDA", "Semiconductors"),
    ("AMD", "Semiconductors"),
    ("INTC", "Semiconductors"),
    ("MU", "Semiconductors"),
    ("AVGO", "Semiconductors"),
    ("QCOM", "Semiconductors"),
    ("TXN", "Semiconductors"),
    ("LRCX", "Semiconductors"),
    ("AMAT", "Semiconductors"),
    ("KLAC", "Semiconductors"),
    ("MRVL", "Semiconductors"),
    ("NXPI", "Semiconductors"),
    ("ON", "Semiconductors"),
    ("MCHP", "Semiconductors"),
    ("ADI", "Semiconductors"),
    ("ASML", "Semiconductors"),
    // Technology
    ("AAPL", "Technology"),
    ("MSFT", "Technology"),
    ("GOOGL", "Technology"),
    ("GOOG", "Technology"),
    ("META", "Technology"),
    ("CSCO", "Technology"),
    ("ADBE", "Technology"),
    ("CRM", "Technology"),
    ("ORCL", "Technology"),
    ("IBM", "Technology"),
    ("NOW", "Technology"),
    ("SHOP", "Technology"),
    ("PYPL", "Technology"),
    ("PLTR", "Technology"),
    ("SNOW", "Technology"),
    ("PANW", "Technology"),
    ("CRWD", "Technology"),
    ("ZS", "Technology"),
    ("DDOG", "Technology"),
    ("NET", "Technology"),
    ("MDB", "Technology"),
    ("WDAY", "Technology"),
    ("OKTA", "Technology"),
    ("ZM", "Technology"),
    ("TWLO", "Technology"),
    ("HUBS", "Technology"),
    ("DOCU", "Technology"),
    ("SQ", "Technology"),
    ("ACN", "Technology"),
    ("INTU", "Technology"),
    ("SNPS", "Technology"),
    ("CDNS", "Technology"),
    ("ANET", "Technology"),
    ("FTNT", "Technology"),
    ("TTD", "Technology"),
    ("TEAM", "Technology"),
    ("HPQ", "Technology"),
    ("HPE", "Technology"),
    // Consumer discretionary
    ("AMZN", "Consumer Discretionary"),
    ("HD", "Consumer Discretionary"),
    ("NKE", "Consumer Discretionary"),
    ("MCD", "Consumer Discretionary"),
    ("SBUX", "Consumer Discretionary"),
    ("TGT", "Consumer Discretionary"),
    ("LOW", "Consumer Discretionary"),
    ("BKNG", "Consumer Discretionary"),
    ("LULU", "Consumer Discretionary"),
    ("DECK", "Consumer Discretionary"),
    ("ULTA", "Consumer Discretionary"),
    ("ETSY", "Consumer Discretionary"),
    ("ABNB", "Consumer Discretionary"),
    ("UBER", "Consumer Discretionary"),
    ("LYFT", "Consumer Discretionary"),
    ("DASH", "Consumer Discretionary"),
    ("TJX", "Consumer Discretionary"),
    ("ROST", "Consumer Discretionary"),
    ("CHWY", "Consumer Discretionary"),
    ("MGM", "Consumer Discretionary"),
    ("RCL", "Consumer Discretionary"),
    ("EBAY", "Consumer Discretionary"),
    // Communication services
    ("NFLX", "Communication Services"),
    ("DIS", "Communication Services"),
    ("CMCSA", "Communication Services"),
    ("VZ", "Communication Services"),
    ("T", "Communication Services"),
    ("TMUS", "Communication Services"),
    ("ROKU", "Communication Services"),
    ("SPOT", "Communication Services"),
    ("SNAP", "Communication Services"),
    ("PINS", "Communication Services"),
    ("EA", "Communication Services"),
    ("TTWO", "Communication Services"),
    ("RBLX", "Communication Services"),
    ("WBD", "Communication Services"),
    // Healthcare
    ("UNH", "Healthcare"),
    ("JNJ", "Healthcare"),
    ("PFE", "Healthcare"),
    ("ABBV", "Healthcare"),
    ("MRK", "Healthcare"),
    ("LLY", "Healthcare"),
    ("TMO", "Healthcare"),
    ("ABT", "Healthcare"),
    ("DHR", "Healthcare"),
    ("BMY", "Healthcare"),
    ("AMGN", "Healthcare"),
    ("GILD", "Healthcare"),
    ("REGN", "Healthcare"),
    ("VRTX", "Healthcare"),
    ("BIIB", "Healthcare"),
    ("ISRG", "Healthcare"),
    ("DXCM", "Healthcare"),
    ("MDT", "Healthcare"),
    ("BSX", "Healthcare"),
    ("CVS", "Healthcare"),
    ("IDXX", "Healthcare"),
    // Financials
    ("JPM", "Financials"),
    ("BAC", "Financials"),
    ("WFC", "Financials"),
    ("GS", "Financials"),
    ("MS", "Financials"),
    ("C", "Financials"),
    ("BLK", "Financials"),
    ("SCHW", "Financials"),
    ("AXP", "Financials"),
    ("V", "Financials"),
    ("MA", "Financials"),
    ("COF", "Financials"),
    ("COIN", "Financials"),
    ("HOOD", "Financials"),
    ("SOFI", "Financials"),
    ("AFRM", "Financials"),
    ("ICE", "Financials"),
    ("CME", "Financials"),
    ("SPGI", "Financials"),
    ("PGR", "Financials"),
    ("NDAQ", "Financials"),
    ("MCO", "Financials"),
    // Industrials
    ("CAT", "Industrials"),
    ("BA", "Industrials"),
    ("HON", "Industrials"),
    ("UPS", "Industrials"),
    ("UNP", "Industrials"),
    ("RTX", "Industrials"),
    ("LMT", "Industrials"),
    ("DE", "Industrials"),
    ("GE", "Industrials"),
    ("MMM", "Industrials"),
    ("FDX", "Industrials"),
    ("AXON", "Industrials"),
    ("ODFL", "Industrials"),
    ("FAST", "Industrials"),
    ("CPRT", "Industrials"),
    ("ADP", "Industrials"),
    ("EMR", "Industrials"),
    ("PH", "Industrials"),
    ("PWR", "Industrials"),
    ("NOC", "Industrials"),
    // Consumer staples
    ("PG", "Consumer Staples"),
    ("KO", "Consumer Staples"),
    ("PEP", "Consumer Staples"),
    ("WMT", "Consumer Staples"),
    ("COST", "Consumer Staples"),
    ("MDLZ", "Consumer Staples"),
    ("CL", "Consumer Staples"),
    ("KR", "Consumer Staples"),
    ("PM", "Consumer Staples"),
    ("MO", "Consumer Staples"),
    // Energy
    ("XOM", "Energy"),
    ("CVX", "Energy"),
    ("COP", "Energy"),
    ("SLB", "Energy"),
    ("EOG", "Energy"),
    ("OXY", "Energy"),
    ("PSX", "Energy"),
    ("VLO", "Energy"),
    ("DVN", "Energy"),
    ("FANG", "Energy"),
    ("MPC", "Energy"),
    ("HAL", "Energy"),
    // Materials
    ("LIN", "Materials"),
    ("APD", "Materials"),
    ("SHW", "Materials"),
    ("NEM", "Materials"),
    ("FCX", "Materials"),
    ("NUE", "Materials"),
    ("CLF", "Materials"),
    ("STLD", "Materials"),
    ("AA", "Materials"),
    // Utilities
    ("NEE", "Utilities"),
    ("DUK", "Utilities"),
    ("SO", "Utilities"),
    ("D", "Utilities"),
    ("AEP", "Utilities"),
    ("EXC", "Utilities"),
    ("XEL", "Utilities"),
    ("SRE", "Utilities"),
    // Real estate
    ("AMT", "Real Estate"),
    ("PLD", "Real Estate"),
    ("CCI", "Real Estate"),
    ("EQIX", "Real Estate"),
    ("SPG", "Real Estate"),
    ("O", "Real Estate"),
    ("PSA", "Real Estate"),
    ("AVB", "Real Estate"),
    // Airlines (high correlation sub-sector)
    ("DAL", "Airlines"),
    ("UAL", "Airlines"),
    ("LUV", "Airlines"),
    ("AAL", "Airlines"),
    // EV / Auto (high correlation sub-sector)
    ("TSLA", "EV/Auto"),
    ("RIVN", "EV/Auto"),
    ("LCID", "EV/Auto"),
    ("NIO", "EV/Auto"),
    ("XPEV", "EV/Auto"),
    ("LI", "EV/Auto"),
    ("F", "EV/Auto"),
    ("GM", "EV/Auto"),
    // Clean energy (high correlation sub-sector)
    ("FSLR", "Clean Energy"),
    ("SEDG", "Clean Energy"),
    ("ENPH", "Clean Energy"),
    // E-commerce / international internet (high correlation sub-sector)
    ("SE", "E-Commerce"),
    ("MELI", "E-Commerce"),
    ("BABA", "E-Commerce"),
    ("JD", "E-Commerce"),
    ("PDD", "E-Commerce"),
    ("BIDU", "E-Commerce"),
];
