//! Scannable asset lists and scan presets

use crate::types::AssetClass;
use serde::{Deserialize, Serialize};

pub const CRYPTO: [&str; 30] = [
    "BTC/USDT", "ETH/USDT", "BNB/USDT", "SOL/USDT", "XRP/USDT", "ADA/USDT", "AVAX/USDT",
    "DOGE/USDT", "DOT/USDT", "MATIC/USDT", "LINK/USDT", "UNI/USDT", "ATOM/USDT", "LTC/USDT",
    "ETC/USDT", "NEAR/USDT", "ALGO/USDT", "ICP/USDT", "FIL/USDT", "APT/USDT", "ARB/USDT",
    "OP/USDT", "INJ/USDT", "SUI/USDT", "SEI/USDT", "TIA/USDT", "RENDER/USDT", "WLD/USDT",
    "RUNE/USDT", "THETA/USDT",
];

/// Megacaps, always scanned
pub const STOCKS_TIER1: [&str; 15] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "BRK.B", "JPM", "V", "MA", "WMT",
    "JNJ", "PG", "XOM",
];

pub const STOCKS_TIER2: [&str; 24] = [
    "NFLX", "DIS", "PYPL", "INTC", "AMD", "QCOM", "CSCO", "ORCL", "CRM", "ADBE", "AVGO", "TXN",
    "COST", "PEP", "KO", "MCD", "NKE", "BA", "CAT", "GE", "F", "GM", "UBER", "ABNB",
];

pub const STOCKS_TIER3: [&str; 24] = [
    "SBUX", "HD", "LOW", "TGT", "CVX", "T", "VZ", "CMCSA", "PFE", "ABBV", "UNH", "TMO", "ABT",
    "DHR", "BMY", "LLY", "BAC", "WFC", "GS", "MS", "C", "SCHW", "BLK", "AXP",
];

/// Index ETFs
pub const INDICES: [&str; 8] = ["SPY", "QQQ", "DIA", "IWM", "VTI", "VEA", "VWO", "EFA"];

/// Commodity ETFs: metals, energy, grains, industrials
pub const COMMODITIES: [&str; 13] = [
    "GLD", "SLV", "PPLT", "PALL", "USO", "BNO", "UNG", "UGA", "CORN", "WEAT", "SOYB", "COPX",
    "SLX",
];

pub const FOREX_MAJOR: [&str; 7] = [
    "EUR/USD", "GBP/USD", "USD/JPY", "USD/CHF", "AUD/USD", "USD/CAD", "NZD/USD",
];

pub const FOREX_MINOR: [&str; 7] = [
    "EUR/GBP", "EUR/JPY", "GBP/JPY", "EUR/CHF", "AUD/JPY", "GBP/AUD", "EUR/AUD",
];

pub const PRESETS: [&str; 8] = [
    "quick",
    "balanced",
    "full",
    "crypto",
    "stocks",
    "indices",
    "commodities",
    "forex",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub asset_class: AssetClass,
}

impl Asset {
    pub fn new(symbol: impl Into<String>, asset_class: AssetClass) -> Self {
        Self {
            symbol: symbol.into(),
            asset_class,
        }
    }
}

/// Counts for one preset, for the `/universe` listing
#[derive(Debug, Clone, Serialize)]
pub struct PresetSummary {
    pub name: &'static str,
    pub total: usize,
    pub crypto: usize,
    pub stocks: usize,
    pub indices: usize,
    pub commodities: usize,
    pub forex: usize,
    /// Requests that go through the Finnhub limiter
    pub finnhub_calls: usize,
    pub estimated_secs: u64,
}

struct Lists {
    crypto: Vec<&'static str>,
    stocks: Vec<&'static str>,
    indices: Vec<&'static str>,
    commodities: Vec<&'static str>,
    forex: Vec<&'static str>,
}

impl Lists {
    fn empty() -> Self {
        Self {
            crypto: Vec::new(),
            stocks: Vec::new(),
            indices: Vec::new(),
            commodities: Vec::new(),
            forex: Vec::new(),
        }
    }
}

fn lists(preset: &str) -> Lists {
    match preset {
        "balanced" => Lists {
            crypto: CRYPTO.to_vec(),
            stocks: [&STOCKS_TIER1[..], &STOCKS_TIER2[..10]].concat(),
            indices: INDICES.to_vec(),
            commodities: COMMODITIES[..8].to_vec(),
            forex: FOREX_MAJOR.to_vec(),
        },
        "full" => Lists {
            crypto: CRYPTO.to_vec(),
            stocks: [&STOCKS_TIER1[..], &STOCKS_TIER2[..], &STOCKS_TIER3[..20]].concat(),
            indices: INDICES.to_vec(),
            commodities: COMMODITIES.to_vec(),
            forex: [&FOREX_MAJOR[..], &FOREX_MINOR[..5]].concat(),
        },
        "crypto" => Lists {
            crypto: CRYPTO.to_vec(),
            ..Lists::empty()
        },
        "stocks" => Lists {
            stocks: [&STOCKS_TIER1[..], &STOCKS_TIER2[..], &STOCKS_TIER3[..]].concat(),
            ..Lists::empty()
        },
        "indices" => Lists {
            indices: INDICES.to_vec(),
            ..Lists::empty()
        },
        "commodities" => Lists {
            commodities: COMMODITIES.to_vec(),
            ..Lists::empty()
        },
        "forex" => Lists {
            forex: [&FOREX_MAJOR[..], &FOREX_MINOR[..]].concat(),
            ..Lists::empty()
        },
        // quick, and anything unknown
        _ => Lists {
            crypto: CRYPTO[..20].to_vec(),
            stocks: STOCKS_TIER1.to_vec(),
            indices: INDICES[..5].to_vec(),
            commodities: vec!["GLD", "USO", "SLV"],
            forex: FOREX_MAJOR[..5].to_vec(),
        },
    }
}

/// Flat asset list for a preset; unknown names fall back to `quick`
pub fn preset_assets(preset: &str) -> Vec<Asset> {
    let l = lists(&preset.to_ascii_lowercase());
    let tag = |symbols: Vec<&'static str>, class: AssetClass| {
        symbols.into_iter().map(move |s| Asset::new(s, class))
    };
    tag(l.crypto, AssetClass::Crypto)
        .chain(tag(l.stocks, AssetClass::Stock))
        .chain(tag(l.indices, AssetClass::Index))
        .chain(tag(l.commodities, AssetClass::Commodity))
        .chain(tag(l.forex, AssetClass::Forex))
        .collect()
}

/// One second per asset, plus ten seconds per started batch of 50 Finnhub calls
pub fn estimate_scan_secs(total: usize, finnhub_calls: usize) -> u64 {
    let mut secs = total as u64;
    if finnhub_calls > 50 {
        secs += (finnhub_calls as u64 / 50 + 1) * 10;
    }
    secs
}

pub fn preset_summary(preset: &'static str) -> PresetSummary {
    let l = lists(preset);
    let finnhub_calls = l.stocks.len() + l.indices.len() + l.commodities.len();
    let total = finnhub_calls + l.crypto.len() + l.forex.len();
    PresetSummary {
        name: preset,
        total,
        crypto: l.crypto.len(),
        stocks: l.stocks.len(),
        indices: l.indices.len(),
        commodities: l.commodities.len(),
        forex: l.forex.len(),
        finnhub_calls,
        estimated_secs: estimate_scan_secs(total, finnhub_calls),
    }
}

pub fn all_presets() -> Vec<PresetSummary> {
    PRESETS.iter().map(|p| preset_summary(p)).collect()
}
