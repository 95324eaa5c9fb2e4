//! CoinGecko fallback for crypto when Binance is unreachable

use super::{
    ensure_success, http_client, keep_last, MarketDataError, MarketDataProvider,
    MarketDataResult,
};
use crate::types::{Candle, Timeframe};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use tracing::debug;

const BASE_URL: &str = "https://api.coingecko.com/api/v3";
const PROVIDER: &str = "coingecko";

const COIN_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("BNB", "binancecoin"),
    ("SOL", "solana"),
    ("XRP", "ripple"),
    ("ADA", "cardano"),
    ("DOGE", "dogecoin"),
    ("AVAX", "avalanche-2"),
    ("DOT", "polkadot"),
    ("MATIC", "matic-network"),
    ("LINK", "chainlink"),
    ("UNI", "uniswap"),
    ("ATOM", "cosmos"),
    ("LTC", "litecoin"),
    ("NEAR", "near"),
    ("ALGO", "algorand"),
    ("FIL", "filecoin"),
    ("APT", "aptos"),
    ("ARB", "arbitrum"),
    ("OP", "optimism"),
    ("ICP", "internet-computer"),
    ("VET", "vechain"),
    ("HBAR", "hedera-hashgraph"),
    ("GRT", "the-graph"),
    ("AAVE", "aave"),
    ("EOS", "eos"),
    ("FTM", "fantom"),
    ("SAND", "the-sandbox"),
    ("MANA", "decentraland"),
    ("AXS", "axie-infinity"),
    ("ETC", "ethereum-classic"),
    ("INJ", "injective-protocol"),
    ("SUI", "sui"),
    ("SEI", "sei-network"),
    ("TIA", "celestia"),
    ("RENDER", "render-token"),
    ("WLD", "worldcoin-wld"),
    ("RUNE", "thorchain"),
    ("THETA", "theta-token"),
];

/// Base asset of `BTC/USDT` or `BTCUSDT` mapped to a CoinGecko id
pub fn coin_id(symbol: &str) -> Option<&'static str> {
    let upper = symbol.to_ascii_uppercase();
    let base = match upper.split_once('/') {
        Some((base, _)) => base,
        None => upper.strip_suffix("USDT").unwrap_or(&upper),
    };
    COIN_IDS
        .iter()
        .find(|(ticker, _)| *ticker == base)
        .map(|(_, id)| *id)
}

/// Bar size CoinGecko returns for a `days` window on `/ohlc`
fn bar_minutes(days: u32) -> i64 {
    match days {
        0..=2 => 30,
        3..=30 => 240,
        _ => 4 * 24 * 60,
    }
}

/// Widest `days` window whose native bars match the timeframe. Only 30m and
/// 4h qualify: 1h would be two days of 30m bars (48 hourly candles) and 1d
/// would come back as 4-day bars, both too short to score.
fn ohlc_days(timeframe: Timeframe) -> Option<u32> {
    match timeframe {
        Timeframe::M30 => Some(2),
        Timeframe::H4 => Some(30),
        _ => None,
    }
}

/// Rows are `[time_ms, open, high, low, close]`; there is no volume column
fn candles_from_ohlc(rows: &[[f64; 5]]) -> Vec<Candle> {
    rows.iter()
        .map(|r| Candle {
            open_time: r[0] as i64,
            open: r[1],
            high: r[2],
            low: r[3],
            close: r[4],
            volume: 0.0,
        })
        .filter(Candle::is_valid)
        .collect()
}

#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
}

impl Default for CoinGeckoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CoinGeckoClient {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    fn resolve(symbol: &str) -> MarketDataResult<&'static str> {
        coin_id(symbol).ok_or_else(|| MarketDataError::Unsupported {
            provider: PROVIDER,
            what: format!("symbol {symbol}"),
        })
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        let id = Self::resolve(symbol)?;
        let days = ohlc_days(timeframe).ok_or_else(|| MarketDataError::Unsupported {
            provider: PROVIDER,
            what: format!("timeframe {timeframe}"),
        })?;

        debug!(symbol, id, days, "Fetching CoinGecko OHLC");

        let response = self
            .client
            .get(format!("{BASE_URL}/coins/{id}/ohlc"))
            .query(&[("vs_currency", "usd"), ("days", days.to_string().as_str())])
            .send()
            .await?;
        let rows: Vec<[f64; 5]> = ensure_success(PROVIDER, response).await?.json().await?;

        Ok(keep_last(candles_from_ohlc(&rows), limit))
    }

    async fn get_price(&self, symbol: &str) -> MarketDataResult<f64> {
        let id = Self::resolve(symbol)?;
        let response = self
            .client
            .get(format!("{BASE_URL}/simple/price"))
            .query(&[("ids", id), ("vs_currencies", "usd")])
            .send()
            .await?;
        let prices: HashMap<String, HashMap<String, f64>> =
            ensure_success(PROVIDER, response).await?.json().await?;

        prices
            .get(id)
            .and_then(|p| p.get("usd"))
            .copied()
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))
    }
}
