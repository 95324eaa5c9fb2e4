//! Binance public API client for market data (no authentication required)

use super::{ensure_success, http_client, MarketDataError, MarketDataProvider, MarketDataResult};
use crate::types::{Candle, Timeframe};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: usize = 1000;
const PROVIDER: &str = "binance";

/// Used when the 24h ticker endpoint is unreachable
pub const FALLBACK_TOP_PAIRS: [&str; 30] = [
    "BTC/USDT", "ETH/USDT", "BNB/USDT", "SOL/USDT", "XRP/USDT", "ADA/USDT", "DOGE/USDT",
    "AVAX/USDT", "DOT/USDT", "MATIC/USDT", "LINK/USDT", "UNI/USDT", "ATOM/USDT", "LTC/USDT",
    "NEAR/USDT", "ALGO/USDT", "FIL/USDT", "APT/USDT", "ARB/USDT", "OP/USDT", "ICP/USDT",
    "VET/USDT", "HBAR/USDT", "GRT/USDT", "AAVE/USDT", "EOS/USDT", "FTM/USDT", "SAND/USDT",
    "MANA/USDT", "AXS/USDT",
];

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline row: [open time, open, high, low, close, volume, close time, ...]
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

/// Binance 24h ticker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerStats {
    pub symbol: String,
    pub price_change: String,
    pub price_change_percent: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    #[serde(default)]
    pub quote_volume: String,
    pub last_price: String,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

/// `BTC/USDT` → `BTCUSDT`
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_ascii_uppercase()
}

fn parse_decimal(raw: &str) -> Option<f64> {
    Decimal::from_str(raw).ok()?.to_f64()
}

fn candles_from_raw(raw: Vec<RawKline>) -> Vec<Candle> {
    raw.into_iter()
        .filter_map(|k| {
            Some(Candle {
                open_time: k.0,
                open: parse_decimal(&k.1)?,
                high: parse_decimal(&k.2)?,
                low: parse_decimal(&k.3)?,
                close: parse_decimal(&k.4)?,
                volume: parse_decimal(&k.5)?,
            })
        })
        .filter(Candle::is_valid)
        .collect()
}

/// USDT pairs ranked by 24h quote volume, as `BASE/USDT`
fn rank_usdt_pairs(tickers: &[TickerStats], limit: usize) -> Vec<String> {
    let mut pairs: Vec<(&str, f64)> = tickers
        .iter()
        .filter_map(|t| {
            let base = t.symbol.strip_suffix("USDT")?;
            let volume = parse_decimal(&t.quote_volume)?;
            (!base.is_empty() && volume > 0.0).then_some((base, volume))
        })
        .collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
    pairs
        .into_iter()
        .take(limit)
        .map(|(base, _)| format!("{base}/USDT"))
        .collect()
}

impl BinanceClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into(),
        }
    }

    /// Fetch the most recent klines for a symbol
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        let symbol = exchange_symbol(symbol);
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        debug!(symbol = %symbol, interval, "Fetching klines from Binance");

        let response = ensure_success(PROVIDER, self.client.get(&url).send().await?).await?;
        let raw: Vec<RawKline> = response.json().await?;
        let candles = candles_from_raw(raw);

        debug!(count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    /// Current price for a symbol
    pub async fn get_ticker_price(&self, symbol: &str) -> MarketDataResult<f64> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            exchange_symbol(symbol)
        );

        let response = ensure_success(PROVIDER, self.client.get(&url).send().await?).await?;
        let ticker: TickerPrice = response.json().await?;
        parse_decimal(&ticker.price).ok_or_else(|| MarketDataError::Parse {
            provider: PROVIDER,
            reason: format!("bad price {:?}", ticker.price),
        })
    }

    /// Get 24h ticker statistics
    pub async fn get_24h_stats(&self, symbol: &str) -> MarketDataResult<TickerStats> {
        let url = format!(
            "{}/api/v3/ticker/24hr?symbol={}",
            self.base_url,
            exchange_symbol(symbol)
        );

        let response = ensure_success(PROVIDER, self.client.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Top USDT pairs by 24h quote volume; falls back to a fixed list on failure
    pub async fn top_usdt_pairs(&self, limit: usize) -> Vec<String> {
        match self.fetch_all_tickers().await {
            Ok(tickers) => {
                let pairs = rank_usdt_pairs(&tickers, limit);
                info!(count = pairs.len(), "Ranked USDT pairs by volume");
                pairs
            }
            Err(e) => {
                warn!(error = %e, "Top pairs unavailable, using fallback list");
                FALLBACK_TOP_PAIRS
                    .iter()
                    .take(limit)
                    .map(|s| s.to_string())
                    .collect()
            }
        }
    }

    async fn fetch_all_tickers(&self) -> MarketDataResult<Vec<TickerStats>> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let response = ensure_success(PROVIDER, self.client.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MarketDataProvider for BinanceClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        self.get_klines(symbol, timeframe.as_str(), limit).await
    }

    async fn get_price(&self, symbol: &str) -> MarketDataResult<f64> {
        self.get_ticker_price(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_symbol() {
        assert_eq!(exchange_symbol("btc/usdt"), "BTCUSDT");
        assert_eq!(exchange_symbol("ETHUSDT"), "ETHUSDT");
    }

    #[test]
    fn test_klines_parse_and_skip_bad_rows() {
        let body = r#"[
            [1700000000000, "100.5", "101.0", "99.5", "100.8", "12.5", 1700003599999, "0", 10, "0", "0", "0"],
            [1700003600000, "oops", "101.0", "99.5", "100.8", "12.5", 1700007199999, "0", 10, "0", "0", "0"]
        ]"#;
        let raw: Vec<RawKline> = serde_json::from_str(body).unwrap();
        let candles = candles_from_raw(raw);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open_time, 1_700_000_000_000);
        assert_eq!(candles[0].close, 100.8);
        assert_eq!(candles[0].volume, 12.5);
    }

    #[test]
    fn test_rank_usdt_pairs_by_quote_volume() {
        let ticker = |symbol: &str, qv: &str| TickerStats {
            symbol: symbol.to_string(),
            price_change: "0".into(),
            price_change_percent: "0".into(),
            high_price: "0".into(),
            low_price: "0".into(),
            volume: "0".into(),
            quote_volume: qv.to_string(),
            last_price: "0".into(),
        };
        let tickers = vec![
            ticker("ETHUSDT", "500"),
            ticker("BTCUSDT", "900"),
            ticker("ETHBTC", "10000"),
            ticker("DEADUSDT", "0"),
            ticker("SOLUSDT", "300"),
        ];
        assert_eq!(rank_usdt_pairs(&tickers, 2), vec!["BTC/USDT", "ETH/USDT"]);
    }
}
