//! Yahoo Finance chart API: fallback for stocks, indices, commodities and forex

use super::{
    aggregate_candles, ensure_success, http_client, keep_last, MarketDataError,
    MarketDataProvider, MarketDataResult, FOUR_HOURS_MS,
};
use crate::types::{Candle, Timeframe};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const PROVIDER: &str = "yahoo";

/// Friendly names accepted in place of Yahoo tickers
const ALIASES: &[(&str, &str)] = &[
    ("GOLD", "GC=F"),
    ("OIL", "CL=F"),
    ("SILVER", "SI=F"),
    ("WHEAT", "ZW=F"),
    ("SPX", "^GSPC"),
    ("DJI", "^DJI"),
    ("NDX", "^IXIC"),
    ("DAX", "^GDAXI"),
    ("FTSE", "^FTSE"),
    ("MIB", "FTSEMIB.MI"),
    ("N225", "^N225"),
    ("HSI", "^HSI"),
];

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

/// Columns contain nulls for bars with no trades
#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Map scanner symbols onto Yahoo tickers
pub fn yahoo_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_ascii_uppercase();
    if let Some((_, ticker)) = ALIASES.iter().find(|(alias, _)| *alias == upper) {
        return ticker.to_string();
    }
    match upper.split_once('/') {
        // crypto quoted in stablecoins
        Some((base, "USDT" | "USDC")) => format!("{base}-USD"),
        // forex pair
        Some((base, quote)) => format!("{base}{quote}=X"),
        None => match upper.rsplit_once('.') {
            // US share classes are written BRK-B; other suffixes name an exchange
            Some((ticker, class @ ("A" | "B" | "C"))) if !ticker.is_empty() => {
                format!("{ticker}-{class}")
            }
            _ => upper,
        },
    }
}

/// Interval requested from Yahoo and the range that yields `limit` bars
fn interval_and_range(timeframe: Timeframe, limit: usize) -> (&'static str, String) {
    let days_for = |bars_per_day: usize| (limit / bars_per_day.max(1) + 1).max(7) * 3;
    match timeframe {
        Timeframe::M1 => ("1m", "7d".to_string()),
        Timeframe::M5 => ("5m", "60d".to_string()),
        Timeframe::M15 => ("15m", "60d".to_string()),
        Timeframe::M30 => ("30m", "60d".to_string()),
        Timeframe::H1 => ("1h", format!("{}d", days_for(24).min(730))),
        Timeframe::H4 => ("1h", format!("{}d", days_for(6).min(730))),
        Timeframe::D1 => ("1d", if limit > 500 { "5y" } else { "2y" }.to_string()),
        Timeframe::W1 => ("1wk", "10y".to_string()),
    }
}

fn candles_from_result(result: &ChartResult) -> Vec<Candle> {
    let Some(quote) = result.indicators.quote.first() else {
        return Vec::new();
    };
    let at = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();

    result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            Some(Candle {
                open_time: ts * 1000,
                open: at(&quote.open, i)?,
                high: at(&quote.high, i)?,
                low: at(&quote.low, i)?,
                close: at(&quote.close, i)?,
                volume: at(&quote.volume, i).unwrap_or_default(),
            })
        })
        .filter(Candle::is_valid)
        .collect()
}

#[derive(Clone)]
pub struct YahooClient {
    client: Client,
}

impl Default for YahooClient {
    fn default() -> Self {
        Self::new()
    }
}

impl YahooClient {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    async fn chart(&self, symbol: &str, interval: &str, range: &str) -> MarketDataResult<ChartResult> {
        let ticker = yahoo_symbol(symbol);
        debug!(symbol, ticker = %ticker, interval, range, "Fetching Yahoo chart");

        let response = self
            .client
            .get(format!("{BASE_URL}/{ticker}"))
            .query(&[("interval", interval), ("range", range)])
            .send()
            .await?;
        let envelope: ChartEnvelope = ensure_success(PROVIDER, response).await?.json().await?;

        if let Some(err) = envelope.chart.error.filter(|e| !e.is_null()) {
            return Err(MarketDataError::Parse {
                provider: PROVIDER,
                reason: err.to_string(),
            });
        }
        envelope
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or(MarketDataError::NoData(ticker))
    }
}

#[async_trait]
impl MarketDataProvider for YahooClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    /// 4h bars are built from 1h bars
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        let (interval, range) = interval_and_range(timeframe, limit);
        let result = self.chart(symbol, interval, &range).await?;
        let mut candles = candles_from_result(&result);
        if timeframe == Timeframe::H4 {
            candles = aggregate_candles(&candles, FOUR_HOURS_MS);
        }
        Ok(keep_last(candles, limit))
    }

    async fn get_price(&self, symbol: &str) -> MarketDataResult<f64> {
        let result = self.chart(symbol, "1m", "1d").await?;
        result
            .meta
            .regular_market_price
            .or_else(|| candles_from_result(&result).last().map(|c| c.close))
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_mapping() {
        assert_eq!(yahoo_symbol("gold"), "GC=F");
        assert_eq!(yahoo_symbol("SPX"), "^GSPC");
        assert_eq!(yahoo_symbol("EUR/USD"), "EURUSD=X");
        assert_eq!(yahoo_symbol("BTC/USDT"), "BTC-USD");
        assert_eq!(yahoo_symbol("BRK.B"), "BRK-B");
        assert_eq!(yahoo_symbol("AAPL"), "AAPL");
    }

    #[test]
    fn test_exchange_suffixes_are_kept() {
        assert_eq!(yahoo_symbol("ENI.MI"), "ENI.MI");
        assert_eq!(yahoo_symbol("vod.l"), "VOD.L");
        assert_eq!(yahoo_symbol("SHOP.TO"), "SHOP.TO");
        assert_eq!(yahoo_symbol("bf.b"), "BF-B");
        assert_eq!(yahoo_symbol("BRK.A"), "BRK-A");
    }

    #[test]
    fn test_chart_parsing_skips_null_rows() {
        let envelope: ChartEnvelope = serde_json::from_str(
            r#"{"chart":{"result":[{"meta":{"regularMarketPrice":191.2},
                "timestamp":[1700000000,1700003600,1700007200],
                "indicators":{"quote":[{"open":[190.0,null,191.0],"high":[191.0,null,192.0],
                "low":[189.5,null,190.5],"close":[190.5,null,191.5],"volume":[100,null,null]}]}}],
                "error":null}}"#,
        )
        .unwrap();
        let result = envelope.chart.result.unwrap().remove(0);
        let candles = candles_from_result(&result);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].volume, 0.0);
        assert_eq!(result.meta.regular_market_price, Some(191.2));
    }

    #[test]
    fn test_aggregate_hourly_into_four_hour_buckets() {
        let hour = 3_600_000;
        let hourly: Vec<Candle> = (0..6)
            .map(|i| Candle {
                open_time: i * hour,
                open: 10.0 + i as f64,
                high: 11.0 + i as f64,
                low: 9.0 + i as f64,
                close: 10.5 + i as f64,
                volume: 1.0,
            })
            .collect();

        let bars = aggregate_candles(&hourly, FOUR_HOURS_MS);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 10.0);
        assert_eq!(bars[0].high, 14.0);
        assert_eq!(bars[0].low, 9.0);
        assert_eq!(bars[0].close, 13.5);
        assert_eq!(bars[0].volume, 4.0);
        assert_eq!(bars[1].open_time, FOUR_HOURS_MS);
        assert_eq!(bars[1].volume, 2.0);
    }
}
