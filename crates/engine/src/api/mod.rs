//! Market data provider clients
//!
//! Every provider speaks plain REST through `reqwest` and converts its
//! payload into [`Candle`]s. Rows that fail to parse are dropped, never
//! the whole batch.

pub mod binance;
pub mod coingecko;
pub mod finnhub;
pub mod oanda;
pub mod yahoo;

pub use binance::BinanceClient;
pub use coingecko::CoinGeckoClient;
pub use finnhub::FinnhubClient;
pub use oanda::OandaClient;
pub use yahoo::YahooClient;

use crate::types::{Candle, Timeframe};
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use thiserror::Error;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const HOUR_MS: i64 = 60 * 60 * 1000;
pub(crate) const FOUR_HOURS_MS: i64 = 4 * HOUR_MS;

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider}: unexpected payload: {reason}")]
    Parse {
        provider: &'static str,
        reason: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("{provider} does not support {what}")]
    Unsupported {
        provider: &'static str,
        what: String,
    },

    #[error("no data for {0}")]
    NoData(String),
}

pub type MarketDataResult<T> = Result<T, MarketDataError>;

/// A source of OHLCV candles and spot prices
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Most recent `limit` candles, oldest first
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>>;

    async fn get_price(&self, symbol: &str) -> MarketDataResult<f64>;
}

/// Shared HTTP client with the standard timeout
pub fn http_client() -> Client {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("trade-scout/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Turn a non-2xx response into `MarketDataError::Api`
pub(crate) async fn ensure_success(
    provider: &'static str,
    response: Response,
) -> MarketDataResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(MarketDataError::Api {
        provider,
        status,
        body,
    })
}

/// Keep only the newest `limit` candles
pub(crate) fn keep_last(mut candles: Vec<Candle>, limit: usize) -> Vec<Candle> {
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    candles
}

/// Merge candles into fixed UTC buckets of `bucket_ms`
pub(crate) fn aggregate_candles(candles: &[Candle], bucket_ms: i64) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::new();
    for c in candles {
        let bucket = c.open_time - c.open_time.rem_euclid(bucket_ms);
        match out.last_mut() {
            Some(last) if last.open_time == bucket => {
                last.high = last.high.max(c.high);
                last.low = last.low.min(c.low);
                last.close = c.close;
                last.volume += c.volume;
            }
            _ => out.push(Candle {
                open_time: bucket,
                ..*c
            }),
        }
    }
    out
}
