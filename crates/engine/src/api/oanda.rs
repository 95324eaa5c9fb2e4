//! OANDA v20 REST client for forex pairs (mid prices)

use super::{ensure_success, http_client, MarketDataError, MarketDataProvider, MarketDataResult};
use crate::types::{Candle, Timeframe};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const PRACTICE_URL: &str = "https://api-fxpractice.oanda.com";
pub const LIVE_URL: &str = "https://api-fxtrade.oanda.com";
const PROVIDER: &str = "oanda";
const MAX_COUNT: usize = 5000;

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<OandaCandle>,
}

#[derive(Debug, Deserialize)]
struct OandaCandle {
    #[serde(default = "default_complete")]
    complete: bool,
    time: String,
    #[serde(default)]
    volume: f64,
    mid: Option<Mid>,
}

#[derive(Debug, Deserialize)]
struct Mid {
    o: String,
    h: String,
    l: String,
    c: String,
}

fn default_complete() -> bool {
    true
}

/// `EUR/USD` → `EUR_USD`
pub fn instrument(pair: &str) -> String {
    pair.replace('/', "_").to_ascii_uppercase()
}

fn granularity(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "M1",
        Timeframe::M5 => "M5",
        Timeframe::M15 => "M15",
        Timeframe::M30 => "M30",
        Timeframe::H1 => "H1",
        Timeframe::H4 => "H4",
        Timeframe::D1 => "D",
        Timeframe::W1 => "W",
    }
}

fn to_candle(raw: &OandaCandle) -> Option<Candle> {
    let mid = raw.mid.as_ref()?;
    let candle = Candle {
        open_time: DateTime::parse_from_rfc3339(&raw.time).ok()?.timestamp_millis(),
        open: mid.o.parse().ok()?,
        high: mid.h.parse().ok()?,
        low: mid.l.parse().ok()?,
        close: mid.c.parse().ok()?,
        volume: raw.volume,
    };
    candle.is_valid().then_some(candle)
}

#[derive(Clone)]
pub struct OandaClient {
    client: Client,
    base_url: String,
    token: String,
}

impl OandaClient {
    /// Client against the practice environment
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, PRACTICE_URL)
    }

    pub fn with_base_url(token: String, base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into(),
            token,
        }
    }

    async fn fetch(
        &self,
        pair: &str,
        granularity: &str,
        count: usize,
    ) -> MarketDataResult<Vec<OandaCandle>> {
        let url = format!(
            "{}/v3/instruments/{}/candles",
            self.base_url,
            instrument(pair)
        );
        let count = count.clamp(1, MAX_COUNT).to_string();

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("count", count.as_str()),
                ("granularity", granularity),
                ("price", "M"),
            ])
            .send()
            .await?;
        let body: CandlesResponse = ensure_success(PROVIDER, response).await?.json().await?;
        Ok(body.candles)
    }
}

#[async_trait]
impl MarketDataProvider for OandaClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    /// Completed candles only
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        debug!(pair = symbol, timeframe = %timeframe, "Fetching OANDA candles");
        let raw = self.fetch(symbol, granularity(timeframe), limit).await?;
        Ok(raw.iter().filter(|c| c.complete).filter_map(to_candle).collect())
    }

    /// Close of the newest (possibly forming) one-minute candle
    async fn get_price(&self, symbol: &str) -> MarketDataResult<f64> {
        let raw = self.fetch(symbol, "M1", 1).await?;
        raw.last()
            .and_then(to_candle)
            .map(|c| c.close)
            .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))
    }
}
