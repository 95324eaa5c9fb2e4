//! Finnhub client for stocks, index ETFs and commodity ETFs

use super::{
    ensure_success, http_client, keep_last, MarketDataError, MarketDataProvider, MarketDataResult,
};
use crate::types::{Candle, Timeframe};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER: &str = "finnhub";

/// Column-oriented candle payload from `/stock/candle`
#[derive(Debug, Default, Deserialize)]
struct CandleResponse {
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    c: f64,
}

fn resolution(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1",
        Timeframe::M5 => "5",
        Timeframe::M15 => "15",
        Timeframe::M30 => "30",
        Timeframe::H1 => "60",
        Timeframe::H4 => "240",
        Timeframe::D1 => "D",
        Timeframe::W1 => "W",
    }
}

/// Seconds to look back for `limit` bars. Intraday ranges are tripled to
/// cover closed sessions, daily ones padded for weekends.
fn lookback_secs(timeframe: Timeframe, limit: usize) -> i64 {
    let base = timeframe.minutes() * 60 * limit as i64;
    match timeframe {
        Timeframe::D1 | Timeframe::W1 => base * 3 / 2,
        _ => base * 3,
    }
}

fn candles_from_response(symbol: &str, body: CandleResponse) -> MarketDataResult<Vec<Candle>> {
    match body.s.as_str() {
        "ok" => {}
        "no_data" => {
            warn!(symbol, "Finnhub has no data");
            return Ok(Vec::new());
        }
        other => {
            return Err(MarketDataError::Parse {
                provider: PROVIDER,
                reason: format!("status {other:?}"),
            })
        }
    }

    let candles = body
        .t
        .iter()
        .enumerate()
        .filter_map(|(i, &t)| {
            Some(Candle {
                open_time: t * 1000,
                open: *body.o.get(i)?,
                high: *body.h.get(i)?,
                low: *body.l.get(i)?,
                close: *body.c.get(i)?,
                volume: body.v.get(i).copied().unwrap_or_default(),
            })
        })
        .filter(Candle::is_valid)
        .collect();
    Ok(candles)
}

#[derive(Clone)]
pub struct FinnhubClient {
    client: Client,
    api_key: String,
}

impl FinnhubClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(),
            api_key,
        }
    }
}

#[async_trait]
impl MarketDataProvider for FinnhubClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        let now = Utc::now().timestamp();
        let from = now - lookback_secs(timeframe, limit);
        let symbol = symbol.to_ascii_uppercase();
        let (from, to) = (from.to_string(), now.to_string());

        debug!(symbol = %symbol, timeframe = %timeframe, "Fetching Finnhub candles");

        let response = self
            .client
            .get(format!("{BASE_URL}/stock/candle"))
            .query(&[
                ("symbol", symbol.as_str()),
                ("resolution", resolution(timeframe)),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("token", self.api_key.as_str()),
            ])
            .send()
            .await?;
        let body: CandleResponse = ensure_success(PROVIDER, response).await?.json().await?;

        Ok(keep_last(candles_from_response(&symbol, body)?, limit))
    }

    async fn get_price(&self, symbol: &str) -> MarketDataResult<f64> {
        let symbol = symbol.to_ascii_uppercase();
        let response = self
            .client
            .get(format!("{BASE_URL}/quote"))
            .query(&[("symbol", symbol.as_str()), ("token", self.api_key.as_str())])
            .send()
            .await?;
        let quote: QuoteResponse = ensure_success(PROVIDER, response).await?.json().await?;

        if quote.c > 0.0 {
            Ok(quote.c)
        } else {
            Err(MarketDataError::NoData(symbol))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_map() {
        assert_eq!(resolution(Timeframe::H1), "60");
        assert_eq!(resolution(Timeframe::H4), "240");
        assert_eq!(resolution(Timeframe::D1), "D");
    }

    #[test]
    fn test_candle_columns_to_rows() {
        let body: CandleResponse = serde_json::from_str(
            r#"{"s":"ok","t":[1700000000,1700003600],"o":[10.0,11.0],"h":[12.0,12.5],
                "l":[9.5,10.5],"c":[11.0,12.0],"v":[1000,1200]}"#,
        )
        .unwrap();
        let candles = candles_from_response("AAPL", body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].open_time, 1_700_003_600_000);
        assert_eq!(candles[1].close, 12.0);
    }

    #[test]
    fn test_no_data_is_empty_and_bad_status_errors() {
        let body: CandleResponse = serde_json::from_str(r#"{"s":"no_data"}"#).unwrap();
        assert!(candles_from_response("XYZ", body).unwrap().is_empty());

        let body: CandleResponse = serde_json::from_str(r#"{"s":"error"}"#).unwrap();
        assert!(candles_from_response("XYZ", body).is_err());
    }

    #[test]
    fn test_lookback_covers_closed_sessions() {
        assert_eq!(lookback_secs(Timeframe::H1, 10), 10 * 3600 * 3);
        assert_eq!(lookback_secs(Timeframe::D1, 100), 100 * 86400 * 3 / 2);
    }
}
