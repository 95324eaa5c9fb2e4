//! Provider routing with fallbacks, rate limiting and a short-lived candle cache

use crate::api::{
    oanda, BinanceClient, CoinGeckoClient, FinnhubClient, MarketDataProvider, OandaClient,
    YahooClient,
};
use crate::types::{AssetClass, Candle, Timeframe};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use crate::api::{MarketDataError, MarketDataResult};

const CANDLE_TTL: Duration = Duration::from_secs(60);

/// Sliding-window limiter: at most `max_requests` per `window`
pub struct RateLimiter {
    name: &'static str,
    max_requests: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, max_requests: usize, window: Duration) -> Self {
        Self {
            name,
            max_requests: max_requests.max(1),
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(calls: &mut VecDeque<Instant>, window: Duration, now: Instant) {
        while calls
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            calls.pop_front();
        }
    }

    /// Wait until a slot is free, then take it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                Self::prune(&mut calls, self.window, now);
                if calls.len() < self.max_requests {
                    calls.push_back(now);
                    return;
                }
                match calls.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };
            debug!(limiter = self.name, wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn status(&self) -> RateLimitStatus {
        let mut calls = self.calls.lock().await;
        Self::prune(&mut calls, self.window, Instant::now());
        RateLimitStatus {
            provider: self.name,
            used: calls.len(),
            limit: self.max_requests,
            window_secs: self.window.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub provider: &'static str,
    pub used: usize,
    pub limit: usize,
    pub window_secs: u64,
}

struct CacheEntry<T> {
    data: T,
    cached_at: Instant,
}

/// Candle batches keyed by asset, timeframe and size
pub struct CandleCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry<Vec<Candle>>>>,
}

impl CandleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(class: AssetClass, symbol: &str, timeframe: Timeframe, limit: usize) -> String {
        format!("{class}:{}:{timeframe}:{limit}", symbol.to_ascii_uppercase())
    }

    pub fn get(&self, key: &str) -> Option<Vec<Candle>> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries
            .get(key)
            .filter(|e| e.cached_at.elapsed() < self.ttl)
            .map(|e| e.data.clone())
    }

    pub fn insert(&self, key: String, data: Vec<Candle>) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.retain(|_, e| e.cached_at.elapsed() < self.ttl);
        entries.insert(
            key,
            CacheEntry {
                data,
                cached_at: Instant::now(),
            },
        );
    }
}

/// Where the scanner and tracker get their numbers from
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn candles(
        &self,
        symbol: &str,
        class: AssetClass,
        timeframe: Timeframe,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>>;

    async fn price(&self, symbol: &str, class: AssetClass) -> MarketDataResult<f64>;
}

/// Credentials for the keyed providers; anything missing is skipped
#[derive(Debug, Clone, Default)]
pub struct MarketDataConfig {
    pub finnhub_api_key: Option<String>,
    pub oanda_api_key: Option<String>,
    pub oanda_live: bool,
}

pub struct MarketDataService {
    binance: BinanceClient,
    coingecko: CoinGeckoClient,
    finnhub: Option<FinnhubClient>,
    oanda: Option<OandaClient>,
    yahoo: YahooClient,
    finnhub_limiter: RateLimiter,
    oanda_limiter: RateLimiter,
    cache: CandleCache,
}

type Route<'a> = (&'a dyn MarketDataProvider, Option<&'a RateLimiter>);

impl MarketDataService {
    pub fn new(config: MarketDataConfig) -> Self {
        let finnhub = config
            .finnhub_api_key
            .filter(|k| !k.is_empty())
            .map(FinnhubClient::new);
        let oanda = config
            .oanda_api_key
            .filter(|k| !k.is_empty())
            .map(|token| {
                let url = if config.oanda_live {
                    oanda::LIVE_URL
                } else {
                    oanda::PRACTICE_URL
                };
                OandaClient::with_base_url(token, url)
            });

        if finnhub.is_none() {
            warn!("FINNHUB_API_KEY not set, stocks fall back to Yahoo");
        }
        if oanda.is_none() {
            warn!("OANDA_API_KEY not set, forex falls back to Yahoo");
        }

        Self {
            binance: BinanceClient::new(),
            coingecko: CoinGeckoClient::new(),
            finnhub,
            oanda,
            yahoo: YahooClient::new(),
            finnhub_limiter: RateLimiter::new("finnhub", 55, Duration::from_secs(60)),
            oanda_limiter: RateLimiter::new("oanda", 80, Duration::from_secs(20)),
            cache: CandleCache::new(CANDLE_TTL),
        }
    }

    /// Providers to try for an asset class, primary first
    fn routes(&self, class: AssetClass) -> Vec<Route<'_>> {
        let mut routes: Vec<Route<'_>> = Vec::with_capacity(2);
        match class {
            AssetClass::Crypto => {
                routes.push((&self.binance, None));
                routes.push((&self.coingecko, None));
            }
            AssetClass::Stock | AssetClass::Index | AssetClass::Commodity | AssetClass::Etf => {
                if let Some(finnhub) = &self.finnhub {
                    routes.push((finnhub, Some(&self.finnhub_limiter)));
                }
                routes.push((&self.yahoo, None));
            }
            AssetClass::Forex => {
                if let Some(oanda) = &self.oanda {
                    routes.push((oanda, Some(&self.oanda_limiter)));
                }
                routes.push((&self.yahoo, None));
            }
        }
        routes
    }

    pub fn provider_names(&self, class: AssetClass) -> Vec<&'static str> {
        self.routes(class).iter().map(|(p, _)| p.name()).collect()
    }

    pub async fn rate_limit_status(&self) -> Vec<RateLimitStatus> {
        vec![
            self.finnhub_limiter.status().await,
            self.oanda_limiter.status().await,
        ]
    }

    pub async fn top_crypto_pairs(&self, limit: usize) -> Vec<String> {
        self.binance.top_usdt_pairs(limit).await
    }
}

#[async_trait]
impl CandleSource for MarketDataService {
    async fn candles(
        &self,
        symbol: &str,
        class: AssetClass,
        timeframe: Timeframe,
        limit: usize,
    ) -> MarketDataResult<Vec<Candle>> {
        let key = CandleCache::key(class, symbol, timeframe, limit);
        if let Some(hit) = self.cache.get(&key) {
            debug!(symbol, "Candle cache hit");
            return Ok(hit);
        }

        let mut last_err = None;
        for (provider, limiter) in self.routes(class) {
            if let Some(limiter) = limiter {
                limiter.acquire().await;
            }
            match provider.get_candles(symbol, timeframe, limit).await {
                Ok(candles) if !candles.is_empty() => {
                    self.cache.insert(key, candles.clone());
                    return Ok(candles);
                }
                Ok(_) => {
                    debug!(symbol, provider = provider.name(), "Empty candle set");
                    last_err = Some(MarketDataError::NoData(symbol.to_string()));
                }
                Err(e) => {
                    warn!(symbol, provider = provider.name(), error = %e, "Candle fetch failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MarketDataError::NoData(symbol.to_string())))
    }

    async fn price(&self, symbol: &str, class: AssetClass) -> MarketDataResult<f64> {
        let mut last_err = None;
        for (provider, limiter) in self.routes(class) {
            if let Some(limiter) = limiter {
                limiter.acquire().await;
            }
            match provider.get_price(symbol).await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    warn!(symbol, provider = provider.name(), error = %e, "Price fetch failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MarketDataError::NoData(symbol.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_waits_for_window() {
        let limiter = RateLimiter::new("test", 2, Duration::from_millis(80));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));

        let status = limiter.status().await;
        assert_eq!(status.used, 2);
        assert_eq!(status.limit, 2);

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[test]
    fn test_candle_cache_ttl() {
        let candle = Candle {
            open_time: 0,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        };
        let key = CandleCache::key(AssetClass::Crypto, "btc/usdt", Timeframe::H4, 100);
        assert_eq!(key, "crypto:BTC/USDT:4h:100");

        let cache = CandleCache::new(Duration::from_secs(60));
        cache.insert(key.clone(), vec![candle]);
        assert_eq!(cache.get(&key).map(|c| c.len()), Some(1));

        let expired = CandleCache::new(Duration::ZERO);
        expired.insert(key.clone(), vec![candle]);
        assert!(expired.get(&key).is_none());
    }

    #[test]
    fn test_routes_skip_unconfigured_providers() {
        let bare = MarketDataService::new(MarketDataConfig::default());
        assert_eq!(bare.provider_names(AssetClass::Crypto), vec!["binance", "coingecko"]);
        assert_eq!(bare.provider_names(AssetClass::Stock), vec!["yahoo"]);
        assert_eq!(bare.provider_names(AssetClass::Forex), vec!["yahoo"]);

        let keyed = MarketDataService::new(MarketDataConfig {
            finnhub_api_key: Some("f".into()),
            oanda_api_key: Some("o".into()),
            oanda_live: false,
        });
        assert_eq!(keyed.provider_names(AssetClass::Commodity), vec!["finnhub", "yahoo"]);
        assert_eq!(keyed.provider_names(AssetClass::Forex), vec!["oanda", "yahoo"]);
    }
}
