//! Core market types shared by providers, indicators and the scanner

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single OHLCV candlestick. `open_time` is unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// True when every price is a positive finite number
    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
            && self.volume.is_finite()
    }
}

/// Broad asset class, used to route data requests to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Crypto,
    Stock,
    Index,
    Commodity,
    Etf,
    Forex,
}

impl AssetClass {
    pub const ALL: [AssetClass; 6] = [
        AssetClass::Crypto,
        AssetClass::Stock,
        AssetClass::Index,
        AssetClass::Commodity,
        AssetClass::Etf,
        AssetClass::Forex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Crypto => "crypto",
            AssetClass::Stock => "stock",
            AssetClass::Index => "index",
            AssetClass::Commodity => "commodity",
            AssetClass::Etf => "etf",
            AssetClass::Forex => "forex",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crypto" | "cryptos" => Ok(AssetClass::Crypto),
            "stock" | "stocks" => Ok(AssetClass::Stock),
            "index" | "indices" | "indexes" => Ok(AssetClass::Index),
            "commodity" | "commodities" => Ok(AssetClass::Commodity),
            "etf" | "etfs" => Ok(AssetClass::Etf),
            "forex" | "fx" => Ok(AssetClass::Forex),
            other => Err(format!("unknown asset class: {other}")),
        }
    }
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
            Timeframe::W1 => 10080,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" | "60m" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" | "d" => Ok(Timeframe::D1),
            "1w" | "w" => Ok(Timeframe::W1),
            other => Err(format!("unknown timeframe: {other}")),
        }
    }
}

/// Trade direction chosen by the scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::Neutral => "NEUTRAL",
        }
    }

    /// The bias that supports this direction, if any
    pub fn supporting_bias(&self) -> Option<SignalBias> {
        match self {
            Direction::Long => Some(SignalBias::Bullish),
            Direction::Short => Some(SignalBias::Bearish),
            Direction::Neutral => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Direction::Long),
            "SHORT" | "SELL" => Ok(Direction::Short),
            "NEUTRAL" => Ok(Direction::Neutral),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Bias reported by a single scoring component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalBias {
    Bullish,
    Bearish,
    Neutral,
    /// Volume: supports whichever direction wins
    Confirmation,
}
