//! Runtime settings read from the environment (and `.env` via dotenvy)

use engine::{AiProvider, MarketDataConfig};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_DB_PATH: &str = "data/trade_scout.db";

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: String,
    pub finnhub_api_key: Option<String>,
    pub oanda_api_key: Option<String>,
    pub oanda_live: bool,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub ai_provider: Option<AiProvider>,
    pub ai_api_key: Option<String>,
    pub min_score: f64,
    pub ai_min_score: f64,
    pub tracker_interval: Duration,
    pub scheduler_enabled: bool,
    pub system_state_file: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str, default: f64| match get(key) {
            Some(raw) => raw.parse::<f64>().unwrap_or_else(|_| {
                warn!(key, value = %raw, "Not a number, using default");
                default
            }),
            None => default,
        };
        let flag = |key: &str, default: bool| {
            get(key).map_or(default, |v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        };

        let ai_provider = get("AI_PROVIDER").and_then(|raw| match raw.parse::<AiProvider>() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "AI validation disabled");
                None
            }
        });
        let ai_api_key = ai_provider.and_then(|p| get(api_key_var(p)));

        Self {
            db_path: get("TRADE_SCOUT_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            finnhub_api_key: get("FINNHUB_API_KEY"),
            oanda_api_key: get("OANDA_API_KEY"),
            oanda_live: get("OANDA_ENV").is_some_and(|v| v.eq_ignore_ascii_case("live")),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: get("TELEGRAM_CHAT_ID"),
            ai_provider,
            ai_api_key,
            min_score: number("MIN_SCORE", 60.0),
            ai_min_score: number("AI_MIN_SCORE", engine::analysis::DEFAULT_AI_MIN_SCORE),
            tracker_interval: Duration::from_secs(number("TRACKER_INTERVAL_SECS", 60.0).max(5.0) as u64),
            scheduler_enabled: flag("SCHEDULER_ENABLED", true),
            system_state_file: get("SYSTEM_STATE_FILE")
                .unwrap_or_else(|| engine::system::DEFAULT_STATE_FILE.to_string()),
        }
    }

    pub fn market_data(&self) -> MarketDataConfig {
        MarketDataConfig {
            finnhub_api_key: self.finnhub_api_key.clone(),
            oanda_api_key: self.oanda_api_key.clone(),
            oanda_live: self.oanda_live,
        }
    }
}

/// Environment variable holding the key for an LLM provider
pub fn api_key_var(provider: AiProvider) -> &'static str {
    match provider {
        AiProvider::Claude => "ANTHROPIC_API_KEY",
        AiProvider::Groq => "GROQ_API_KEY",
        AiProvider::OpenAi => "OPENAI_API_KEY",
        AiProvider::Gemini => "GEMINI_API_KEY",
    }
}
