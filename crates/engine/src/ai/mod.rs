//! LLM review of trade setups
//!
//! A `ChatClient` turns a prompt into raw text; `AiAnalyzer` builds the
//! prompts, pulls the JSON object out of the reply and deserializes it.

pub mod claude;
pub mod gemini;
pub mod openai;

use crate::indicators::IndicatorBundle;
use crate::scoring::ScoreResult;
use crate::types::Candle;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use claude::ClaudeClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiCompatClient;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: AiProvider,
        status: u16,
        body: String,
    },

    #[error("{0} returned an empty response")]
    EmptyResponse(AiProvider),

    #[error("could not parse model reply: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Claude,
    Groq,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::Claude => "claude",
            AiProvider::Groq => "groq",
            AiProvider::OpenAi => "openai",
            AiProvider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(AiProvider::Claude),
            "groq" => Ok(AiProvider::Groq),
            "openai" | "gpt" | "gpt-4o" => Ok(AiProvider::OpenAi),
            "gemini" | "google" => Ok(AiProvider::Gemini),
            other => Err(format!("unknown AI provider: {other}")),
        }
    }
}

/// Sampling parameters for a single completion
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A chat-style LLM endpoint
#[async_trait]
pub trait ChatClient: Send + Sync {
    fn provider(&self) -> AiProvider;

    /// Send a single user prompt and return the reply text
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String, AiError>;
}

/// Build the client for `provider` with its API key
pub fn build_client(provider: AiProvider, api_key: String) -> Arc<dyn ChatClient> {
    match provider {
        AiProvider::Claude => Arc::new(ClaudeClient::new(api_key)),
        AiProvider::Groq => Arc::new(OpenAiCompatClient::groq(api_key)),
        AiProvider::OpenAi => Arc::new(OpenAiCompatClient::openai(api_key)),
        AiProvider::Gemini => Arc::new(GeminiClient::new(api_key)),
    }
}

// ============================================================================
// Reply parsing
// ============================================================================

/// Locate the JSON payload inside a model reply: the body of a ```json fence,
/// else of the first plain fence, else the outermost `{...}` span.
pub fn json_payload(text: &str) -> &str {
    if let Some((_, rest)) = text.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    if let Some((_, rest)) = text.split_once("```") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text.trim(),
    }
}

pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, AiError> {
    serde_json::from_str(json_payload(text)).map_err(|e| AiError::Parse(e.to_string()))
}

// ============================================================================
// Reply types
// ============================================================================

fn default_true() -> bool {
    true
}

/// Stand-alone setup opinion from the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiSetup {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub entry: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Model review of a technically scored setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiValidation {
    #[serde(default = "default_true")]
    pub valid: bool,
    /// 1-10
    #[serde(default)]
    pub validation_score: Option<f64>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub caution: Option<String>,
}

// ============================================================================
// Prompts
// ============================================================================

fn candle_line(c: &Candle) -> String {
    format!(
        "Open:{:.4} High:{:.4} Low:{:.4} Close:{:.4} Volume:{:.0}",
        c.open, c.high, c.low, c.close, c.volume
    )
}

pub fn setup_prompt(symbol: &str, timeframe: &str, candles: &[Candle]) -> String {
    let recent = &candles[candles.len().saturating_sub(100)..];
    let current = recent.last().map(|c| c.close).unwrap_or_default();
    let rows: Vec<String> = recent
        .iter()
        .enumerate()
        .map(|(i, c)| format!("#{i}: {}", candle_line(c)))
        .collect();

    format!(
        r#"You are an expert institutional trader analyzing {symbol} on the {timeframe} timeframe.

Current price: {current:.4}

Last {count} candles (OHLCV):
{rows}

Analyze this data and answer with a single JSON object:

{{
  "valid": true/false,
  "confidence": 0-100,
  "direction": "LONG"|"SHORT"|"NEUTRAL",
  "entry": price,
  "stop_loss": price,
  "take_profit": price,
  "reasoning": "Two sentence technical rationale"
}}

Consider trend direction and strength, support and resistance, volume, momentum and risk/reward.
Be critical: if the setup is unclear or risky, set valid to false and confidence below 60."#,
        count = recent.len(),
        rows = rows.join("\n"),
    )
}

pub fn validation_prompt(
    symbol: &str,
    bundle: &IndicatorBundle,
    score: &ScoreResult,
    candles: &[Candle],
) -> String {
    let recent = &candles[candles.len().saturating_sub(10)..];
    let rsi = bundle
        .rsi
        .map(|v| format!("{v:.1}"))
        .unwrap_or_else(|| "N/A".into());
    let macd = bundle
        .macd
        .map(|m| {
            format!(
                "macd {:.4}, signal {:.4}, histogram {:.4}",
                m.macd, m.signal, m.histogram
            )
        })
        .unwrap_or_else(|| "N/A".into());
    let confluences: Vec<String> = score.confluences.iter().map(|c| format!("- {c}")).collect();
    let rows: Vec<String> = recent
        .iter()
        .map(|c| {
            format!(
                "C: {:.4} | H: {:.4} | L: {:.4} | V: {:.0}",
                c.close, c.high, c.low, c.volume
            )
        })
        .collect();

    format!(
        r#"You are an experienced trader. Review this trading setup:

**{symbol}**
Current price: {price:.4}
Direction: {direction}
Technical score: {total:.1}/100

**Indicators:**
- RSI: {rsi}
- Trend: {trend:?} (strength: {strength:.0})
- MACD: {macd}

**Confluences:**
{confluences}

**Last 10 candles:**
{rows}

1. Is this a valid setup?
2. Which risk factors are not accounted for?
3. Overall rating (1-10)?
4. Specific advice for this trade?

Answer in JSON:
{{
    "valid": true/false,
    "validation_score": 1-10,
    "risk_factors": ["factor1", "factor2"],
    "opportunities": ["opportunity1", "opportunity2"],
    "recommendation": "Your specific advice",
    "caution": "Important warnings"
}}"#,
        price = bundle.current_price,
        direction = score.direction,
        total = score.total_score,
        trend = bundle.trend.direction,
        strength = bundle.trend.strength,
        confluences = confluences.join("\n"),
        rows = rows.join("\n"),
    )
}

// ============================================================================
// Analyzer
// ============================================================================

#[derive(Clone)]
pub struct AiAnalyzer {
    client: Arc<dyn ChatClient>,
}

impl AiAnalyzer {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }

    pub fn provider(&self) -> AiProvider {
        self.client.provider()
    }

    /// Ask the model for its own trade plan from raw candles
    pub async fn analyze_setup(
        &self,
        symbol: &str,
        timeframe: &str,
        candles: &[Candle],
    ) -> Result<AiSetup, AiError> {
        let prompt = setup_prompt(symbol, timeframe, candles);
        let options = CompletionOptions {
            max_tokens: 1000,
            temperature: 0.2,
        };

        info!(symbol, provider = %self.provider(), "Requesting AI setup analysis");
        let reply = self.client.complete(&prompt, options).await?;
        debug!(symbol, reply = %reply.chars().take(200).collect::<String>(), "AI reply");

        let setup: AiSetup = extract_json(&reply)?;
        info!(symbol, confidence = setup.confidence, valid = setup.valid, "AI analysis complete");
        Ok(setup)
    }

    /// Ask the model to review a technically scored setup
    pub async fn validate_setup(
        &self,
        symbol: &str,
        bundle: &IndicatorBundle,
        score: &ScoreResult,
        candles: &[Candle],
    ) -> Result<AiValidation, AiError> {
        let prompt = validation_prompt(symbol, bundle, score, candles);
        let options = CompletionOptions {
            max_tokens: 1500,
            temperature: 0.3,
        };

        let reply = self.client.complete(&prompt, options).await?;
        let validation: AiValidation = extract_json(&reply)?;
        info!(
            symbol,
            provider = %self.provider(),
            score = ?validation.validation_score,
            valid = validation.valid,
            "AI validation complete"
        );
        Ok(validation)
    }
}
