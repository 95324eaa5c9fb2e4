//! Per-symbol setup analysis: indicators → score → optional AI review → levels

use crate::ai::{AiAnalyzer, AiProvider, AiValidation};
use crate::indicators::{calculate_all, IndicatorBundle};
use crate::levels::{calculate_trade_levels, generate_recommendation, TradeLevels};
use crate::scoring::calculate_total_score;
use crate::types::{AssetClass, Candle, Direction, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Setups scoring at least this much get an AI review by default
pub const DEFAULT_AI_MIN_SCORE: f64 = 60.0;

/// A fully analyzed trading opportunity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSetup {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub direction: Direction,
    pub confidence: f64,
    pub current_price: f64,
    pub indicators: IndicatorBundle,
    pub confluences: Vec<String>,
    pub warnings: Vec<String>,
    pub levels: TradeLevels,
    pub ai_provider: Option<AiProvider>,
    pub ai_insights: Option<AiValidation>,
    pub recommendation: String,
    /// Identity of the setup across scans
    pub setup_hash: String,
}

/// Deduplication key: same symbol, timeframe, direction and closing candle
pub fn setup_hash(
    symbol: &str,
    timeframe: Timeframe,
    direction: Direction,
    candle_time: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(b"|");
    hasher.update(timeframe.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(direction.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(candle_time.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct SetupAnalyzer {
    ai: Option<AiAnalyzer>,
    ai_min_score: f64,
}

impl Default for SetupAnalyzer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SetupAnalyzer {
    pub fn new(ai: Option<AiAnalyzer>) -> Self {
        Self {
            ai,
            ai_min_score: DEFAULT_AI_MIN_SCORE,
        }
    }

    pub fn with_ai_min_score(mut self, score: f64) -> Self {
        self.ai_min_score = score;
        self
    }

    pub fn ai_provider(&self) -> Option<AiProvider> {
        self.ai.as_ref().map(|ai| ai.provider())
    }

    /// The configured LLM analyzer, for stand-alone setup opinions
    pub fn ai(&self) -> Option<&AiAnalyzer> {
        self.ai.as_ref()
    }

    /// Analyze one symbol. Returns `None` when there are too few candles.
    pub async fn analyze(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Option<TradeSetup> {
        let indicators = calculate_all(candles)?;
        let score = calculate_total_score(&indicators);

        let mut ai_insights = None;
        if score.total_score >= self.ai_min_score {
            if let Some(ai) = &self.ai {
                match ai.validate_setup(symbol, &indicators, &score, candles).await {
                    Ok(validation) => ai_insights = Some(validation),
                    Err(e) => warn!(symbol, error = %e, "AI validation failed"),
                }
            }
        }

        let levels = calculate_trade_levels(&indicators, score.direction);
        let recommendation = generate_recommendation(&score, &levels, ai_insights.as_ref());
        let last_open = candles.last().map(|c| c.open_time).unwrap_or_default();

        debug!(symbol, score = score.total_score, direction = %score.direction, "Setup scored");
        if score.direction != Direction::Neutral {
            info!(
                symbol,
                timeframe = %timeframe,
                score = score.total_score,
                direction = %score.direction,
                "Setup found"
            );
        }

        Some(TradeSetup {
            symbol: symbol.to_string(),
            asset_class,
            timeframe,
            timestamp: Utc::now(),
            score: score.total_score,
            direction: score.direction,
            confidence: score.confidence,
            current_price: indicators.current_price,
            setup_hash: setup_hash(symbol, timeframe, score.direction, last_open),
            ai_provider: ai_insights.as_ref().and(self.ai_provider()),
            confluences: score.confluences,
            warnings: score.warnings,
            indicators,
            levels,
            ai_insights,
            recommendation,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::tests::ScriptedClient;
    use crate::indicators::tests::make_candles;
    use std::sync::Arc;

    /// Steady selloff followed by a five-bar bounce: RSI still oversold,
    /// MACD already turned up
    pub(crate) fn bounce_candles() -> Vec<Candle> {
        let mut prices = vec![100.0; 40];
        prices.extend((1..=25).map(|i| 100.0 - 3.0 * i as f64));
        prices.extend((1..=5).map(|i| 25.0 + i as f64));
        make_candles(&prices)
    }

    /// A LONG setup scored without AI
    pub(crate) async fn sample_setup(symbol: &str, asset_class: AssetClass) -> TradeSetup {
        SetupAnalyzer::default()
            .analyze(symbol, asset_class, Timeframe::H4, &bounce_candles())
            .await
            .unwrap()
    }

    #[test]
    fn test_setup_hash_is_stable_and_distinct() {
        let a = setup_hash("BTC/USDT", Timeframe::H4, Direction::Long, 1_000);
        let b = setup_hash("BTC/USDT", Timeframe::H4, Direction::Long, 1_000);
        let c = setup_hash("BTC/USDT", Timeframe::H4, Direction::Short, 1_000);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_analyze_without_ai() {
        let analyzer = SetupAnalyzer::default();
        let candles = bounce_candles();
        let setup = analyzer
            .analyze("ETH/USDT", AssetClass::Crypto, Timeframe::H1, &candles)
            .await
            .unwrap();

        assert_eq!(setup.direction, Direction::Long);
        assert!(setup.score > 75.0 && setup.score < 80.0);
        assert!(setup.ai_insights.is_none());
        assert!(setup.levels.stop_loss.unwrap() < setup.current_price);
        assert_eq!(
            setup.setup_hash,
            setup_hash("ETH/USDT", Timeframe::H1, Direction::Long, candles[69].open_time)
        );
    }

    #[tokio::test]
    async fn test_analyze_attaches_ai_review() {
        let client = Arc::new(ScriptedClient::new(
            r#"{"valid": true, "validation_score": 8, "recommendation": "Scale in"}"#,
        ));
        let analyzer =
            SetupAnalyzer::new(Some(AiAnalyzer::new(client.clone()))).with_ai_min_score(0.0);
        let setup = analyzer
            .analyze("ETH/USDT", AssetClass::Crypto, Timeframe::H1, &bounce_candles())
            .await
            .unwrap();

        let insights = setup.ai_insights.unwrap();
        assert_eq!(insights.validation_score, Some(8.0));
        assert_eq!(setup.ai_provider, Some(AiProvider::Groq));
        assert!(setup.recommendation.contains("AI Insight: Scale in"));
        assert_eq!(client.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ai_opinion_through_analyzer() {
        assert!(SetupAnalyzer::default().ai().is_none());

        let client = Arc::new(ScriptedClient::new(
            r#"{"valid": true, "confidence": 65, "direction": "LONG", "stop_loss": 24.0, "reasoning": "Bounce off lows"}"#,
        ));
        let analyzer = SetupAnalyzer::new(Some(AiAnalyzer::new(client.clone())));
        let opinion = analyzer
            .ai()
            .unwrap()
            .analyze_setup("ETH/USDT", Timeframe::H4.as_str(), &bounce_candles())
            .await
            .unwrap();

        assert_eq!(opinion.direction.as_deref(), Some("LONG"));
        assert_eq!(opinion.stop_loss, Some(24.0));
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("ETH/USDT on the 4h timeframe"));
        assert!(prompts[0].contains("Last 70 candles"));
    }

    #[tokio::test]
    async fn test_analyze_rejects_short_history() {
        let analyzer = SetupAnalyzer::default();
        let candles = make_candles(&vec![100.0; 30]);
        assert!(analyzer
            .analyze("AAPL", AssetClass::Stock, Timeframe::D1, &candles)
            .await
            .is_none());
    }
}
