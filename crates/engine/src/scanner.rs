//! Market scanner: fetch, score and persist setups across a universe of assets
//!
//! A scan walks its asset list one symbol at a time, keeps setups scoring at
//! least `min_score`, saves the directional ones for the tracker and optionally
//! posts a summary to Telegram. Progress is shared through [`ScanProgress`] so
//! the API can poll or cancel a running scan.

use crate::analysis::{SetupAnalyzer, TradeSetup};
use crate::indicators::MIN_CANDLES;
use crate::market_data::CandleSource;
use crate::telegram::TelegramNotifier;
use crate::types::{Direction, Timeframe};
use crate::universe::{preset_assets, Asset};
use anyhow::{anyhow, Result};
use chrono::Utc;
use persistence::repository::{NewScan, NewSetup, ScanRepository, SetupRepository};
use persistence::SqlitePool;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const ASSET_DELAY: Duration = Duration::from_millis(500);
const HIGH_CONFIDENCE: f64 = 60.0;

// ============================================================================
// Request / progress
// ============================================================================

fn default_timeframe() -> Timeframe {
    Timeframe::H1
}

fn default_min_score() -> f64 {
    60.0
}

fn default_max_results() -> usize {
    20
}

fn default_candle_limit() -> usize {
    200
}

fn default_scan_type() -> String {
    "manual".to_string()
}

/// What to scan. Explicit `symbols` win over `preset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub symbols: Vec<Asset>,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub notify: bool,
    #[serde(default = "default_scan_type")]
    pub scan_type: String,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            preset: None,
            symbols: Vec::new(),
            timeframe: default_timeframe(),
            min_score: default_min_score(),
            max_results: default_max_results(),
            notify: false,
            scan_type: default_scan_type(),
            candle_limit: default_candle_limit(),
        }
    }
}

impl ScanRequest {
    pub fn preset(name: &str) -> Self {
        Self {
            preset: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn assets(&self) -> Vec<Asset> {
        if self.symbols.is_empty() {
            preset_assets(self.preset.as_deref().unwrap_or("quick"))
        } else {
            self.symbols.clone()
        }
    }

    fn label(&self) -> &str {
        match (&self.preset, self.symbols.is_empty()) {
            (Some(preset), true) => preset,
            (None, true) => "quick",
            _ => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    Fetching,
    Analyzing,
    Complete,
    Error,
}

/// Shared progress for a running scan
pub struct ScanProgress {
    pub status: RwLock<ScanStatus>,
    pub scan_id: RwLock<Option<i64>>,
    pub total: AtomicU32,
    pub completed: AtomicU32,
    pub found: AtomicU32,
    pub current_symbol: RwLock<String>,
    pub results: RwLock<Vec<TradeSetup>>,
    pub error_message: RwLock<Option<String>>,
    pub started_at: RwLock<Option<String>>,
    pub cancelled: AtomicBool,
}

/// Serializable view of [`ScanProgress`]
#[derive(Debug, Clone, Serialize)]
pub struct ScanSnapshot {
    pub status: ScanStatus,
    pub scan_id: Option<i64>,
    pub total: u32,
    pub completed: u32,
    pub found: u32,
    pub progress_pct: f32,
    pub current_symbol: String,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub results: Vec<TradeSetup>,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(ScanStatus::Idle),
            scan_id: RwLock::new(None),
            total: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            found: AtomicU32::new(0),
            current_symbol: RwLock::new(String::new()),
            results: RwLock::new(Vec::new()),
            error_message: RwLock::new(None),
            started_at: RwLock::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Claim the progress for a new scan. Returns false while another scan
    /// is fetching or analyzing; the check and the reset share the status lock.
    pub fn try_start(&self) -> bool {
        let mut status = self.status.write().unwrap();
        if matches!(*status, ScanStatus::Fetching | ScanStatus::Analyzing) {
            return false;
        }
        *status = ScanStatus::Fetching;
        self.clear();
        true
    }

    fn clear(&self) {
        *self.scan_id.write().unwrap() = None;
        self.total.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.found.store(0, Ordering::Relaxed);
        *self.current_symbol.write().unwrap() = String::new();
        *self.results.write().unwrap() = Vec::new();
        *self.error_message.write().unwrap() = None;
        *self.started_at.write().unwrap() = Some(Utc::now().to_rfc3339());
        self.cancelled.store(false, Ordering::Relaxed);
    }

    pub fn progress_pct(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.status.read().unwrap(),
            ScanStatus::Fetching | ScanStatus::Analyzing
        )
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn set_error(&self, message: String) {
        *self.error_message.write().unwrap() = Some(message);
        *self.status.write().unwrap() = ScanStatus::Error;
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            status: *self.status.read().unwrap(),
            scan_id: *self.scan_id.read().unwrap(),
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            progress_pct: self.progress_pct(),
            current_symbol: self.current_symbol.read().unwrap().clone(),
            error: self.error_message.read().unwrap().clone(),
            started_at: self.started_at.read().unwrap().clone(),
            results: self.results.read().unwrap().clone(),
        }
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Scan
// ============================================================================

/// Collaborators shared by manual and scheduled scans
pub struct ScanDeps {
    pub market: Arc<dyn CandleSource>,
    pub analyzer: SetupAnalyzer,
    pub telegram: TelegramNotifier,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan_id: i64,
    pub scanned: usize,
    pub saved: usize,
    pub high_confidence: usize,
    pub setups: Vec<TradeSetup>,
}

/// Row written for a scored setup
pub fn new_setup(setup: &TradeSetup, scan_id: Option<i64>) -> NewSetup {
    let levels = &setup.levels;
    NewSetup {
        setup_hash: setup.setup_hash.clone(),
        scan_id,
        symbol: setup.symbol.clone(),
        asset_class: setup.asset_class.to_string(),
        timeframe: setup.timeframe.to_string(),
        direction: setup.direction.to_string(),
        score: setup.score,
        confidence: setup.confidence,
        entry_price: levels.entry,
        stop_loss: levels.stop_loss,
        target_1: levels.target_1,
        target_2: levels.target_2,
        risk_reward_t1: levels.risk_reward_t1,
        current_price: setup.current_price,
        confluences: setup.confluences.clone(),
        warnings: setup.warnings.clone(),
        ai_provider: setup.ai_provider.map(|p| p.to_string()),
        ai_validation_score: setup.ai_insights.as_ref().and_then(|ai| ai.validation_score),
        recommendation: Some(setup.recommendation.clone()),
    }
}

/// Run one scan end to end. The scan row is marked `error` on failure.
/// Fails without touching `progress` when another scan holds it.
pub async fn run_scan(
    request: ScanRequest,
    deps: &ScanDeps,
    progress: &ScanProgress,
    pool: &SqlitePool,
) -> Result<ScanOutcome> {
    if !progress.try_start() {
        return Err(anyhow!("A scan is already running"));
    }
    run_claimed_scan(request, deps, progress, pool).await
}

/// Run a scan on progress already claimed with [`ScanProgress::try_start`]
pub async fn run_claimed_scan(
    request: ScanRequest,
    deps: &ScanDeps,
    progress: &ScanProgress,
    pool: &SqlitePool,
) -> Result<ScanOutcome> {

    let timeframes = vec![request.timeframe.to_string()];
    let ai_provider = deps.analyzer.ai_provider().map(|p| p.to_string());
    let scan_id = match ScanRepository::new(pool)
        .create(&NewScan {
            scan_type: &request.scan_type,
            preset: Some(request.label()),
            timeframes: &timeframes,
            ai_provider: ai_provider.as_deref(),
        })
        .await
    {
        Ok(id) => id,
        Err(e) => {
            progress.set_error(format!("Failed to open scan session: {e}"));
            return Err(e.into());
        }
    };
    *progress.scan_id.write().unwrap() = Some(scan_id);

    match scan_assets(&request, scan_id, deps, progress, pool).await {
        Ok(outcome) => {
            *progress.status.write().unwrap() = ScanStatus::Complete;
            Ok(outcome)
        }
        Err(e) => {
            let message = e.to_string();
            if let Err(db_err) = ScanRepository::new(pool).fail(scan_id, &message).await {
                error!(scan_id, error = %db_err, "Failed to record scan failure");
            }
            if progress.cancelled.load(Ordering::Relaxed) {
                *progress.status.write().unwrap() = ScanStatus::Idle;
            } else {
                progress.set_error(message);
            }
            Err(e)
        }
    }
}

async fn scan_assets(
    request: &ScanRequest,
    scan_id: i64,
    deps: &ScanDeps,
    progress: &ScanProgress,
    pool: &SqlitePool,
) -> Result<ScanOutcome> {
    let assets = request.assets();
    progress.total.store(assets.len() as u32, Ordering::Relaxed);

    info!(
        scan_id,
        preset = request.label(),
        assets = assets.len(),
        timeframe = %request.timeframe,
        min_score = request.min_score,
        "Starting market scan"
    );

    let mut results: Vec<TradeSetup> = Vec::new();

    for (i, asset) in assets.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(ASSET_DELAY).await;
        }
        if progress.cancelled.load(Ordering::Relaxed) {
            info!(scan_id, "Scan cancelled");
            return Err(anyhow!("scan cancelled"));
        }

        *progress.current_symbol.write().unwrap() = asset.symbol.clone();
        *progress.status.write().unwrap() = ScanStatus::Fetching;

        let candles = match deps
            .market
            .candles(
                &asset.symbol,
                asset.asset_class,
                request.timeframe,
                request.candle_limit,
            )
            .await
        {
            Ok(c) if c.len() >= MIN_CANDLES => c,
            Ok(c) => {
                debug!(symbol = %asset.symbol, candles = c.len(), "Not enough candles, skipping");
                progress.completed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => {
                warn!(symbol = %asset.symbol, error = %e, "Failed to fetch candles, skipping");
                progress.completed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        *progress.status.write().unwrap() = ScanStatus::Analyzing;
        if let Some(setup) = deps
            .analyzer
            .analyze(&asset.symbol, asset.asset_class, request.timeframe, &candles)
            .await
        {
            if setup.score >= request.min_score {
                progress.found.fetch_add(1, Ordering::Relaxed);
                results.push(setup);
            }
        }
        progress.completed.fetch_add(1, Ordering::Relaxed);
    }

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(request.max_results);

    let repo = SetupRepository::new(pool);
    let mut saved: Vec<(usize, i64)> = Vec::new();
    for (rank, setup) in results.iter().enumerate() {
        if setup.direction == Direction::Neutral {
            continue;
        }
        if let Some(id) = repo.save(&new_setup(setup, Some(scan_id))).await? {
            saved.push((rank, id));
        }
    }

    if request.notify && deps.telegram.is_enabled() {
        match deps
            .telegram
            .send_scan_complete(&results, request.label(), assets.len())
            .await
        {
            Ok(()) => {
                for (_, id) in saved.iter().filter(|(rank, _)| *rank < 3) {
                    repo.mark_notified(*id).await?;
                }
            }
            Err(e) => warn!(scan_id, error = %e, "Telegram scan summary failed"),
        }
    }

    let high_confidence = results
        .iter()
        .filter(|s| s.confidence >= HIGH_CONFIDENCE)
        .count();
    ScanRepository::new(pool)
        .complete(scan_id, results.len() as i64, high_confidence as i64)
        .await?;

    info!(
        scan_id,
        found = results.len(),
        saved = saved.len(),
        high_confidence,
        "Market scan complete"
    );

    *progress.results.write().unwrap() = results.clone();

    Ok(ScanOutcome {
        scan_id,
        scanned: assets.len(),
        saved: saved.len(),
        high_confidence,
        setups: results,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::tests::bounce_candles;
    use crate::indicators::tests::make_candles;
    use crate::market_data::{MarketDataError, MarketDataResult};
    use crate::types::{AssetClass, Candle};
    use async_trait::async_trait;
    use persistence::Database;
    use std::sync::Mutex;

    /// Canned candles per symbol; unknown symbols error
    pub(crate) struct FakeMarket {
        pub prices: Mutex<Vec<(String, f64)>>,
    }

    impl FakeMarket {
        pub(crate) fn new() -> Self {
            Self {
                prices: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn set_price(&self, symbol: &str, price: f64) {
            let mut prices = self.prices.lock().unwrap();
            prices.retain(|(s, _)| s != symbol);
            prices.push((symbol.to_string(), price));
        }
    }

    #[async_trait]
    impl CandleSource for FakeMarket {
        async fn candles(
            &self,
            symbol: &str,
            _class: AssetClass,
            _timeframe: Timeframe,
            _limit: usize,
        ) -> MarketDataResult<Vec<Candle>> {
            match symbol {
                "ETH/USDT" | "SOL/USDT" => Ok(bounce_candles()),
                "THIN" => Ok(make_candles(&[100.0; 20])),
                _ => Err(MarketDataError::NoData(symbol.to_string())),
            }
        }

        async fn price(&self, symbol: &str, _class: AssetClass) -> MarketDataResult<f64> {
            self.prices
                .lock()
                .unwrap()
                .iter()
                .find(|(s, _)| s == symbol)
                .map(|(_, p)| *p)
                .ok_or_else(|| MarketDataError::NoData(symbol.to_string()))
        }
    }

    fn deps() -> ScanDeps {
        ScanDeps {
            market: Arc::new(FakeMarket::new()),
            analyzer: SetupAnalyzer::default(),
            telegram: TelegramNotifier::disabled(),
        }
    }

    fn request() -> ScanRequest {
        ScanRequest {
            symbols: vec![
                Asset::new("ETH/USDT", AssetClass::Crypto),
                Asset::new("THIN", AssetClass::Stock),
                Asset::new("BAD", AssetClass::Stock),
            ],
            timeframe: Timeframe::H4,
            min_score: 50.0,
            ..ScanRequest::default()
        }
    }

    #[test]
    fn test_request_defaults_and_assets() {
        let req: ScanRequest = serde_json::from_str(r#"{"preset": "forex"}"#).unwrap();
        assert_eq!(req.timeframe, Timeframe::H1);
        assert_eq!(req.min_score, 60.0);
        assert_eq!(req.max_results, 20);
        assert_eq!(req.label(), "forex");
        assert!(req
            .assets()
            .iter()
            .all(|a| a.asset_class == AssetClass::Forex));

        assert_eq!(request().label(), "custom");
        assert_eq!(ScanRequest::default().label(), "quick");
    }

    #[tokio::test]
    async fn test_run_scan_persists_setups() {
        let db = Database::in_memory().await.unwrap();
        let progress = ScanProgress::new();

        let outcome = run_scan(request(), &deps(), &progress, db.pool())
            .await
            .unwrap();

        assert_eq!(outcome.scanned, 3);
        assert_eq!(outcome.setups.len(), 1);
        assert_eq!(outcome.saved, 1);
        assert_eq!(outcome.setups[0].direction, Direction::Long);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.status, ScanStatus::Complete);
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.progress_pct, 100.0);

        let scan = ScanRepository::new(db.pool())
            .get(outcome.scan_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scan.status, "completed");
        assert_eq!(scan.setups_found, 1);
        assert_eq!(scan.preset.as_deref(), Some("custom"));

        let setups = SetupRepository::new(db.pool())
            .by_scan(outcome.scan_id)
            .await
            .unwrap();
        assert_eq!(setups.len(), 1);
        assert_eq!(setups[0].status, "open");
        assert_eq!(setups[0].timeframe, "4h");
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let db = Database::in_memory().await.unwrap();
        let progress = ScanProgress::new();

        assert!(progress.try_start());
        assert!(!progress.try_start());
        assert!(progress.is_running());

        let err = run_scan(request(), &deps(), &progress, db.pool())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already running"));
        assert_eq!(*progress.status.read().unwrap(), ScanStatus::Fetching);
        let stats = SetupRepository::new(db.pool()).stats().await.unwrap();
        assert_eq!(stats.total_scans, 0);

        run_claimed_scan(request(), &deps(), &progress, db.pool())
            .await
            .unwrap();
        assert_eq!(*progress.status.read().unwrap(), ScanStatus::Complete);
        assert!(progress.try_start());
    }

    #[tokio::test]
    async fn test_rescan_does_not_duplicate_setups() {
        let db = Database::in_memory().await.unwrap();
        let progress = ScanProgress::new();
        let deps = deps();

        run_scan(request(), &deps, &progress, db.pool()).await.unwrap();
        let second = run_scan(request(), &deps, &progress, db.pool()).await.unwrap();

        assert_eq!(second.setups.len(), 1);
        assert_eq!(second.saved, 0);
        let stats = SetupRepository::new(db.pool()).stats().await.unwrap();
        assert_eq!(stats.total_setups, 1);
        assert_eq!(stats.total_scans, 2);
    }

    #[tokio::test]
    async fn test_cancelled_scan_marks_session_failed() {
        let db = Database::in_memory().await.unwrap();
        let progress = Arc::new(ScanProgress::new());
        let deps = deps();

        let req = ScanRequest {
            symbols: vec![
                Asset::new("ETH/USDT", AssetClass::Crypto),
                Asset::new("SOL/USDT", AssetClass::Crypto),
            ],
            ..ScanRequest::default()
        };

        let canceller = {
            let progress = progress.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                progress.cancel();
            })
        };
        let result = run_scan(req, &deps, &progress, db.pool()).await;
        canceller.await.unwrap();

        assert!(result.is_err());
        assert_eq!(*progress.status.read().unwrap(), ScanStatus::Idle);

        let scans = ScanRepository::new(db.pool()).recent(1).await.unwrap();
        assert_eq!(scans[0].status, "error");
        assert_eq!(scans[0].error_message.as_deref(), Some("scan cancelled"));
    }
}
