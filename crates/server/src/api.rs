//! HTTP API handlers, mounted under `/api`

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use engine::market_data::CandleSource;
use engine::scanner::run_claimed_scan;
use engine::universe::all_presets;
use engine::{
    AssetClass, MarketDataService, ScanDeps, ScanProgress, ScanRequest, SystemSwitch,
    TelegramNotifier, Timeframe, TrackerProgress,
};
use persistence::repository::{ScanRepository, SetupRepository};
use persistence::Database;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub market: Arc<MarketDataService>,
    pub scan_deps: Arc<ScanDeps>,
    pub scan_progress: Arc<ScanProgress>,
    pub tracker_progress: Arc<TrackerProgress>,
    pub switch: Arc<SystemSwitch>,
    pub telegram: TelegramNotifier,
    pub scheduler_enabled: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/analyze/:symbol", get(api_analyze))
        .route("/ai/analyze/:symbol", get(api_ai_analyze))
        .route("/scan", post(api_start_scan))
        .route("/scan/status", get(api_scan_status))
        .route("/scan/cancel", post(api_cancel_scan))
        .route("/scans", get(api_scans))
        .route("/scans/:id/setups", get(api_scan_setups))
        .route("/trades", get(api_trades))
        .route("/trades/stats", get(api_trade_stats))
        .route("/market/candles", get(api_market_candles))
        .route("/market/top-pairs", get(api_top_pairs))
        .route("/market/rate-limits", get(api_rate_limits))
        .route("/universe", get(api_universe))
        .route("/system/status", get(api_system_status))
        .route("/system/enable", post(api_system_enable))
        .route("/system/disable", post(api_system_disable))
        .route("/system/toggle", post(api_system_toggle))
        .route("/telegram/test", get(api_telegram_test))
        .route("/telegram/send", post(api_telegram_send))
        .with_state(state)
}

/// Best guess when the caller does not name an asset class
pub fn guess_asset_class(symbol: &str) -> AssetClass {
    let upper = symbol.to_ascii_uppercase();
    match upper.split_once('/') {
        Some((_, "USDT" | "USDC" | "BTC" | "ETH")) => AssetClass::Crypto,
        Some(_) => AssetClass::Forex,
        None if upper.ends_with("USDT") => AssetClass::Crypto,
        None => AssetClass::Stock,
    }
}

/// Paths cannot carry '/', so pairs arrive as `BTC-USDT` or `EUR-USD`.
/// Any other dash belongs to the ticker (`BRK-B`).
pub fn path_symbol(raw: &str) -> String {
    let upper = raw.to_ascii_uppercase();
    let currency = |s: &str| s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic());
    match upper.split_once('-') {
        Some((base, quote))
            if !base.is_empty()
                && (matches!(quote, "USDT" | "USDC" | "BTC" | "ETH")
                    || (currency(base) && currency(quote))) =>
        {
            format!("{base}/{quote}")
        }
        _ => upper,
    }
}

fn resolve_asset(symbol: &str, asset: Option<&str>) -> Result<AssetClass, String> {
    match asset {
        Some(raw) => raw.parse(),
        None => Ok(guess_asset_class(symbol)),
    }
}

fn failure(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "success": false, "error": message.into() }))
}

// ============================================================================
// Health / analysis
// ============================================================================

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> Json<Value> {
    let tracker = &state.tracker_progress;
    Json(json!({
        "status": "ok",
        "service": "trade-scout",
        "version": env!("CARGO_PKG_VERSION"),
        "system": state.switch.status(),
        "scheduler_enabled": state.scheduler_enabled,
        "telegram_enabled": state.telegram.is_enabled(),
        "ai_provider": state.scan_deps.analyzer.ai_provider(),
        "tracker": {
            "status": *tracker.status.read().unwrap(),
            "cycles": tracker.cycles.load(Ordering::Relaxed),
            "open_setups": tracker.open_count.load(Ordering::Relaxed),
            "last_cycle_at": tracker.last_cycle_at.read().unwrap().clone(),
            "error": tracker.error_message.read().unwrap().clone(),
            "recent_closed": tracker.recent.read().unwrap().clone(),
        },
    }))
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    asset: Option<String>,
    timeframe: Option<String>,
    limit: Option<usize>,
}

/// GET /api/analyze/:symbol: score one symbol without saving it
async fn api_analyze(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<AnalyzeParams>,
) -> Json<Value> {
    let symbol = path_symbol(&symbol);
    let class = match resolve_asset(&symbol, params.asset.as_deref()) {
        Ok(c) => c,
        Err(e) => return failure(e),
    };
    let timeframe = match params.timeframe.as_deref().unwrap_or("4h").parse::<Timeframe>() {
        Ok(tf) => tf,
        Err(e) => return failure(e),
    };

    let candles = match state
        .market
        .candles(&symbol, class, timeframe, params.limit.unwrap_or(200))
        .await
    {
        Ok(c) => c,
        Err(e) => return failure(format!("Failed to fetch market data: {e}")),
    };

    match state
        .scan_deps
        .analyzer
        .analyze(&symbol, class, timeframe, &candles)
        .await
    {
        Some(setup) => Json(json!({ "success": true, "setup": setup })),
        None => failure(format!(
            "Not enough data for {symbol} ({} candles)",
            candles.len()
        )),
    }
}

/// GET /api/ai/analyze/:symbol: the LLM's own trade plan from raw candles
async fn api_ai_analyze(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<AnalyzeParams>,
) -> Json<Value> {
    let Some(ai) = state.scan_deps.analyzer.ai() else {
        return failure("AI analysis is not configured (set AI_PROVIDER and its API key)");
    };
    let symbol = path_symbol(&symbol);
    let class = match resolve_asset(&symbol, params.asset.as_deref()) {
        Ok(c) => c,
        Err(e) => return failure(e),
    };
    let timeframe = match params.timeframe.as_deref().unwrap_or("4h").parse::<Timeframe>() {
        Ok(tf) => tf,
        Err(e) => return failure(e),
    };

    let candles = match state
        .market
        .candles(&symbol, class, timeframe, params.limit.unwrap_or(200))
        .await
    {
        Ok(c) => c,
        Err(e) => return failure(format!("Failed to fetch market data: {e}")),
    };

    match ai.analyze_setup(&symbol, timeframe.as_str(), &candles).await {
        Ok(analysis) => Json(json!({
            "success": true,
            "symbol": symbol,
            "timeframe": timeframe,
            "provider": ai.provider(),
            "analysis": analysis,
        })),
        Err(e) => failure(format!("AI analysis failed: {e}")),
    }
}

// ============================================================================
// Scans
// ============================================================================

/// POST /api/scan: start a scan in the background
async fn api_start_scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Json<Value> {
    if !state.scan_progress.try_start() {
        let pct = state.scan_progress.progress_pct();
        return Json(json!({
            "success": false,
            "message": format!("Scan already running ({pct:.0}% complete)"),
        }));
    }

    let assets = request.assets().len();
    info!(preset = ?request.preset, assets, timeframe = %request.timeframe, "Starting scan via API");

    let deps = state.scan_deps.clone();
    let progress = state.scan_progress.clone();
    let pool = state.db.pool_clone();
    tokio::spawn(async move {
        if let Err(e) = run_claimed_scan(request, &deps, &progress, &pool).await {
            error!(error = %e, "Scan failed");
        }
    });

    Json(json!({
        "success": true,
        "message": "Scan started",
        "assets": assets,
    }))
}

/// GET /api/scan/status
async fn api_scan_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.scan_progress.snapshot()))
}

/// POST /api/scan/cancel
async fn api_cancel_scan(State(state): State<AppState>) -> Json<Value> {
    state.scan_progress.cancel();
    info!("Scan cancel requested via API");
    Json(json!({ "success": true, "message": "Cancel requested" }))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
    status: Option<String>,
}

/// GET /api/scans: recent scan sessions
async fn api_scans(State(state): State<AppState>, Query(params): Query<ListParams>) -> Json<Value> {
    let repo = ScanRepository::new(state.db.pool());
    match repo.recent(params.limit.unwrap_or(20)).await {
        Ok(scans) => Json(json!({ "success": true, "data": scans, "total": scans.len() })),
        Err(e) => failure(format!("Failed to query scans: {e}")),
    }
}

/// GET /api/scans/:id/setups
async fn api_scan_setups(State(state): State<AppState>, Path(id): Path<i64>) -> Json<Value> {
    let scan = match ScanRepository::new(state.db.pool()).get(id).await {
        Ok(Some(scan)) => scan,
        Ok(None) => return failure(format!("Scan {id} not found")),
        Err(e) => return failure(format!("Failed to query scan: {e}")),
    };
    match SetupRepository::new(state.db.pool()).by_scan(id).await {
        Ok(setups) => Json(json!({ "success": true, "scan": scan, "data": setups })),
        Err(e) => failure(format!("Failed to query setups: {e}")),
    }
}

// ============================================================================
// Trades
// ============================================================================

/// GET /api/trades: tracked setups, optionally by status
async fn api_trades(State(state): State<AppState>, Query(params): Query<ListParams>) -> Json<Value> {
    let repo = SetupRepository::new(state.db.pool());
    match repo
        .recent(params.status.as_deref(), params.limit.unwrap_or(50))
        .await
    {
        Ok(setups) => Json(json!({ "success": true, "data": setups, "total": setups.len() })),
        Err(e) => failure(format!("Failed to query trades: {e}")),
    }
}

/// GET /api/trades/stats
async fn api_trade_stats(State(state): State<AppState>) -> Json<Value> {
    match SetupRepository::new(state.db.pool()).stats().await {
        Ok(stats) => Json(json!({ "success": true, "stats": stats })),
        Err(e) => failure(format!("Failed to compute stats: {e}")),
    }
}

// ============================================================================
// Market data
// ============================================================================

#[derive(Debug, Deserialize)]
struct CandleParams {
    symbol: String,
    asset: Option<String>,
    timeframe: Option<String>,
    limit: Option<usize>,
}

/// GET /api/market/candles: proxy through the provider router
async fn api_market_candles(
    State(state): State<AppState>,
    Query(params): Query<CandleParams>,
) -> Json<Value> {
    let class = match resolve_asset(&params.symbol, params.asset.as_deref()) {
        Ok(c) => c,
        Err(e) => return failure(e),
    };
    let timeframe = match params.timeframe.as_deref().unwrap_or("1h").parse::<Timeframe>() {
        Ok(tf) => tf,
        Err(e) => return failure(e),
    };
    let limit = params.limit.unwrap_or(100).min(1000);

    match state
        .market
        .candles(&params.symbol, class, timeframe, limit)
        .await
    {
        Ok(candles) => Json(json!({
            "success": true,
            "symbol": params.symbol,
            "asset_class": class,
            "timeframe": timeframe,
            "providers": state.market.provider_names(class),
            "data": candles,
        })),
        Err(e) => failure(format!("Failed to fetch candles: {e}")),
    }
}

#[derive(Debug, Deserialize)]
struct TopPairsParams {
    limit: Option<usize>,
}

/// GET /api/market/top-pairs: most traded USDT pairs
async fn api_top_pairs(
    State(state): State<AppState>,
    Query(params): Query<TopPairsParams>,
) -> Json<Value> {
    let pairs = state
        .market
        .top_crypto_pairs(params.limit.unwrap_or(30))
        .await;
    Json(json!({ "success": true, "data": pairs }))
}

/// GET /api/market/rate-limits
async fn api_rate_limits(State(state): State<AppState>) -> Json<Value> {
    let limits = state.market.rate_limit_status().await;
    Json(json!({ "success": true, "data": limits }))
}

/// GET /api/universe: presets and their sizes
async fn api_universe() -> Json<Value> {
    Json(json!({ "success": true, "presets": all_presets() }))
}

// ============================================================================
// System switch / Telegram
// ============================================================================

async fn api_system_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.switch.status()))
}

async fn api_system_enable(State(state): State<AppState>) -> Json<Value> {
    state.switch.enable();
    Json(json!(state.switch.status()))
}

async fn api_system_disable(State(state): State<AppState>) -> Json<Value> {
    state.switch.disable();
    Json(json!(state.switch.status()))
}

async fn api_system_toggle(State(state): State<AppState>) -> Json<Value> {
    state.switch.toggle();
    Json(json!(state.switch.status()))
}

/// GET /api/telegram/test: getMe round trip
async fn api_telegram_test(State(state): State<AppState>) -> Json<Value> {
    match state.telegram.test_connection().await {
        Ok(bot) => Json(json!({ "success": true, "bot": bot })),
        Err(e) => failure(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct SendBody {
    title: Option<String>,
    message: String,
}

/// POST /api/telegram/send: free-form alert
async fn api_telegram_send(
    State(state): State<AppState>,
    Json(body): Json<SendBody>,
) -> Json<Value> {
    let result = match &body.title {
        Some(title) => state.telegram.send_alert(title, &body.message).await,
        None => state.telegram.send_text(&body.message).await,
    };
    match result {
        Ok(()) => Json(json!({ "success": true })),
        Err(e) => failure(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{MarketDataConfig, SetupAnalyzer};

    #[test]
    fn test_guess_asset_class() {
        assert_eq!(guess_asset_class("BTC/USDT"), AssetClass::Crypto);
        assert_eq!(guess_asset_class("ethusdt"), AssetClass::Crypto);
        assert_eq!(guess_asset_class("EUR/USD"), AssetClass::Forex);
        assert_eq!(guess_asset_class("AAPL"), AssetClass::Stock);
    }

    #[test]
    fn test_path_symbol_keeps_share_classes() {
        assert_eq!(path_symbol("btc-usdt"), "BTC/USDT");
        assert_eq!(path_symbol("EUR-USD"), "EUR/USD");
        assert_eq!(path_symbol("SOL-ETH"), "SOL/ETH");
        assert_eq!(path_symbol("BRK-B"), "BRK-B");
        assert_eq!(path_symbol("brk-a"), "BRK-A");
        assert_eq!(path_symbol("AAPL"), "AAPL");
        assert_eq!(guess_asset_class(&path_symbol("BRK-B")), AssetClass::Stock);
        assert_eq!(guess_asset_class(&path_symbol("GBP-JPY")), AssetClass::Forex);
    }

    async fn state() -> AppState {
        let market = Arc::new(MarketDataService::new(MarketDataConfig::default()));
        let state_file = std::env::temp_dir().join(format!(
            "trade_scout_api_{}_{:?}.txt",
            std::process::id(),
            std::thread::current().id()
        ));
        AppState {
            db: Arc::new(Database::in_memory().await.unwrap()),
            market: market.clone(),
            scan_deps: Arc::new(ScanDeps {
                market,
                analyzer: SetupAnalyzer::default(),
                telegram: TelegramNotifier::disabled(),
            }),
            scan_progress: Arc::new(ScanProgress::new()),
            tracker_progress: Arc::new(TrackerProgress::new()),
            switch: Arc::new(SystemSwitch::load(state_file)),
            telegram: TelegramNotifier::disabled(),
            scheduler_enabled: false,
        }
    }

    #[tokio::test]
    async fn test_start_scan_rejected_while_claimed() {
        let state = state().await;
        assert!(state.scan_progress.try_start());
        state.scan_progress.total.store(10, Ordering::Relaxed);
        state.scan_progress.completed.store(4, Ordering::Relaxed);

        let Json(body) = api_start_scan(State(state.clone()), Json(ScanRequest::default())).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Scan already running (40% complete)");
        assert_eq!(state.scan_progress.completed.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_ai_analyze_requires_provider() {
        let Json(body) = api_ai_analyze(
            State(state().await),
            Path("BTC-USDT".to_string()),
            Query(AnalyzeParams {
                asset: None,
                timeframe: None,
                limit: None,
            }),
        )
        .await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("not configured"));
    }

    #[test]
    fn test_explicit_asset_wins() {
        assert_eq!(resolve_asset("GLD", Some("commodity")), Ok(AssetClass::Commodity));
        assert!(resolve_asset("GLD", Some("bonds")).is_err());
    }
}
