//! Trade Scout: multi-asset setup scanner with outcome tracking
//!
//! Usage:
//!   trade-scout serve --port 3001           - API server + scheduler + tracker
//!   trade-scout scan --preset crypto        - One scan from the CLI
//!   trade-scout analyze BTC/USDT --ai       - Score a single symbol (plus LLM plan)
//!   trade-scout track --once                - One tracker pass
//!   trade-scout stats                       - Win/loss record

mod api;
mod config;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use config::Settings;
use engine::market_data::CandleSource;
use engine::universe::Asset;
use engine::{
    build_client, check_open_setups, default_jobs, run_scan, run_scheduler, run_trade_tracker,
    AiAnalyzer, MarketDataService, ScanDeps, ScanProgress, ScanRequest, SetupAnalyzer,
    SystemSwitch, TelegramNotifier, Timeframe, TrackerDeps, TrackerProgress, TradeSetup,
};
use persistence::repository::SetupRepository;
use persistence::Database;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "trade-scout")]
#[command(about = "Scan markets for scored trade setups and track their outcomes", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the API server with the scheduler and trade tracker
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Run one scan and print the best setups
    Scan {
        /// Universe preset: quick, balanced, full, crypto, stocks, indices, commodities, forex
        #[arg(long, default_value = "quick")]
        preset: String,
        /// Explicit symbols (comma-separated), overrides the preset
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        /// Defaults to MIN_SCORE
        #[arg(long)]
        min_score: Option<f64>,
        #[arg(long, default_value_t = 20)]
        max_results: usize,
        /// Send the summary to Telegram
        #[arg(long)]
        notify: bool,
    },
    /// Analyze a single symbol without saving it
    Analyze {
        symbol: String,
        /// Asset class; guessed from the symbol when omitted
        #[arg(long)]
        asset: Option<String>,
        #[arg(long, default_value = "4h")]
        timeframe: String,
        /// Also ask the configured LLM for its own trade plan
        #[arg(long)]
        ai: bool,
    },
    /// Check open setups against current prices
    Track {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Print the tracked win/loss record
    Stats,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,trade_scout=debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,engine=info,trade_scout=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();
    let settings = Settings::from_env();

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(settings, &host, port).await?,
        Commands::Scan {
            preset,
            symbols,
            timeframe,
            min_score,
            max_results,
            notify,
        } => {
            let request = ScanRequest {
                preset: Some(preset),
                symbols: symbols
                    .iter()
                    .map(|s| Asset::new(s.to_ascii_uppercase(), api::guess_asset_class(s)))
                    .collect(),
                timeframe: parse_timeframe(&timeframe)?,
                min_score: min_score.unwrap_or(settings.min_score),
                max_results,
                notify,
                ..ScanRequest::default()
            };
            cmd_scan(settings, request).await?;
        }
        Commands::Analyze {
            symbol,
            asset,
            timeframe,
            ai,
        } => cmd_analyze(settings, &symbol, asset.as_deref(), &timeframe, ai).await?,
        Commands::Track { once } => cmd_track(settings, once).await?,
        Commands::Stats => cmd_stats(settings).await?,
    }

    Ok(())
}

// ============================================================================
// Wiring
// ============================================================================

fn parse_timeframe(raw: &str) -> anyhow::Result<Timeframe> {
    raw.parse::<Timeframe>().map_err(|e| anyhow!(e))
}

async fn open_db(settings: &Settings) -> anyhow::Result<Database> {
    let db = Database::new(&settings.db_path)
        .await
        .map_err(|e| anyhow!("Database initialization failed: {e}"))?;
    info!(path = %settings.db_path, "Database initialized");
    Ok(db)
}

fn build_analyzer(settings: &Settings) -> SetupAnalyzer {
    let ai = match (settings.ai_provider, &settings.ai_api_key) {
        (Some(provider), Some(key)) => {
            info!(provider = %provider, min_score = settings.ai_min_score, "AI validation enabled");
            Some(AiAnalyzer::new(build_client(provider, key.clone())))
        }
        (Some(provider), None) => {
            warn!(
                provider = %provider,
                key = config::api_key_var(provider),
                "AI provider set without an API key, validation disabled"
            );
            None
        }
        _ => None,
    };
    SetupAnalyzer::new(ai).with_ai_min_score(settings.ai_min_score)
}

fn build_telegram(settings: &Settings) -> TelegramNotifier {
    TelegramNotifier::new(
        settings.telegram_bot_token.clone(),
        settings.telegram_chat_id.clone(),
    )
}

fn build_scan_deps(settings: &Settings, market: Arc<MarketDataService>) -> ScanDeps {
    ScanDeps {
        market,
        analyzer: build_analyzer(settings),
        telegram: build_telegram(settings),
    }
}

// ============================================================================
// Serve command: axum web server
// ============================================================================

async fn cmd_serve(settings: Settings, host: &str, port: u16) -> anyhow::Result<()> {
    info!("Trade Scout v{} starting...", env!("CARGO_PKG_VERSION"));

    let db = Arc::new(open_db(&settings).await?);
    let market = Arc::new(MarketDataService::new(settings.market_data()));
    let telegram = build_telegram(&settings);
    let switch = Arc::new(SystemSwitch::load(&settings.system_state_file));
    let scan_deps = Arc::new(build_scan_deps(&settings, market.clone()));
    let scan_progress = Arc::new(ScanProgress::new());
    let tracker_progress = Arc::new(TrackerProgress::new());
    let stop = Arc::new(AtomicBool::new(false));

    // Trade tracker
    {
        let deps = TrackerDeps {
            market: market.clone(),
            telegram: telegram.clone(),
            switch: switch.clone(),
        };
        let progress = tracker_progress.clone();
        let pool = db.pool_clone();
        let interval = settings.tracker_interval;
        tokio::spawn(async move {
            run_trade_tracker(&deps, &progress, pool, interval).await;
        });
    }

    // Scheduled scans
    if settings.scheduler_enabled {
        let jobs = default_jobs(settings.min_score);
        let deps = scan_deps.clone();
        let pool = db.pool_clone();
        let switch = switch.clone();
        let progress = scan_progress.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            run_scheduler(jobs, &deps, pool, &switch, &progress, &stop).await;
        });
    } else {
        info!("Scheduler disabled (SCHEDULER_ENABLED=false)");
    }

    let state = api::AppState {
        db: db.clone(),
        market,
        scan_deps,
        scan_progress,
        tracker_progress: tracker_progress.clone(),
        switch,
        telegram,
        scheduler_enabled: settings.scheduler_enabled,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = axum::Router::new()
        .nest("/api", api::router(state))
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{host}:{port}").parse()?;
    println!("\n=== Trade Scout v{} ===", env!("CARGO_PKG_VERSION"));
    println!("Listening on http://{addr}");
    println!("  Database:  {}", settings.db_path);
    println!(
        "  Scheduler: {}",
        if settings.scheduler_enabled { "on" } else { "off" }
    );
    println!("  Tracker:   every {}s", settings.tracker_interval.as_secs());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown requested");
            stop.store(true, Ordering::Relaxed);
            tracker_progress.cancelled.store(true, Ordering::Relaxed);
        })
        .await?;

    Ok(())
}

// ============================================================================
// CLI commands
// ============================================================================

async fn cmd_scan(settings: Settings, request: ScanRequest) -> anyhow::Result<()> {
    let db = open_db(&settings).await?;
    let market = Arc::new(MarketDataService::new(settings.market_data()));
    let deps = build_scan_deps(&settings, market);
    let progress = Arc::new(ScanProgress::new());

    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress_for_ctrlc.cancel();
    });

    let outcome = run_scan(request, &deps, &progress, db.pool()).await?;
    println!(
        "\nScan #{}: {} assets, {} setups ({} new, {} high confidence)",
        outcome.scan_id,
        outcome.scanned,
        outcome.setups.len(),
        outcome.saved,
        outcome.high_confidence
    );
    print_setups(&outcome.setups);
    Ok(())
}

fn print_setups(setups: &[TradeSetup]) {
    if setups.is_empty() {
        println!("No setups above the minimum score.");
        return;
    }
    println!(
        "  {:>3}  {:<12} {:<9} {:<7} {:>6} {:>6} {:>12} {:>12} {:>12}",
        "#", "Symbol", "Class", "Dir", "Score", "Conf", "Entry", "Stop", "Target 1"
    );
    println!("  {}", "-".repeat(90));
    let level = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
    for (i, s) in setups.iter().enumerate() {
        println!(
            "  {:>3}  {:<12} {:<9} {:<7} {:>6.1} {:>5.0}% {:>12} {:>12} {:>12}",
            i + 1,
            s.symbol,
            s.asset_class.as_str(),
            s.direction.as_str(),
            s.score,
            s.confidence,
            s.levels.entry,
            level(s.levels.stop_loss),
            level(s.levels.target_1),
        );
    }
}

async fn cmd_analyze(
    settings: Settings,
    symbol: &str,
    asset: Option<&str>,
    timeframe: &str,
    with_ai: bool,
) -> anyhow::Result<()> {
    let symbol = symbol.to_ascii_uppercase();
    let class = match asset {
        Some(raw) => raw.parse::<engine::AssetClass>().map_err(|e| anyhow!(e))?,
        None => api::guess_asset_class(&symbol),
    };
    let timeframe = parse_timeframe(timeframe)?;

    let market = MarketDataService::new(settings.market_data());
    let candles = market
        .candles(&symbol, class, timeframe, 200)
        .await
        .with_context(|| format!("fetching candles for {symbol}"))?;
    let analyzer = build_analyzer(&settings);
    let setup = analyzer
        .analyze(&symbol, class, timeframe, &candles)
        .await
        .ok_or_else(|| anyhow!("not enough data for {symbol} ({} candles)", candles.len()))?;

    println!("{}", engine::telegram::format_opportunity(&setup));
    println!("\nIndicators:");
    println!("{}", serde_json::to_string_pretty(&setup.indicators)?);
    println!("\n{}", setup.recommendation);

    if with_ai {
        let ai = analyzer
            .ai()
            .ok_or_else(|| anyhow!("--ai needs AI_PROVIDER and its API key"))?;
        let opinion = ai
            .analyze_setup(&symbol, timeframe.as_str(), &candles)
            .await
            .with_context(|| format!("AI analysis of {symbol}"))?;
        println!("\nAI analysis ({}):", ai.provider());
        println!("{}", serde_json::to_string_pretty(&opinion)?);
    }
    Ok(())
}

async fn cmd_track(settings: Settings, once: bool) -> anyhow::Result<()> {
    let db = open_db(&settings).await?;
    let deps = TrackerDeps {
        market: Arc::new(MarketDataService::new(settings.market_data())),
        telegram: build_telegram(&settings),
        switch: Arc::new(SystemSwitch::load(&settings.system_state_file)),
    };
    let progress = Arc::new(TrackerProgress::new());

    if once {
        let report = check_open_setups(&deps, &progress, db.pool()).await?;
        println!(
            "Checked {} setups: {} closed, {} failed",
            report.checked, report.closed, report.failed
        );
        for closed in progress.recent.read().unwrap().iter() {
            println!(
                "  #{} {} {} → {} ({:+.2}%)",
                closed.setup_id,
                closed.symbol,
                closed.direction,
                closed.outcome.status.as_str(),
                closed.outcome.profit_loss_pct
            );
        }
        return Ok(());
    }

    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, stopping tracker...");
        progress_for_ctrlc.cancelled.store(true, Ordering::Relaxed);
    });
    run_trade_tracker(&deps, &progress, db.pool_clone(), settings.tracker_interval).await;
    Ok(())
}

async fn cmd_stats(settings: Settings) -> anyhow::Result<()> {
    let db = open_db(&settings).await?;
    let stats = SetupRepository::new(db.pool())
        .stats()
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to compute stats");
            anyhow!("stats query failed: {e}")
        })?;

    println!("\nTrack record");
    println!("  Scans:        {}", stats.total_scans);
    println!(
        "  Setups:       {} ({} open, {} closed)",
        stats.total_setups, stats.open_setups, stats.closed_setups
    );
    println!(
        "  Wins/Losses:  {}W / {}L ({} expired)",
        stats.wins, stats.losses, stats.expired
    );
    println!("  Win rate:     {:.1}%", stats.win_rate);
    println!("  Avg profit:   {:+.2}%", stats.avg_profit_pct);
    println!("  Avg loss:     -{:.2}%", stats.avg_loss_pct);
    Ok(())
}
