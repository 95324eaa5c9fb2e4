//! Database schema definitions

/// SQL to create all tables.
/// Timestamps are unix seconds; prices are REAL.
pub const CREATE_TABLES: &str = r#"
-- Scan sessions: one row per manual or scheduled scan
CREATE TABLE IF NOT EXISTS scan_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_type TEXT NOT NULL DEFAULT 'manual',
    preset TEXT,
    timeframes TEXT NOT NULL DEFAULT '[]',
    ai_provider TEXT,
    setups_found INTEGER NOT NULL DEFAULT 0,
    high_confidence_count INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    completed_at INTEGER,
    duration_seconds REAL,
    status TEXT NOT NULL DEFAULT 'running',
    error_message TEXT
);

-- Trade setups produced by scans, tracked until they resolve
CREATE TABLE IF NOT EXISTS trade_setups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    setup_hash TEXT NOT NULL UNIQUE,
    scan_id INTEGER REFERENCES scan_results(id) ON DELETE SET NULL,
    symbol TEXT NOT NULL,
    asset_class TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    direction TEXT NOT NULL,
    score REAL NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0,
    entry_price REAL NOT NULL,
    stop_loss REAL,
    target_1 REAL,
    target_2 REAL,
    risk_reward_t1 REAL,
    current_price REAL NOT NULL,
    confluences_json TEXT NOT NULL DEFAULT '[]',
    warnings_json TEXT NOT NULL DEFAULT '[]',
    ai_provider TEXT,
    ai_validation_score REAL,
    recommendation TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    highest_price REAL,
    lowest_price REAL,
    exit_price REAL,
    profit_loss_pct REAL,
    risk_reward_realized REAL,
    notified INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    closed_at INTEGER,
    last_checked INTEGER
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_setups_status ON trade_setups(status);
CREATE INDEX IF NOT EXISTS idx_setups_symbol ON trade_setups(symbol, timeframe);
CREATE INDEX IF NOT EXISTS idx_setups_scan ON trade_setups(scan_id);
CREATE INDEX IF NOT EXISTS idx_setups_created ON trade_setups(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_scans_started ON scan_results(started_at DESC)
"#;

/// Column additions for databases created by older builds
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE trade_setups ADD COLUMN risk_reward_t1 REAL",
    "ALTER TABLE trade_setups ADD COLUMN notified INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE scan_results ADD COLUMN preset TEXT",
];
