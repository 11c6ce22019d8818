//! SQLite schema for the three price tiers

/// Applied on every open; all statements are idempotent.
///
/// `AUTOINCREMENT` keeps row ids strictly increasing even after retention
/// deletes, so `id` doubles as the insertion sequence used to break ties
/// between samples that share a timestamp.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS raw_prices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    high INTEGER NOT NULL,
    high_time INTEGER NOT NULL,
    low INTEGER NOT NULL,
    low_time INTEGER NOT NULL,
    high_volume INTEGER NOT NULL,
    low_volume INTEGER NOT NULL,
    ingested_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_item_time
    ON raw_prices(item_id, ingested_at);

CREATE INDEX IF NOT EXISTS idx_raw_time
    ON raw_prices(ingested_at);

CREATE TABLE IF NOT EXISTS hourly_prices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    avg_high REAL NOT NULL,
    max_high INTEGER NOT NULL,
    min_high INTEGER NOT NULL,
    avg_low REAL NOT NULL,
    min_low INTEGER NOT NULL,
    open_high INTEGER NOT NULL,
    open_low INTEGER NOT NULL,
    close_high INTEGER NOT NULL,
    close_low INTEGER NOT NULL,
    total_high_volume INTEGER NOT NULL,
    total_low_volume INTEGER NOT NULL,
    sample_count INTEGER NOT NULL,
    hour_start INTEGER NOT NULL,
    UNIQUE (item_id, hour_start)
);

CREATE INDEX IF NOT EXISTS idx_hourly_time
    ON hourly_prices(hour_start);

CREATE TABLE IF NOT EXISTS daily_prices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    avg_high REAL NOT NULL,
    max_high INTEGER NOT NULL,
    min_high INTEGER NOT NULL,
    avg_low REAL NOT NULL,
    min_low INTEGER NOT NULL,
    open_high INTEGER NOT NULL,
    open_low INTEGER NOT NULL,
    close_high INTEGER NOT NULL,
    close_low INTEGER NOT NULL,
    total_high_volume INTEGER NOT NULL,
    total_low_volume INTEGER NOT NULL,
    volatility REAL NOT NULL,
    sample_count INTEGER NOT NULL,
    day TEXT NOT NULL,
    UNIQUE (item_id, day)
);

CREATE TABLE IF NOT EXISTS rollup_watermarks (
    pass TEXT PRIMARY KEY,
    watermark_ms INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;
"#;
