//! Configuration sections

use chrono::Duration;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Seconds between feed snapshots
    pub interval_secs: u64,
    /// Rows per multi-row insert statement
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between rollup + retention cycles
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    /// How far back the raw→hourly pass scans
    pub hourly_lookback_days: i64,
    /// How far back the hourly→daily pass scans
    pub daily_lookback_days: i64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            hourly_lookback_days: 90,
            daily_lookback_days: 5 * 365,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    pub raw_days: i64,
    pub hourly_days: i64,
}

impl RetentionConfig {
    pub fn raw_horizon(&self) -> Duration {
        Duration::days(self.raw_days)
    }

    pub fn hourly_horizon(&self) -> Duration {
        Duration::days(self.hourly_days)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_days: 8,
            hourly_days: 90,
        }
    }
}

/// Tier boundaries for range queries (inclusive upper ages)
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub raw_max_age_days: i64,
    pub hourly_max_age_days: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            raw_max_age_days: 7,
            hourly_max_age_days: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Bulk latest-prices endpoint
    pub url: String,
    /// Sent on every request; the upstream rejects anonymous clients
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}
