//! Core types used throughout PriceTier
//!
//! Defines the three storage tiers (raw samples, hourly and daily buckets),
//! the normalized record handed to callers, and the analytics results.

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Item identifier. Feeds key items by string-encoded integers; the core only
/// ever sees this parsed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub i64);

impl ItemId {
    /// Parse a feed key. Rejects non-numeric and non-positive identifiers.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().parse::<i64>() {
            Ok(id) if id > 0 => Some(ItemId(id)),
            _ => None,
        }
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One quote as delivered by the upstream feed. Every field may be missing
/// when an item has not traded on that side yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub high: Option<i64>,
    #[serde(default, alias = "highTime")]
    pub high_time: Option<i64>,
    #[serde(default)]
    pub low: Option<i64>,
    #[serde(default, alias = "lowTime")]
    pub low_time: Option<i64>,
    #[serde(default, alias = "highVolume", alias = "highPriceVolume")]
    pub high_volume: Option<i64>,
    #[serde(default, alias = "lowVolume", alias = "lowPriceVolume")]
    pub low_volume: Option<i64>,
}

impl Quote {
    pub fn new(high: i64, low: i64) -> Self {
        Self {
            high: Some(high),
            low: Some(low),
            ..Self::default()
        }
    }

    pub fn with_volumes(mut self, high_volume: i64, low_volume: i64) -> Self {
        self.high_volume = Some(high_volume);
        self.low_volume = Some(low_volume);
        self
    }
}

/// Storage tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Raw,
    Hourly,
    Daily,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Raw => write!(f, "raw"),
            Tier::Hourly => write!(f, "hourly"),
            Tier::Daily => write!(f, "daily"),
        }
    }
}

/// Bucket width for a rollup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    Hour,
    Day,
}

impl Resolution {
    /// Truncate a timestamp to the start of its bucket (UTC)
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Resolution::Hour => truncate_to_hour(ts),
            Resolution::Day => truncate_to_day(ts),
        }
    }

    /// Name of the pass that produces buckets of this width. Used as the
    /// watermark key.
    pub fn pass_name(&self) -> &'static str {
        match self {
            Resolution::Hour => "raw_to_hourly",
            Resolution::Day => "hourly_to_daily",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Hour => write!(f, "1h"),
            Resolution::Day => write!(f, "1d"),
        }
    }
}

pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(ts)
}

pub fn truncate_to_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    day_start(ts.date_naive())
}

/// Midnight UTC of a calendar date
pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN))
}

/// One quote snapshot for one item, as stored in the raw tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub item_id: ItemId,
    pub high: i64,
    pub high_time: i64,
    pub low: i64,
    pub low_time: i64,
    pub high_volume: i64,
    pub low_volume: i64,
    /// Set by the ingest writer, shared by every row of a batch
    pub ingested_at: DateTime<Utc>,
}

impl RawSample {
    pub fn from_quote(item_id: ItemId, quote: &Quote, ingested_at: DateTime<Utc>) -> Self {
        Self {
            item_id,
            high: quote.high.unwrap_or(0),
            high_time: quote.high_time.unwrap_or(0),
            low: quote.low.unwrap_or(0),
            low_time: quote.low_time.unwrap_or(0),
            high_volume: quote.high_volume.unwrap_or(0),
            low_volume: quote.low_volume.unwrap_or(0),
            ingested_at,
        }
    }
}

/// Aggregate of raw samples for one item within one clock-hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyBucket {
    pub item_id: ItemId,
    pub avg_high: f64,
    pub max_high: i64,
    pub min_high: i64,
    pub avg_low: f64,
    pub min_low: i64,
    pub open_high: i64,
    pub open_low: i64,
    pub close_high: i64,
    pub close_low: i64,
    pub total_high_volume: i64,
    pub total_low_volume: i64,
    pub sample_count: i64,
    pub hour_start: DateTime<Utc>,
}

/// Aggregate of hourly buckets for one item within one UTC calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBucket {
    pub item_id: ItemId,
    pub avg_high: f64,
    pub max_high: i64,
    pub min_high: i64,
    pub avg_low: f64,
    pub min_low: i64,
    pub open_high: i64,
    pub open_low: i64,
    pub close_high: i64,
    pub close_low: i64,
    pub total_high_volume: i64,
    pub total_low_volume: i64,
    /// (max_high - min_low) / avg_high, 0 when avg_high <= 0
    pub volatility: f64,
    pub sample_count: i64,
    pub day: NaiveDate,
}

/// Tier-independent record returned by range queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub item_id: ItemId,
    pub high: f64,
    pub low: f64,
    pub high_volume: i64,
    pub low_volume: i64,
    pub timestamp: DateTime<Utc>,
}

impl From<&RawSample> for PriceRecord {
    fn from(s: &RawSample) -> Self {
        Self {
            item_id: s.item_id,
            high: s.high as f64,
            low: s.low as f64,
            high_volume: s.high_volume,
            low_volume: s.low_volume,
            timestamp: s.ingested_at,
        }
    }
}

impl From<&HourlyBucket> for PriceRecord {
    fn from(b: &HourlyBucket) -> Self {
        Self {
            item_id: b.item_id,
            high: b.avg_high,
            low: b.avg_low,
            high_volume: b.total_high_volume,
            low_volume: b.total_low_volume,
            timestamp: b.hour_start,
        }
    }
}

impl From<&DailyBucket> for PriceRecord {
    fn from(b: &DailyBucket) -> Self {
        Self {
            item_id: b.item_id,
            high: b.avg_high,
            low: b.avg_low,
            high_volume: b.total_high_volume,
            low_volume: b.total_low_volume,
            timestamp: day_start(b.day),
        }
    }
}

/// Price movement of one item over a lookback window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub item_id: ItemId,
    pub current_high: i64,
    pub current_low: i64,
    pub previous_high: i64,
    pub previous_low: i64,
    pub high_change: i64,
    pub low_change: i64,
    pub high_change_pct: f64,
    pub low_change_pct: f64,
    pub lookback_secs: i64,
    /// Ingest time of the current sample
    pub timestamp: DateTime<Utc>,
}

impl PriceChange {
    /// Build from the current and previous samples. Percentages are 0 when
    /// the previous value is not positive.
    pub fn between(current: &RawSample, previous: &RawSample, lookback_secs: i64) -> Self {
        let high_change = current.high - previous.high;
        let low_change = current.low - previous.low;
        Self {
            item_id: current.item_id,
            current_high: current.high,
            current_low: current.low,
            previous_high: previous.high,
            previous_low: previous.low,
            high_change,
            low_change,
            high_change_pct: pct_change(high_change, previous.high),
            low_change_pct: pct_change(low_change, previous.low),
            lookback_secs,
            timestamp: current.ingested_at,
        }
    }
}

pub fn pct_change(change: i64, previous: i64) -> f64 {
    if previous > 0 {
        change as f64 / previous as f64 * 100.0
    } else {
        0.0
    }
}

/// Summary statistics over raw samples in a window.
///
/// `data_points == 0` means "no data", not "all prices were zero".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub item_id: ItemId,
    pub avg_high: f64,
    pub avg_low: f64,
    pub max_high: i64,
    pub max_low: i64,
    pub min_high: i64,
    pub min_low: i64,
    /// Sample standard deviation of the high price
    pub volatility: f64,
    pub data_points: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PriceStats {
    pub fn empty(item_id: ItemId, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            item_id,
            avg_high: 0.0,
            avg_low: 0.0,
            max_high: 0,
            max_low: 0,
            min_high: 0,
            min_low: 0,
            volatility: 0.0,
            data_points: 0,
            start,
            end,
        }
    }
}

/// One entry of the traded-volume ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRank {
    pub item_id: ItemId,
    pub total_volume: i64,
    pub avg_high: f64,
    pub avg_low: f64,
}

/// Store-wide statistics for the admin surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub raw_rows: i64,
    pub hourly_rows: i64,
    pub daily_rows: i64,
    pub oldest_raw: Option<DateTime<Utc>>,
    pub newest_raw: Option<DateTime<Utc>>,
    pub estimated_size_bytes: i64,
}

impl StoreStats {
    pub fn total_rows(&self) -> i64 {
        self.raw_rows + self.hourly_rows + self.daily_rows
    }
}

/// Human readable byte count ("1.5 MB")
pub fn format_bytes(bytes: i64) -> String {
    const UNIT: i64 = 1024;
    if bytes < UNIT {
        return "< 1 KB".to_string();
    }
    let units = ['K', 'M', 'G', 'T', 'P', 'E'];
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < units.len() - 1 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes as f64 / div as f64, units[exp])
}
