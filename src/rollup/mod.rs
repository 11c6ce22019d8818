//! Rollup engine - promotes raw samples to hourly buckets and hourly buckets
//! to daily buckets
//!
//! Each pass reads a half-open window `[start, end)` of the finer tier, folds
//! it with the builders in [`aggregate`], and writes the results with
//! insert-if-absent semantics. The read, the bucket writes and the watermark
//! advance share one transaction, so a failed pass leaves no trace and the
//! next run re-scans the same window. A window that starts past rows the pass
//! has never covered still writes its buckets but holds the watermark.

mod aggregate;

pub use aggregate::{aggregate_daily, aggregate_hourly, daily_volatility};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::RollupConfig;
use crate::error::{Error, Result};
use crate::persistence::Store;
use crate::types::{truncate_to_day, truncate_to_hour, Resolution};

/// Outcome of one rollup pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupReport {
    pub resolution: Resolution,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Source rows read from the finer tier
    pub source_rows: usize,
    pub inserted: usize,
    /// Buckets that already existed and were left untouched
    pub skipped: usize,
    /// False when the window started past unrolled rows of the finer tier
    pub watermark_advanced: bool,
}

impl RollupReport {
    fn empty(resolution: Resolution, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            resolution,
            window_start: start,
            window_end: end,
            source_rows: 0,
            inserted: 0,
            skipped: 0,
            watermark_advanced: false,
        }
    }
}

pub struct RollupEngine {
    store: Store,
    clock: SharedClock,
    config: RollupConfig,
}

impl RollupEngine {
    pub fn new(store: Store, clock: SharedClock, config: RollupConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Raw → hourly over `[start, end)`
    pub fn run_hourly(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<RollupReport> {
        check_window(start, end)?;
        let now = self.clock.now();

        let (source_rows, outcome) = self.store.rollup_hourly(start, end, now, |rows| {
            let buckets = aggregate_hourly(rows);
            debug!(
                rows = rows.len(),
                buckets = buckets.len(),
                %start,
                %end,
                "Hourly buckets built"
            );
            buckets
        })?;
        let report = RollupReport {
            source_rows,
            watermark_advanced: outcome.watermark_advanced,
            inserted: outcome.inserted,
            skipped: outcome.skipped,
            ..RollupReport::empty(Resolution::Hour, start, end)
        };
        log_report(&report);
        Ok(report)
    }

    /// Hourly → daily over `[start, end)`, selected by hour start
    pub fn run_daily(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<RollupReport> {
        check_window(start, end)?;
        let now = self.clock.now();

        let (source_rows, outcome) = self.store.rollup_daily(start, end, now, |rows| {
            let buckets = aggregate_daily(rows);
            debug!(
                rows = rows.len(),
                buckets = buckets.len(),
                %start,
                %end,
                "Daily buckets built"
            );
            buckets
        })?;
        let report = RollupReport {
            source_rows,
            watermark_advanced: outcome.watermark_advanced,
            inserted: outcome.inserted,
            skipped: outcome.skipped,
            ..RollupReport::empty(Resolution::Day, start, end)
        };
        log_report(&report);
        Ok(report)
    }

    /// Window the scheduled pass covers: lookback up to the start of the
    /// current (incomplete) bucket
    pub fn scheduled_window(&self, resolution: Resolution) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = self.clock.now();
        match resolution {
            Resolution::Hour => (
                now - Duration::days(self.config.hourly_lookback_days),
                truncate_to_hour(now),
            ),
            Resolution::Day => (
                now - Duration::days(self.config.daily_lookback_days),
                truncate_to_day(now),
            ),
        }
    }

    /// Both scheduled passes, hourly first so the daily pass sees fresh hours
    pub fn run_scheduled(&self) -> Result<(RollupReport, RollupReport)> {
        let (start, end) = self.scheduled_window(Resolution::Hour);
        let hourly = self.run_hourly(start, end)?;

        let (start, end) = self.scheduled_window(Resolution::Day);
        let daily = self.run_daily(start, end)?;

        Ok((hourly, daily))
    }
}

fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if start >= end {
        return Err(Error::InvalidInput(format!(
            "rollup window start {} is not before end {}",
            start, end
        )));
    }
    Ok(())
}

fn log_report(report: &RollupReport) {
    info!(
        pass = report.resolution.pass_name(),
        rows = report.source_rows,
        inserted = report.inserted,
        skipped = report.skipped,
        watermark_advanced = report.watermark_advanced,
        "🧮 Rollup pass committed"
    );
}
