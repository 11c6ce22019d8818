//! Maintenance surface - manual triggers for rollup and retention, plus
//! store statistics
//!
//! The scheduler's maintenance task calls [`Maintenance::run_cycle`]; the
//! other methods exist for operators and tests.

use tracing::{error, info};

use crate::clock::SharedClock;
use crate::config::{RetentionConfig, RollupConfig};
use crate::error::Result;
use crate::persistence::Store;
use crate::retention::{RetentionEnforcer, RetentionReport};
use crate::rollup::{RollupEngine, RollupReport};
use crate::types::{format_bytes, Resolution, StoreStats};

/// What one maintenance cycle achieved. A `None` step failed and was logged.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub hourly_rollup: Option<RollupReport>,
    pub daily_rollup: Option<RollupReport>,
    pub raw_retention: Option<RetentionReport>,
    pub hourly_retention: Option<RetentionReport>,
    pub stats: Option<StoreStats>,
}

impl CycleReport {
    pub fn is_complete(&self) -> bool {
        self.hourly_rollup.is_some()
            && self.daily_rollup.is_some()
            && self.raw_retention.is_some()
            && self.hourly_retention.is_some()
            && self.stats.is_some()
    }
}

pub struct Maintenance {
    store: Store,
    rollup: RollupEngine,
    retention: RetentionEnforcer,
    horizons: RetentionConfig,
}

impl Maintenance {
    pub fn new(
        store: Store,
        clock: SharedClock,
        rollup: RollupConfig,
        horizons: RetentionConfig,
    ) -> Self {
        Self {
            rollup: RollupEngine::new(store.clone(), clock.clone(), rollup),
            retention: RetentionEnforcer::new(store.clone(), clock),
            store,
            horizons,
        }
    }

    /// Both rollup passes over their scheduled windows
    pub fn run_rollups(&self) -> Result<(RollupReport, RollupReport)> {
        self.rollup.run_scheduled()
    }

    /// Raw then hourly retention with the configured horizons
    pub fn run_retention(&self) -> Result<(RetentionReport, RetentionReport)> {
        let raw = self
            .retention
            .enforce_raw_retention(self.horizons.raw_horizon())?;
        let hourly = self
            .retention
            .enforce_hourly_retention(self.horizons.hourly_horizon())?;
        Ok((raw, hourly))
    }

    pub fn store_stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    /// Rollup, then retention, then stats. Each step is attempted even when
    /// an earlier one failed; retention stays safe behind the watermarks.
    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let (start, end) = self.rollup.scheduled_window(Resolution::Hour);
        report.hourly_rollup = logged(
            Resolution::Hour.pass_name(),
            self.rollup.run_hourly(start, end),
        );
        let (start, end) = self.rollup.scheduled_window(Resolution::Day);
        report.daily_rollup = logged(
            Resolution::Day.pass_name(),
            self.rollup.run_daily(start, end),
        );

        report.raw_retention = logged(
            "raw_retention",
            self.retention
                .enforce_raw_retention(self.horizons.raw_horizon()),
        );
        report.hourly_retention = logged(
            "hourly_retention",
            self.retention
                .enforce_hourly_retention(self.horizons.hourly_horizon()),
        );

        match self.store.stats() {
            Ok(stats) => {
                info!(
                    raw = stats.raw_rows,
                    hourly = stats.hourly_rows,
                    daily = stats.daily_rows,
                    size = %format_bytes(stats.estimated_size_bytes),
                    "📊 Store after maintenance"
                );
                report.stats = Some(stats);
            }
            Err(e) => error!(error = %e, "Store stats failed"),
        }

        report
    }
}

fn logged<T>(step: &'static str, result: Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            error!(step, error = %e, "Maintenance step failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::types::{ItemId, Quote, RawSample};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 5, 6, 15, 0).unwrap()
    }

    #[test]
    fn test_cycle_rolls_up_before_trimming() {
        let store = Store::open_in_memory().unwrap();
        let old = now() - Duration::days(10);
        store
            .insert_raw_batch(
                &[
                    RawSample::from_quote(ItemId(1), &Quote::new(100, 90), old),
                    RawSample::from_quote(ItemId(1), &Quote::new(110, 95), old + Duration::minutes(5)),
                    RawSample::from_quote(ItemId(1), &Quote::new(120, 99), now() - Duration::hours(2)),
                ],
                100,
            )
            .unwrap();

        let maintenance = Maintenance::new(
            store.clone(),
            Arc::new(FixedClock::new(now())),
            RollupConfig::default(),
            RetentionConfig::default(),
        );
        let report = maintenance.run_cycle();
        assert!(report.is_complete());

        assert_eq!(report.hourly_rollup.as_ref().unwrap().inserted, 2);
        assert_eq!(report.raw_retention.as_ref().unwrap().deleted, 2);

        let stats = maintenance.store_stats().unwrap();
        assert_eq!(stats.raw_rows, 1);
        assert_eq!(stats.hourly_rows, 2);
        // Today's day is still open
        assert_eq!(stats.daily_rows, 1);

        // Second cycle changes nothing
        let again = maintenance.run_cycle();
        assert_eq!(again.hourly_rollup.unwrap().inserted, 0);
        assert_eq!(again.raw_retention.unwrap().deleted, 0);
        assert_eq!(maintenance.store_stats().unwrap().total_rows(), stats.total_rows());
    }

    #[test]
    fn test_manual_triggers() {
        let store = Store::open_in_memory().unwrap();
        let maintenance = Maintenance::new(
            store,
            Arc::new(FixedClock::new(now())),
            RollupConfig::default(),
            RetentionConfig::default(),
        );

        // Retention before any rollup is a no-op
        let (raw, hourly) = maintenance.run_retention().unwrap();
        assert_eq!(raw.cutoff, None);
        assert_eq!(hourly.cutoff, None);

        maintenance.run_rollups().unwrap();
        let (raw, _) = maintenance.run_retention().unwrap();
        assert_eq!(raw.cutoff, Some(now() - Duration::days(8)));
    }
}
