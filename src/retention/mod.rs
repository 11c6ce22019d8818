//! Retention enforcer - trims the raw and hourly tiers
//!
//! A tier is only trimmed up to the watermark of the pass that promotes it:
//! raw rows newer than the raw→hourly watermark, and hourly rows newer than the
//! hourly→daily watermark, survive regardless of age.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::persistence::Store;
use crate::types::{Resolution, Tier};

/// Outcome of one retention run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    pub tier: Tier,
    pub deleted: usize,
    /// Rows strictly older than this were deleted; `None` when the tier has
    /// never been rolled up and nothing was eligible
    pub cutoff: Option<DateTime<Utc>>,
}

pub struct RetentionEnforcer {
    store: Store,
    clock: SharedClock,
}

impl RetentionEnforcer {
    pub fn new(store: Store, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Delete raw samples older than `horizon`, never past the hourly watermark
    pub fn enforce_raw_retention(&self, horizon: Duration) -> Result<RetentionReport> {
        let Some(cutoff) = self.effective_cutoff(Tier::Raw, Resolution::Hour, horizon)? else {
            return Ok(RetentionReport {
                tier: Tier::Raw,
                deleted: 0,
                cutoff: None,
            });
        };

        let deleted = self.store.delete_raw_before(cutoff)?;
        info!(deleted, %cutoff, "🧹 Raw retention applied");
        Ok(RetentionReport {
            tier: Tier::Raw,
            deleted,
            cutoff: Some(cutoff),
        })
    }

    /// Delete hourly buckets older than `horizon`, never past the daily watermark
    pub fn enforce_hourly_retention(&self, horizon: Duration) -> Result<RetentionReport> {
        let Some(cutoff) = self.effective_cutoff(Tier::Hourly, Resolution::Day, horizon)? else {
            return Ok(RetentionReport {
                tier: Tier::Hourly,
                deleted: 0,
                cutoff: None,
            });
        };

        let deleted = self.store.delete_hourly_before(cutoff)?;
        info!(deleted, %cutoff, "🧹 Hourly retention applied");
        Ok(RetentionReport {
            tier: Tier::Hourly,
            deleted,
            cutoff: Some(cutoff),
        })
    }

    fn effective_cutoff(
        &self,
        tier: Tier,
        promoted_by: Resolution,
        horizon: Duration,
    ) -> Result<Option<DateTime<Utc>>> {
        if horizon <= Duration::zero() {
            return Err(Error::InvalidInput(format!(
                "{:?} retention horizon must be positive, got {}s",
                tier,
                horizon.num_seconds()
            )));
        }

        let by_age = self.clock.now() - horizon;
        match self.store.watermark(promoted_by)? {
            Some(watermark) => {
                if watermark < by_age {
                    warn!(
                        ?tier,
                        %watermark,
                        horizon_cutoff = %by_age,
                        "Retention held back by rollup watermark"
                    );
                }
                Ok(Some(by_age.min(watermark)))
            }
            None => {
                warn!(
                    ?tier,
                    pass = promoted_by.pass_name(),
                    "No rollup watermark recorded, skipping retention"
                );
                Ok(None)
            }
        }
    }
}
