//! Range query router

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::PriceHistory;
use crate::error::Result;
use crate::types::{ItemId, PriceRecord, Tier};

impl PriceHistory {
    /// Tier that serves a range starting at `start`, by age relative to now.
    /// Boundaries are inclusive on the finer side: exactly 7 days old is raw.
    pub fn select_tier(&self, start: DateTime<Utc>) -> Tier {
        let age = self.clock.now() - start;
        if age <= Duration::days(self.config.raw_max_age_days) {
            Tier::Raw
        } else if age <= Duration::days(self.config.hourly_max_age_days) {
            Tier::Hourly
        } else {
            Tier::Daily
        }
    }

    /// Records of one item in `[start, end)`, oldest first, from whichever
    /// tier covers `start`
    pub fn query_range(
        &self,
        item: ItemId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceRecord>> {
        if start >= end {
            return Ok(Vec::new());
        }

        let tier = self.select_tier(start);
        let records: Vec<PriceRecord> = match tier {
            Tier::Raw => self
                .store
                .raw_in_range(item, start, end)?
                .iter()
                .map(PriceRecord::from)
                .collect(),
            Tier::Hourly => self
                .store
                .hourly_in_range(item, start, end)?
                .iter()
                .map(PriceRecord::from)
                .collect(),
            Tier::Daily => self
                .store
                .daily_in_range(item, start.date_naive(), end.date_naive())?
                .iter()
                .map(PriceRecord::from)
                .collect(),
        };

        debug!(%item, ?tier, records = records.len(), "Range query served");
        Ok(records)
    }
}
