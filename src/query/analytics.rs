//! Change, statistics and ranking queries over the raw tier

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use tracing::debug;

use super::{check_lookback, PriceHistory};
use crate::error::{Error, Result};
use crate::types::{ItemId, PriceChange, PriceStats, RawSample, VolumeRank};

/// Which end of the movers ranking to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoverDirection {
    Gainers,
    Losers,
}

impl PriceHistory {
    /// Most recent raw sample of an item
    pub fn latest_price(&self, item: ItemId) -> Result<RawSample> {
        self.store
            .latest_raw(item)?
            .ok_or(Error::NotFound {
                what: "latest price",
                item,
            })
    }

    /// Movement between the earliest sample inside the lookback window and
    /// the most recent sample
    pub fn query_change(&self, item: ItemId, lookback: Duration) -> Result<PriceChange> {
        check_lookback(lookback)?;
        let since = self.clock.now() - lookback;

        let current = self.store.latest_raw(item)?.ok_or(Error::NotFound {
            what: "current price",
            item,
        })?;
        let previous = self
            .store
            .earliest_raw_since(item, since)?
            .ok_or(Error::NotFound {
                what: "price inside lookback window",
                item,
            })?;

        Ok(PriceChange::between(&current, &previous, lookback.num_seconds()))
    }

    /// Summary statistics over raw samples in `[start, end)`
    pub fn query_stats(
        &self,
        item: ItemId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PriceStats> {
        if start >= end {
            return Ok(PriceStats::empty(item, start, end));
        }
        let rows = self.store.raw_in_range(item, start, end)?;
        Ok(compute_stats(item, &rows, start, end))
    }

    pub fn query_top_gainers(&self, limit: usize, lookback: Duration) -> Result<Vec<PriceChange>> {
        self.query_movers(MoverDirection::Gainers, limit, lookback)
    }

    pub fn query_top_losers(&self, limit: usize, lookback: Duration) -> Result<Vec<PriceChange>> {
        self.query_movers(MoverDirection::Losers, limit, lookback)
    }

    fn query_movers(
        &self,
        direction: MoverDirection,
        limit: usize,
        lookback: Duration,
    ) -> Result<Vec<PriceChange>> {
        check_lookback(lookback)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let since = self.clock.now() - lookback;
        let endpoints = self.store.raw_endpoints_since(since)?;
        let ranked = rank_movers(&endpoints, direction, limit, lookback.num_seconds());
        debug!(
            ?direction,
            candidates = endpoints.len(),
            returned = ranked.len(),
            "Movers ranked"
        );
        Ok(ranked)
    }

    /// Items by traded volume (both sides) inside the lookback window
    pub fn query_top_volume(&self, limit: usize, lookback: Duration) -> Result<Vec<VolumeRank>> {
        check_lookback(lookback)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.volume_since(self.clock.now() - lookback, limit)
    }
}

/// Averages and extrema of high/low, plus the sample standard deviation of
/// the high price (0 below two points)
pub fn compute_stats(
    item: ItemId,
    rows: &[RawSample],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> PriceStats {
    if rows.is_empty() {
        return PriceStats::empty(item, start, end);
    }

    let n = rows.len() as f64;
    let avg_high = rows.iter().map(|r| r.high as f64).sum::<f64>() / n;
    let avg_low = rows.iter().map(|r| r.low as f64).sum::<f64>() / n;

    let volatility = if rows.len() < 2 {
        0.0
    } else {
        let var = rows
            .iter()
            .map(|r| (r.high as f64 - avg_high).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        var.sqrt()
    };

    PriceStats {
        item_id: item,
        avg_high,
        avg_low,
        max_high: rows.iter().map(|r| r.high).max().unwrap_or(0),
        max_low: rows.iter().map(|r| r.low).max().unwrap_or(0),
        min_high: rows.iter().map(|r| r.high).min().unwrap_or(0),
        min_low: rows.iter().map(|r| r.low).min().unwrap_or(0),
        volatility,
        data_points: rows.len() as i64,
        start,
        end,
    }
}

/// Rank (earliest, latest) pairs by high-price percentage change. Gainers keep
/// strictly positive moves, largest first; losers keep strictly negative
/// moves, most negative first. Ties go to the lower item id.
pub fn rank_movers(
    endpoints: &[(RawSample, RawSample)],
    direction: MoverDirection,
    limit: usize,
    lookback_secs: i64,
) -> Vec<PriceChange> {
    let mut changes: Vec<PriceChange> = endpoints
        .iter()
        .filter(|(earliest, _)| earliest.high > 0)
        .map(|(earliest, latest)| PriceChange::between(latest, earliest, lookback_secs))
        .filter(|c| match direction {
            MoverDirection::Gainers => c.high_change_pct > 0.0,
            MoverDirection::Losers => c.high_change_pct < 0.0,
        })
        .collect();

    changes.sort_by(|a, b| {
        let by_pct = match direction {
            MoverDirection::Gainers => b.high_change_pct.partial_cmp(&a.high_change_pct),
            MoverDirection::Losers => a.high_change_pct.partial_cmp(&b.high_change_pct),
        };
        by_pct
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    changes.truncate(limit);
    changes
}
