//! Bucket builders - group finer rows into one coarser bucket per (item, time)
//!
//! Rows are ordered by (item, time, insertion sequence) before folding, so the
//! opening values come from the first row of a bucket and the closing values
//! from the last; samples sharing a timestamp open/close in insertion order.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

use crate::persistence::SequencedSample;
use crate::types::{truncate_to_hour, DailyBucket, HourlyBucket, ItemId};

#[derive(Debug, Clone)]
struct BuildingHour {
    sum_high: f64,
    max_high: i64,
    min_high: i64,
    sum_low: f64,
    min_low: i64,
    open_high: i64,
    open_low: i64,
    close_high: i64,
    close_low: i64,
    high_volume: i64,
    low_volume: i64,
    count: i64,
}

impl BuildingHour {
    fn new(high: i64, low: i64) -> Self {
        Self {
            sum_high: 0.0,
            max_high: high,
            min_high: high,
            sum_low: 0.0,
            min_low: low,
            open_high: high,
            open_low: low,
            close_high: high,
            close_low: low,
            high_volume: 0,
            low_volume: 0,
            count: 0,
        }
    }

    fn update(&mut self, high: i64, low: i64, high_volume: i64, low_volume: i64) {
        self.sum_high += high as f64;
        self.sum_low += low as f64;
        self.max_high = self.max_high.max(high);
        self.min_high = self.min_high.min(high);
        self.min_low = self.min_low.min(low);
        self.close_high = high;
        self.close_low = low;
        self.high_volume += high_volume;
        self.low_volume += low_volume;
        self.count += 1;
    }

    fn finalize(&self, item_id: ItemId, hour_start: DateTime<Utc>) -> HourlyBucket {
        let n = self.count.max(1) as f64;
        HourlyBucket {
            item_id,
            avg_high: self.sum_high / n,
            max_high: self.max_high,
            min_high: self.min_high,
            avg_low: self.sum_low / n,
            min_low: self.min_low,
            open_high: self.open_high,
            open_low: self.open_low,
            close_high: self.close_high,
            close_low: self.close_low,
            total_high_volume: self.high_volume,
            total_low_volume: self.low_volume,
            sample_count: self.count,
            hour_start,
        }
    }
}

/// Fold raw samples into hourly buckets, ordered by (item, hour)
pub fn aggregate_hourly(rows: &[SequencedSample]) -> Vec<HourlyBucket> {
    let mut ordered: Vec<&SequencedSample> = rows.iter().collect();
    ordered.sort_by_key(|r| (r.sample.item_id, r.sample.ingested_at, r.seq));

    let mut building: BTreeMap<(ItemId, DateTime<Utc>), BuildingHour> = BTreeMap::new();
    for row in ordered {
        let s = &row.sample;
        let key = (s.item_id, truncate_to_hour(s.ingested_at));
        building
            .entry(key)
            .or_insert_with(|| BuildingHour::new(s.high, s.low))
            .update(s.high, s.low, s.high_volume, s.low_volume);
    }

    building
        .iter()
        .map(|((item, hour), b)| b.finalize(*item, *hour))
        .collect()
}

#[derive(Debug, Clone)]
struct BuildingDay {
    sum_avg_high: f64,
    sum_avg_low: f64,
    max_high: i64,
    min_high: i64,
    min_low: i64,
    open_high: i64,
    open_low: i64,
    close_high: i64,
    close_low: i64,
    high_volume: i64,
    low_volume: i64,
    samples: i64,
    hours: i64,
}

impl BuildingDay {
    fn new(first: &HourlyBucket) -> Self {
        Self {
            sum_avg_high: 0.0,
            sum_avg_low: 0.0,
            max_high: first.max_high,
            min_high: first.min_high,
            min_low: first.min_low,
            open_high: first.open_high,
            open_low: first.open_low,
            close_high: first.close_high,
            close_low: first.close_low,
            high_volume: 0,
            low_volume: 0,
            samples: 0,
            hours: 0,
        }
    }

    fn update(&mut self, h: &HourlyBucket) {
        self.sum_avg_high += h.avg_high;
        self.sum_avg_low += h.avg_low;
        self.max_high = self.max_high.max(h.max_high);
        self.min_high = self.min_high.min(h.min_high);
        self.min_low = self.min_low.min(h.min_low);
        self.close_high = h.close_high;
        self.close_low = h.close_low;
        self.high_volume += h.total_high_volume;
        self.low_volume += h.total_low_volume;
        self.samples += h.sample_count;
        self.hours += 1;
    }

    fn finalize(&self, item_id: ItemId, day: NaiveDate) -> DailyBucket {
        let n = self.hours.max(1) as f64;
        let avg_high = self.sum_avg_high / n;
        DailyBucket {
            item_id,
            avg_high,
            max_high: self.max_high,
            min_high: self.min_high,
            avg_low: self.sum_avg_low / n,
            min_low: self.min_low,
            open_high: self.open_high,
            open_low: self.open_low,
            close_high: self.close_high,
            close_low: self.close_low,
            total_high_volume: self.high_volume,
            total_low_volume: self.low_volume,
            volatility: daily_volatility(self.max_high, self.min_low, avg_high),
            sample_count: self.samples,
            day,
        }
    }
}

/// Range over average-high; 0 when the average is not positive
pub fn daily_volatility(max_high: i64, min_low: i64, avg_high: f64) -> f64 {
    if avg_high > 0.0 {
        (max_high - min_low) as f64 / avg_high
    } else {
        0.0
    }
}

/// Fold hourly buckets into daily buckets, ordered by (item, day). Daily
/// averages are the mean of the hourly averages.
pub fn aggregate_daily(rows: &[HourlyBucket]) -> Vec<DailyBucket> {
    // Stable sort: equal keys keep their input (storage) order
    let mut ordered: Vec<&HourlyBucket> = rows.iter().collect();
    ordered.sort_by_key(|h| (h.item_id, h.hour_start));

    let mut building: BTreeMap<(ItemId, NaiveDate), BuildingDay> = BTreeMap::new();
    for h in ordered {
        let key = (h.item_id, h.hour_start.date_naive());
        building
            .entry(key)
            .or_insert_with(|| BuildingDay::new(h))
            .update(h);
    }

    building
        .iter()
        .map(|((item, day), b)| b.finalize(*item, *day))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Quote, RawSample};
    use chrono::{Duration, TimeZone};

    fn hour0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap()
    }

    fn seq_sample(seq: i64, item: i64, high: i64, low: i64, at: DateTime<Utc>) -> SequencedSample {
        SequencedSample {
            seq,
            sample: RawSample::from_quote(ItemId(item), &Quote::new(high, low).with_volumes(2, 3), at),
        }
    }

    #[test]
    fn test_hourly_open_close_extrema_and_average() {
        let rows = vec![
            seq_sample(1, 7, 100, 90, hour0() + Duration::minutes(5)),
            seq_sample(2, 7, 150, 80, hour0() + Duration::minutes(10)),
            seq_sample(3, 7, 120, 95, hour0() + Duration::minutes(15)),
        ];
        let buckets = aggregate_hourly(&rows);
        assert_eq!(buckets.len(), 1);

        let b = &buckets[0];
        assert_eq!(b.hour_start, hour0());
        assert_eq!(b.open_high, 100);
        assert_eq!(b.close_high, 120);
        assert_eq!(b.max_high, 150);
        assert_eq!(b.min_high, 100);
        assert!((b.avg_high - (100.0 + 150.0 + 120.0) / 3.0).abs() < 1e-9);
        assert_eq!(b.open_low, 90);
        assert_eq!(b.close_low, 95);
        assert_eq!(b.min_low, 80);
        assert_eq!(b.total_high_volume, 6);
        assert_eq!(b.total_low_volume, 9);
        assert_eq!(b.sample_count, 3);
    }

    #[test]
    fn test_hourly_order_independent_of_input_order() {
        let rows = vec![
            seq_sample(3, 7, 120, 95, hour0() + Duration::minutes(15)),
            seq_sample(1, 7, 100, 90, hour0() + Duration::minutes(5)),
            seq_sample(2, 7, 150, 80, hour0() + Duration::minutes(10)),
        ];
        let b = &aggregate_hourly(&rows)[0];
        assert_eq!(b.open_high, 100);
        assert_eq!(b.close_high, 120);
    }

    #[test]
    fn test_hourly_identical_timestamps_resolve_by_insertion_sequence() {
        let at = hour0() + Duration::minutes(20);
        let rows = vec![
            seq_sample(11, 7, 300, 1, at),
            seq_sample(10, 7, 200, 1, at),
            seq_sample(12, 7, 400, 1, at),
        ];
        let b = &aggregate_hourly(&rows)[0];
        assert_eq!(b.open_high, 200);
        assert_eq!(b.close_high, 400);
    }

    #[test]
    fn test_hourly_groups_by_item_and_hour() {
        let rows = vec![
            seq_sample(1, 1, 10, 9, hour0()),
            seq_sample(2, 1, 20, 19, hour0() + Duration::minutes(59)),
            seq_sample(3, 1, 30, 29, hour0() + Duration::minutes(60)),
            seq_sample(4, 2, 40, 39, hour0()),
        ];
        let buckets = aggregate_hourly(&rows);
        let keys: Vec<(i64, DateTime<Utc>, i64)> = buckets
            .iter()
            .map(|b| (b.item_id.get(), b.hour_start, b.sample_count))
            .collect();
        assert_eq!(
            keys,
            vec![
                (1, hour0(), 2),
                (1, hour0() + Duration::hours(1), 1),
                (2, hour0(), 1),
            ]
        );
    }

    fn hourly(item: i64, hour_start: DateTime<Utc>, open: i64, close: i64, max: i64, min_low: i64, avg: f64) -> HourlyBucket {
        HourlyBucket {
            item_id: ItemId(item),
            avg_high: avg,
            max_high: max,
            min_high: open.min(close),
            avg_low: avg - 10.0,
            min_low,
            open_high: open,
            open_low: open - 10,
            close_high: close,
            close_low: close - 10,
            total_high_volume: 5,
            total_low_volume: 7,
            sample_count: 12,
            hour_start,
        }
    }

    #[test]
    fn test_daily_from_hourly() {
        let day_start = Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap();
        let rows = vec![
            hourly(3, day_start + Duration::hours(13), 110, 120, 130, 90, 115.0),
            hourly(3, day_start + Duration::hours(1), 100, 105, 108, 95, 100.0),
            hourly(3, day_start + Duration::hours(25), 1, 1, 1, 1, 1.0),
        ];
        let days = aggregate_daily(&rows);
        assert_eq!(days.len(), 2);

        let d = &days[0];
        assert_eq!(d.day, NaiveDate::from_ymd_opt(2024, 4, 2).unwrap());
        assert_eq!(d.open_high, 100);
        assert_eq!(d.close_high, 120);
        assert_eq!(d.max_high, 130);
        assert_eq!(d.min_low, 90);
        assert!((d.avg_high - 107.5).abs() < 1e-9);
        assert_eq!(d.total_high_volume, 10);
        assert_eq!(d.total_low_volume, 14);
        assert_eq!(d.sample_count, 24);
        assert!((d.volatility - (130.0 - 90.0) / 107.5).abs() < 1e-9);

        assert_eq!(days[1].day, NaiveDate::from_ymd_opt(2024, 4, 3).unwrap());
    }

    #[test]
    fn test_daily_volatility_zero_average() {
        assert_eq!(daily_volatility(10, 0, 0.0), 0.0);
        assert_eq!(daily_volatility(10, 0, -1.0), 0.0);
        assert!((daily_volatility(150, 50, 100.0) - 1.0).abs() < 1e-12);
    }
}
