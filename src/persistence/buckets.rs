//! Hourly and daily tiers

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row, Transaction};
use tracing::debug;

use super::raw::{select_raw_window, SequencedSample};
use super::{advance_watermark, day_col, day_text, ts_col, Store};
use crate::error::{Result, StorageContext};
use crate::types::{DailyBucket, HourlyBucket, ItemId, Resolution};

const HOURLY_COLUMNS: &str = "item_id, avg_high, max_high, min_high, avg_low, min_low, \
     open_high, open_low, close_high, close_low, total_high_volume, total_low_volume, \
     sample_count, hour_start";

const DAILY_COLUMNS: &str = "item_id, avg_high, max_high, min_high, avg_low, min_low, \
     open_high, open_low, close_high, close_low, total_high_volume, total_low_volume, \
     volatility, sample_count, day";

/// Result of an insert-if-absent bucket write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    /// Buckets whose (item, time) key already existed
    pub skipped: usize,
    /// Whether the pass watermark moved to the window end
    pub watermark_advanced: bool,
}

fn hourly_from_row(row: &Row<'_>) -> rusqlite::Result<HourlyBucket> {
    Ok(HourlyBucket {
        item_id: ItemId(row.get(0)?),
        avg_high: row.get(1)?,
        max_high: row.get(2)?,
        min_high: row.get(3)?,
        avg_low: row.get(4)?,
        min_low: row.get(5)?,
        open_high: row.get(6)?,
        open_low: row.get(7)?,
        close_high: row.get(8)?,
        close_low: row.get(9)?,
        total_high_volume: row.get(10)?,
        total_low_volume: row.get(11)?,
        sample_count: row.get(12)?,
        hour_start: ts_col(row, 13)?,
    })
}

fn daily_from_row(row: &Row<'_>) -> rusqlite::Result<DailyBucket> {
    Ok(DailyBucket {
        item_id: ItemId(row.get(0)?),
        avg_high: row.get(1)?,
        max_high: row.get(2)?,
        min_high: row.get(3)?,
        avg_low: row.get(4)?,
        min_low: row.get(5)?,
        open_high: row.get(6)?,
        open_low: row.get(7)?,
        close_high: row.get(8)?,
        close_low: row.get(9)?,
        total_high_volume: row.get(10)?,
        total_low_volume: row.get(11)?,
        volatility: row.get(12)?,
        sample_count: row.get(13)?,
        day: day_col(row, 14)?,
    })
}

fn write_hourly(tx: &Transaction<'_>, buckets: &[HourlyBucket]) -> Result<InsertOutcome> {
    let mut stmt = tx
        .prepare_cached(&format!(
            "INSERT OR IGNORE INTO hourly_prices ({})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            HOURLY_COLUMNS
        ))
        .storage_ctx("insert_hourly", || "prepare".to_string())?;

    let mut outcome = InsertOutcome::default();
    for b in buckets {
        let changed = stmt
            .execute(params![
                b.item_id.get(),
                b.avg_high,
                b.max_high,
                b.min_high,
                b.avg_low,
                b.min_low,
                b.open_high,
                b.open_low,
                b.close_high,
                b.close_low,
                b.total_high_volume,
                b.total_low_volume,
                b.sample_count,
                b.hour_start.timestamp_millis(),
            ])
            .storage_ctx("insert_hourly", || {
                format!("item={} hour={}", b.item_id, b.hour_start)
            })?;
        if changed > 0 {
            outcome.inserted += 1;
        } else {
            outcome.skipped += 1;
        }
    }
    Ok(outcome)
}

fn write_daily(tx: &Transaction<'_>, buckets: &[DailyBucket]) -> Result<InsertOutcome> {
    let mut stmt = tx
        .prepare_cached(&format!(
            "INSERT INTO daily_prices ({})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(item_id, day) DO NOTHING",
            DAILY_COLUMNS
        ))
        .storage_ctx("insert_daily", || "prepare".to_string())?;

    let mut outcome = InsertOutcome::default();
    for b in buckets {
        let changed = stmt
            .execute(params![
                b.item_id.get(),
                b.avg_high,
                b.max_high,
                b.min_high,
                b.avg_low,
                b.min_low,
                b.open_high,
                b.open_low,
                b.close_high,
                b.close_low,
                b.total_high_volume,
                b.total_low_volume,
                b.volatility,
                b.sample_count,
                day_text(b.day),
            ])
            .storage_ctx("insert_daily", || format!("item={} day={}", b.item_id, b.day))?;
        if changed > 0 {
            outcome.inserted += 1;
        } else {
            outcome.skipped += 1;
        }
    }
    Ok(outcome)
}

/// Hourly buckets with `hour_start` in [start, end), ordered by
/// (item, hour_start). Daily rollup input.
fn select_hourly_window(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<HourlyBucket>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {} FROM hourly_prices
             WHERE hour_start >= ?1 AND hour_start < ?2
             ORDER BY item_id ASC, hour_start ASC, id ASC",
            HOURLY_COLUMNS
        ))
        .storage_ctx("hourly_window", || format!("{}..{}", start, end))?;
    let rows = stmt
        .query_map(
            params![start.timestamp_millis(), end.timestamp_millis()],
            hourly_from_row,
        )
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .storage_ctx("hourly_window", || format!("{}..{}", start, end))?;
    Ok(rows)
}

impl Store {
    /// Insert hourly buckets, skipping keys that already exist, and advance the
    /// raw→hourly watermark to `window_end` when `[window_start, window_end)`
    /// leaves no unrolled raw rows behind. One transaction.
    pub fn insert_hourly(
        &self,
        buckets: &[HourlyBucket],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .storage_ctx("insert_hourly", || "begin".to_string())?;
        let mut outcome = write_hourly(&tx, buckets)?;
        outcome.watermark_advanced =
            advance_watermark(&tx, Resolution::Hour, window_start, window_end, now)
                .storage_ctx("insert_hourly", || "watermark".to_string())?;
        tx.commit()
            .storage_ctx("insert_hourly", || "commit".to_string())?;
        Ok(outcome)
    }

    /// Insert daily buckets, skipping days that already exist, and advance the
    /// hourly→daily watermark the same way as [`Store::insert_hourly`].
    pub fn insert_daily(
        &self,
        buckets: &[DailyBucket],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .storage_ctx("insert_daily", || "begin".to_string())?;
        let mut outcome = write_daily(&tx, buckets)?;
        outcome.watermark_advanced =
            advance_watermark(&tx, Resolution::Day, window_start, window_end, now)
                .storage_ctx("insert_daily", || "watermark".to_string())?;
        tx.commit()
            .storage_ctx("insert_daily", || "commit".to_string())?;
        Ok(outcome)
    }

    /// Read raw samples in `[start, end)`, fold them with `build` and write the
    /// buckets, all in one transaction under the store lock. Returns the number
    /// of raw rows read.
    pub fn rollup_hourly<F>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
        build: F,
    ) -> Result<(usize, InsertOutcome)>
    where
        F: FnOnce(&[SequencedSample]) -> Vec<HourlyBucket>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .storage_ctx("insert_hourly", || "begin".to_string())?;

        let rows = select_raw_window(&tx, start, end)?;
        let buckets = build(&rows);
        let mut outcome = write_hourly(&tx, &buckets)?;
        outcome.watermark_advanced = advance_watermark(&tx, Resolution::Hour, start, end, now)
            .storage_ctx("insert_hourly", || "watermark".to_string())?;
        tx.commit()
            .storage_ctx("insert_hourly", || "commit".to_string())?;

        debug!(
            rows = rows.len(),
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            watermark_advanced = outcome.watermark_advanced,
            "Hourly buckets committed"
        );
        Ok((rows.len(), outcome))
    }

    /// Hourly counterpart of [`Store::rollup_hourly`] feeding the daily tier.
    /// Hours are selected by `hour_start`.
    pub fn rollup_daily<F>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
        build: F,
    ) -> Result<(usize, InsertOutcome)>
    where
        F: FnOnce(&[HourlyBucket]) -> Vec<DailyBucket>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .storage_ctx("insert_daily", || "begin".to_string())?;

        let rows = select_hourly_window(&tx, start, end)?;
        let buckets = build(&rows);
        let mut outcome = write_daily(&tx, &buckets)?;
        outcome.watermark_advanced = advance_watermark(&tx, Resolution::Day, start, end, now)
            .storage_ctx("insert_daily", || "watermark".to_string())?;
        tx.commit()
            .storage_ctx("insert_daily", || "commit".to_string())?;

        debug!(
            rows = rows.len(),
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            watermark_advanced = outcome.watermark_advanced,
            "Daily buckets committed"
        );
        Ok((rows.len(), outcome))
    }

    /// Hourly buckets of one item with `hour_start` in [start, end), oldest first
    pub fn hourly_in_range(
        &self,
        item: ItemId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HourlyBucket>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {} FROM hourly_prices
                 WHERE item_id = ?1 AND hour_start >= ?2 AND hour_start < ?3
                 ORDER BY hour_start ASC",
                HOURLY_COLUMNS
            ))
            .storage_ctx("hourly_in_range", || format!("item={}", item))?;
        let rows = stmt
            .query_map(
                params![item.get(), start.timestamp_millis(), end.timestamp_millis()],
                hourly_from_row,
            )
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .storage_ctx("hourly_in_range", || format!("item={}", item))?;
        Ok(rows)
    }

    /// Daily buckets of one item with `day` in [start, end), oldest first
    pub fn daily_in_range(
        &self,
        item: ItemId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBucket>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {} FROM daily_prices
                 WHERE item_id = ?1 AND day >= ?2 AND day < ?3
                 ORDER BY day ASC",
                DAILY_COLUMNS
            ))
            .storage_ctx("daily_in_range", || format!("item={}", item))?;
        let rows = stmt
            .query_map(
                params![item.get(), day_text(start), day_text(end)],
                daily_from_row,
            )
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .storage_ctx("daily_in_range", || format!("item={}", item))?;
        Ok(rows)
    }

    /// Delete hourly buckets with `hour_start < cutoff`
    pub fn delete_hourly_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM hourly_prices WHERE hour_start < ?1",
            params![cutoff.timestamp_millis()],
        )
        .storage_ctx("delete_hourly_before", || cutoff.to_string())
    }
}
