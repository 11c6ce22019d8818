//! Raw tier: one row per item per ingest snapshot

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row, Transaction};
use tracing::debug;

use super::{ts_col, Store};
use crate::error::{Result, StorageContext};
use crate::types::{ItemId, RawSample, VolumeRank};

const RAW_COLUMNS: &str =
    "id, item_id, high, high_time, low, low_time, high_volume, low_volume, ingested_at";

/// Values bound per raw row in a multi-row insert
const RAW_BIND_COUNT: usize = 8;

/// Keeps a single multi-row insert under SQLite's default 999 bound-parameter limit
pub const MAX_RAW_BATCH: usize = 999 / RAW_BIND_COUNT;

/// Raw sample together with its insertion sequence (row id)
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedSample {
    pub seq: i64,
    pub sample: RawSample,
}

fn sequenced_from_row(row: &Row<'_>) -> rusqlite::Result<SequencedSample> {
    Ok(SequencedSample {
        seq: row.get(0)?,
        sample: RawSample {
            item_id: ItemId(row.get(1)?),
            high: row.get(2)?,
            high_time: row.get(3)?,
            low: row.get(4)?,
            low_time: row.get(5)?,
            high_volume: row.get(6)?,
            low_volume: row.get(7)?,
            ingested_at: ts_col(row, 8)?,
        },
    })
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<RawSample> {
    sequenced_from_row(row).map(|s| s.sample)
}

/// Multi-row inserts of `batch_size` rows inside the caller's transaction
fn write_raw(tx: &Transaction<'_>, samples: &[RawSample], batch_size: usize) -> Result<usize> {
    let batch_size = batch_size.clamp(1, MAX_RAW_BATCH);

    let mut written = 0usize;
    for (chunk_no, chunk) in samples.chunks(batch_size).enumerate() {
        let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO raw_prices
             (item_id, high, high_time, low, low_time, high_volume, low_volume, ingested_at)
             VALUES {}",
            placeholders
        );

        let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * RAW_BIND_COUNT);
        for s in chunk {
            values.push(Value::Integer(s.item_id.get()));
            values.push(Value::Integer(s.high));
            values.push(Value::Integer(s.high_time));
            values.push(Value::Integer(s.low));
            values.push(Value::Integer(s.low_time));
            values.push(Value::Integer(s.high_volume));
            values.push(Value::Integer(s.low_volume));
            values.push(Value::Integer(s.ingested_at.timestamp_millis()));
        }

        written += tx
            .execute(&sql, params_from_iter(values))
            .storage_ctx("insert_raw_batch", || {
                format!("chunk={} rows={}", chunk_no, chunk.len())
            })?;
    }
    Ok(written)
}

/// Every sample with `ingested_at` in [start, end), ordered by
/// (item, ingested_at, insertion sequence). Rollup input.
pub(super) fn select_raw_window(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<SequencedSample>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {} FROM raw_prices
             WHERE ingested_at >= ?1 AND ingested_at < ?2
             ORDER BY item_id ASC, ingested_at ASC, id ASC",
            RAW_COLUMNS
        ))
        .storage_ctx("raw_window", || format!("{}..{}", start, end))?;
    let rows = stmt
        .query_map(
            params![start.timestamp_millis(), end.timestamp_millis()],
            sequenced_from_row,
        )
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .storage_ctx("raw_window", || format!("{}..{}", start, end))?;
    Ok(rows)
}

fn commit_raw(conn: &mut Connection, samples: &[RawSample], batch_size: usize) -> Result<usize> {
    if samples.is_empty() {
        return Ok(0);
    }
    let tx = conn
        .transaction()
        .storage_ctx("insert_raw_batch", || "begin".to_string())?;
    let written = write_raw(&tx, samples, batch_size)?;
    tx.commit()
        .storage_ctx("insert_raw_batch", || "commit".to_string())?;
    debug!(rows = written, batch_size, "Raw batch committed");
    Ok(written)
}

impl Store {
    /// Insert samples in multi-row statements of `batch_size` rows, all inside
    /// one transaction. Any failure rolls back the whole call.
    pub fn insert_raw_batch(&self, samples: &[RawSample], batch_size: usize) -> Result<usize> {
        commit_raw(&mut self.conn.lock(), samples, batch_size)
    }

    /// Like [`Store::insert_raw_batch`], but `build` runs while the store lock
    /// is held. Samples stamped inside `build` commit before a rollup can read
    /// the raw tier, so no rollup misses a row stamped before its window end.
    pub fn insert_raw_with<F>(&self, build: F, batch_size: usize) -> Result<usize>
    where
        F: FnOnce() -> Vec<RawSample>,
    {
        let mut conn = self.conn.lock();
        let samples = build();
        commit_raw(&mut conn, &samples, batch_size)
    }

    /// Samples of one item with `ingested_at` in [start, end), oldest first
    pub fn raw_in_range(
        &self,
        item: ItemId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawSample>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {} FROM raw_prices
                 WHERE item_id = ?1 AND ingested_at >= ?2 AND ingested_at < ?3
                 ORDER BY ingested_at ASC, id ASC",
                RAW_COLUMNS
            ))
            .storage_ctx("raw_in_range", || format!("item={}", item))?;
        let rows = stmt
            .query_map(
                params![item.get(), start.timestamp_millis(), end.timestamp_millis()],
                sample_from_row,
            )
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .storage_ctx("raw_in_range", || format!("item={}", item))?;
        Ok(rows)
    }

    /// Most recent sample of an item; ties on timestamp go to the last inserted
    pub fn latest_raw(&self, item: ItemId) -> Result<Option<RawSample>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM raw_prices WHERE item_id = ?1
                 ORDER BY ingested_at DESC, id DESC LIMIT 1",
                RAW_COLUMNS
            ),
            params![item.get()],
            sample_from_row,
        )
        .optional()
        .storage_ctx("latest_raw", || format!("item={}", item))
    }

    /// Earliest sample of an item at or after `since`; ties go to the first inserted
    pub fn earliest_raw_since(
        &self,
        item: ItemId,
        since: DateTime<Utc>,
    ) -> Result<Option<RawSample>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM raw_prices WHERE item_id = ?1 AND ingested_at >= ?2
                 ORDER BY ingested_at ASC, id ASC LIMIT 1",
                RAW_COLUMNS
            ),
            params![item.get(), since.timestamp_millis()],
            sample_from_row,
        )
        .optional()
        .storage_ctx("earliest_raw_since", || format!("item={}", item))
    }

    /// For every item with samples at or after `since`, its (earliest, latest)
    /// sample in that window, ordered by item id.
    pub fn raw_endpoints_since(&self, since: DateTime<Utc>) -> Result<Vec<(RawSample, RawSample)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {cols}, rn_first, rn_last FROM (
                     SELECT {cols},
                         ROW_NUMBER() OVER (PARTITION BY item_id ORDER BY ingested_at ASC, id ASC) AS rn_first,
                         ROW_NUMBER() OVER (PARTITION BY item_id ORDER BY ingested_at DESC, id DESC) AS rn_last
                     FROM raw_prices
                     WHERE ingested_at >= ?1
                 )
                 WHERE rn_first = 1 OR rn_last = 1
                 ORDER BY item_id ASC, rn_first ASC",
                cols = RAW_COLUMNS
            ))
            .storage_ctx("raw_endpoints_since", || since.to_string())?;

        let rows = stmt
            .query_map(params![since.timestamp_millis()], |row| {
                let sample = sample_from_row(row)?;
                let rn_first: i64 = row.get(9)?;
                let rn_last: i64 = row.get(10)?;
                Ok((sample, rn_first == 1, rn_last == 1))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .storage_ctx("raw_endpoints_since", || since.to_string())?;

        let mut endpoints: Vec<(RawSample, RawSample)> = Vec::new();
        let mut first: Option<RawSample> = None;
        for (sample, is_first, is_last) in rows {
            if is_first {
                first = Some(sample.clone());
            }
            if is_last {
                if let Some(earliest) = first.take() {
                    if earliest.item_id == sample.item_id {
                        endpoints.push((earliest, sample));
                    }
                }
            }
        }
        Ok(endpoints)
    }

    /// Per-item traded volume at or after `since`, zero-volume items dropped,
    /// largest first with item id as tie-break
    pub fn volume_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<VolumeRank>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT item_id,
                        SUM(high_volume + low_volume) AS total_volume,
                        AVG(high),
                        AVG(low)
                 FROM raw_prices
                 WHERE ingested_at >= ?1
                 GROUP BY item_id
                 HAVING total_volume > 0
                 ORDER BY total_volume DESC, item_id ASC
                 LIMIT ?2",
            )
            .storage_ctx("volume_since", || since.to_string())?;
        let rows = stmt
            .query_map(
                params![since.timestamp_millis(), limit as i64],
                |row| {
                    Ok(VolumeRank {
                        item_id: ItemId(row.get(0)?),
                        total_volume: row.get(1)?,
                        avg_high: row.get(2)?,
                        avg_low: row.get(3)?,
                    })
                },
            )
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .storage_ctx("volume_since", || since.to_string())?;
        Ok(rows)
    }

    /// Delete raw samples with `ingested_at < cutoff`
    pub fn delete_raw_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM raw_prices WHERE ingested_at < ?1",
            params![cutoff.timestamp_millis()],
        )
        .storage_ctx("delete_raw_before", || cutoff.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quote;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn sample(item: i64, high: i64, at: DateTime<Utc>) -> RawSample {
        RawSample::from_quote(ItemId(item), &Quote::new(high, high - 10).with_volumes(3, 4), at)
    }

    #[test]
    fn test_insert_raw_batch_spans_multiple_chunks() {
        let store = Store::open_in_memory().unwrap();
        let samples: Vec<RawSample> = (1..=250).map(|i| sample(i, 100 + i, t0())).collect();

        let written = store.insert_raw_batch(&samples, 100).unwrap();
        assert_eq!(written, 250);
        assert_eq!(store.stats().unwrap().raw_rows, 250);
    }

    #[test]
    fn test_failed_batch_rolls_back_whole_append() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER reject_item_13 BEFORE INSERT ON raw_prices
                 WHEN NEW.item_id = 13
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let samples: Vec<RawSample> = (1..=20).map(|i| sample(i, 100, t0())).collect();
        let err = store.insert_raw_batch(&samples, 5).unwrap_err();
        assert!(err.to_string().contains("insert_raw_batch"));
        assert_eq!(store.stats().unwrap().raw_rows, 0);
    }

    #[test]
    fn test_raw_in_range_is_half_open_and_ordered() {
        let store = Store::open_in_memory().unwrap();
        let samples = vec![
            sample(7, 300, t0() + Duration::minutes(10)),
            sample(7, 100, t0()),
            sample(7, 200, t0() + Duration::minutes(5)),
            sample(8, 999, t0()),
        ];
        for s in &samples {
            store.insert_raw_batch(std::slice::from_ref(s), 100).unwrap();
        }

        let rows = store
            .raw_in_range(ItemId(7), t0(), t0() + Duration::minutes(10))
            .unwrap();
        let highs: Vec<i64> = rows.iter().map(|r| r.high).collect();
        assert_eq!(highs, vec![100, 200]);
    }

    #[test]
    fn test_latest_and_earliest_break_ties_by_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_raw_batch(&[sample(5, 10, t0()), sample(5, 20, t0())], 100)
            .unwrap();
        store
            .insert_raw_batch(&[sample(5, 30, t0())], 100)
            .unwrap();

        assert_eq!(store.latest_raw(ItemId(5)).unwrap().unwrap().high, 30);
        assert_eq!(
            store.earliest_raw_since(ItemId(5), t0()).unwrap().unwrap().high,
            10
        );
        assert!(store.latest_raw(ItemId(6)).unwrap().is_none());
    }

    #[test]
    fn test_raw_endpoints_since_pairs_first_and_last_per_item() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_raw_batch(
                &[
                    sample(1, 50, t0() - Duration::hours(3)),
                    sample(1, 100, t0()),
                    sample(1, 150, t0() + Duration::minutes(5)),
                    sample(1, 120, t0() + Duration::minutes(10)),
                    sample(2, 70, t0() + Duration::minutes(10)),
                ],
                100,
            )
            .unwrap();

        let endpoints = store.raw_endpoints_since(t0()).unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].0.high, 100);
        assert_eq!(endpoints[0].1.high, 120);
        assert_eq!(endpoints[1].0.high, 70);
        assert_eq!(endpoints[1].1.high, 70);
    }

    #[test]
    fn test_delete_raw_before_is_strict() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_raw_batch(
                &[
                    sample(1, 1, t0() - Duration::seconds(1)),
                    sample(1, 2, t0()),
                ],
                100,
            )
            .unwrap();
        assert_eq!(store.delete_raw_before(t0()).unwrap(), 1);
        assert_eq!(store.delete_raw_before(t0()).unwrap(), 0);
        assert_eq!(store.stats().unwrap().raw_rows, 1);
    }

    #[test]
    fn test_insert_raw_with_builds_under_the_store_lock() {
        let store = Store::open_in_memory().unwrap();
        let handle = store.clone();

        let written = store
            .insert_raw_with(
                || {
                    assert!(handle.conn.is_locked());
                    vec![sample(1, 10, t0()), sample(2, 20, t0())]
                },
                100,
            )
            .unwrap();
        assert_eq!(written, 2);
        assert!(!store.conn.is_locked());
        assert_eq!(store.insert_raw_with(Vec::new, 100).unwrap(), 0);
        assert_eq!(store.stats().unwrap().raw_rows, 2);
    }
}
