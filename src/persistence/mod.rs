//! SQLite persistence for the tiered price history
//!
//! `Store` owns the single connection. Every public operation is one SQLite
//! statement or one transaction, so callers never need their own locking.
//! Timestamps are stored as unix milliseconds, day buckets as `YYYY-MM-DD`.

mod buckets;
mod raw;
mod schema;

pub use buckets::InsertOutcome;
pub use raw::{SequencedSample, MAX_RAW_BATCH};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageContext};
use crate::types::{Resolution, StoreStats};

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Handle to the tiered price store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    crate::error::Error::InvalidInput(format!(
                        "cannot create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .storage_ctx("open", || path.display().to_string())?;

        let store = Self::init(conn)?;
        info!(path = %path.display(), "📊 Price store opened");
        Ok(store)
    }

    /// Private in-memory database (tests, replays)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().storage_ctx("open", || ":memory:".to_string())?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::SCHEMA_SQL)
            .storage_ctx("apply_schema", || "schema".to_string())?;

        match conn.query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0)) {
            Ok(mode) if mode.eq_ignore_ascii_case("wal") || mode.eq_ignore_ascii_case("memory") => {}
            Ok(mode) => warn!(journal_mode = %mode, "WAL mode not active"),
            Err(e) => warn!(error = %e, "Could not read journal_mode"),
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Last completed end of a rollup pass, if the pass ever committed
    pub fn watermark(&self, resolution: Resolution) -> Result<Option<DateTime<Utc>>> {
        let pass = resolution.pass_name();
        let conn = self.conn.lock();
        let ms: Option<i64> = conn
            .query_row(
                "SELECT watermark_ms FROM rollup_watermarks WHERE pass = ?1",
                params![pass],
                |row| row.get(0),
            )
            .optional()
            .storage_ctx("read_watermark", || pass.to_string())?;
        Ok(ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Row counts, raw time span and on-disk size
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();

        let count = |table: &str| -> Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .storage_ctx("count_rows", || table.to_string())
        };
        let raw_rows = count("raw_prices")?;
        let hourly_rows = count("hourly_prices")?;
        let daily_rows = count("daily_prices")?;

        let (oldest, newest): (Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT MIN(ingested_at), MAX(ingested_at) FROM raw_prices",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .storage_ctx("raw_time_span", || "raw_prices".to_string())?;

        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .storage_ctx("page_count", || "pragma".to_string())?;
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .storage_ctx("page_size", || "pragma".to_string())?;

        let stats = StoreStats {
            raw_rows,
            hourly_rows,
            daily_rows,
            oldest_raw: oldest.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            newest_raw: newest.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            estimated_size_bytes: page_count * page_size,
        };
        debug!(?stats, "Store stats computed");
        Ok(stats)
    }
}

/// Advance a pass watermark to `window_end` inside an open transaction.
///
/// The watermark only moves when the window leaves no unrolled source rows
/// behind it: nothing in the source tier may lie in
/// `[previous watermark, window_start)`. With no previous watermark the
/// window must start at or before the oldest source row. Never moves back.
/// Returns whether the watermark was written.
fn advance_watermark(
    tx: &rusqlite::Transaction<'_>,
    resolution: Resolution,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let pass = resolution.pass_name();
    let previous: Option<i64> = tx
        .query_row(
            "SELECT watermark_ms FROM rollup_watermarks WHERE pass = ?1",
            params![pass],
            |row| row.get(0),
        )
        .optional()?;

    let (table, column) = match resolution {
        Resolution::Hour => ("raw_prices", "ingested_at"),
        Resolution::Day => ("hourly_prices", "hour_start"),
    };
    let gap_has_rows: bool = tx.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE {column} >= ?1 AND {column} < ?2)"
        ),
        params![previous.unwrap_or(i64::MIN), window_start.timestamp_millis()],
        |row| row.get(0),
    )?;
    if gap_has_rows {
        warn!(
            pass,
            %window_start,
            previous_ms = ?previous,
            "Rollup window starts past unrolled rows, watermark held"
        );
        return Ok(false);
    }

    tx.execute(
        "INSERT INTO rollup_watermarks (pass, watermark_ms, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(pass) DO UPDATE SET
             watermark_ms = MAX(watermark_ms, excluded.watermark_ms),
             updated_at = excluded.updated_at",
        params![pass, window_end.timestamp_millis(), now.timestamp_millis()],
    )?;
    Ok(true)
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn day_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DAY_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn day_text(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemId, Quote, RawSample};
    use chrono::Duration;

    fn sample(item: i64, high: i64, low: i64, at: DateTime<Utc>) -> RawSample {
        RawSample::from_quote(ItemId(item), &Quote::new(high, low).with_volumes(1, 2), at)
    }

    #[test]
    fn test_open_on_disk_persists_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prices.db");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        {
            let store = Store::open(&path).unwrap();
            store
                .insert_raw_batch(&[sample(1, 10, 9, at), sample(2, 20, 19, at)], 100)
                .unwrap();
        }

        let reopened = Store::open(&path).unwrap();
        let stats = reopened.stats().unwrap();
        assert_eq!(stats.raw_rows, 2);
        assert_eq!(stats.oldest_raw, Some(at));
        assert_eq!(stats.newest_raw, Some(at));
        assert!(stats.estimated_size_bytes > 0);
    }

    #[test]
    fn test_stats_on_empty_store() {
        let store = Store::open_in_memory().unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_rows(), 0);
        assert_eq!(stats.oldest_raw, None);
        assert_eq!(stats.newest_raw, None);
    }

    #[test]
    fn test_watermark_never_moves_backwards() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let start = now - Duration::days(1);
        assert_eq!(store.watermark(Resolution::Hour).unwrap(), None);

        store.insert_hourly(&[], start, now, now).unwrap();
        assert_eq!(store.watermark(Resolution::Hour).unwrap(), Some(now));

        store
            .insert_hourly(&[], start, now - Duration::hours(5), now)
            .unwrap();
        assert_eq!(store.watermark(Resolution::Hour).unwrap(), Some(now));
        assert_eq!(store.watermark(Resolution::Day).unwrap(), None);
    }

    #[test]
    fn test_watermark_held_when_window_skips_older_rows() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        store
            .insert_raw_batch(&[sample(1, 10, 9, now - Duration::days(10))], 100)
            .unwrap();

        // First pass ever, starting after the oldest row
        let outcome = store
            .insert_hourly(&[], now - Duration::hours(1), now, now)
            .unwrap();
        assert!(!outcome.watermark_advanced);
        assert_eq!(store.watermark(Resolution::Hour).unwrap(), None);

        // Covering the old row lets it move
        let outcome = store
            .insert_hourly(&[], now - Duration::days(11), now - Duration::days(2), now)
            .unwrap();
        assert!(outcome.watermark_advanced);
        let watermark = now - Duration::days(2);
        assert_eq!(store.watermark(Resolution::Hour).unwrap(), Some(watermark));

        // Row appears behind the next window's start but after the watermark
        store
            .insert_raw_batch(&[sample(1, 11, 9, watermark + Duration::hours(1))], 100)
            .unwrap();
        let outcome = store
            .insert_hourly(&[], watermark + Duration::hours(2), now, now)
            .unwrap();
        assert!(!outcome.watermark_advanced);
        assert_eq!(store.watermark(Resolution::Hour).unwrap(), Some(watermark));

        // A window starting at the watermark closes the gap
        let outcome = store.insert_hourly(&[], watermark, now, now).unwrap();
        assert!(outcome.watermark_advanced);
        assert_eq!(store.watermark(Resolution::Hour).unwrap(), Some(now));
    }

    #[test]
    fn test_open_in_memory_reads_journal_mode() {
        // In-memory databases report "memory"; opening must not fail on it
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.stats().unwrap().raw_rows, 0);
    }
}
