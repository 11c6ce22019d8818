//! Ingest writer - appends feed snapshots to the raw tier
//!
//! This is the only place string-encoded item keys are parsed. Entries with
//! keys that are not positive integers are dropped and counted; they never
//! reach the store.

use std::collections::HashMap;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::error::Result;
use crate::persistence::Store;
use crate::types::{ItemId, Quote, RawSample};

/// Outcome of one append
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub written: usize,
    pub rejected_keys: Vec<String>,
}

pub struct IngestWriter {
    store: Store,
    clock: SharedClock,
    batch_size: usize,
}

impl IngestWriter {
    pub fn new(store: Store, clock: SharedClock, batch_size: usize) -> Self {
        Self {
            store,
            clock,
            batch_size,
        }
    }

    /// Write one raw sample per snapshot entry, all stamped with the same
    /// ingest time. Either every valid entry is stored or none is.
    ///
    /// The timestamp is taken under the store lock, so a rollup that runs
    /// after it commits, never before.
    pub fn append(&self, snapshot: &HashMap<String, Quote>) -> Result<IngestReport> {
        let mut rejected_keys = Vec::new();
        let mut quotes: Vec<(ItemId, &Quote)> = Vec::with_capacity(snapshot.len());
        for (key, quote) in snapshot {
            match ItemId::parse(key) {
                Some(item_id) => quotes.push((item_id, quote)),
                None => rejected_keys.push(key.clone()),
            }
        }
        // Deterministic insertion sequence regardless of map iteration order
        quotes.sort_by_key(|(item_id, _)| *item_id);
        rejected_keys.sort();

        if !rejected_keys.is_empty() {
            warn!(
                count = rejected_keys.len(),
                sample = %rejected_keys.iter().take(5).cloned().collect::<Vec<_>>().join(","),
                "Dropping snapshot entries with invalid item ids"
            );
        }

        let mut ingested_at = None;
        let written = self.store.insert_raw_with(
            || {
                let at = self.clock.now();
                ingested_at = Some(at);
                quotes
                    .iter()
                    .map(|(item_id, quote)| RawSample::from_quote(*item_id, quote, at))
                    .collect()
            },
            self.batch_size,
        )?;
        if let Some(at) = ingested_at {
            info!(rows = written, %at, "💾 Snapshot appended to raw tier");
        }

        Ok(IngestReport {
            written,
            rejected_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_append_shares_one_timestamp_and_skips_bad_keys() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let writer = IngestWriter::new(store.clone(), Arc::new(FixedClock::new(now)), 100);

        let mut snapshot = HashMap::new();
        snapshot.insert("4151".to_string(), Quote::new(1000, 900));
        snapshot.insert("2".to_string(), Quote::new(5, 4));
        snapshot.insert("not-an-id".to_string(), Quote::new(1, 1));
        snapshot.insert("-3".to_string(), Quote::new(1, 1));

        let report = writer.append(&snapshot).unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.rejected_keys, vec!["-3".to_string(), "not-an-id".to_string()]);

        let rows = store
            .raw_in_range(ItemId(4151), now, now + Duration::seconds(1))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ingested_at, now);
        assert_eq!(rows[0].high, 1000);
        assert_eq!(store.latest_raw(ItemId(2)).unwrap().unwrap().ingested_at, now);
    }

    #[test]
    fn test_append_does_not_dedup_identical_snapshots() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let writer = IngestWriter::new(store.clone(), Arc::new(FixedClock::new(now)), 100);

        let mut snapshot = HashMap::new();
        snapshot.insert("10".to_string(), Quote::new(7, 6));
        writer.append(&snapshot).unwrap();
        writer.append(&snapshot).unwrap();

        assert_eq!(store.stats().unwrap().raw_rows, 2);
    }

    #[test]
    fn test_empty_snapshot_writes_nothing() {
        let store = Store::open_in_memory().unwrap();
        let writer = IngestWriter::new(
            store.clone(),
            Arc::new(FixedClock::new(Utc::now())),
            100,
        );
        let report = writer.append(&HashMap::new()).unwrap();
        assert_eq!(report, IngestReport::default());
    }

    #[test]
    fn test_ingest_time_is_read_once_per_append() {
        struct CountingClock {
            inner: FixedClock,
            reads: AtomicUsize,
        }
        impl Clock for CountingClock {
            fn now(&self) -> DateTime<Utc> {
                self.reads.fetch_add(1, Ordering::SeqCst);
                self.inner.now()
            }
        }

        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 59, 59).unwrap();
        let clock = Arc::new(CountingClock {
            inner: FixedClock::new(now),
            reads: Default::default(),
        });
        let writer = IngestWriter::new(store.clone(), clock.clone(), 1);

        let mut snapshot = HashMap::new();
        for id in 1..=5 {
            snapshot.insert(id.to_string(), Quote::new(10, 9));
        }
        assert_eq!(writer.append(&snapshot).unwrap().written, 5);
        assert_eq!(clock.reads.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats().unwrap().newest_raw, Some(now));
    }
}
