//! Read side of the price history
//!
//! `PriceHistory` is the single entry point for callers. Range queries are
//! routed to the raw, hourly or daily tier by age ([`range`]); change, stats
//! and rankings always read the raw tier ([`analytics`]).

pub mod analytics;
pub mod range;

pub use analytics::{compute_stats, rank_movers, MoverDirection};

use chrono::Duration;

use crate::clock::SharedClock;
use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::persistence::Store;

/// Query facade over the tiered store. Holds no state of its own, so it is
/// safe to call per request and to share behind an `Arc`.
pub struct PriceHistory {
    store: Store,
    clock: SharedClock,
    config: QueryConfig,
}

impl PriceHistory {
    pub fn new(store: Store, clock: SharedClock, config: QueryConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }
}

fn check_lookback(lookback: Duration) -> Result<()> {
    if lookback <= Duration::zero() {
        return Err(Error::InvalidInput(format!(
            "lookback must be positive, got {}s",
            lookback.num_seconds()
        )));
    }
    Ok(())
}
