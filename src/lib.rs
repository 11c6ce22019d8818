//! PriceTier Library
//!
//! Tiered price history for a commodity market: raw snapshots roll up into
//! hourly and daily buckets, old tiers are trimmed behind the rollups, and
//! queries are routed to whichever tier covers the requested range.

pub mod admin;
pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod persistence;
pub mod query;
pub mod retention;
pub mod rollup;
pub mod scheduler;
pub mod types;

pub use error::{Error, Result};
pub use query::PriceHistory;
