//! Configuration management for pricetier
//!
//! Loads built-in defaults, optional `config/default` and `config/local`
//! files, then environment variables (`PRICETIER__SECTION__KEY`), after
//! reading `.env`.

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub maintenance: MaintenanceConfig,
    pub rollup: RollupConfig,
    pub retention: RetentionConfig,
    pub query: QueryConfig,
    pub feed: FeedConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICETIER__*)
            .add_source(Environment::with_prefix("PRICETIER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Builder pre-filled with a default for every key
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            .set_default("store.path", "./data/prices.db")?
            // Ingest defaults
            .set_default("ingest.interval_secs", 300)?
            .set_default("ingest.batch_size", 100)?
            .set_default("maintenance.interval_secs", 86_400)?
            // Rollup defaults
            .set_default("rollup.hourly_lookback_days", 90)?
            .set_default("rollup.daily_lookback_days", 5 * 365)?
            // Retention defaults
            .set_default("retention.raw_days", 8)?
            .set_default("retention.hourly_days", 90)?
            // Query tier boundaries
            .set_default("query.raw_max_age_days", 7)?
            .set_default("query.hourly_max_age_days", 90)?
            // Feed defaults
            .set_default(
                "feed.url",
                "https://prices.runescape.wiki/api/v1/osrs/latest",
            )?
            .set_default(
                "feed.user_agent",
                concat!("pricetier/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("feed.timeout_secs", 10)?
            .set_default("logging.json", false)?;
        Ok(builder)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ingest.interval_secs == 0 {
            bail!("ingest.interval_secs must be greater than zero");
        }
        if self.maintenance.interval_secs == 0 {
            bail!("maintenance.interval_secs must be greater than zero");
        }
        if self.ingest.batch_size == 0 {
            bail!("ingest.batch_size must be greater than zero");
        }
        if self.retention.raw_days <= 0 || self.retention.hourly_days <= 0 {
            bail!("retention horizons must be positive");
        }
        if self.retention.hourly_days <= self.retention.raw_days {
            bail!(
                "retention.hourly_days ({}) must exceed retention.raw_days ({})",
                self.retention.hourly_days,
                self.retention.raw_days
            );
        }
        if self.query.raw_max_age_days >= self.query.hourly_max_age_days {
            bail!("query.raw_max_age_days must be below query.hourly_max_age_days");
        }
        if self.rollup.hourly_lookback_days <= 0 || self.rollup.daily_lookback_days <= 0 {
            bail!("rollup lookbacks must be positive");
        }
        // Rows past the retention horizon must already sit inside a rollup window
        if self.retention.raw_days > self.rollup.hourly_lookback_days {
            bail!(
                "retention.raw_days ({}) must not exceed rollup.hourly_lookback_days ({})",
                self.retention.raw_days,
                self.rollup.hourly_lookback_days
            );
        }
        if self.retention.hourly_days > self.rollup.daily_lookback_days {
            bail!(
                "retention.hourly_days ({}) must not exceed rollup.daily_lookback_days ({})",
                self.retention.hourly_days,
                self.rollup.daily_lookback_days
            );
        }
        // A tier is only queried while its rows are retained
        if self.query.raw_max_age_days > self.retention.raw_days {
            bail!(
                "query.raw_max_age_days ({}) must not exceed retention.raw_days ({})",
                self.query.raw_max_age_days,
                self.retention.raw_days
            );
        }
        if self.query.hourly_max_age_days > self.retention.hourly_days {
            bail!(
                "query.hourly_max_age_days ({}) must not exceed retention.hourly_days ({})",
                self.query.hourly_max_age_days,
                self.retention.hourly_days
            );
        }
        if self.feed.user_agent.trim().is_empty() {
            bail!("feed.user_agent must not be empty");
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "store={} ingest={}s maintenance={}s raw_keep={}d hourly_keep={}d tiers={}d/{}d",
            self.store.path,
            self.ingest.interval_secs,
            self.maintenance.interval_secs,
            self.retention.raw_days,
            self.retention.hourly_days,
            self.query.raw_max_age_days,
            self.query.hourly_max_age_days
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<AppConfig> {
        let config = AppConfig::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    #[test]
    fn test_defaults_deserialize_and_validate() {
        let cfg = from_toml("").unwrap();
        assert_eq!(cfg.ingest.interval_secs, 300);
        assert_eq!(cfg.ingest.batch_size, 100);
        assert_eq!(cfg.maintenance.interval_secs, 86_400);
        assert_eq!(cfg.rollup.daily_lookback_days, 1825);
        assert_eq!(cfg.retention.raw_days, 8);
        assert_eq!(cfg.query.hourly_max_age_days, 90);
        assert_eq!(cfg.feed.timeout_secs, 10);
        assert!(!cfg.logging.json);
        cfg.validate().unwrap();
        assert!(cfg.digest().contains("ingest=300s"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let cfg = from_toml(
            r#"
            [ingest]
            interval_secs = 60

            [retention]
            raw_days = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ingest.interval_secs, 60);
        assert_eq!(cfg.ingest.batch_size, 100);
        assert_eq!(cfg.retention.raw_horizon(), chrono::Duration::days(3));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_interval = from_toml("[ingest]\ninterval_secs = 0").unwrap();
        assert!(zero_interval.validate().is_err());

        let inverted = from_toml("[retention]\nraw_days = 90\nhourly_days = 30").unwrap();
        assert!(inverted.validate().is_err());

        let zero_batch = from_toml("[ingest]\nbatch_size = 0").unwrap();
        assert!(zero_batch.validate().is_err());

        // Retention longer than the rollup lookback would trim unrolled rows
        let raw_past_lookback =
            from_toml("[retention]\nraw_days = 120\nhourly_days = 2000").unwrap();
        let err = raw_past_lookback.validate().unwrap_err().to_string();
        assert!(err.contains("rollup.hourly_lookback_days"), "{}", err);

        let hourly_past_lookback = from_toml("[retention]\nhourly_days = 2000").unwrap();
        let err = hourly_past_lookback.validate().unwrap_err().to_string();
        assert!(err.contains("rollup.daily_lookback_days"), "{}", err);

        // Query routing must not point at a trimmed tier
        let raw_query_past_retention = from_toml("[query]\nraw_max_age_days = 10").unwrap();
        let err = raw_query_past_retention.validate().unwrap_err().to_string();
        assert!(err.contains("retention.raw_days"), "{}", err);

        let hourly_query_past_retention =
            from_toml("[query]\nhourly_max_age_days = 120").unwrap();
        let err = hourly_query_past_retention.validate().unwrap_err().to_string();
        assert!(err.contains("retention.hourly_days"), "{}", err);

        // Raising every bound together is fine
        let widened = from_toml(
            "[retention]\nraw_days = 30\nhourly_days = 365\n\
             [rollup]\nhourly_lookback_days = 30\n\
             [query]\nraw_max_age_days = 30\nhourly_max_age_days = 365",
        )
        .unwrap();
        widened.validate().unwrap();
    }
}
