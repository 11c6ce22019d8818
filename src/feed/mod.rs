//! Snapshot sources for the ingest task
//!
//! The scheduler only sees [`SnapshotSource`]. [`WikiPriceClient`] polls the
//! bulk `/latest` endpoint, which returns every item in one response.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::types::Quote;

/// Provider of full-market quote snapshots keyed by string item id
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &'static str;

    /// Fetch the latest quote of every item
    async fn fetch_snapshot(&self) -> Result<HashMap<String, Quote>>;
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    data: HashMap<String, Quote>,
}

/// Decode a `/latest` response body
pub fn parse_latest(body: &str) -> Result<HashMap<String, Quote>> {
    let resp: LatestResponse = serde_json::from_str(body)
        .map_err(|e| Error::Feed(format!("failed to parse latest prices: {}", e)))?;
    Ok(resp.data)
}

pub struct WikiPriceClient {
    client: reqwest::Client,
    url: String,
}

impl WikiPriceClient {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Feed(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl SnapshotSource for WikiPriceClient {
    fn name(&self) -> &'static str {
        "wiki-latest"
    }

    async fn fetch_snapshot(&self) -> Result<HashMap<String, Quote>> {
        debug!(url = %self.url, "📥 Fetching latest prices");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Feed(format!("failed to fetch prices: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Feed(format!(
                "API returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Feed(format!("failed to read response: {}", e)))?;
        let snapshot = parse_latest(&body)?;

        info!(items = snapshot.len(), "✅ Latest prices fetched");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latest_body() {
        let body = r#"{
            "data": {
                "4151": {"high": 1100, "highTime": 1700000000, "low": 1050, "lowTime": 1699999990},
                "2": {"high": 160, "highTime": 1700000001, "low": null, "lowTime": null}
            }
        }"#;
        let snapshot = parse_latest(body).unwrap();
        assert_eq!(snapshot.len(), 2);

        let whip = &snapshot["4151"];
        assert_eq!(whip.high, Some(1100));
        assert_eq!(whip.low_time, Some(1_699_999_990));
        assert_eq!(snapshot["2"].low, None);
    }

    #[test]
    fn test_parse_latest_rejects_garbage() {
        let err = parse_latest("<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, Error::Feed(_)));
    }

    #[test]
    fn test_client_reports_unreachable_feed() {
        let config = FeedConfig {
            url: "http://127.0.0.1:9/latest".to_string(),
            user_agent: "pricetier-test".to_string(),
            timeout_secs: 1,
        };
        let client = WikiPriceClient::new(&config).unwrap();
        assert_eq!(client.name(), "wiki-latest");

        // Nothing listens on the discard port
        let err = tokio_test::block_on(client.fetch_snapshot()).unwrap_err();
        assert!(matches!(err, Error::Feed(_)));
    }
}
