//! Paged web search.

use crate::config::SearchConfig;
use crate::error::{Result, SpecGenieError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const CUSTOM_SEARCH_URL: &str = "https://customsearch.googleapis.com/customsearch/v1";

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchItem {
    pub link: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

/// A keyword search returning one page of results at a time.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Results `start..start + num` (1-based) for `query`.
    async fn search(&self, query: &str, start: usize, num: usize) -> Result<Vec<SearchItem>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

/// Google Custom Search JSON API.
pub struct GoogleSearch {
    http: Client,
    key: String,
    engine_id: String,
}

impl GoogleSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SpecGenieError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            key: config.api_key.clone(),
            engine_id: config.engine_id.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    async fn search(&self, query: &str, start: usize, num: usize) -> Result<Vec<SearchItem>> {
        if self.key.is_empty() || self.engine_id.is_empty() {
            return Err(SpecGenieError::Config(
                "Web search requires SEARCH_API_KEY and SEARCH_ENGINE_ID.".to_string(),
            ));
        }

        let start = start.to_string();
        let num = num.to_string();
        let resp = self
            .http
            .get(CUSTOM_SEARCH_URL)
            .query(&[
                ("key", self.key.as_str()),
                ("q", query),
                ("cx", self.engine_id.as_str()),
                ("start", start.as_str()),
                ("num", num.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<SearchResponse>()
            .await?;
        Ok(resp.items)
    }
}
