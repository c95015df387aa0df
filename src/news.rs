// =============================================================================
// News Collaborator — newsdata.io headline poller
// =============================================================================
//
// Fetches the latest headlines for the configured query (default
// "cryptocurrency") and keeps the top N.  The API key comes from the
// `NEWSDATA_KEY` env var and is passed as a query parameter, never logged.
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::app_state::AppState;

/// One headline shown on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub pub_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    results: Option<Vec<NewsArticle>>,
}

// =============================================================================
// Store
// =============================================================================

/// Latest headlines, capped at the configured limit.
pub struct NewsStore {
    articles: RwLock<Vec<NewsArticle>>,
}

impl NewsStore {
    pub fn new() -> Self {
        Self {
            articles: RwLock::new(Vec::new()),
        }
    }

    pub fn replace(&self, articles: Vec<NewsArticle>) {
        *self.articles.write() = articles;
    }

    pub fn snapshot(&self) -> Vec<NewsArticle> {
        self.articles.read().clone()
    }
}

impl Default for NewsStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Client
// =============================================================================

/// Typed wrapper over the newsdata.io latest-headlines endpoint.
#[derive(Clone)]
pub struct NewsClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl NewsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// GET /api/1/latest — up to `limit` headlines for `query`.
    #[instrument(skip(self), name = "news::latest")]
    pub async fn latest(&self, query: &str, limit: usize) -> Result<Vec<NewsArticle>> {
        let url = format!("{}/latest", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("apikey", self.api_key.as_str()), ("q", query)])
            .send()
            .await
            .context("news request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("news request returned HTTP {status}");
        }

        let body: NewsResponse = resp.json().await.context("failed to decode news response")?;

        match body.results {
            Some(mut articles) => {
                articles.truncate(limit);
                Ok(articles)
            }
            None => bail!("no news available"),
        }
    }
}

// =============================================================================
// Poll loop
// =============================================================================

/// Refresh the headline store every `news_refresh_secs`.  The first tick
/// fires immediately.  Runs until aborted at shutdown.
pub async fn run_news_loop(state: Arc<AppState>, client: NewsClient) {
    let (refresh_secs, query, limit) = {
        let config = state.runtime_config.read();
        (
            config.news_refresh_secs,
            config.news_query.clone(),
            config.news_limit,
        )
    };
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(refresh_secs));

    loop {
        interval.tick().await;

        match client.latest(&query, limit).await {
            Ok(articles) => {
                debug!(count = articles.len(), "news refreshed");
                state.news.replace(articles);
                state.increment_version();
            }
            Err(e) => {
                warn!(error = %e, "news fetch failed");
                state.push_error("news", format!("{e:#}"));
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialise_news_response() {
        let json = r#"{
            "status": "success",
            "results": [
                { "title": "Bitcoin rallies", "link": "https://example.com/a", "source_id": "example", "pubDate": "2026-08-30 10:00:00" },
                { "title": "Ethereum upgrade", "link": "https://example.com/b" }
            ]
        }"#;
        let resp: NewsResponse = serde_json::from_str(json).unwrap();
        let results = resp.results.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Bitcoin rallies");
        assert_eq!(results[0].source_id.as_deref(), Some("example"));
        assert!(results[1].pub_date.is_none());
    }

    #[test]
    fn deserialise_response_without_results() {
        let json = r#"{ "status": "error" }"#;
        let resp: NewsResponse = serde_json::from_str(json).unwrap();
        assert!(resp.results.is_none());
    }

    #[test]
    fn store_replace_and_snapshot() {
        let store = NewsStore::new();
        assert!(store.snapshot().is_empty());

        store.replace(vec![NewsArticle {
            title: "Litecoin halving".to_string(),
            link: "https://example.com/c".to_string(),
            source_id: None,
            pub_date: None,
        }]);
        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].title, "Litecoin halving");
    }
}
