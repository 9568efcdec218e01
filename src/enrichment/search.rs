//! News-search collaborator

use crate::error::AdvisorError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const TAVILY_URL: &str = "https://api.tavily.com/search";

const INCLUDE_DOMAINS: &[&str] = &[
    "economictimes.indiatimes.com",
    "moneycontrol.com",
    "business-standard.com",
    "livemint.com",
    "reuters.com",
];

const EXCLUDE_DOMAINS: &[&str] = &["twitter.com", "facebook.com"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsResult {
    pub title: String,
    pub content: String,
    pub url: String,
    pub relevance_score: f64,
    /// The collaborator cites this result as a source
    pub cited: bool,
}

#[async_trait]
pub trait NewsSearch: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the collaborator can be called at all (e.g. has credentials)
    fn is_configured(&self) -> bool {
        true
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<NewsResult>>;
}

/// Tavily search API
pub struct TavilyNewsSearch {
    client: Client,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    max_results: usize,
    include_domains: &'a [&'a str],
    exclude_domains: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

impl TavilyNewsSearch {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_key }
    }

    pub fn from_env(timeout: Duration) -> Self {
        Self::new(std::env::var("TAVILY_API_KEY").unwrap_or_default(), timeout)
    }
}

#[async_trait]
impl NewsSearch for TavilyNewsSearch {
    fn name(&self) -> &'static str {
        "tavily"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<NewsResult>> {
        if !self.is_configured() {
            return Err(AdvisorError::NewsSearch("TAVILY_API_KEY not configured".to_string()));
        }

        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            search_depth: "basic",
            max_results,
            include_domains: INCLUDE_DOMAINS,
            exclude_domains: EXCLUDE_DOMAINS,
        };

        let response = self
            .client
            .post(TAVILY_URL)
            .json(&request)
            .send()
            .await
            .map_err(|e| AdvisorError::NewsSearch(format!("Tavily request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Tavily error response: {}", body);
            return Err(AdvisorError::NewsSearch(format!("Tavily returned {}", status)));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| AdvisorError::NewsSearch(format!("Tavily parse error: {}", e)))?;

        debug!(query, results = parsed.results.len(), "Tavily search complete");

        Ok(parsed
            .results
            .into_iter()
            .map(|r| NewsResult {
                title: r.title,
                content: r.content,
                url: r.url,
                relevance_score: r.score.clamp(0.0, 1.0),
                // Every Tavily result is a retrieved, citable source
                cited: true,
            })
            .collect())
    }
}
