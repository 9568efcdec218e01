//! In-memory news collection and enrichment run status

use crate::models::NewsArticle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentStatus {
    pub state: RunState,
    pub articles: usize,
    pub verified_articles: usize,
    pub active_runs: usize,
    pub failed_instruments: Vec<String>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub configured: bool,
}

impl EnrichmentStatus {
    pub fn message(&self) -> String {
        if !self.configured {
            return "News search is not configured".to_string();
        }
        match self.state {
            RunState::Idle => "No news fetched yet".to_string(),
            RunState::InProgress => format!(
                "Fetching news in the background ({} articles so far)",
                self.articles
            ),
            RunState::Complete => format!(
                "{} articles ready ({} verified)",
                self.articles, self.verified_articles
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    articles: Vec<Arc<NewsArticle>>,
    active_runs: usize,
    completed_runs: usize,
    failed_instruments: BTreeSet<String>,
    last_completed_at: Option<DateTime<Utc>>,
}

/// Append-only article collection shared by all sessions
#[derive(Debug)]
pub struct NewsStore {
    inner: RwLock<Inner>,
    configured: bool,
}

impl NewsStore {
    pub fn new(configured: bool) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            configured,
        }
    }

    pub async fn append(&self, article: NewsArticle) {
        self.inner.write().await.articles.push(Arc::new(article));
    }

    pub async fn for_instrument(&self, symbol: &str) -> Vec<Arc<NewsArticle>> {
        self.inner
            .read()
            .await
            .articles
            .iter()
            .filter(|a| a.source_instrument.eq_ignore_ascii_case(symbol))
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Arc<NewsArticle>> {
        self.inner.read().await.articles.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.articles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Failures reported by runs that finished before this one are cleared
    /// once no run is in flight.
    pub(crate) async fn begin_run(&self) {
        let mut inner = self.inner.write().await;
        if inner.active_runs == 0 {
            inner.failed_instruments.clear();
        }
        inner.active_runs += 1;
    }

    pub(crate) async fn finish_run(&self, failed: Vec<String>) {
        let mut inner = self.inner.write().await;
        inner.active_runs = inner.active_runs.saturating_sub(1);
        inner.completed_runs += 1;
        inner.failed_instruments.extend(failed);
        inner.last_completed_at = Some(Utc::now());
    }

    pub async fn status(&self) -> EnrichmentStatus {
        let inner = self.inner.read().await;
        let state = if inner.active_runs > 0 {
            RunState::InProgress
        } else if inner.completed_runs > 0 {
            RunState::Complete
        } else {
            RunState::Idle
        };

        EnrichmentStatus {
            state,
            articles: inner.articles.len(),
            verified_articles: inner.articles.iter().filter(|a| a.verified).count(),
            active_runs: inner.active_runs,
            failed_instruments: inner.failed_instruments.iter().cloned().collect(),
            last_completed_at: inner.last_completed_at,
            configured: self.configured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn article(symbol: &str) -> NewsArticle {
        NewsArticle {
            article_id: Uuid::new_v4(),
            source_instrument: symbol.to_string(),
            instrument_name: format!("{} Ltd", symbol),
            title: "Title".to_string(),
            content: "Body".to_string(),
            url: format!("https://news.example/{}", symbol),
            relevance_score: 0.5,
            verified: true,
            query: "q".to_string(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let store = NewsStore::new(true);
        assert_eq!(store.status().await.state, RunState::Idle);

        store.begin_run().await;
        store.append(article("INFY")).await;
        assert_eq!(store.status().await.state, RunState::InProgress);

        store.finish_run(vec!["TCS".to_string()]).await;
        let status = store.status().await;
        assert_eq!(status.state, RunState::Complete);
        assert_eq!(status.articles, 1);
        assert_eq!(status.failed_instruments, vec!["TCS".to_string()]);
        assert!(status.message().contains("1 articles ready (1 verified)"));
    }

    #[tokio::test]
    async fn test_failures_reset_when_a_new_run_starts() {
        let store = NewsStore::new(true);
        store.begin_run().await;
        store.finish_run(vec!["TCS".to_string()]).await;

        store.begin_run().await;
        assert!(store.status().await.failed_instruments.is_empty());
        store.finish_run(vec!["INFY".to_string()]).await;
        assert_eq!(store.status().await.failed_instruments, vec!["INFY".to_string()]);
    }

    #[tokio::test]
    async fn test_overlapping_runs_keep_each_others_failures() {
        let store = NewsStore::new(true);
        store.begin_run().await;
        store.begin_run().await;
        store.finish_run(vec!["TCS".to_string()]).await;
        store.finish_run(vec!["INFY".to_string()]).await;

        assert_eq!(
            store.status().await.failed_instruments,
            vec!["INFY".to_string(), "TCS".to_string()]
        );
    }

    #[tokio::test]
    async fn test_message_counts_only_verified_articles() {
        let store = NewsStore::new(true);
        store.begin_run().await;
        store.append(article("INFY")).await;
        let mut uncited = article("TCS");
        uncited.verified = false;
        store.append(uncited).await;
        store.finish_run(Vec::new()).await;

        let status = store.status().await;
        assert_eq!(status.articles, 2);
        assert_eq!(status.verified_articles, 1);
        assert_eq!(status.message(), "2 articles ready (1 verified)");
    }

    #[tokio::test]
    async fn test_for_instrument_filters_case_insensitively() {
        let store = NewsStore::new(true);
        store.append(article("INFY")).await;
        store.append(article("TCS")).await;
        store.append(article("INFY")).await;

        assert_eq!(store.for_instrument("infy").await.len(), 2);
        assert_eq!(store.all().await.len(), 3);
    }
}
