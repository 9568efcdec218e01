//! Background enrichment pipeline
//!
//! `trigger` enqueues a job and returns at once. A worker task drains the
//! queue; each job fans out across the plan's instruments (bounded by
//! `workers`), runs the news queries one attempt each, writes one file per
//! article into the knowledge directory and tells the semantic index about
//! it over the ingest channel.

pub mod search;
pub mod store;

pub use search::{NewsResult, NewsSearch, TavilyNewsSearch};
pub use store::{EnrichmentStatus, NewsStore, RunState};

use crate::config::EnrichmentConfig;
use crate::error::AdvisorError;
use crate::index::IngestEvent;
use crate::models::{AllocationPlan, Instrument, NewsArticle};
use crate::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct EnrichmentJob {
    run_id: Uuid,
    instruments: Vec<Instrument>,
}

/// Everything a worker needs to enrich one instrument
struct Worker {
    search: Arc<dyn NewsSearch>,
    store: Arc<NewsStore>,
    ingest: mpsc::Sender<IngestEvent>,
    config: EnrichmentConfig,
    knowledge_dir: PathBuf,
    timeout: Duration,
}

/// Handle for enqueueing enrichment runs
#[derive(Clone)]
pub struct EnrichmentPipeline {
    jobs: mpsc::UnboundedSender<EnrichmentJob>,
    store: Arc<NewsStore>,
    configured: bool,
}

impl EnrichmentPipeline {
    /// Spawn the worker task and return the enqueue handle.
    pub fn start(
        search: Arc<dyn NewsSearch>,
        store: Arc<NewsStore>,
        ingest: mpsc::Sender<IngestEvent>,
        config: EnrichmentConfig,
        knowledge_dir: PathBuf,
        timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<EnrichmentJob>();
        let configured = search.is_configured();

        let worker = Arc::new(Worker {
            search,
            store: Arc::clone(&store),
            ingest,
            config,
            knowledge_dir,
            timeout,
        });

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                Arc::clone(&worker).run(job).await;
            }
            debug!("Enrichment queue closed");
        });

        (
            Self {
                jobs: tx,
                store,
                configured,
            },
            handle,
        )
    }

    pub fn store(&self) -> &Arc<NewsStore> {
        &self.store
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Queue news enrichment for every instrument in the plan.
    ///
    /// Never waits for the run itself.
    pub async fn trigger(&self, plan: &AllocationPlan) -> Result<Uuid> {
        if !self.configured {
            return Err(AdvisorError::NewsSearch(
                "news search is not configured".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let instruments: Vec<Instrument> = plan.entries.iter().map(|e| e.instrument.clone()).collect();

        self.store.begin_run().await;
        if self.jobs.send(EnrichmentJob { run_id, instruments }).is_err() {
            self.store.finish_run(Vec::new()).await;
            return Err(AdvisorError::NewsSearch("enrichment worker is not running".to_string()));
        }

        info!(run = %run_id, instruments = plan.entries.len(), "Enrichment queued");
        Ok(run_id)
    }
}

impl Worker {
    async fn run(self: Arc<Self>, job: EnrichmentJob) {
        info!(run = %job.run_id, instruments = job.instruments.len(), "Enrichment run started");

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for instrument in job.instruments {
            let worker = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let saved = worker.enrich_instrument(&instrument).await;
                (instrument.symbol, saved)
            });
        }

        let mut failed = Vec::new();
        let mut total = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Some(saved))) => total += saved,
                Ok((symbol, None)) => failed.push(symbol),
                Err(e) => warn!("Enrichment task failed: {}", e),
            }
        }
        failed.sort();

        info!(
            run = %job.run_id,
            articles = total,
            failed = failed.len(),
            "Enrichment run complete"
        );
        self.store.finish_run(failed).await;
    }

    /// Returns the number of articles kept, or `None` when every query failed.
    async fn enrich_instrument(&self, instrument: &Instrument) -> Option<usize> {
        let queries = build_queries(instrument, &self.config.market_label, self.config.queries_per_instrument);
        let mut seen_urls = HashSet::new();
        let mut saved = 0;
        let mut failures = 0;

        for query in &queries {
            let results = match tokio::time::timeout(
                self.timeout,
                self.search.search(query, self.config.results_per_query),
            )
            .await
            {
                Ok(Ok(results)) => results,
                Ok(Err(e)) => {
                    warn!(symbol = %instrument.symbol, query = %query, "News search failed: {}", e);
                    failures += 1;
                    continue;
                }
                Err(_) => {
                    warn!(symbol = %instrument.symbol, query = %query, "News search timed out");
                    failures += 1;
                    continue;
                }
            };

            if results.is_empty() {
                debug!(symbol = %instrument.symbol, query = %query, "No results");
            }

            for result in results {
                if result.title.trim().is_empty()
                    || result.content.chars().count() < self.config.min_article_chars
                    || !seen_urls.insert(result.url.clone())
                {
                    continue;
                }

                saved += 1;
                let article = NewsArticle {
                    article_id: Uuid::new_v4(),
                    source_instrument: instrument.symbol.clone(),
                    instrument_name: instrument.name.clone(),
                    title: result.title.trim().to_string(),
                    content: result.content,
                    url: result.url,
                    relevance_score: result.relevance_score.clamp(0.0, 1.0),
                    verified: result.cited,
                    query: query.clone(),
                    fetched_at: Utc::now(),
                };

                self.persist(&article, saved).await;
                self.store.append(article).await;
            }
        }

        if failures == queries.len() && !queries.is_empty() {
            None
        } else {
            Some(saved)
        }
    }

    async fn persist(&self, article: &NewsArticle, n: usize) {
        let path = self.knowledge_dir.join(article_filename(article, n));

        if let Err(e) = write_article(&self.knowledge_dir, &path, &format_article(article, &self.config.market_label)).await {
            warn!(path = %path.display(), "Could not persist article: {}", e);
            return;
        }

        let event = IngestEvent {
            path,
            article_id: Some(article.article_id),
        };
        if self.ingest.send(event).await.is_err() {
            // The directory rescan still picks the file up
            warn!(symbol = %article.source_instrument, "Index channel closed");
        }
    }
}

/// Write to `<name>.txt.tmp`, then rename into place. The rescan only picks
/// up `.txt`/`.md`, so it never sees a partly written article.
async fn write_article(dir: &Path, path: &Path, body: &str) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let staging = path.with_extension("txt.tmp");
    tokio::fs::write(&staging, body).await?;
    if let Err(e) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }
    Ok(())
}

/// Search queries for one instrument, most specific first
pub fn build_queries(instrument: &Instrument, market_label: &str, limit: usize) -> Vec<String> {
    [
        format!("{} stock {} news", instrument.name, market_label),
        format!("{} {} latest news", instrument.name, instrument.symbol),
        format!("{} share price outlook analysts", instrument.symbol),
    ]
    .into_iter()
    .take(limit)
    .collect()
}

/// `<SYMBOL>_<unix-millis>_<n>.txt`, symbol reduced to filename-safe characters
pub fn article_filename(article: &NewsArticle, n: usize) -> String {
    let symbol: String = article
        .source_instrument
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}_{}.txt", symbol, article.fetched_at.timestamp_millis(), n)
}

pub fn format_article(article: &NewsArticle, market_label: &str) -> String {
    format!(
        "STOCK: {symbol} - {name}
SOURCE: News search
URL: {url}
VERIFIED: {verified}
RELEVANCE: {relevance:.2}

===== TITLE =====
{title}

===== CONTENT =====

{content}

===== METADATA =====
Stock Symbol: {symbol}
Company: {name}
Query: {query}
Fetched: {fetched}

===== KEYWORDS =====
{symbol}, {name}, {market}, stock, investment, market
",
        symbol = article.source_instrument,
        name = article.instrument_name,
        url = article.url,
        verified = if article.verified { "Yes" } else { "No" },
        relevance = article.relevance_score,
        title = article.title,
        content = article.content,
        query = article.query,
        fetched = article.fetched_at.format("%Y-%m-%d %H:%M:%S"),
        market = market_label,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AllocationEntry, MarketCapTier, RiskLevel, TierSet};
    use async_trait::async_trait;

    /// Three long results per query; queries mentioning SLOW hang
    struct ScriptedSearch;

    #[async_trait]
    impl NewsSearch for ScriptedSearch {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn search(&self, query: &str, max_results: usize) -> Result<Vec<NewsResult>> {
            if query.contains("SLOW") {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            let mut results: Vec<NewsResult> = (0..max_results)
                .map(|i| NewsResult {
                    title: format!("{} headline {}", query, i),
                    content: format!("{} ", query).repeat(20),
                    url: format!("https://news.example/{}/{}", query.replace(' ', "-"), i),
                    relevance_score: 0.8,
                    cited: i % 2 == 0,
                })
                .collect();
            // Too short to keep
            results.push(NewsResult {
                title: "stub".into(),
                content: "tiny".into(),
                url: "https://news.example/stub".into(),
                relevance_score: 0.1,
                cited: false,
            });
            Ok(results)
        }
    }

    fn plan(symbols: &[&str]) -> AllocationPlan {
        let entries = symbols
            .iter()
            .map(|s| AllocationEntry {
                instrument: Instrument {
                    symbol: s.to_string(),
                    name: format!("{} Ltd", s),
                    tier: MarketCapTier::Small,
                    sector: "IT".to_string(),
                },
                price: 100.0,
                shares_allocated: 10.0,
                amount_invested: 1_000.0,
                allocation_percent: 10.0,
                popularity_score: 50.0,
                quality_score: 50.0,
                risk_level: RiskLevel::Medium,
            })
            .collect();

        AllocationPlan {
            plan_id: Uuid::new_v4(),
            amount: 10_000.0,
            tiers: TierSet::new([MarketCapTier::Small]),
            entries,
            utilization: 1.0,
            skipped: Vec::new(),
            fractional: true,
            created_at: Utc::now(),
        }
    }

    async fn wait_complete(store: &NewsStore) -> EnrichmentStatus {
        for _ in 0..100 {
            let status = store.status().await;
            if status.state == RunState::Complete {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        store.status().await
    }

    #[tokio::test]
    async fn test_one_timeout_does_not_block_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NewsStore::new(true));
        let (ingest_tx, mut ingest_rx) = mpsc::channel(256);
        let config = EnrichmentConfig {
            queries_per_instrument: 1,
            ..EnrichmentConfig::default()
        };
        let (pipeline, _worker) = EnrichmentPipeline::start(
            Arc::new(ScriptedSearch),
            Arc::clone(&store),
            ingest_tx,
            config,
            dir.path().to_path_buf(),
            Duration::from_millis(200),
        );

        let symbols = ["A1", "A2", "A3", "A4", "SLOW", "A6", "A7", "A8", "A9", "A10"];
        let plan = plan(&symbols);
        let before = plan.clone();

        let started = std::time::Instant::now();
        pipeline.trigger(&plan).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));

        let status = wait_complete(&store).await;
        assert_eq!(status.state, RunState::Complete);
        assert_eq!(status.failed_instruments, vec!["SLOW".to_string()]);

        for symbol in symbols.iter().filter(|s| **s != "SLOW") {
            assert_eq!(store.for_instrument(symbol).await.len(), 3, "{}", symbol);
        }
        assert!(store.for_instrument("SLOW").await.is_empty());
        assert!(plan.same_allocation(&before));

        let mut events = 0;
        while ingest_rx.try_recv().is_ok() {
            events += 1;
        }
        assert_eq!(events, 27);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 27);
    }

    #[tokio::test]
    async fn test_verified_follows_citation_flag() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NewsStore::new(true));
        let (ingest_tx, _ingest_rx) = mpsc::channel(64);
        let (pipeline, _worker) = EnrichmentPipeline::start(
            Arc::new(ScriptedSearch),
            Arc::clone(&store),
            ingest_tx,
            EnrichmentConfig {
                queries_per_instrument: 1,
                ..EnrichmentConfig::default()
            },
            dir.path().to_path_buf(),
            Duration::from_secs(1),
        );

        pipeline.trigger(&plan(&["INFY"])).await.unwrap();
        wait_complete(&store).await;

        let articles = store.for_instrument("INFY").await;
        assert_eq!(articles.iter().filter(|a| a.verified).count(), 2);
        assert_eq!(articles.iter().filter(|a| !a.verified).count(), 1);
    }

    #[tokio::test]
    async fn test_article_lands_whole_with_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let knowledge = dir.path().join("kb");
        let path = knowledge.join("INFY_1_1.txt");
        let body = "STOCK: INFY - Infosys\n".repeat(50);

        write_article(&knowledge, &path, &body).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), body);
        let names: Vec<String> = std::fs::read_dir(&knowledge)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["INFY_1_1.txt".to_string()]);
    }

    #[test]
    fn test_queries_and_filenames() {
        let instrument = Instrument {
            symbol: "M&M".to_string(),
            name: "Mahindra & Mahindra".to_string(),
            tier: MarketCapTier::Large,
            sector: "Auto".to_string(),
        };
        let queries = build_queries(&instrument, "India NSE", 3);
        assert_eq!(queries[0], "Mahindra & Mahindra stock India NSE news");
        assert_eq!(build_queries(&instrument, "India NSE", 1).len(), 1);

        let article = NewsArticle {
            article_id: Uuid::new_v4(),
            source_instrument: "M&M".to_string(),
            instrument_name: instrument.name.clone(),
            title: "Auto sales surge".to_string(),
            content: "Body".to_string(),
            url: "https://news.example/mm".to_string(),
            relevance_score: 0.42,
            verified: true,
            query: queries[0].clone(),
            fetched_at: Utc::now(),
        };
        let name = article_filename(&article, 2);
        assert!(name.starts_with("M_M_"));
        assert!(name.ends_with("_2.txt"));

        let body = format_article(&article, "India NSE");
        assert!(body.starts_with("STOCK: M&M - Mahindra & Mahindra"));
        assert!(body.contains("VERIFIED: Yes"));
        assert!(body.contains("RELEVANCE: 0.42"));
    }
}
