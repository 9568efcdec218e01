//! Advisor - runs the recommendation pipeline
//!
//! INPUT → STRATEGY → SHORTLIST → ALLOCATE → ENRICH (background)
//!
//! The first four stages run on the caller's task. Enrichment is only queued;
//! the plan is returned before any article is fetched.

use crate::allocation::AllocationEngine;
use crate::config::AdvisorConfig;
use crate::enrichment::{EnrichmentPipeline, EnrichmentStatus, NewsSearch, NewsStore};
use crate::index::{spawn_watcher, Embedder, SearchHit, SemanticIndex};
use crate::market::{InstrumentUniverse, MarketDataProvider};
use crate::models::{
    AllocationEntry, AllocationPlan, AmountSource, FinancialProfile, InvestmentRequest,
    NewsArticle, SkippedInstrument,
};
use crate::profile::{self, ProfileExtractor};
use crate::shortlist::Shortlister;
use crate::strategy::select_tiers;
use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the enrichment → index notification channel
const INGEST_CHANNEL_CAPACITY: usize = 256;

/// Outcome of one pass through the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub plan: Arc<AllocationPlan>,
    pub rationale: String,
    /// Instruments excluded during shortlisting for missing market data
    pub dropped: Vec<SkippedInstrument>,
    pub enrichment_run: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment_note: Option<String>,
    /// SHA-256 over the profile and request that produced this plan
    pub context_hash: String,
    pub reasoning_trace: Vec<String>,
    pub execution_time_ms: u64,
}

/// Background tasks owned by a running advisor
pub struct BackgroundTasks {
    pub enrichment: JoinHandle<()>,
    pub watcher: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn abort(&self) {
        self.enrichment.abort();
        self.watcher.abort();
    }
}

/// Owns the pipeline components. Shared by every session.
pub struct Advisor {
    config: AdvisorConfig,
    universe: InstrumentUniverse,
    shortlister: Shortlister,
    allocator: AllocationEngine,
    extractor: Arc<dyn ProfileExtractor>,
    enrichment: EnrichmentPipeline,
    index: Arc<SemanticIndex>,
}

impl Advisor {
    pub fn new(
        config: AdvisorConfig,
        universe: InstrumentUniverse,
        market: Arc<dyn MarketDataProvider>,
        extractor: Arc<dyn ProfileExtractor>,
        enrichment: EnrichmentPipeline,
        index: Arc<SemanticIndex>,
    ) -> Self {
        let shortlister = Shortlister::new(
            market,
            config.scoring.clone(),
            config.collaborator_timeout(),
        );
        let allocator = AllocationEngine::new(config.allocation.clone());

        Self {
            config,
            universe,
            shortlister,
            allocator,
            extractor,
            enrichment,
            index,
        }
    }

    /// Wire the index, its watcher and the enrichment worker together and
    /// spawn the background tasks. Must be called inside a tokio runtime.
    pub fn launch(
        config: AdvisorConfig,
        universe: InstrumentUniverse,
        market: Arc<dyn MarketDataProvider>,
        extractor: Arc<dyn ProfileExtractor>,
        news: Arc<dyn NewsSearch>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<(Self, BackgroundTasks)> {
        config.validate()?;

        let index = Arc::new(SemanticIndex::new(embedder, config.index.clone()));
        let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_CHANNEL_CAPACITY);
        let watcher = spawn_watcher(Arc::clone(&index), ingest_rx);

        let store = Arc::new(NewsStore::new(news.is_configured()));
        let (pipeline, enrichment) = EnrichmentPipeline::start(
            news,
            store,
            ingest_tx,
            config.enrichment.clone(),
            config.index.knowledge_dir.clone(),
            config.collaborator_timeout(),
        );

        info!(
            instruments = universe.len(),
            knowledge_dir = %config.index.knowledge_dir.display(),
            news_configured = pipeline.is_configured(),
            "Advisor initialized"
        );

        let advisor = Self::new(config, universe, market, extractor, pipeline, index);
        Ok((advisor, BackgroundTasks { enrichment, watcher }))
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    pub fn universe(&self) -> &InstrumentUniverse {
        &self.universe
    }

    pub fn index(&self) -> &Arc<SemanticIndex> {
        &self.index
    }

    pub fn news(&self) -> &Arc<NewsStore> {
        self.enrichment.store()
    }

    pub async fn enrichment_status(&self) -> EnrichmentStatus {
        self.enrichment.store().status().await
    }

    /// Extract and validate a profile from the two uploaded documents.
    pub async fn build_profile(&self, banking_text: &str, trading_text: &str) -> Result<FinancialProfile> {
        profile::build_profile(self.extractor.as_ref(), banking_text, trading_text).await
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.index.search(query, top_k).await
    }

    /// Run strategy, shortlisting and allocation, then queue enrichment.
    pub async fn recommend(
        &self,
        profile: &FinancialProfile,
        request: InvestmentRequest,
    ) -> Result<Recommendation> {
        let start_time = Instant::now();
        let mut reasoning_trace = Vec::new();
        let context_hash = compute_context_hash(profile, &request);

        info!(
            amount = request.amount(),
            source = ?request.source(),
            context = %context_hash,
            "Advisor: starting recommendation"
        );

        reasoning_trace.push(format!(
            "INPUT: ₹{:.0} ({})",
            request.amount(),
            match request.source() {
                AmountSource::Explicit => "stated by user",
                AmountSource::DerivedFromProfile => "derived from safe investable amount",
            }
        ));

        // === STRATEGY ===
        let strategy = select_tiers(request.amount(), &self.config.strategy)?;
        reasoning_trace.push(format!("STRATEGY: {} ({})", strategy.tiers, strategy.rationale));

        // === SHORTLIST ===
        let shortlist = self
            .shortlister
            .shortlist(
                &self.universe,
                &strategy.tiers,
                &profile.trading().sector_preferences,
            )
            .await?;

        reasoning_trace.push(format!(
            "SHORTLIST: {} scored of {} considered, {} without market data",
            shortlist.candidates.len(),
            shortlist.considered,
            shortlist.dropped.len()
        ));

        // === ALLOCATE ===
        let plan = Arc::new(self.allocator.allocate(
            &shortlist.candidates,
            &request,
            &strategy.tiers,
        )?);

        reasoning_trace.push(format!(
            "ALLOCATE: {} instruments, ₹{:.2} invested, utilization {:.1}%",
            plan.entries.len(),
            plan.total_invested(),
            plan.utilization * 100.0
        ));
        if !plan.skipped.is_empty() {
            reasoning_trace.push(format!(
                "ALLOCATE: skipped {}",
                plan.skipped
                    .iter()
                    .map(|s| s.symbol.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        // === ENRICH ===
        let (enrichment_run, enrichment_note) = match self.enrichment.trigger(&plan).await {
            Ok(run_id) => {
                reasoning_trace.push(format!("ENRICH: run {} queued", run_id));
                (Some(run_id), None)
            }
            Err(e) => {
                warn!("Enrichment not started: {}", e);
                reasoning_trace.push("ENRICH: skipped".to_string());
                (None, Some(e.to_string()))
            }
        };

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        debug!(plan_id = %plan.plan_id, execution_time_ms, "Recommendation complete");

        Ok(Recommendation {
            plan,
            rationale: strategy.rationale,
            dropped: shortlist.dropped,
            enrichment_run,
            enrichment_note,
            context_hash,
            reasoning_trace,
            execution_time_ms,
        })
    }
}

/// Stable hash of what the plan was computed from
pub fn compute_context_hash(profile: &FinancialProfile, request: &InvestmentRequest) -> String {
    let payload = serde_json::json!({
        "banking": profile.banking(),
        "trading": profile.trading(),
        "request": request,
    });

    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Markdown rendering of a plan for the chat surface.
pub fn summarize_plan(plan: &AllocationPlan) -> String {
    let mut out = String::new();

    out.push_str("### Recommended Basket\n\n");
    out.push_str(&format!(
        "**₹{:.2}** of **₹{:.0}** allocated across **{}** stock(s) • Tiers: {} • Utilization: {:.1}%\n\n",
        plan.total_invested(),
        plan.amount,
        plan.entries.len(),
        plan.tiers,
        plan.utilization * 100.0
    ));

    out.push_str("| Stock | Tier | Sector | Risk | Price | Shares | Invested | Weight |\n");
    out.push_str("|-------|------|--------|------|-------|--------|----------|--------|\n");

    for entry in &plan.entries {
        out.push_str(&format!(
            "| {} | {} | {} | {} | ₹{:.2} | {} | ₹{:.2} | {:.1}% |\n",
            entry.instrument.symbol,
            entry.instrument.tier,
            entry.instrument.sector,
            entry.risk_level,
            entry.price,
            format_shares(entry.shares_allocated, plan.fractional),
            entry.amount_invested,
            entry.allocation_percent
        ));
    }

    if !plan.skipped.is_empty() {
        out.push_str("\n**Skipped**\n\n");
        for skipped in &plan.skipped {
            out.push_str(&format!("- {}: {}\n", skipped.symbol, skipped.reason));
        }
    }

    let residual = plan.amount - plan.total_invested();
    if residual >= 0.01 {
        out.push_str(&format!("\nUninvested cash: ₹{:.2}\n", residual));
    }

    out
}

/// Detail card for one basket instrument, with any news gathered so far.
pub fn instrument_card(entry: &AllocationEntry, articles: &[Arc<NewsArticle>]) -> String {
    let mut out = format!(
        "### {} ({})\n\n- Sector: {}\n- Tier: {}\n- Price: ₹{:.2}\n- Shares: {}\n- Invested: ₹{:.2} ({:.1}% of the basket)\n- Popularity score: {:.1}\n- Quality score: {:.1}\n- Risk: {}\n",
        entry.instrument.name,
        entry.instrument.symbol,
        entry.instrument.sector,
        entry.instrument.tier,
        entry.price,
        format_shares(entry.shares_allocated, entry.shares_allocated.fract() != 0.0),
        entry.amount_invested,
        entry.allocation_percent,
        entry.popularity_score,
        entry.quality_score,
        entry.risk_level
    );

    if articles.is_empty() {
        out.push_str("\nNo news collected for this stock yet.\n");
    } else {
        out.push_str("\n**Latest news**\n\n");
        for article in articles.iter().rev().take(3) {
            out.push_str(&format!("- {} ({})\n", article.title, article.url));
        }
    }

    out
}

fn format_shares(shares: f64, fractional: bool) -> String {
    if fractional {
        format!("{:.4}", shares)
    } else {
        format!("{:.0}", shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::NewsResult;
    use crate::error::AdvisorError;
    use crate::index::HashingEmbedder;
    use crate::market::SimulatedMarketData;
    use crate::profile::{validate_draft, ProfileDraft};
    use async_trait::async_trait;

    struct FixedExtractor;

    #[async_trait]
    impl ProfileExtractor for FixedExtractor {
        async fn extract(&self, _banking: &str, _trading: &str) -> Result<ProfileDraft> {
            Ok(serde_json::from_value(test_draft())?)
        }
    }

    struct NoNews;

    #[async_trait]
    impl NewsSearch for NoNews {
        fn name(&self) -> &'static str {
            "none"
        }

        fn is_configured(&self) -> bool {
            false
        }

        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<NewsResult>> {
            Err(AdvisorError::NewsSearch("not configured".into()))
        }
    }

    fn test_draft() -> serde_json::Value {
        serde_json::json!({
            "banking_summary": {
                "monthly_income": 120000,
                "monthly_expenses": 60000,
                "current_balance": 400000,
                "safe_investable_amount": 50000
            },
            "trading_summary": {
                "win_rate": 0.55,
                "best_trade": "INFY +₹12,000",
                "worst_trade": "YESBANK -₹8,500",
                "sector_preferences": ["IT"],
                "risk_behavior": "moderate"
            }
        })
    }

    fn create_test_advisor(dir: &std::path::Path) -> (Advisor, BackgroundTasks) {
        let mut config = AdvisorConfig::default();
        config.index.knowledge_dir = dir.to_path_buf();

        Advisor::launch(
            config,
            InstrumentUniverse::builtin(),
            Arc::new(SimulatedMarketData::new()),
            Arc::new(FixedExtractor),
            Arc::new(NoNews),
            Arc::new(HashingEmbedder::new(256)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_recommend_records_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let (advisor, tasks) = create_test_advisor(dir.path());

        let profile = advisor.build_profile("bank", "trades").await.unwrap();
        let request = InvestmentRequest::from_profile(&profile).unwrap();
        let rec = advisor.recommend(&profile, request).await.unwrap();
        tasks.abort();

        let stages: Vec<&str> = rec
            .reasoning_trace
            .iter()
            .filter_map(|line| line.split(':').next())
            .collect();
        for stage in ["INPUT", "STRATEGY", "SHORTLIST", "ALLOCATE", "ENRICH"] {
            assert!(stages.contains(&stage), "missing {}", stage);
        }

        assert!(!rec.plan.entries.is_empty());
        assert!(rec.plan.total_invested() <= 50_000.0 + 1e-6);
        // News search is unconfigured: the plan still comes back
        assert!(rec.enrichment_run.is_none());
        assert!(rec.enrichment_note.is_some());
    }

    #[tokio::test]
    async fn test_recommend_rejects_invalid_amount_before_any_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let (advisor, tasks) = create_test_advisor(dir.path());
        let profile = validate_draft(&serde_json::from_value(test_draft()).unwrap()).unwrap();

        // A request can only be built with a positive amount
        assert!(matches!(
            InvestmentRequest::explicit(0.0),
            Err(AdvisorError::InvalidAmount(_))
        ));

        let rec = advisor
            .recommend(&profile, InvestmentRequest::explicit(5_000.0).unwrap())
            .await
            .unwrap();
        tasks.abort();

        assert_eq!(rec.plan.tiers.to_string(), "SMALL");
    }

    #[tokio::test]
    async fn test_plan_table_and_card_show_risk() {
        let dir = tempfile::tempdir().unwrap();
        let (advisor, tasks) = create_test_advisor(dir.path());
        let profile = validate_draft(&serde_json::from_value(test_draft()).unwrap()).unwrap();
        let rec = advisor
            .recommend(&profile, InvestmentRequest::explicit(40_000.0).unwrap())
            .await
            .unwrap();
        tasks.abort();

        let table = summarize_plan(&rec.plan);
        assert!(table.contains("| Stock | Tier | Sector | Risk |"));
        let entry = &rec.plan.entries[0];
        let row = table
            .lines()
            .find(|line| line.starts_with(&format!("| {} |", entry.instrument.symbol)))
            .unwrap();
        assert!(row.contains(&format!("| {} |", entry.risk_level)));

        let card = instrument_card(entry, &[]);
        assert!(card.contains(&format!("- Risk: {}\n", entry.risk_level)));
    }

    #[test]
    fn test_context_hash_is_stable() {
        let profile = validate_draft(&serde_json::from_value(test_draft()).unwrap()).unwrap();
        let request = InvestmentRequest::explicit(50_000.0).unwrap();

        let a = compute_context_hash(&profile, &request);
        let b = compute_context_hash(&profile, &request);
        let c = compute_context_hash(&profile, &InvestmentRequest::explicit(60_000.0).unwrap());

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
