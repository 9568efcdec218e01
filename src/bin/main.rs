//! Scripted end-to-end conversation against simulated collaborators

use async_trait::async_trait;
use investment_agent_orchestrator::{
    agent::Advisor,
    config::AdvisorConfig,
    enrichment::{NewsResult, NewsSearch, RunState},
    index::HashingEmbedder,
    market::{InstrumentUniverse, SimulatedMarketData},
    memory::Transcript,
    profile::{ProfileDraft, ProfileExtractor},
    router::QueryRouter,
    ConversationState, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const BANKING_STATEMENT: &str = "Salary credit ₹1,20,000. Rent, bills and card payments ₹48,000. Closing balance ₹3,40,000.";
const TRADING_HISTORY: &str = "42 trades, 26 profitable. Best: TCS +₹14,000. Worst: YESBANK -₹9,200. Mostly IT and banking.";

/// Stands in for the LLM extraction call
struct ScriptedExtractor;

#[async_trait]
impl ProfileExtractor for ScriptedExtractor {
    async fn extract(&self, _banking: &str, _trading: &str) -> Result<ProfileDraft> {
        Ok(serde_json::from_value(serde_json::json!({
            "banking_summary": {
                "monthly_income": "₹1,20,000",
                "monthly_expenses": "₹48,000",
                "current_balance": "₹3,40,000",
                "safe_investable_amount": null
            },
            "trading_summary": {
                "win_rate_percentage": "62%",
                "largest_win": "TCS +₹14,000",
                "largest_loss": "YESBANK -₹9,200",
                "preferred_sectors": ["IT", "Banking"],
                "total_trades": 42,
                "most_traded_stocks": ["TCS", "INFY", "HDFCBANK"]
            }
        }))?)
    }
}

/// Offline news source: one synthetic article per query
struct CannedNews;

#[async_trait]
impl NewsSearch for CannedNews {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<NewsResult>> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let slug: String = query
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();

        Ok(vec![NewsResult {
            title: format!("Analysts weigh in: {}", query),
            content: format!(
                "{}. Brokerages tracking the counter point to steady order inflows, improving margins and a supportive sector backdrop, while cautioning that valuations already price in much of the expected growth.",
                query
            ),
            url: format!("https://news.example.com/{}", slug),
            relevance_score: 0.8,
            cited: true,
        }])
    }
}

async fn say(router: &QueryRouter, state: &mut ConversationState, transcript: &mut Transcript, text: &str) {
    transcript.user(text);
    let reply = router.handle(state, text).await;
    transcript.advisor(&reply.message, reply.intent.map(|i| i.to_string()));
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Investment advisor demo starting");

    let knowledge_dir = std::env::temp_dir().join("advisor-demo-knowledge");
    let mut config = AdvisorConfig::default();
    config.index.knowledge_dir = knowledge_dir;
    config.index.rescan_interval_secs = 1;

    let embedder = Arc::new(HashingEmbedder::new(config.index.embedding_dimension));
    let (advisor, tasks) = Advisor::launch(
        config,
        InstrumentUniverse::builtin(),
        Arc::new(SimulatedMarketData::new()),
        Arc::new(ScriptedExtractor),
        Arc::new(CannedNews),
        embedder,
    )?;
    let advisor = Arc::new(advisor);
    let router = QueryRouter::new(Arc::clone(&advisor));

    let mut state = ConversationState::new();
    let mut transcript = Transcript::default();
    transcript.advisor(QueryRouter::greeting(), None);

    let profile = advisor.build_profile(BANKING_STATEMENT, TRADING_HISTORY).await?;
    let reply = router.confirm_documents(&mut state, profile);
    transcript.advisor(&reply.message, Some("documents".to_string()));

    say(&router, &mut state, &mut transcript, "What's my current balance?").await;
    say(&router, &mut state, &mut transcript, "I want to invest ₹50,000").await;
    say(&router, &mut state, &mut transcript, "What's my worst loss?").await;
    say(&router, &mut state, &mut transcript, "How good is my win rate?").await;

    // Let the background run finish so news questions have something to read
    for _ in 0..100 {
        if advisor.enrichment_status().await.state == RunState::Complete {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    say(&router, &mut state, &mut transcript, "Any latest news?").await;
    say(&router, &mut state, &mut transcript, "What are brokerages saying about order inflows and margins?").await;

    if let Some(symbol) = state.plan().and_then(|p| p.entries.first()).map(|e| e.instrument.symbol.clone()) {
        say(&router, &mut state, &mut transcript, &format!("Tell me more about {}", symbol)).await;
    }

    say(&router, &mut state, &mut transcript, "hmm").await;

    println!("\n=== CONVERSATION ===\n");
    println!("{}", transcript.formatted());

    let stats = advisor.index().stats().await;
    println!(
        "Index: {} documents, {} chunks ({} embedder)",
        stats.documents, stats.chunks, stats.embedder
    );

    tasks.abort();
    Ok(())
}
