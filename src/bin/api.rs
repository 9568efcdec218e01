use investment_agent_orchestrator::{
    agent::Advisor,
    api::start_server,
    config::AdvisorConfig,
    enrichment::{NewsSearch, TavilyNewsSearch},
    gemini::GeminiClient,
    index::{Embedder, GeminiEmbedder, HashingEmbedder},
    market::{HttpMarketData, InstrumentUniverse, MarketDataProvider, SimulatedMarketData},
    profile::GeminiProfileExtractor,
    state::InMemorySessionStore,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AdvisorConfig::from_env()?;
    let timeout = config.collaborator_timeout();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Investment Advisor - API Server");
    info!("Port: {}", api_port);

    let gemini = GeminiClient::new(std::env::var("GEMINI_API_KEY").unwrap_or_default(), timeout);
    if !gemini.is_configured() {
        warn!("GEMINI_API_KEY not set: document extraction will fail until it is configured");
    }

    let embedder: Arc<dyn Embedder> = if gemini.is_configured() {
        Arc::new(GeminiEmbedder::new(gemini.clone()))
    } else {
        Arc::new(HashingEmbedder::new(config.index.embedding_dimension))
    };

    let market: Arc<dyn MarketDataProvider> = match HttpMarketData::from_env(timeout) {
        Some(http) => Arc::new(http),
        None => {
            warn!("MARKET_DATA_BASE_URL not set: using simulated market data");
            Arc::new(SimulatedMarketData::new())
        }
    };

    let news = TavilyNewsSearch::from_env(timeout);
    if !news.is_configured() {
        warn!("TAVILY_API_KEY not set: news enrichment is disabled");
    }

    let universe = match std::env::var("ADVISOR_UNIVERSE_FILE") {
        Ok(path) if !path.trim().is_empty() => InstrumentUniverse::from_json_file(std::path::Path::new(&path))?,
        _ => InstrumentUniverse::builtin(),
    };

    let (advisor, _tasks) = Advisor::launch(
        config,
        universe,
        market,
        Arc::new(GeminiProfileExtractor::new(gemini)),
        Arc::new(news),
        embedder,
    )?;

    info!("Advisor initialized");
    info!("Starting API server...");

    start_server(Arc::new(advisor), Arc::new(InMemorySessionStore::new()), api_port).await?;

    Ok(())
}
