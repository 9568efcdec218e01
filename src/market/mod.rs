//! Market-data collaborator
//!
//! A provider answers one symbol at a time; the shortlister treats any
//! per-symbol failure as exclusion of that instrument.

pub mod universe;

pub use universe::InstrumentUniverse;

use crate::error::AdvisorError;
use crate::models::{MarketSnapshot, QualityMetrics};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::env;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot>;
}

//
// ================= HTTP provider =================
//

/// Quote service client: `GET {base}/api/v1/quote/{symbol}`
pub struct HttpMarketData {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(alias = "current_price")]
    price: f64,
    volume: f64,
    #[serde(alias = "marketCap")]
    market_cap: f64,
    #[serde(default, alias = "peRatio")]
    pe_ratio: Option<f64>,
    #[serde(default, alias = "dividendYield")]
    dividend_yield: Option<f64>,
    #[serde(default)]
    volatility: Option<f64>,
}

impl HttpMarketData {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `None` when `MARKET_DATA_BASE_URL` is unset
    pub fn from_env(timeout: Duration) -> Option<Self> {
        let base_url = env::var("MARKET_DATA_BASE_URL").ok()?;
        Self::new(&base_url, timeout).ok()
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        let url = format!("{}/api/v1/quote/{}", self.base_url, symbol);

        let response = self.client.get(&url).send().await.map_err(|e| {
            AdvisorError::MarketData(format!("quote request failed for {}: {}", symbol, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdvisorError::MarketData(format!(
                "quote service returned {} for {}",
                status, symbol
            )));
        }

        let quote: QuoteResponse = response
            .json()
            .await
            .map_err(|e| AdvisorError::MarketData(format!("invalid quote for {}: {}", symbol, e)))?;

        Ok(MarketSnapshot {
            price: quote.price,
            volume: quote.volume,
            market_cap: quote.market_cap,
            quality: QualityMetrics {
                pe_ratio: quote.pe_ratio.unwrap_or(0.0),
                dividend_yield: quote.dividend_yield.unwrap_or(0.0),
                volatility: quote.volatility.unwrap_or(0.0),
            },
        })
    }
}

//
// ================= Simulated provider =================
//

/// Deterministic quotes derived from a hash of the symbol.
///
/// Same symbol, same snapshot, every run. Price bands follow typical NSE
/// trading ranges; unknown symbols land in 100–500.
pub struct SimulatedMarketData {
    price_bands: HashMap<&'static str, (f64, f64)>,
    unavailable: HashSet<String>,
    latency: Option<Duration>,
}

const PRICE_BANDS: &[(&str, f64, f64)] = &[
    ("RELIANCE", 2000.0, 3000.0),
    ("TCS", 3000.0, 4500.0),
    ("HDFCBANK", 1400.0, 1800.0),
    ("INFY", 1300.0, 1800.0),
    ("ICICIBANK", 900.0, 1300.0),
    ("HINDUNILVR", 2400.0, 2900.0),
    ("ITC", 400.0, 500.0),
    ("SBIN", 600.0, 900.0),
    ("BHARTIARTL", 1300.0, 1700.0),
    ("KOTAKBANK", 1600.0, 2000.0),
    ("LT", 3200.0, 3800.0),
    ("HCLTECH", 1400.0, 1800.0),
    ("AXISBANK", 1000.0, 1300.0),
    ("ASIANPAINT", 2800.0, 3400.0),
    ("MARUTI", 10000.0, 12500.0),
    ("SUNPHARMA", 1400.0, 1700.0),
    ("TITAN", 3000.0, 3600.0),
    ("ULTRACEMCO", 9000.0, 11000.0),
    ("NESTLEIND", 2200.0, 2600.0),
    ("WIPRO", 500.0, 650.0),
    ("BAJFINANCE", 6000.0, 7500.0),
    ("M&M", 2300.0, 2900.0),
    ("POWERGRID", 250.0, 320.0),
    ("NTPC", 300.0, 380.0),
    ("ONGC", 220.0, 280.0),
    ("COALINDIA", 380.0, 450.0),
    ("ADANIPORTS", 700.0, 950.0),
    ("ADANIGREEN", 800.0, 1200.0),
    ("ABB", 5000.0, 7000.0),
    ("GODREJCP", 1100.0, 1400.0),
    ("PIDILITIND", 2500.0, 3200.0),
    ("BERGEPAINT", 450.0, 600.0),
    ("SIEMENS", 4500.0, 6500.0),
    ("BOSCHLTD", 28000.0, 34000.0),
    ("MUTHOOTFIN", 1600.0, 2000.0),
    ("ASTRAL", 1700.0, 2100.0),
    ("FEDERALBNK", 150.0, 210.0),
    ("IDFCFIRSTB", 60.0, 90.0),
    ("ASHOKLEY", 170.0, 240.0),
    ("NMDC", 180.0, 260.0),
    ("LUPIN", 1500.0, 2100.0),
    ("VOLTAS", 1200.0, 1700.0),
    ("ZOMATO", 180.0, 250.0),
    ("PAYTM", 400.0, 600.0),
    ("IRCTC", 700.0, 900.0),
    ("CDSL", 200.0, 400.0),
    ("POLICYBZR", 150.0, 300.0),
    ("TATAMOTORS", 900.0, 1200.0),
    ("JUBLFOOD", 500.0, 650.0),
    ("PVR", 200.0, 400.0),
    ("LICI", 100.0, 200.0),
    ("CASTROLIND", 150.0, 300.0),
    ("ATUL", 200.0, 400.0),
    ("ANANDRATHI", 150.0, 350.0),
    ("DATAPATTNS", 180.0, 320.0),
    ("BLS", 100.0, 250.0),
    ("AEGISVOPAK", 120.0, 280.0),
    ("ABREL", 140.0, 300.0),
    ("AARTIIND", 180.0, 350.0),
    ("BANDHANBNK", 200.0, 400.0),
];

const DEFAULT_BAND: (f64, f64) = (100.0, 500.0);

impl SimulatedMarketData {
    pub fn new() -> Self {
        Self {
            price_bands: PRICE_BANDS
                .iter()
                .map(|(symbol, lo, hi)| (*symbol, (*lo, *hi)))
                .collect(),
            unavailable: HashSet::new(),
            latency: None,
        }
    }

    /// Symbols that fail lookups, for exercising partial-data paths
    pub fn with_unavailable<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unavailable = symbols
            .into_iter()
            .map(|s| s.into().to_uppercase())
            .collect();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn quote(&self, symbol: &str) -> MarketSnapshot {
        let digest = Sha256::digest(symbol.as_bytes());
        // Eight independent draws in [0, 1) from the digest words
        let draws: Vec<f64> = digest
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64 / (u32::MAX as f64 + 1.0))
            .collect();
        let between = |i: usize, lo: f64, hi: f64| lo + draws[i] * (hi - lo);

        let (lo, hi) = self
            .price_bands
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_BAND);
        let price = round2(between(0, lo, hi));
        let change_pct = between(1, -5.0, 5.0);
        let volatility = change_pct.abs() * between(2, 1.5, 2.5);

        MarketSnapshot {
            price,
            volume: between(3, 1_000_000.0, 50_000_000.0).floor(),
            market_cap: (price * between(4, 10_000_000.0, 100_000_000.0)).floor(),
            quality: QualityMetrics {
                pe_ratio: round2(between(5, 15.0, 35.0)),
                dividend_yield: round2(between(6, 0.0, 4.0)),
                volatility: round2(volatility),
            },
        }
    }
}

impl Default for SimulatedMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for SimulatedMarketData {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let symbol = symbol.trim().to_uppercase();
        if self.unavailable.contains(&symbol) {
            return Err(AdvisorError::MarketData(format!("no quote for {}", symbol)));
        }

        let snapshot = self.quote(&symbol);
        debug!(symbol = %symbol, price = snapshot.price, "Simulated quote");
        Ok(snapshot)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
