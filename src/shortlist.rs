//! Stock shortlisting & scoring
//!
//! Filters the universe by tier, fetches snapshots in bounded batches and
//! ranks the survivors by a composite popularity score. Lookups that fail,
//! time out or return unusable data only shrink the pool.

use crate::config::ScoringConfig;
use crate::market::{InstrumentUniverse, MarketDataProvider};
use crate::models::{Instrument, MarketSnapshot, QualityMetrics, ScoredInstrument, SkippedInstrument, TierSet};
use crate::Result;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Shortlist {
    pub candidates: Vec<ScoredInstrument>,
    /// Instruments excluded for missing or invalid market data
    pub dropped: Vec<SkippedInstrument>,
    /// Size of the tier-filtered pool before lookups
    pub considered: usize,
}

pub struct Shortlister {
    provider: Arc<dyn MarketDataProvider>,
    config: ScoringConfig,
    timeout: Duration,
}

impl Shortlister {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: ScoringConfig, timeout: Duration) -> Self {
        Self {
            provider,
            config,
            timeout,
        }
    }

    pub async fn shortlist(
        &self,
        universe: &InstrumentUniverse,
        tiers: &TierSet,
        sector_preferences: &BTreeSet<String>,
    ) -> Result<Shortlist> {
        let pool = universe.filter_by_tiers(tiers);
        let considered = pool.len();

        info!(
            tiers = %tiers,
            candidates = considered,
            provider = self.provider.name(),
            "Fetching market snapshots"
        );

        let (fetched, dropped) = self.fetch_snapshots(pool).await;

        if !dropped.is_empty() {
            // Partial data: never surfaced, only logged
            warn!(
                dropped = dropped.len(),
                remaining = fetched.len(),
                "Some instruments excluded for missing market data"
            );
        }

        let mut candidates = score(fetched, &self.config, sector_preferences);
        candidates.truncate(self.config.shortlist_size);

        info!(shortlisted = candidates.len(), "Shortlist ready");

        Ok(Shortlist {
            candidates,
            dropped,
            considered,
        })
    }

    /// Fetch every snapshot under the concurrency bound. Results come back in
    /// universe order regardless of completion order.
    async fn fetch_snapshots(
        &self,
        pool: Vec<Instrument>,
    ) -> (Vec<(Instrument, MarketSnapshot)>, Vec<SkippedInstrument>) {
        let semaphore = Arc::new(Semaphore::new(self.config.market_data_concurrency));
        let mut tasks = JoinSet::new();
        let mut pending: BTreeMap<usize, String> = BTreeMap::new();

        for (idx, instrument) in pool.into_iter().enumerate() {
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.timeout;
            pending.insert(idx, instrument.symbol.clone());

            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        match tokio::time::timeout(timeout, provider.snapshot(&instrument.symbol)).await {
                            Ok(Ok(snapshot)) if snapshot.is_usable() => Ok(snapshot),
                            Ok(Ok(_)) => Err("unusable snapshot (non-positive price)".to_string()),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(_) => Err(format!("timed out after {}s", timeout.as_secs_f64())),
                        }
                    }
                    Err(_) => Err("market data pool closed".to_string()),
                };
                (idx, instrument, outcome)
            });
        }

        let batch_timeout = self.config.market_data_batch_timeout();
        let deadline = tokio::time::Instant::now() + batch_timeout;
        let mut fetched = Vec::new();
        let mut dropped = Vec::new();

        loop {
            let joined = match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    warn!(
                        unfinished = pending.len(),
                        "Market data batch deadline reached"
                    );
                    break;
                }
            };

            match joined {
                Ok((idx, instrument, Ok(snapshot))) => {
                    pending.remove(&idx);
                    fetched.push((idx, instrument, snapshot));
                }
                Ok((idx, instrument, Err(reason))) => {
                    pending.remove(&idx);
                    debug!(symbol = %instrument.symbol, reason = %reason, "Snapshot unavailable");
                    dropped.push((
                        idx,
                        SkippedInstrument {
                            symbol: instrument.symbol,
                            reason,
                        },
                    ));
                }
                Err(e) => warn!("Market data task failed: {}", e),
            }
        }

        // Whatever is left never answered before the batch deadline
        for (idx, symbol) in pending {
            dropped.push((
                idx,
                SkippedInstrument {
                    symbol,
                    reason: format!("batch deadline of {}s reached", batch_timeout.as_secs_f64()),
                },
            ));
        }

        fetched.sort_by_key(|(idx, _, _)| *idx);
        dropped.sort_by_key(|(idx, _)| *idx);

        (
            fetched.into_iter().map(|(_, i, s)| (i, s)).collect(),
            dropped.into_iter().map(|(_, s)| s).collect(),
        )
    }
}

/// Fundamentals score in 0–100, relative to the largest market cap in the pool
pub fn quality_score(quality: &QualityMetrics, market_cap: f64, max_market_cap: f64) -> f64 {
    let pe_score = if (15.0..=25.0).contains(&quality.pe_ratio) {
        100.0
    } else {
        50.0
    };
    let dividend_score = (quality.dividend_yield * 10.0).clamp(0.0, 100.0);
    let stability_score = (100.0 - quality.volatility * 5.0).clamp(0.0, 100.0);
    let size_score = if max_market_cap > 0.0 {
        (market_cap / max_market_cap * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    pe_score * 0.3 + dividend_score * 0.2 + stability_score * 0.3 + size_score * 0.2
}

/// Min-max normalization; a degenerate range maps everything to 1.0.
fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if !range.is_finite() || range <= f64::EPSILON {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

/// Score the pool and sort by popularity, ties broken by symbol.
pub fn score(
    pool: Vec<(Instrument, MarketSnapshot)>,
    config: &ScoringConfig,
    sector_preferences: &BTreeSet<String>,
) -> Vec<ScoredInstrument> {
    if pool.is_empty() {
        return Vec::new();
    }

    let max_market_cap = pool
        .iter()
        .map(|(_, s)| s.market_cap)
        .fold(0.0_f64, f64::max);

    let qualities: Vec<f64> = pool
        .iter()
        .map(|(_, s)| quality_score(&s.quality, s.market_cap, max_market_cap))
        .collect();
    let caps: Vec<f64> = pool.iter().map(|(_, s)| s.market_cap).collect();
    let volumes: Vec<f64> = pool.iter().map(|(_, s)| s.volume).collect();

    let norm_caps = min_max(&caps);
    let norm_volumes = min_max(&volumes);
    let norm_qualities = min_max(&qualities);

    let preferred: BTreeSet<String> = sector_preferences
        .iter()
        .map(|s| s.trim().to_lowercase())
        .collect();

    let mut scored: Vec<ScoredInstrument> = pool
        .into_iter()
        .enumerate()
        .map(|(i, (instrument, snapshot))| {
            let mut popularity = 100.0
                * (config.market_cap_weight * norm_caps[i]
                    + config.volume_weight * norm_volumes[i]
                    + config.quality_weight * norm_qualities[i]);

            if preferred.contains(&instrument.sector.to_lowercase()) {
                popularity += config.sector_bias;
            }

            ScoredInstrument {
                instrument,
                snapshot,
                quality_score: qualities[i],
                popularity_score: popularity,
            }
        })
        .collect();

    scored.sort_by(rank_order);
    scored
}

/// Descending popularity, then ascending symbol
pub(crate) fn rank_order(a: &ScoredInstrument, b: &ScoredInstrument) -> Ordering {
    b.popularity_score
        .partial_cmp(&a.popularity_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.instrument.symbol.cmp(&b.instrument.symbol))
}
