//! Runtime configuration
//!
//! Defaults mirror the behaviour observed in production; every value can be
//! overridden through `ADVISOR_*` environment variables (a `.env` file is
//! loaded first when present).

use crate::error::AdvisorError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    pub strategy: StrategyConfig,
    pub scoring: ScoringConfig,
    pub allocation: AllocationConfig,
    pub enrichment: EnrichmentConfig,
    pub index: IndexConfig,
    /// Upper bound for any single call to an external collaborator
    pub collaborator_timeout_secs: u64,
}

/// Market-cap tier thresholds (currency units)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// T1: at or above this amount Mid caps are allowed
    pub mid_cap_threshold: f64,
    /// T2: at or above this amount Large caps are allowed
    pub large_cap_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub shortlist_size: usize,
    pub market_cap_weight: f64,
    pub volume_weight: f64,
    pub quality_weight: f64,
    /// Points added to the popularity score of preferred-sector instruments
    pub sector_bias: f64,
    pub market_data_concurrency: usize,
    /// Deadline for the whole snapshot batch; lookups still pending when it
    /// passes are dropped
    pub market_data_batch_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    pub basket_size: usize,
    /// Per-instrument cap as a fraction of the requested amount
    pub max_allocation_fraction: f64,
    pub fractional_shares: bool,
    /// Share of the allocation weight taken from the quality score; the rest
    /// comes from the popularity score
    pub quality_blend: f64,
    pub max_passes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub queries_per_instrument: usize,
    pub results_per_query: usize,
    pub min_article_chars: usize,
    pub market_label: String,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub knowledge_dir: PathBuf,
    pub chunk_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub rescan_interval_secs: u64,
    pub embedding_dimension: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mid_cap_threshold: 10_000.0,
            large_cap_threshold: 50_000.0,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            shortlist_size: 30,
            market_cap_weight: 0.35,
            volume_weight: 0.25,
            quality_weight: 0.40,
            sector_bias: 5.0,
            market_data_concurrency: 8,
            market_data_batch_timeout_ms: 10_000,
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            basket_size: 10,
            max_allocation_fraction: 0.25,
            fractional_shares: true,
            quality_blend: 0.5,
            max_passes: 5,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            queries_per_instrument: 3,
            results_per_query: 3,
            min_article_chars: 100,
            market_label: "India NSE".to_string(),
            workers: 4,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            knowledge_dir: PathBuf::from("knowledge_base"),
            chunk_tokens: 400,
            chunk_overlap_tokens: 50,
            rescan_interval_secs: 5,
            embedding_dimension: 512,
        }
    }
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            scoring: ScoringConfig::default(),
            allocation: AllocationConfig::default(),
            enrichment: EnrichmentConfig::default(),
            index: IndexConfig::default(),
            collaborator_timeout_secs: 15,
        }
    }
}

impl AdvisorConfig {
    /// Load configuration from the environment on top of the defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let d = Self::default();

        let config = Self {
            strategy: StrategyConfig {
                mid_cap_threshold: env_or("ADVISOR_MID_CAP_THRESHOLD", d.strategy.mid_cap_threshold)?,
                large_cap_threshold: env_or(
                    "ADVISOR_LARGE_CAP_THRESHOLD",
                    d.strategy.large_cap_threshold,
                )?,
            },
            scoring: ScoringConfig {
                shortlist_size: env_or("ADVISOR_SHORTLIST_SIZE", d.scoring.shortlist_size)?,
                market_cap_weight: env_or("ADVISOR_MARKET_CAP_WEIGHT", d.scoring.market_cap_weight)?,
                volume_weight: env_or("ADVISOR_VOLUME_WEIGHT", d.scoring.volume_weight)?,
                quality_weight: env_or("ADVISOR_QUALITY_WEIGHT", d.scoring.quality_weight)?,
                sector_bias: env_or("ADVISOR_SECTOR_BIAS", d.scoring.sector_bias)?,
                market_data_concurrency: env_or(
                    "ADVISOR_MARKET_DATA_CONCURRENCY",
                    d.scoring.market_data_concurrency,
                )?,
                market_data_batch_timeout_ms: env_or(
                    "ADVISOR_MARKET_DATA_BATCH_TIMEOUT_MS",
                    d.scoring.market_data_batch_timeout_ms,
                )?,
            },
            allocation: AllocationConfig {
                basket_size: env_or("ADVISOR_BASKET_SIZE", d.allocation.basket_size)?,
                max_allocation_fraction: env_or(
                    "ADVISOR_MAX_ALLOCATION_FRACTION",
                    d.allocation.max_allocation_fraction,
                )?,
                fractional_shares: env_or("ADVISOR_FRACTIONAL_SHARES", d.allocation.fractional_shares)?,
                quality_blend: env_or("ADVISOR_QUALITY_BLEND", d.allocation.quality_blend)?,
                max_passes: env_or("ADVISOR_MAX_PASSES", d.allocation.max_passes)?,
            },
            enrichment: EnrichmentConfig {
                queries_per_instrument: env_or(
                    "ADVISOR_QUERIES_PER_INSTRUMENT",
                    d.enrichment.queries_per_instrument,
                )?,
                results_per_query: env_or("ADVISOR_RESULTS_PER_QUERY", d.enrichment.results_per_query)?,
                min_article_chars: env_or("ADVISOR_MIN_ARTICLE_CHARS", d.enrichment.min_article_chars)?,
                market_label: env::var("ADVISOR_MARKET_LABEL").unwrap_or(d.enrichment.market_label),
                workers: env_or("ADVISOR_ENRICHMENT_WORKERS", d.enrichment.workers)?,
            },
            index: IndexConfig {
                knowledge_dir: env::var("ADVISOR_KNOWLEDGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(d.index.knowledge_dir),
                chunk_tokens: env_or("ADVISOR_CHUNK_TOKENS", d.index.chunk_tokens)?,
                chunk_overlap_tokens: env_or("ADVISOR_CHUNK_OVERLAP_TOKENS", d.index.chunk_overlap_tokens)?,
                rescan_interval_secs: env_or("ADVISOR_RESCAN_INTERVAL_SECS", d.index.rescan_interval_secs)?,
                embedding_dimension: env_or("ADVISOR_EMBEDDING_DIMENSION", d.index.embedding_dimension)?,
            },
            collaborator_timeout_secs: env_or(
                "ADVISOR_COLLABORATOR_TIMEOUT_SECS",
                d.collaborator_timeout_secs,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        if !(s.mid_cap_threshold > 0.0 && s.large_cap_threshold > s.mid_cap_threshold) {
            return Err(AdvisorError::Config(format!(
                "tier thresholds must satisfy 0 < T1 < T2 (got {} / {})",
                s.mid_cap_threshold, s.large_cap_threshold
            )));
        }

        let w = &self.scoring;
        if w.market_cap_weight < 0.0 || w.volume_weight < 0.0 || w.quality_weight < 0.0 {
            return Err(AdvisorError::Config("score weights must be non-negative".into()));
        }
        if w.shortlist_size == 0 || w.market_data_concurrency == 0 {
            return Err(AdvisorError::Config(
                "shortlist size and market data concurrency must be positive".into(),
            ));
        }
        if w.market_data_batch_timeout_ms == 0 {
            return Err(AdvisorError::Config("market data batch timeout must be positive".into()));
        }

        let a = &self.allocation;
        if !(a.max_allocation_fraction > 0.0 && a.max_allocation_fraction <= 1.0) {
            return Err(AdvisorError::Config(format!(
                "allocation cap must be in (0, 1], got {}",
                a.max_allocation_fraction
            )));
        }
        if !(0.0..=1.0).contains(&a.quality_blend) {
            return Err(AdvisorError::Config("quality blend must be in [0, 1]".into()));
        }
        if a.basket_size == 0 || a.max_passes == 0 {
            return Err(AdvisorError::Config("basket size and passes must be positive".into()));
        }

        let i = &self.index;
        if i.chunk_tokens == 0 || i.chunk_overlap_tokens >= i.chunk_tokens {
            return Err(AdvisorError::Config(
                "chunk overlap must be smaller than the chunk size".into(),
            ));
        }
        if i.embedding_dimension == 0 {
            return Err(AdvisorError::Config("embedding dimension must be positive".into()));
        }

        if self.enrichment.workers == 0 {
            return Err(AdvisorError::Config("enrichment needs at least one worker".into()));
        }

        Ok(())
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

impl ScoringConfig {
    pub fn market_data_batch_timeout(&self) -> Duration {
        Duration::from_millis(self.market_data_batch_timeout_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|_| {
            AdvisorError::Config(format!("{} has an invalid value: {}", key, raw))
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AdvisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.allocation.basket_size, 10);
        assert_eq!(config.scoring.shortlist_size, 30);
        assert!(config.allocation.fractional_shares);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = AdvisorConfig::default();
        config.strategy.large_cap_threshold = 5_000.0;
        assert!(matches!(config.validate(), Err(AdvisorError::Config(_))));
    }

    #[test]
    fn test_rejects_overlap_larger_than_chunk() {
        let mut config = AdvisorConfig::default();
        config.index.chunk_overlap_tokens = 400;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_batch_deadline() {
        let mut config = AdvisorConfig::default();
        assert_eq!(config.scoring.market_data_batch_timeout(), Duration::from_secs(10));
        config.scoring.market_data_batch_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(AdvisorError::Config(_))));
    }

    #[test]
    fn test_env_override_parses() {
        env::set_var("ADVISOR_TEST_ONLY_BASKET", "7");
        let value: usize = env_or("ADVISOR_TEST_ONLY_BASKET", 10).unwrap();
        assert_eq!(value, 7);

        env::set_var("ADVISOR_TEST_ONLY_BAD", "seven");
        let bad: Result<usize> = env_or("ADVISOR_TEST_ONLY_BAD", 10);
        assert!(bad.is_err());
    }
}
