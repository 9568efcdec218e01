//! Core data models for the investment advisor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AdvisorError;
use crate::Result;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskBehavior {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskBehavior {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "conservative" | "low" => Some(RiskBehavior::Conservative),
            "moderate" | "medium" | "balanced" => Some(RiskBehavior::Moderate),
            "aggressive" | "high" => Some(RiskBehavior::Aggressive),
            _ => None,
        }
    }

    /// Win-rate heuristic used when the extractor gave no usable label
    pub fn from_win_rate(win_rate: f64) -> Self {
        if win_rate < 0.5 {
            RiskBehavior::Conservative
        } else if win_rate <= 0.7 {
            RiskBehavior::Moderate
        } else {
            RiskBehavior::Aggressive
        }
    }
}

/// Per-instrument risk band derived from price volatility (percent)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_volatility(volatility: f64) -> Self {
        if volatility < 5.0 {
            RiskLevel::Low
        } else if volatility < 15.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MarketCapTier {
    Small,
    Mid,
    Large,
}

impl MarketCapTier {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "small" | "smallcap" | "small_cap" | "small-cap" => Some(MarketCapTier::Small),
            "mid" | "midcap" | "mid_cap" | "mid-cap" => Some(MarketCapTier::Mid),
            "large" | "largecap" | "large_cap" | "large-cap" => Some(MarketCapTier::Large),
            _ => None,
        }
    }
}

/// Ordered set of market-cap tiers allowed for a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TierSet(BTreeSet<MarketCapTier>);

impl TierSet {
    pub fn new(tiers: impl IntoIterator<Item = MarketCapTier>) -> Self {
        Self(tiers.into_iter().collect())
    }

    pub fn contains(&self, tier: MarketCapTier) -> bool {
        self.0.contains(&tier)
    }

    pub fn iter(&self) -> impl Iterator<Item = MarketCapTier> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_subset(&self, other: &TierSet) -> bool {
        self.0.is_subset(&other.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AmountSource {
    Explicit,
    DerivedFromProfile,
}

//
// ================= Profile =================
//

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BankingSummary {
    pub monthly_income: f64,
    pub monthly_expenses: f64,
    pub current_balance: f64,
    pub safe_investable_amount: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TradingSummary {
    /// Fraction of profitable trades in [0, 1]
    pub win_rate: f64,
    pub best_trade: String,
    pub worst_trade: String,
    pub sector_preferences: BTreeSet<String>,
    pub risk_behavior: RiskBehavior,
    pub total_trades: Option<u32>,
    pub net_pnl: Option<f64>,
    pub most_traded: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileWarning {
    SafeAmountClamped { reported: f64, clamped_to: f64 },
    SafeAmountDerived { amount: f64 },
    WinRateRescaled { reported: f64 },
    RiskBehaviorInferred,
}

/// Validated, immutable view of the user's finances.
///
/// Only `profile::validate_draft` constructs one.
#[derive(Debug, Clone, Serialize)]
pub struct FinancialProfile {
    banking: BankingSummary,
    trading: TradingSummary,
    warnings: Vec<ProfileWarning>,
    created_at: DateTime<Utc>,
}

impl FinancialProfile {
    pub(crate) fn new(
        banking: BankingSummary,
        trading: TradingSummary,
        warnings: Vec<ProfileWarning>,
    ) -> Self {
        Self {
            banking,
            trading,
            warnings,
            created_at: Utc::now(),
        }
    }

    pub fn banking(&self) -> &BankingSummary {
        &self.banking
    }

    pub fn trading(&self) -> &TradingSummary {
        &self.trading
    }

    pub fn warnings(&self) -> &[ProfileWarning] {
        &self.warnings
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn was_clamped(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, ProfileWarning::SafeAmountClamped { .. }))
    }
}

//
// ================= Request =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct InvestmentRequest {
    amount: f64,
    source: AmountSource,
}

impl InvestmentRequest {
    pub fn new(amount: f64, source: AmountSource) -> Result<Self> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(AdvisorError::InvalidAmount(format!(
                "amount must be a positive number, got {}",
                amount
            )));
        }
        Ok(Self { amount, source })
    }

    pub fn explicit(amount: f64) -> Result<Self> {
        Self::new(amount, AmountSource::Explicit)
    }

    pub fn from_profile(profile: &FinancialProfile) -> Result<Self> {
        Self::new(
            profile.banking().safe_investable_amount,
            AmountSource::DerivedFromProfile,
        )
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn source(&self) -> AmountSource {
        self.source
    }
}

//
// ================= Instruments =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub name: String,
    pub tier: MarketCapTier,
    pub sector: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    pub pe_ratio: f64,
    pub dividend_yield: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub price: f64,
    pub volume: f64,
    pub market_cap: f64,
    pub quality: QualityMetrics,
}

impl MarketSnapshot {
    pub fn is_usable(&self) -> bool {
        self.price.is_finite()
            && self.price > 0.0
            && self.volume.is_finite()
            && self.volume >= 0.0
            && self.market_cap.is_finite()
            && self.market_cap >= 0.0
    }
}

/// Shortlist member: instrument, its snapshot and the pool-relative scores
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoredInstrument {
    pub instrument: Instrument,
    pub snapshot: MarketSnapshot,
    /// 0–100
    pub quality_score: f64,
    /// 0–100 plus any sector bias
    pub popularity_score: f64,
}

//
// ================= Allocation =================
//

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AllocationEntry {
    pub instrument: Instrument,
    pub price: f64,
    pub shares_allocated: f64,
    pub amount_invested: f64,
    pub allocation_percent: f64,
    pub popularity_score: f64,
    pub quality_score: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkippedInstrument {
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationPlan {
    pub plan_id: Uuid,
    pub amount: f64,
    pub tiers: TierSet,
    pub entries: Vec<AllocationEntry>,
    pub utilization: f64,
    pub skipped: Vec<SkippedInstrument>,
    pub fractional: bool,
    pub created_at: DateTime<Utc>,
}

impl AllocationPlan {
    pub fn total_invested(&self) -> f64 {
        self.entries.iter().map(|e| e.amount_invested).sum()
    }

    pub fn entry(&self, symbol: &str) -> Option<&AllocationEntry> {
        self.entries
            .iter()
            .find(|e| e.instrument.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Same allocation, ignoring identity and timestamps
    pub fn same_allocation(&self, other: &AllocationPlan) -> bool {
        self.amount == other.amount
            && self.tiers == other.tiers
            && self.entries == other.entries
            && self.skipped == other.skipped
            && self.utilization == other.utilization
    }
}

//
// ================= News & Index =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsArticle {
    pub article_id: Uuid,
    pub source_instrument: String,
    pub instrument_name: String,
    pub title: String,
    pub content: String,
    pub url: String,
    /// In [0, 1]
    pub relevance_score: f64,
    pub verified: bool,
    pub query: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexedChunk {
    pub document_id: String,
    pub text: String,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub source_article: Option<Uuid>,
    /// Monotonic ingestion order; larger is more recent
    pub sequence: u64,
    pub ingested_at: DateTime<Utc>,
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Greeting,
    Collecting,
    Analyzing,
    Active,
}

/// Per-session conversation state; only the query router changes it
#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub(crate) stage: Stage,
    pub(crate) profile: Option<Arc<FinancialProfile>>,
    pub(crate) plan: Option<Arc<AllocationPlan>>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            stage: Stage::Greeting,
            profile: None,
            plan: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn profile(&self) -> Option<&FinancialProfile> {
        self.profile.as_deref()
    }

    pub fn plan(&self) -> Option<&AllocationPlan> {
        self.plan.as_deref()
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RiskBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskBehavior::Conservative => "Conservative",
            RiskBehavior::Moderate => "Moderate",
            RiskBehavior::Aggressive => "Aggressive",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for MarketCapTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketCapTier::Small => "Small",
            MarketCapTier::Mid => "Mid",
            MarketCapTier::Large => "Large",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for TierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|t| t.to_string().to_uppercase()).collect();
        write!(f, "{}", names.join(", "))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Greeting => "greeting",
            Stage::Collecting => "collecting",
            Stage::Analyzing => "analyzing",
            Stage::Active => "active",
        };
        write!(f, "{}", s)
    }
}
