//! Market-strategy selection: investment amount to allowed market-cap tiers

use crate::config::StrategyConfig;
use crate::error::AdvisorError;
use crate::models::{MarketCapTier, TierSet};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDecision {
    pub tiers: TierSet,
    pub rationale: String,
}

/// Pure, monotonic in `amount`: crossing a threshold only ever adds a tier.
pub fn select_tiers(amount: f64, config: &StrategyConfig) -> Result<StrategyDecision> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AdvisorError::InvalidAmount(format!(
            "amount must be a positive number, got {}",
            amount
        )));
    }

    let (tiers, rationale) = if amount < config.mid_cap_threshold {
        (
            TierSet::new([MarketCapTier::Small]),
            format!(
                "Below ₹{:.0}: small caps only, where individual shares stay affordable",
                config.mid_cap_threshold
            ),
        )
    } else if amount < config.large_cap_threshold {
        (
            TierSet::new([MarketCapTier::Small, MarketCapTier::Mid]),
            format!(
                "Between ₹{:.0} and ₹{:.0}: small and mid caps for growth with some stability",
                config.mid_cap_threshold, config.large_cap_threshold
            ),
        )
    } else {
        (
            TierSet::new([MarketCapTier::Small, MarketCapTier::Mid, MarketCapTier::Large]),
            format!(
                "₹{:.0} and above: full diversification across small, mid and large caps",
                config.large_cap_threshold
            ),
        )
    };

    Ok(StrategyDecision { tiers, rationale })
}
