//! Allocation engine: scored shortlist to a bounded, capped basket
//!
//! Weights come from a blend of quality and popularity. Money is split by
//! capped proportional water-filling, so no instrument ever receives more
//! than `amount × max_allocation_fraction`. In whole-share mode instruments
//! priced above their slot are skipped and their weight is redistributed,
//! then residual cash is swept into the highest-weighted instruments that
//! still have room under the cap.

use crate::config::AllocationConfig;
use crate::error::AdvisorError;
use crate::models::{
    AllocationEntry, AllocationPlan, InvestmentRequest, RiskLevel, ScoredInstrument, SkippedInstrument,
    TierSet,
};
use crate::shortlist::rank_order;
use crate::Result;
use chrono::Utc;
use std::cmp::Ordering;
use tracing::{debug, info};
use uuid::Uuid;

/// Fractional shares are floored to 4 decimals
const FRACTION_SCALE: f64 = 10_000.0;

pub struct AllocationEngine {
    config: AllocationConfig,
}

impl AllocationEngine {
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    pub fn allocate(
        &self,
        shortlist: &[ScoredInstrument],
        request: &InvestmentRequest,
        tiers: &TierSet,
    ) -> Result<AllocationPlan> {
        if shortlist.is_empty() {
            return Err(AdvisorError::NoViableAllocation(
                "no instrument survived shortlisting".to_string(),
            ));
        }

        let amount = request.amount();
        let cap = amount * self.config.max_allocation_fraction;
        let fractional = self.config.fractional_shares;
        let scale = if fractional { FRACTION_SCALE } else { 1.0 };

        let mut basket: Vec<&ScoredInstrument> = shortlist.iter().collect();
        basket.sort_by(|a, b| rank_order(a, b));
        basket.truncate(self.config.basket_size);

        let weights = self.blended_weights(&basket);

        // Affordability passes: only whole shares can be out of reach
        let mut active: Vec<usize> = (0..basket.len()).collect();
        let mut skipped = Vec::new();
        let mut targets = vec![0.0; basket.len()];

        for pass in 0..self.config.max_passes {
            let active_weights: Vec<f64> = active.iter().map(|&i| weights[i]).collect();
            let filled = water_fill(&active_weights, amount, cap, self.config.max_passes);

            targets = vec![0.0; basket.len()];
            for (pos, &i) in active.iter().enumerate() {
                targets[i] = filled[pos];
            }

            if fractional {
                break;
            }

            let (affordable, unaffordable): (Vec<usize>, Vec<usize>) = active
                .iter()
                .copied()
                .partition(|&i| basket[i].snapshot.price <= targets[i]);

            if unaffordable.is_empty() || affordable.is_empty() || pass + 1 == self.config.max_passes {
                break;
            }

            for &i in &unaffordable {
                debug!(
                    symbol = %basket[i].instrument.symbol,
                    price = basket[i].snapshot.price,
                    target = targets[i],
                    "Unaffordable at whole-share granularity, redistributing"
                );
                skipped.push(SkippedInstrument {
                    symbol: basket[i].instrument.symbol.clone(),
                    reason: format!(
                        "price ₹{:.2} exceeds slot target ₹{:.2}",
                        basket[i].snapshot.price, targets[i]
                    ),
                });
            }
            active = affordable;
        }

        let mut shares = vec![0.0; basket.len()];
        for &i in &active {
            shares[i] = fit_shares(targets[i], basket[i].snapshot.price, scale);
        }

        if !fractional {
            self.top_up(&basket, &weights, &active, &mut shares, amount, cap);
        }

        let mut entries = Vec::new();
        for &i in &active {
            let item = basket[i];
            let price = item.snapshot.price;
            if shares[i] <= 0.0 {
                skipped.push(SkippedInstrument {
                    symbol: item.instrument.symbol.clone(),
                    reason: if targets[i] <= 0.0 {
                        "no allocation weight".to_string()
                    } else {
                        format!("price ₹{:.2} exceeds slot target ₹{:.2}", price, targets[i])
                    },
                });
                continue;
            }

            let invested = shares[i] * price;
            entries.push(AllocationEntry {
                instrument: item.instrument.clone(),
                price,
                shares_allocated: shares[i],
                amount_invested: invested,
                allocation_percent: invested / amount * 100.0,
                popularity_score: item.popularity_score,
                quality_score: item.quality_score,
                risk_level: RiskLevel::from_volatility(item.snapshot.quality.volatility),
            });
        }

        if entries.is_empty() {
            return Err(AdvisorError::NoViableAllocation(format!(
                "none of the {} shortlisted instruments is affordable with ₹{:.2}",
                basket.len(),
                amount
            )));
        }

        let total: f64 = entries.iter().map(|e| e.amount_invested).sum();
        let utilization = total / amount;

        info!(
            amount,
            entries = entries.len(),
            skipped = skipped.len(),
            utilization = format!("{:.1}%", utilization * 100.0),
            fractional,
            "Allocation complete"
        );

        Ok(AllocationPlan {
            plan_id: Uuid::new_v4(),
            amount,
            tiers: tiers.clone(),
            entries,
            utilization,
            skipped,
            fractional,
            created_at: Utc::now(),
        })
    }

    fn blended_weights(&self, basket: &[&ScoredInstrument]) -> Vec<f64> {
        let blend = self.config.quality_blend;
        let weights: Vec<f64> = basket
            .iter()
            .map(|s| (blend * s.quality_score + (1.0 - blend) * s.popularity_score).max(0.0))
            .collect();

        if weights.iter().sum::<f64>() <= 0.0 {
            vec![1.0; basket.len()]
        } else {
            weights
        }
    }

    /// Spend residual cash one instrument at a time, highest weight first,
    /// never pushing an instrument past the cap.
    fn top_up(
        &self,
        basket: &[&ScoredInstrument],
        weights: &[f64],
        active: &[usize],
        shares: &mut [f64],
        amount: f64,
        cap: f64,
    ) {
        let mut order: Vec<usize> = active.to_vec();
        order.sort_by(|&a, &b| {
            weights[b]
                .partial_cmp(&weights[a])
                .unwrap_or(Ordering::Equal)
                .then_with(|| basket[a].instrument.symbol.cmp(&basket[b].instrument.symbol))
        });

        let spent: f64 = active.iter().map(|&i| shares[i] * basket[i].snapshot.price).sum();
        let mut residual = amount - spent;

        for i in order {
            let price = basket[i].snapshot.price;
            let room = (cap - shares[i] * price).min(residual);
            let extra = fit_shares(room, price, 1.0);
            if extra > 0.0 {
                shares[i] += extra;
                residual -= extra * price;
            }
        }
    }
}

/// Capped proportional split of `amount` over `weights`.
///
/// Each pass hands out what is left in proportion to the uncapped weights
/// and pins anything over the cap. Stops after `max_passes`; whatever could
/// not be placed stays unallocated.
fn water_fill(weights: &[f64], amount: f64, cap: f64, max_passes: usize) -> Vec<f64> {
    let n = weights.len();
    let mut targets = vec![0.0; n];
    let mut pinned = vec![false; n];
    let mut remaining = amount;

    for _ in 0..max_passes {
        let free_weight: f64 = (0..n).filter(|&i| !pinned[i]).map(|i| weights[i]).sum();
        if free_weight <= 0.0 {
            break;
        }

        for i in (0..n).filter(|&i| !pinned[i]) {
            targets[i] = remaining * weights[i] / free_weight;
        }

        let mut pinned_any = false;
        for i in 0..n {
            if !pinned[i] && targets[i] > cap {
                targets[i] = cap;
                pinned[i] = true;
                remaining -= cap;
                pinned_any = true;
            }
        }

        if !pinned_any {
            break;
        }
    }

    targets
}

/// Largest number of shares, in units of `1 / scale`, whose cost stays
/// within `budget`
fn fit_shares(budget: f64, price: f64, scale: f64) -> f64 {
    if budget <= 0.0 || price <= 0.0 {
        return 0.0;
    }

    let mut units = (budget * scale / price).floor();
    while units > 0.0 && units / scale * price > budget {
        units -= 1.0;
    }
    units.max(0.0) / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Instrument, MarketCapTier, MarketSnapshot, QualityMetrics};

    fn scored(symbol: &str, price: f64, popularity: f64, quality: f64) -> ScoredInstrument {
        ScoredInstrument {
            instrument: Instrument {
                symbol: symbol.to_string(),
                name: format!("{} Ltd", symbol),
                tier: MarketCapTier::Small,
                sector: "IT".to_string(),
            },
            snapshot: MarketSnapshot {
                price,
                volume: 1_000_000.0,
                market_cap: 1e9,
                quality: QualityMetrics {
                    pe_ratio: 20.0,
                    dividend_yield: 1.0,
                    volatility: 3.0,
                },
            },
            quality_score: quality,
            popularity_score: popularity,
        }
    }

    fn tiers() -> TierSet {
        TierSet::new([MarketCapTier::Small])
    }

    fn assert_invariants(plan: &AllocationPlan, cap_fraction: f64) {
        let pct: f64 = plan.entries.iter().map(|e| e.allocation_percent).sum();
        assert!(pct <= 100.0 + 1e-9, "percent sum {}", pct);
        assert!(plan.total_invested() <= plan.amount + 1e-6);
        for e in &plan.entries {
            assert!(e.amount_invested <= plan.amount * cap_fraction + 1e-6, "{} over cap", e.instrument.symbol);
            assert!(e.shares_allocated > 0.0);
        }
    }

    fn pool(n: usize) -> Vec<ScoredInstrument> {
        (0..n)
            .map(|i| {
                scored(
                    &format!("S{:02}", i),
                    120.0 + 37.0 * i as f64,
                    90.0 - 3.0 * i as f64,
                    60.0 + (i % 4) as f64 * 5.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_shortlist_is_no_viable_allocation() {
        let engine = AllocationEngine::new(AllocationConfig::default());
        let request = InvestmentRequest::explicit(10_000.0).unwrap();
        assert!(matches!(
            engine.allocate(&[], &request, &tiers()),
            Err(AdvisorError::NoViableAllocation(_))
        ));
    }

    #[test]
    fn test_fractional_basket_respects_invariants() {
        let engine = AllocationEngine::new(AllocationConfig::default());
        let request = InvestmentRequest::explicit(50_000.0).unwrap();
        let plan = engine.allocate(&pool(30), &request, &tiers()).unwrap();

        assert!(plan.entries.len() <= 10);
        assert!(plan.utilization >= 0.9, "utilization {}", plan.utilization);
        assert_invariants(&plan, 0.25);
        // Highest popularity first
        assert_eq!(plan.entries[0].instrument.symbol, "S00");
    }

    #[test]
    fn test_entries_carry_risk_from_volatility() {
        let engine = AllocationEngine::new(AllocationConfig::default());
        let request = InvestmentRequest::explicit(20_000.0).unwrap();
        let mut shortlist = pool(3);
        shortlist[1].snapshot.quality.volatility = 9.0;
        shortlist[2].snapshot.quality.volatility = 22.0;

        let plan = engine.allocate(&shortlist, &request, &tiers()).unwrap();
        let risk = |symbol: &str| {
            plan.entries
                .iter()
                .find(|e| e.instrument.symbol == symbol)
                .map(|e| e.risk_level)
        };
        assert_eq!(risk("S00"), Some(RiskLevel::Low));
        assert_eq!(risk("S01"), Some(RiskLevel::Medium));
        assert_eq!(risk("S02"), Some(RiskLevel::High));
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let engine = AllocationEngine::new(AllocationConfig::default());
        let request = InvestmentRequest::explicit(37_500.0).unwrap();
        let a = engine.allocate(&pool(15), &request, &tiers()).unwrap();
        let b = engine.allocate(&pool(15), &request, &tiers()).unwrap();
        assert!(a.same_allocation(&b));
        assert_ne!(a.plan_id, b.plan_id);
    }

    #[test]
    fn test_cap_limits_small_baskets() {
        let engine = AllocationEngine::new(AllocationConfig::default());
        let request = InvestmentRequest::explicit(10_000.0).unwrap();
        let plan = engine
            .allocate(&[scored("AAA", 10.0, 90.0, 90.0), scored("BBB", 10.0, 10.0, 10.0)], &request, &tiers())
            .unwrap();

        // Two instruments at 25% each can place at most half the money
        assert!((plan.utilization - 0.5).abs() < 1e-6);
        assert_invariants(&plan, 0.25);
    }

    #[test]
    fn test_whole_shares_skip_expensive_and_redistribute() {
        let config = AllocationConfig {
            fractional_shares: false,
            ..AllocationConfig::default()
        };
        let engine = AllocationEngine::new(config);
        let request = InvestmentRequest::explicit(20_000.0).unwrap();
        let mut shortlist = pool(6);
        shortlist.push(scored("BOSCH", 30_000.0, 99.0, 99.0));

        let plan = engine.allocate(&shortlist, &request, &tiers()).unwrap();

        assert!(plan.entry("BOSCH").is_none());
        assert!(plan.skipped.iter().any(|s| s.symbol == "BOSCH"));
        assert!(plan.entries.iter().all(|e| e.shares_allocated.fract() == 0.0));
        assert_invariants(&plan, 0.25);
        assert!(plan.utilization > 0.9, "utilization {}", plan.utilization);
    }

    #[test]
    fn test_whole_shares_nothing_affordable() {
        let config = AllocationConfig {
            fractional_shares: false,
            ..AllocationConfig::default()
        };
        let engine = AllocationEngine::new(config);
        let request = InvestmentRequest::explicit(1_000.0).unwrap();
        let shortlist = vec![scored("AAA", 5_000.0, 80.0, 80.0), scored("BBB", 6_000.0, 70.0, 70.0)];

        assert!(matches!(
            engine.allocate(&shortlist, &request, &tiers()),
            Err(AdvisorError::NoViableAllocation(_))
        ));
    }

    #[test]
    fn test_zero_scores_fall_back_to_equal_weights() {
        let engine = AllocationEngine::new(AllocationConfig::default());
        let request = InvestmentRequest::explicit(4_000.0).unwrap();
        let shortlist: Vec<_> = ["A", "B", "C", "D"].iter().map(|s| scored(s, 10.0, 0.0, 0.0)).collect();
        let plan = engine.allocate(&shortlist, &request, &tiers()).unwrap();

        assert_eq!(plan.entries.len(), 4);
        for e in &plan.entries {
            assert!((e.amount_invested - 1_000.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_water_fill_pins_and_redistributes() {
        let targets = water_fill(&[8.0, 1.0, 1.0], 100.0, 50.0, 5);
        assert_eq!(targets[0], 50.0);
        assert!((targets[1] - 25.0).abs() < 1e-9);
        assert!((targets[2] - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_shares_never_overspends() {
        assert_eq!(fit_shares(1000.0, 333.0, 1.0), 3.0);
        let fractional = fit_shares(1000.0, 333.0, FRACTION_SCALE);
        assert!(fractional * 333.0 <= 1000.0);
        assert!((fractional - 3.003).abs() < 1e-9);
        assert_eq!(fit_shares(100.0, 333.0, 1.0), 0.0);
    }
}
