//! Utterance classifier
//!
//! Keyword scoring over static lists. The basket in play (if any) adds its
//! symbols and company names as recommendation keywords.

use crate::models::AllocationPlan;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingTopic {
    Best,
    Worst,
    WinRate,
    MostTraded,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", content = "topic", rename_all = "snake_case")]
pub enum Intent {
    BalanceQuery,
    TradingHistoryQuery(TradingTopic),
    RecommendationQuery,
    NewsQuery,
    SemanticSearchQuery,
    Unrecognized,
}

/// Static keyword lists, zero allocation
const BALANCE_KEYWORDS: &[&str] = &[
    "balance", "how much money", "income", "expenses", "expense", "savings",
    "salary", "safe amount", "investable", "bank",
];

const TRADING_KEYWORDS: &[&str] = &[
    "best profit", "best trade", "biggest win", "worst loss", "worst trade",
    "biggest loss", "trading history", "past trades", "my trades", "which stocks",
    "what stocks", "win rate", "success rate", "performance", "total profit",
    "total loss", "profit", "loss", "most traded", "traded",
];

const NEWS_KEYWORDS: &[&str] = &[
    "news", "latest", "headlines", "market update", "articles", "recent", "today",
];

const RECOMMENDATION_KEYWORDS: &[&str] = &[
    "recommend", "portfolio", "allocation", "allocated", "basket", "stock",
    "share", "invest", "suggest", "why",
];

pub struct IntentClassifier;

impl IntentClassifier {
    /// Classify one utterance. Never fails; anything without a real word is
    /// `Unrecognized`, anything else without a keyword hit is free text for
    /// semantic search.
    pub fn classify(utterance: &str, plan: Option<&AllocationPlan>) -> Intent {
        if !has_word(utterance) {
            return Intent::Unrecognized;
        }

        // Basket names must not trigger keywords ("HDFCBANK" is not a
        // banking question)
        let text = strip_basket_names(utterance, plan);

        let trading = score(&text, TRADING_KEYWORDS);
        let balance = score(&text, BALANCE_KEYWORDS);
        let news = score(&text, NEWS_KEYWORDS);
        let recommendation = score(&text, RECOMMENDATION_KEYWORDS)
            + usize::from(mentioned_symbol(utterance, plan).is_some());

        // Ties go to the earlier, more specific intent
        let ranked = [
            (trading, Intent::TradingHistoryQuery(trading_topic(&text))),
            (balance, Intent::BalanceQuery),
            (news, Intent::NewsQuery),
            (recommendation, Intent::RecommendationQuery),
        ];

        let mut best = (0, Intent::SemanticSearchQuery);
        for (points, intent) in ranked {
            if points > best.0 {
                best = (points, intent);
            }
        }
        best.1
    }
}

fn strip_basket_names(utterance: &str, plan: Option<&AllocationPlan>) -> String {
    let mut text = utterance.to_lowercase();
    let Some(plan) = plan else { return text };

    for entry in &plan.entries {
        text = text.replace(&entry.instrument.name.to_lowercase(), " ");
    }

    text.split(' ')
        .filter(|word| {
            let bare = word.trim_matches(|c: char| !(c.is_alphanumeric() || c == '&' || c == '-'));
            !plan
                .entries
                .iter()
                .any(|e| e.instrument.symbol.eq_ignore_ascii_case(bare))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn score(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| text.contains(**kw)).count()
}

/// At least one alphanumeric word of three or more characters
fn has_word(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| word.chars().count() >= 3)
}

fn trading_topic(text: &str) -> TradingTopic {
    if ["worst", "biggest loss", "largest loss"].iter().any(|k| text.contains(k)) {
        TradingTopic::Worst
    } else if ["best", "biggest win", "largest win", "top trade"].iter().any(|k| text.contains(k)) {
        TradingTopic::Best
    } else if ["win rate", "success rate", "winning"].iter().any(|k| text.contains(k)) {
        TradingTopic::WinRate
    } else if ["most traded", "which stocks", "what stocks", "trade most", "traded most"]
        .iter()
        .any(|k| text.contains(k))
    {
        TradingTopic::MostTraded
    } else {
        TradingTopic::Summary
    }
}

/// First basket symbol named in the utterance, by ticker or company name.
pub fn mentioned_symbol(utterance: &str, plan: Option<&AllocationPlan>) -> Option<String> {
    let plan = plan?;
    let lowered = utterance.to_lowercase();

    let words: Vec<String> = utterance
        .split(|c: char| !(c.is_alphanumeric() || c == '&' || c == '-'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_uppercase())
        .collect();

    plan.entries
        .iter()
        .find(|entry| {
            let symbol = &entry.instrument.symbol;
            words.iter().any(|w| w == symbol)
                || lowered.contains(&entry.instrument.name.to_lowercase())
        })
        .map(|entry| entry.instrument.symbol.clone())
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::BalanceQuery => "balance",
            Intent::TradingHistoryQuery(_) => "trading_history",
            Intent::RecommendationQuery => "recommendation",
            Intent::NewsQuery => "news",
            Intent::SemanticSearchQuery => "semantic_search",
            Intent::Unrecognized => "unrecognized",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Intent {
        IntentClassifier::classify(text, None)
    }

    #[test]
    fn test_trading_questions() {
        assert_eq!(
            classify("What's my worst loss?"),
            Intent::TradingHistoryQuery(TradingTopic::Worst)
        );
        assert_eq!(
            classify("what was my best trade"),
            Intent::TradingHistoryQuery(TradingTopic::Best)
        );
        assert_eq!(
            classify("how good is my win rate"),
            Intent::TradingHistoryQuery(TradingTopic::WinRate)
        );
        assert_eq!(
            classify("which stocks do I trade most"),
            Intent::TradingHistoryQuery(TradingTopic::MostTraded)
        );
        assert_eq!(
            classify("show my trading history"),
            Intent::TradingHistoryQuery(TradingTopic::Summary)
        );
    }

    #[test]
    fn test_balance_news_and_recommendation() {
        assert_eq!(classify("what is my current balance"), Intent::BalanceQuery);
        assert_eq!(classify("How much money do I spend? expenses?"), Intent::BalanceQuery);
        assert_eq!(classify("any latest headlines"), Intent::NewsQuery);
        assert_eq!(classify("explain the recommended basket"), Intent::RecommendationQuery);
    }

    #[test]
    fn test_free_text_and_noise() {
        assert_eq!(
            classify("what are analysts saying about telecom tariffs"),
            Intent::SemanticSearchQuery
        );
        assert_eq!(classify("??"), Intent::Unrecognized);
        assert_eq!(classify("ok"), Intent::Unrecognized);
        assert_eq!(classify(""), Intent::Unrecognized);
    }

    fn basket(symbols: &[(&str, &str)]) -> AllocationPlan {
        use crate::models::{AllocationEntry, Instrument, MarketCapTier, RiskLevel, TierSet};

        AllocationPlan {
            plan_id: uuid::Uuid::new_v4(),
            amount: 100_000.0,
            tiers: TierSet::new([MarketCapTier::Large]),
            entries: symbols
                .iter()
                .map(|(symbol, name)| AllocationEntry {
                    instrument: Instrument {
                        symbol: symbol.to_string(),
                        name: name.to_string(),
                        tier: MarketCapTier::Large,
                        sector: "Banking".to_string(),
                    },
                    price: 1_000.0,
                    shares_allocated: 10.0,
                    amount_invested: 10_000.0,
                    allocation_percent: 10.0,
                    popularity_score: 50.0,
                    quality_score: 50.0,
                    risk_level: RiskLevel::Medium,
                })
                .collect(),
            utilization: 0.2,
            skipped: vec![],
            fractional: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_basket_names_route_to_recommendation() {
        let plan = basket(&[("HDFCBANK", "HDFC Bank"), ("INFY", "Infosys")]);

        assert_eq!(
            IntentClassifier::classify("tell me more about HDFCBANK", Some(&plan)),
            Intent::RecommendationQuery
        );
        assert_eq!(
            IntentClassifier::classify("why HDFC Bank?", Some(&plan)),
            Intent::RecommendationQuery
        );
        // A news keyword still wins a tie with the symbol
        assert_eq!(
            IntentClassifier::classify("news on infy", Some(&plan)),
            Intent::NewsQuery
        );
        assert_eq!(mentioned_symbol("how is infosys doing", Some(&plan)), Some("INFY".to_string()));
        assert_eq!(mentioned_symbol("how is tcs doing", Some(&plan)), None);
    }
}
