//! Conversational query router
//!
//! Greeting → Collecting → Analyzing → Active, and back to Analyzing on every
//! new investment request. The router is the only code that moves a
//! session's `ConversationState`; every answer reads immutable profile, plan
//! and news data.

pub mod amount;
pub mod intent;

pub use amount::{extract_amount, AmountMention};
pub use intent::{mentioned_symbol, Intent, IntentClassifier, TradingTopic};

use crate::agent::{instrument_card, summarize_plan, Advisor, Recommendation};
use crate::enrichment::RunState;
use crate::models::{ConversationState, FinancialProfile, InvestmentRequest, Stage};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SEARCH_RESULTS: usize = 3;

/// Hits at or below this cosine score are treated as no match
const MIN_SEARCH_SCORE: f32 = 0.05;

const NEWS_ITEMS: usize = 5;

const GREETING: &str = "Hi! I'm your investment advisor. Upload your banking statement and trading history to get started.";

const CLARIFICATION: &str = "I didn't quite catch that. You can ask about your balance, your best or worst trade, your win rate, the recommended basket, a stock in it, or the latest news.";

#[derive(Debug, Clone, Serialize)]
pub struct RouterReply {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
}

impl RouterReply {
    fn new(stage: Stage, intent: Option<Intent>, message: String) -> Self {
        Self {
            stage,
            intent,
            message,
            recommendation: None,
        }
    }
}

pub struct QueryRouter {
    advisor: Arc<Advisor>,
}

impl QueryRouter {
    pub fn new(advisor: Arc<Advisor>) -> Self {
        Self { advisor }
    }

    pub fn greeting() -> &'static str {
        GREETING
    }

    /// Documents are in and validated: Greeting → Collecting.
    ///
    /// Uploading again replaces the profile and drops any existing plan.
    pub fn confirm_documents(&self, state: &mut ConversationState, profile: FinancialProfile) -> RouterReply {
        let banking = profile.banking();
        let mut message = format!(
            "Thanks, your documents are in. Your safe investable amount is ₹{:.0}.",
            banking.safe_investable_amount
        );
        if profile.was_clamped() {
            message.push_str(" (The reported figure exceeded your balance, so it was capped.)");
        }
        message.push_str(
            " How much would you like to invest? Give an amount like ₹50,000, or say \"calculate\" to use the safe amount.",
        );

        state.profile = Some(Arc::new(profile));
        state.plan = None;
        state.stage = Stage::Collecting;
        info!(stage = %state.stage, "Documents confirmed");

        RouterReply::new(state.stage, None, message)
    }

    /// Answer one utterance. Never returns an error: failures become
    /// messages and the state falls back to where it was usable.
    pub async fn handle(&self, state: &mut ConversationState, utterance: &str) -> RouterReply {
        let text = utterance.trim();
        let intent = IntentClassifier::classify(text, state.plan());
        debug!(stage = %state.stage, %intent, "Routing utterance");

        match state.stage {
            Stage::Greeting => match intent {
                Intent::BalanceQuery | Intent::TradingHistoryQuery(_) => RouterReply::new(
                    state.stage,
                    Some(intent),
                    "I need your banking statement and trading history before I can answer that.".to_string(),
                ),
                Intent::NewsQuery => self.answer(state, intent, text).await,
                _ => RouterReply::new(state.stage, Some(intent), GREETING.to_string()),
            },

            // Analyzing only lasts for the duration of one `handle` call;
            // seeing it here means a previous call was interrupted
            Stage::Collecting | Stage::Analyzing => match extract_amount(text, true) {
                Some(mention)
                    if !matches!(
                        intent,
                        Intent::BalanceQuery | Intent::TradingHistoryQuery(_) | Intent::NewsQuery
                    ) =>
                {
                    self.run_pipeline(state, mention).await
                }
                _ => match intent {
                    Intent::BalanceQuery
                    | Intent::TradingHistoryQuery(_)
                    | Intent::NewsQuery
                    | Intent::SemanticSearchQuery => self.answer(state, intent, text).await,
                    _ => {
                        state.stage = Stage::Collecting;
                        RouterReply::new(
                            state.stage,
                            Some(intent),
                            "How much would you like to invest? For example \"₹50,000\", \"2 lakh\", or \"calculate\" to use your safe amount.".to_string(),
                        )
                    }
                },
            },

            Stage::Active => match extract_amount(text, false) {
                Some(mention)
                    if !matches!(
                        intent,
                        Intent::BalanceQuery | Intent::TradingHistoryQuery(_) | Intent::NewsQuery
                    ) =>
                {
                    self.run_pipeline(state, mention).await
                }
                _ => self.answer(state, intent, text).await,
            },
        }
    }

    /// Collecting/Active → Analyzing → Active, or back on failure.
    async fn run_pipeline(&self, state: &mut ConversationState, mention: AmountMention) -> RouterReply {
        let Some(profile) = state.profile.clone() else {
            state.stage = Stage::Greeting;
            return RouterReply::new(
                state.stage,
                None,
                "Please upload your banking statement and trading history first.".to_string(),
            );
        };

        let request = match mention {
            AmountMention::Explicit(amount) => InvestmentRequest::explicit(amount),
            AmountMention::FromProfile => InvestmentRequest::from_profile(&profile),
        };

        let fallback = if state.plan.is_some() {
            Stage::Active
        } else {
            Stage::Collecting
        };

        let request = match request {
            Ok(request) => request,
            Err(e) => {
                state.stage = fallback;
                return RouterReply::new(
                    state.stage,
                    None,
                    format!("{}. Please give a positive amount, e.g. ₹25,000.", e),
                );
            }
        };

        state.stage = Stage::Analyzing;
        info!(amount = request.amount(), "Analyzing investment request");

        match self.advisor.recommend(&profile, request).await {
            Ok(recommendation) => {
                state.plan = Some(Arc::clone(&recommendation.plan));
                state.stage = Stage::Active;

                let mut message = summarize_plan(&recommendation.plan);
                message.push('\n');
                message.push_str(&recommendation.rationale);
                message.push('\n');
                match &recommendation.enrichment_note {
                    None => message.push_str(
                        "\nI'm collecting the latest news on these stocks in the background. Ask me about them any time.",
                    ),
                    Some(note) => message.push_str(&format!("\nNews is unavailable right now ({}).", note)),
                }

                let mut reply = RouterReply::new(state.stage, Some(Intent::RecommendationQuery), message);
                reply.recommendation = Some(recommendation);
                reply
            }
            Err(e) => {
                state.stage = fallback;
                warn!(stage = %state.stage, "Recommendation failed: {}", e);

                let message = if e.is_user_actionable() {
                    format!("{}. Try a different amount.", e)
                } else {
                    format!("I couldn't finish the analysis ({}). Please try again in a moment.", e)
                };
                RouterReply::new(state.stage, None, message)
            }
        }
    }

    async fn answer(&self, state: &ConversationState, intent: Intent, text: &str) -> RouterReply {
        let message = match intent {
            Intent::BalanceQuery => match state.profile() {
                Some(profile) => balance_answer(profile),
                None => "I don't have your banking statement yet.".to_string(),
            },
            Intent::TradingHistoryQuery(topic) => match state.profile() {
                Some(profile) => trading_answer(profile, topic),
                None => "I don't have your trading history yet.".to_string(),
            },
            Intent::RecommendationQuery => self.recommendation_answer(state, text).await,
            Intent::NewsQuery => self.news_answer(state, text).await,
            Intent::SemanticSearchQuery => self.search_answer(text).await,
            Intent::Unrecognized => CLARIFICATION.to_string(),
        };

        RouterReply::new(state.stage, Some(intent), message)
    }

    async fn recommendation_answer(&self, state: &ConversationState, text: &str) -> String {
        let Some(plan) = state.plan() else {
            return "There's no recommendation yet. Tell me how much you'd like to invest.".to_string();
        };

        match mentioned_symbol(text, Some(plan)).and_then(|symbol| plan.entry(&symbol)) {
            Some(entry) => {
                let articles = self.advisor.news().for_instrument(&entry.instrument.symbol).await;
                instrument_card(entry, &articles)
            }
            None => summarize_plan(plan),
        }
    }

    async fn news_answer(&self, state: &ConversationState, text: &str) -> String {
        let status = self.advisor.enrichment_status().await;
        let store = self.advisor.news();

        let articles = match mentioned_symbol(text, state.plan()) {
            Some(symbol) => store.for_instrument(&symbol).await,
            None => match state.plan() {
                Some(plan) => {
                    let mut collected = Vec::new();
                    for entry in &plan.entries {
                        collected.extend(store.for_instrument(&entry.instrument.symbol).await);
                    }
                    collected
                }
                None => store.all().await,
            },
        };

        if articles.is_empty() {
            return match status.state {
                RunState::InProgress => format!("{} Check back in a minute.", status.message()),
                _ => format!("{}.", status.message()),
            };
        }

        let mut out = String::from("### Latest news\n\n");
        for article in articles.iter().rev().take(NEWS_ITEMS) {
            out.push_str(&format!(
                "- **{}**: {}{} ({})\n",
                article.source_instrument,
                article.title,
                if article.verified { "" } else { " (unverified)" },
                article.url
            ));
        }
        if status.state == RunState::InProgress {
            out.push_str("\nMore articles are still coming in.\n");
        }
        out
    }

    async fn search_answer(&self, text: &str) -> String {
        let hits = match self.advisor.search(text, SEARCH_RESULTS).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Knowledge search failed: {}", e);
                return "I can't search the news archive right now. Please try again shortly.".to_string();
            }
        };

        let relevant: Vec<_> = hits.iter().filter(|h| h.score > MIN_SEARCH_SCORE).collect();
        if relevant.is_empty() {
            return format!(
                "I couldn't find anything about that in the news I've collected. {}",
                CLARIFICATION
            );
        }

        let mut out = String::from("Here's what I found in the collected news:\n\n");
        for hit in relevant {
            let excerpt: String = hit.chunk.text.chars().take(300).collect();
            out.push_str(&format!(
                "- [{}] {}\n",
                hit.chunk.document_id,
                excerpt.replace('\n', " ")
            ));
        }
        out
    }
}

fn balance_answer(profile: &FinancialProfile) -> String {
    let b = profile.banking();
    format!(
        "Current balance: ₹{:.2}\nMonthly income: ₹{:.2}\nMonthly expenses: ₹{:.2}\nSafe investable amount: ₹{:.2}",
        b.current_balance, b.monthly_income, b.monthly_expenses, b.safe_investable_amount
    )
}

fn trading_answer(profile: &FinancialProfile, topic: TradingTopic) -> String {
    let t = profile.trading();
    match topic {
        TradingTopic::Worst => format!("Your worst trade: {}", t.worst_trade),
        TradingTopic::Best => format!("Your best trade: {}", t.best_trade),
        TradingTopic::WinRate => format!("Your win rate is {:.1}%.", t.win_rate * 100.0),
        TradingTopic::MostTraded => {
            if t.most_traded.is_empty() {
                "Your trading history doesn't list the stocks you trade most.".to_string()
            } else {
                format!("You trade these most: {}", t.most_traded.join(", "))
            }
        }
        TradingTopic::Summary => {
            let mut out = format!(
                "Win rate: {:.1}%\nBest trade: {}\nWorst trade: {}\nRisk behavior: {}",
                t.win_rate * 100.0,
                t.best_trade,
                t.worst_trade,
                t.risk_behavior
            );
            if let Some(total) = t.total_trades {
                out.push_str(&format!("\nTotal trades: {}", total));
            }
            if let Some(pnl) = t.net_pnl {
                out.push_str(&format!("\nNet P&L: ₹{:.2}", pnl));
            }
            if !t.sector_preferences.is_empty() {
                let sectors: Vec<&str> = t.sector_preferences.iter().map(String::as_str).collect();
                out.push_str(&format!("\nPreferred sectors: {}", sectors.join(", ")));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BackgroundTasks;
    use crate::config::AdvisorConfig;
    use crate::enrichment::{NewsResult, NewsSearch};
    use crate::error::AdvisorError;
    use crate::index::HashingEmbedder;
    use crate::market::{InstrumentUniverse, SimulatedMarketData};
    use crate::profile::{validate_draft, ProfileDraft, ProfileExtractor};
    use crate::Result;
    use async_trait::async_trait;

    struct FixedExtractor;

    #[async_trait]
    impl ProfileExtractor for FixedExtractor {
        async fn extract(&self, _b: &str, _t: &str) -> Result<ProfileDraft> {
            Ok(ProfileDraft::default())
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

        async fn search(&self, _q: &str, _n: usize) -> Result<Vec<NewsResult>> {
            Err(AdvisorError::NewsSearch("not configured".into()))
        }
    }

    fn create_test_profile() -> FinancialProfile {
        let draft: ProfileDraft = serde_json::from_value(serde_json::json!({
            "banking_summary": {
                "monthly_income": "₹1,20,000",
                "monthly_expenses": 45000,
                "current_balance": 350000,
                "safe_investable_amount": 50000
            },
            "trading_summary": {
                "win_rate": 0.62,
                "best_trade": "Bought TCS at 3,200, sold at 3,900 (+₹14,000)",
                "worst_trade": "YESBANK: -₹9,200 on 12 Mar 2024",
                "sector_preferences": ["IT", "Banking"],
                "risk_behavior": "moderate",
                "most_traded": ["TCS", "INFY"]
            }
        }))
        .unwrap();
        validate_draft(&draft).unwrap()
    }

    fn create_test_router(dir: &std::path::Path) -> (QueryRouter, BackgroundTasks) {
        let mut config = AdvisorConfig::default();
        config.index.knowledge_dir = dir.to_path_buf();

        let (advisor, tasks) = Advisor::launch(
            config,
            InstrumentUniverse::builtin(),
            Arc::new(SimulatedMarketData::new()),
            Arc::new(FixedExtractor),
            Arc::new(NoNews),
            Arc::new(HashingEmbedder::new(256)),
        )
        .unwrap();

        (QueryRouter::new(Arc::new(advisor)), tasks)
    }

    #[tokio::test]
    async fn test_full_conversation_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (router, tasks) = create_test_router(dir.path());
        let mut state = ConversationState::new();

        let reply = router.handle(&mut state, "hello").await;
        assert_eq!(reply.stage, Stage::Greeting);
        assert_eq!(reply.message, QueryRouter::greeting());

        let reply = router.confirm_documents(&mut state, create_test_profile());
        assert_eq!(reply.stage, Stage::Collecting);
        assert!(reply.message.contains("50000"));

        let reply = router.handle(&mut state, "I'd like to invest ₹50,000").await;
        assert_eq!(reply.stage, Stage::Active);
        assert_eq!(state.stage(), Stage::Active);
        let plan = state.plan().unwrap();
        assert_eq!(plan.amount, 50_000.0);
        assert!(reply.recommendation.is_some());

        let reply = router.handle(&mut state, "What's my worst loss?").await;
        assert_eq!(reply.intent, Some(Intent::TradingHistoryQuery(TradingTopic::Worst)));
        assert!(reply.message.contains("YESBANK: -₹9,200 on 12 Mar 2024"));
        assert_eq!(state.stage(), Stage::Active);

        // A new request re-runs the pipeline
        let reply = router.handle(&mut state, "actually invest 2 lakh").await;
        assert_eq!(reply.stage, Stage::Active);
        assert_eq!(state.plan().unwrap().amount, 200_000.0);

        tasks.abort();
    }

    #[tokio::test]
    async fn test_balance_answered_while_collecting() {
        let dir = tempfile::tempdir().unwrap();
        let (router, tasks) = create_test_router(dir.path());
        let mut state = ConversationState::new();
        router.confirm_documents(&mut state, create_test_profile());

        let reply = router.handle(&mut state, "what's my balance?").await;
        tasks.abort();

        assert_eq!(reply.intent, Some(Intent::BalanceQuery));
        assert!(reply.message.contains("350000.00"));
        assert_eq!(state.stage(), Stage::Collecting);
    }

    #[tokio::test]
    async fn test_trading_question_with_amount_while_collecting_is_answered() {
        let dir = tempfile::tempdir().unwrap();
        let (router, tasks) = create_test_router(dir.path());
        let mut state = ConversationState::new();
        router.confirm_documents(&mut state, create_test_profile());

        let reply = router
            .handle(&mut state, "Was my worst loss more than ₹5,000?")
            .await;
        tasks.abort();

        assert_eq!(reply.intent, Some(Intent::TradingHistoryQuery(TradingTopic::Worst)));
        assert!(reply.message.contains("YESBANK: -₹9,200 on 12 Mar 2024"));
        assert_eq!(state.stage(), Stage::Collecting);
        assert!(state.plan().is_none());
    }

    #[tokio::test]
    async fn test_invalid_amount_returns_to_collecting() {
        let dir = tempfile::tempdir().unwrap();
        let (router, tasks) = create_test_router(dir.path());
        let mut state = ConversationState::new();
        router.confirm_documents(&mut state, create_test_profile());

        let reply = router.handle(&mut state, "₹0").await;
        tasks.abort();

        assert_eq!(reply.stage, Stage::Collecting);
        assert!(state.plan().is_none());
        assert!(reply.message.contains("positive"));
    }

    #[tokio::test]
    async fn test_unrecognized_gets_clarification() {
        let dir = tempfile::tempdir().unwrap();
        let (router, tasks) = create_test_router(dir.path());
        let mut state = ConversationState::new();
        router.confirm_documents(&mut state, create_test_profile());
        router.handle(&mut state, "calculate").await;
        assert_eq!(state.stage(), Stage::Active);

        let reply = router.handle(&mut state, "?!").await;
        tasks.abort();

        assert_eq!(reply.intent, Some(Intent::Unrecognized));
        assert_eq!(reply.message, CLARIFICATION);
        assert_eq!(state.stage(), Stage::Active);
    }

    #[tokio::test]
    async fn test_basket_symbol_produces_detail_card() {
        let dir = tempfile::tempdir().unwrap();
        let (router, tasks) = create_test_router(dir.path());
        let mut state = ConversationState::new();
        router.confirm_documents(&mut state, create_test_profile());
        router.handle(&mut state, "invest 50k").await;

        let symbol = state.plan().unwrap().entries[0].instrument.symbol.clone();
        let reply = router
            .handle(&mut state, &format!("tell me about {} in my basket", symbol))
            .await;
        tasks.abort();

        assert_eq!(reply.intent, Some(Intent::RecommendationQuery));
        assert!(reply.message.starts_with("### "));
        assert!(reply.message.contains(&format!("({})", symbol)));
    }
}
