//! Document extraction collaborator

use super::ProfileDraft;
use crate::error::AdvisorError;
use crate::gemini::GeminiClient;
use crate::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Turns raw banking and trading document text into an unvalidated draft.
#[async_trait]
pub trait ProfileExtractor: Send + Sync {
    async fn extract(&self, banking_text: &str, trading_text: &str) -> Result<ProfileDraft>;
}

const SYSTEM_PROMPT: &str = "You are a financial document analyst. You only ever answer with a single JSON object.";

pub struct GeminiProfileExtractor {
    client: GeminiClient,
}

impl GeminiProfileExtractor {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    fn build_prompt(banking_text: &str, trading_text: &str) -> String {
        format!(
            r#"Extract the user's financial profile from the two documents below.

BANKING STATEMENT:
{}

TRADING HISTORY:
{}

Rules:
- Amounts are plain numbers in rupees, no symbols or separators
- win_rate is a fraction between 0 and 1
- risk_behavior is one of "conservative", "moderate", "aggressive"
- Use null for anything the documents do not state
- Return ONLY valid JSON
- No explanation text
- JSON format:

{{
  "banking_summary": {{
    "monthly_income": 0,
    "monthly_expenses": 0,
    "current_balance": 0,
    "safe_investable_amount": 0
  }},
  "trading_summary": {{
    "win_rate": 0.0,
    "best_trade": "SYMBOL +amount",
    "worst_trade": "SYMBOL -amount",
    "sector_preferences": ["..."],
    "risk_behavior": "moderate",
    "total_trades": 0,
    "net_pnl": 0,
    "most_traded": ["SYMBOL"]
  }}
}}
"#,
            banking_text.trim(),
            trading_text.trim()
        )
    }
}

#[async_trait]
impl ProfileExtractor for GeminiProfileExtractor {
    async fn extract(&self, banking_text: &str, trading_text: &str) -> Result<ProfileDraft> {
        let prompt = Self::build_prompt(banking_text, trading_text);
        let response = self
            .client
            .generate(&prompt, SYSTEM_PROMPT)
            .await
            .map_err(|e| AdvisorError::ExtractionFailed(e.to_string()))?;

        debug!(chars = response.len(), "Extraction response received");
        parse_draft(&response)
    }
}

/// Parse an LLM answer into a draft, tolerating code fences and chatter
/// around the JSON object.
pub fn parse_draft(response: &str) -> Result<ProfileDraft> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let candidate = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => {
            warn!("Extraction response contained no JSON object");
            return Err(AdvisorError::ExtractionFailed(
                "response contained no JSON object".to_string(),
            ));
        }
    };

    serde_json::from_str(candidate).map_err(|e| {
        AdvisorError::ExtractionFailed(format!("malformed extraction output: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::validate_draft;

    #[test]
    fn test_parse_fenced_response() {
        let raw = "```json\n{\"banking_summary\": {\"monthly_income\": 50000, \"monthly_expenses\": 20000, \"current_balance\": 100000}, \"trading_summary\": {\"win_rate\": 0.4}}\n```";
        let draft = parse_draft(raw).unwrap();
        let profile = validate_draft(&draft).unwrap();
        assert_eq!(profile.banking().current_balance, 100000.0);
    }

    #[test]
    fn test_parse_with_surrounding_chatter() {
        let raw = "Sure! Here it is: {\"banking_summary\": {}, \"trading_summary\": {}} Hope that helps.";
        assert!(parse_draft(raw).is_ok());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_draft("I could not read the documents."),
            Err(AdvisorError::ExtractionFailed(_))
        ));
        assert!(matches!(
            parse_draft("{ not json }"),
            Err(AdvisorError::ExtractionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_gemini_is_extraction_failure() {
        let extractor =
            GeminiProfileExtractor::new(GeminiClient::new(String::new(), std::time::Duration::from_secs(1)));
        let result = extractor.extract("balance 10", "win rate 50%").await;
        assert!(matches!(result, Err(AdvisorError::ExtractionFailed(_))));
    }
}
