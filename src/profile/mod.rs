//! Financial profile validation
//!
//! The extraction collaborator hands back a loosely-typed draft. Nothing
//! downstream sees the draft: it is validated here into an immutable
//! `FinancialProfile` or rejected with `ProfileIncomplete`.

pub mod extractor;

pub use extractor::{GeminiProfileExtractor, ProfileExtractor};

use crate::error::AdvisorError;
use crate::models::{BankingSummary, FinancialProfile, ProfileWarning, RiskBehavior, TradingSummary};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Months of expenses held back as an emergency fund when the safe amount
/// has to be derived
const EMERGENCY_FUND_MONTHS: f64 = 3.0;

const NOT_REPORTED: &str = "Not reported";

/// Raw extraction output. Every field is optional and untyped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileDraft {
    #[serde(default, alias = "banking")]
    pub banking_summary: BankingDraft,
    #[serde(default, alias = "trading_history")]
    pub trading_summary: TradingDraft,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BankingDraft {
    #[serde(default)]
    pub monthly_income: Option<Value>,
    #[serde(default)]
    pub monthly_expenses: Option<Value>,
    #[serde(default)]
    pub current_balance: Option<Value>,
    #[serde(default, alias = "safe_investment_capacity")]
    pub safe_investable_amount: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingDraft {
    #[serde(default, alias = "win_rate_percentage")]
    pub win_rate: Option<Value>,
    #[serde(default, alias = "largest_win")]
    pub best_trade: Option<Value>,
    #[serde(default, alias = "largest_loss")]
    pub worst_trade: Option<Value>,
    #[serde(default, alias = "preferred_sectors")]
    pub sector_preferences: Option<Value>,
    #[serde(default, alias = "risk_taking_behavior")]
    pub risk_behavior: Option<Value>,
    #[serde(default)]
    pub total_trades: Option<Value>,
    #[serde(default)]
    pub net_pnl: Option<Value>,
    #[serde(default, alias = "most_traded_stocks")]
    pub most_traded: Option<Value>,
}

/// Validate an extraction draft into a `FinancialProfile`.
pub fn validate_draft(draft: &ProfileDraft) -> Result<FinancialProfile> {
    let b = &draft.banking_summary;
    let t = &draft.trading_summary;
    let mut warnings = Vec::new();

    let monthly_income = required_amount(&b.monthly_income, "monthly_income")?;
    let monthly_expenses = required_amount(&b.monthly_expenses, "monthly_expenses")?;
    let current_balance = required_amount(&b.current_balance, "current_balance")?;

    let safe_investable_amount = match numeric(&b.safe_investable_amount) {
        Some(reported) if reported > current_balance => {
            warn!(
                reported,
                current_balance, "Safe investable amount exceeds balance, clamping"
            );
            warnings.push(ProfileWarning::SafeAmountClamped {
                reported,
                clamped_to: current_balance,
            });
            current_balance
        }
        Some(reported) if reported >= 0.0 => reported,
        Some(reported) => {
            return Err(AdvisorError::ProfileIncomplete(format!(
                "safe_investable_amount must be non-negative, got {}",
                reported
            )));
        }
        None => {
            let derived =
                (current_balance - EMERGENCY_FUND_MONTHS * monthly_expenses).max(0.0);
            warnings.push(ProfileWarning::SafeAmountDerived { amount: derived });
            derived
        }
    };

    let reported_win_rate = numeric(&t.win_rate).ok_or_else(|| {
        AdvisorError::ProfileIncomplete("win_rate is missing or not numeric".to_string())
    })?;
    let win_rate = if (0.0..=1.0).contains(&reported_win_rate) {
        reported_win_rate
    } else if reported_win_rate > 1.0 && reported_win_rate <= 100.0 {
        warnings.push(ProfileWarning::WinRateRescaled {
            reported: reported_win_rate,
        });
        reported_win_rate / 100.0
    } else {
        return Err(AdvisorError::ProfileIncomplete(format!(
            "win_rate out of range: {}",
            reported_win_rate
        )));
    };

    let risk_behavior = match t.risk_behavior.as_ref().and_then(Value::as_str).and_then(RiskBehavior::parse) {
        Some(r) => r,
        None => {
            warnings.push(ProfileWarning::RiskBehaviorInferred);
            RiskBehavior::from_win_rate(win_rate)
        }
    };

    let sector_preferences: BTreeSet<String> = string_list(&t.sector_preferences).into_iter().collect();

    let trading = TradingSummary {
        win_rate,
        best_trade: text(&t.best_trade).unwrap_or_else(|| NOT_REPORTED.to_string()),
        worst_trade: text(&t.worst_trade).unwrap_or_else(|| NOT_REPORTED.to_string()),
        sector_preferences,
        risk_behavior,
        total_trades: numeric(&t.total_trades)
            .filter(|n| *n >= 0.0)
            .map(|n| n.round() as u32),
        net_pnl: numeric(&t.net_pnl),
        most_traded: string_list(&t.most_traded),
    };

    let banking = BankingSummary {
        monthly_income,
        monthly_expenses,
        current_balance,
        safe_investable_amount,
    };

    info!(
        balance = banking.current_balance,
        safe_amount = banking.safe_investable_amount,
        risk = %trading.risk_behavior,
        warnings = warnings.len(),
        "Financial profile validated"
    );

    Ok(FinancialProfile::new(banking, trading, warnings))
}

/// Run the extraction collaborator and validate its output.
pub async fn build_profile(
    extractor: &dyn ProfileExtractor,
    banking_text: &str,
    trading_text: &str,
) -> Result<FinancialProfile> {
    if banking_text.trim().is_empty() || trading_text.trim().is_empty() {
        return Err(AdvisorError::InvalidInput(
            "both banking and trading documents are required".to_string(),
        ));
    }

    let draft = extractor.extract(banking_text, trading_text).await?;
    validate_draft(&draft)
}

fn required_amount(value: &Option<Value>, field: &str) -> Result<f64> {
    let n = numeric(value).ok_or_else(|| {
        AdvisorError::ProfileIncomplete(format!("{} is missing or not numeric", field))
    })?;
    if n < 0.0 {
        return Err(AdvisorError::ProfileIncomplete(format!(
            "{} must be non-negative, got {}",
            field, n
        )));
    }
    Ok(n)
}

/// Accepts JSON numbers and currency-formatted strings ("₹1,20,000.50").
fn numeric(value: &Option<Value>) -> Option<f64> {
    match value.as_ref()? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .trim_start_matches("Rs.")
                .trim_start_matches("Rs")
                .trim_start_matches("INR")
                .chars()
                .filter(|c| !matches!(c, '₹' | '$' | ',' | ' ' | '%'))
                .collect();
            cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

fn text(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(_) => value.as_ref().map(|v| v.to_string()),
        _ => None,
    }
}

fn string_list(value: &Option<Value>) -> Vec<String> {
    match value.as_ref() {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
