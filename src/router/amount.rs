//! Investment amount extraction from free text

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmountMention {
    Explicit(f64),
    /// "calculate it for me", "use my safe amount", ...
    FromProfile,
}

const FROM_PROFILE_KEYWORDS: &[&str] = &[
    "calculate", "safe amount", "you decide", "whatever is safe",
];

/// Smallest bare number taken as an amount when one is expected
const MIN_BARE_AMOUNT: f64 = 100.0;

fn amount_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?P<cur>₹|\brs\.?|\binr\b|\$)?\s*(?P<num>\d[\d,]*(?:\.\d+)?)\s*(?P<unit>k\b|thousand\b|lakhs?\b|lacs?\b|crores?\b|cr\b)?\s*(?P<word>rupees\b|rs\b|inr\b)?",
        )
        .ok()
    })
    .as_ref()
}

/// Find an amount in `text`.
///
/// A number counts when it carries a currency marker or a unit
/// (`₹50,000`, `rs 5000`, `5000 rupees`, `50k`, `2 lakh`, `$500`). With
/// `expecting` set, a bare number of at least 100 also counts.
pub fn extract_amount(text: &str, expecting: bool) -> Option<AmountMention> {
    let re = amount_regex()?;
    let mut bare = None;

    for caps in re.captures_iter(text) {
        let Some(num) = caps.name("num") else { continue };
        let Ok(value) = num.as_str().replace(',', "").parse::<f64>() else {
            continue;
        };

        let unit = caps.name("unit").map(|m| m.as_str().to_lowercase());
        let multiplier = match unit.as_deref() {
            Some("k") | Some("thousand") => 1_000.0,
            Some(u) if u.starts_with("lakh") || u.starts_with("lac") => 100_000.0,
            Some(u) if u.starts_with("cr") => 10_000_000.0,
            _ => 1.0,
        };

        let marked = caps.name("cur").is_some() || unit.is_some() || caps.name("word").is_some();
        if marked {
            return Some(AmountMention::Explicit(value * multiplier));
        }
        if bare.is_none() && value >= MIN_BARE_AMOUNT {
            bare = Some(value);
        }
    }

    let lowered = text.to_lowercase();
    if FROM_PROFILE_KEYWORDS.iter().any(|k| lowered.contains(k))
        || lowered.split(|c: char| !c.is_alphanumeric()).any(|w| w == "auto")
    {
        return Some(AmountMention::FromProfile);
    }

    if expecting {
        bare.map(AmountMention::Explicit)
    } else {
        None
    }
}
