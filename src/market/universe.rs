//! Static instrument universe

use crate::error::AdvisorError;
use crate::models::{Instrument, MarketCapTier, TierSet};
use crate::Result;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InstrumentUniverse {
    instruments: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
struct UniverseRow {
    symbol: String,
    #[serde(alias = "company_name")]
    name: String,
    tier: String,
    #[serde(default)]
    sector: Option<String>,
}

const BUILTIN: &[(&str, &str, MarketCapTier, &str)] = &[
    // Large caps
    ("RELIANCE", "Reliance Industries", MarketCapTier::Large, "Energy"),
    ("TCS", "Tata Consultancy Services", MarketCapTier::Large, "IT"),
    ("HDFCBANK", "HDFC Bank", MarketCapTier::Large, "Banking"),
    ("INFY", "Infosys", MarketCapTier::Large, "IT"),
    ("ICICIBANK", "ICICI Bank", MarketCapTier::Large, "Banking"),
    ("HINDUNILVR", "Hindustan Unilever", MarketCapTier::Large, "FMCG"),
    ("ITC", "ITC", MarketCapTier::Large, "FMCG"),
    ("SBIN", "State Bank of India", MarketCapTier::Large, "Banking"),
    ("BHARTIARTL", "Bharti Airtel", MarketCapTier::Large, "Telecom"),
    ("KOTAKBANK", "Kotak Mahindra Bank", MarketCapTier::Large, "Banking"),
    ("LT", "Larsen & Toubro", MarketCapTier::Large, "Infrastructure"),
    ("HCLTECH", "HCL Technologies", MarketCapTier::Large, "IT"),
    ("AXISBANK", "Axis Bank", MarketCapTier::Large, "Banking"),
    ("ASIANPAINT", "Asian Paints", MarketCapTier::Large, "Consumer"),
    ("MARUTI", "Maruti Suzuki", MarketCapTier::Large, "Auto"),
    ("SUNPHARMA", "Sun Pharmaceutical", MarketCapTier::Large, "Pharma"),
    ("TITAN", "Titan Company", MarketCapTier::Large, "Consumer"),
    ("ULTRACEMCO", "UltraTech Cement", MarketCapTier::Large, "Cement"),
    ("NESTLEIND", "Nestle India", MarketCapTier::Large, "FMCG"),
    ("WIPRO", "Wipro", MarketCapTier::Large, "IT"),
    ("BAJFINANCE", "Bajaj Finance", MarketCapTier::Large, "Financial Services"),
    ("M&M", "Mahindra & Mahindra", MarketCapTier::Large, "Auto"),
    ("POWERGRID", "Power Grid Corporation", MarketCapTier::Large, "Power"),
    ("NTPC", "NTPC", MarketCapTier::Large, "Power"),
    ("ONGC", "Oil & Natural Gas Corporation", MarketCapTier::Large, "Energy"),
    ("COALINDIA", "Coal India", MarketCapTier::Large, "Power"),
    // Mid caps
    ("ADANIPORTS", "Adani Ports & SEZ", MarketCapTier::Mid, "Infrastructure"),
    ("ADANIGREEN", "Adani Green Energy", MarketCapTier::Mid, "Power"),
    ("ABB", "ABB India", MarketCapTier::Mid, "Capital Goods"),
    ("GODREJCP", "Godrej Consumer Products", MarketCapTier::Mid, "FMCG"),
    ("PIDILITIND", "Pidilite Industries", MarketCapTier::Mid, "Chemicals"),
    ("BERGEPAINT", "Berger Paints", MarketCapTier::Mid, "Consumer"),
    ("SIEMENS", "Siemens", MarketCapTier::Mid, "Capital Goods"),
    ("BOSCHLTD", "Bosch", MarketCapTier::Mid, "Auto"),
    ("MUTHOOTFIN", "Muthoot Finance", MarketCapTier::Mid, "Financial Services"),
    ("ASTRAL", "Astral", MarketCapTier::Mid, "Building Materials"),
    ("FEDERALBNK", "Federal Bank", MarketCapTier::Mid, "Banking"),
    ("IDFCFIRSTB", "IDFC First Bank", MarketCapTier::Mid, "Banking"),
    ("ASHOKLEY", "Ashok Leyland", MarketCapTier::Mid, "Auto"),
    ("NMDC", "NMDC", MarketCapTier::Mid, "Metals"),
    ("LUPIN", "Lupin", MarketCapTier::Mid, "Pharma"),
    ("VOLTAS", "Voltas", MarketCapTier::Mid, "Consumer"),
    // Small caps
    ("ZOMATO", "Zomato", MarketCapTier::Small, "Consumer"),
    ("PAYTM", "One 97 Communications", MarketCapTier::Small, "Financial Services"),
    ("IRCTC", "Indian Railway Catering & Tourism", MarketCapTier::Small, "Services"),
    ("CDSL", "Central Depository Services", MarketCapTier::Small, "Financial Services"),
    ("POLICYBZR", "PB Fintech", MarketCapTier::Small, "Financial Services"),
    ("TATAMOTORS", "Tata Motors", MarketCapTier::Small, "Auto"),
    ("JUBLFOOD", "Jubilant FoodWorks", MarketCapTier::Small, "Consumer"),
    ("PVR", "PVR INOX", MarketCapTier::Small, "Media"),
    ("LICI", "Life Insurance Corporation", MarketCapTier::Small, "Insurance"),
    ("CASTROLIND", "Castrol India", MarketCapTier::Small, "Energy"),
    ("ATUL", "Atul", MarketCapTier::Small, "Chemicals"),
    ("ANANDRATHI", "Anand Rathi Wealth", MarketCapTier::Small, "Financial Services"),
    ("DATAPATTNS", "Data Patterns", MarketCapTier::Small, "IT"),
    ("BLS", "BLS International", MarketCapTier::Small, "Services"),
    ("AEGISVOPAK", "Aegis Vopak Terminals", MarketCapTier::Small, "Infrastructure"),
    ("ABREL", "Aditya Birla Real Estate", MarketCapTier::Small, "Real Estate"),
    ("AARTIIND", "Aarti Industries", MarketCapTier::Small, "Chemicals"),
    ("BANDHANBNK", "Bandhan Bank", MarketCapTier::Small, "Banking"),
];

impl InstrumentUniverse {
    /// Builds a universe, dropping repeated company names (first wins).
    pub fn new(instruments: Vec<Instrument>) -> Self {
        let mut seen = HashSet::new();
        let instruments = instruments
            .into_iter()
            .filter(|i| seen.insert(i.name.trim().to_lowercase()))
            .collect();
        Self { instruments }
    }

    /// NSE instruments across all three tiers
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN
                .iter()
                .map(|(symbol, name, tier, sector)| Instrument {
                    symbol: symbol.to_string(),
                    name: name.to_string(),
                    tier: *tier,
                    sector: sector.to_string(),
                })
                .collect(),
        )
    }

    /// Load from a JSON array of `{symbol, name, tier, sector}` rows.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let rows: Vec<UniverseRow> = serde_json::from_str(&raw)?;

        let mut instruments = Vec::with_capacity(rows.len());
        for row in rows {
            let tier = MarketCapTier::parse(&row.tier).ok_or_else(|| {
                AdvisorError::Config(format!("unknown tier '{}' for {}", row.tier, row.symbol))
            })?;
            instruments.push(Instrument {
                symbol: row.symbol.trim().to_uppercase(),
                name: row.name.trim().to_string(),
                tier,
                sector: row.sector.unwrap_or_else(|| "Other".to_string()),
            });
        }

        info!(path = %path.display(), count = instruments.len(), "Loaded instrument universe");
        Ok(Self::new(instruments))
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn filter_by_tiers(&self, tiers: &TierSet) -> Vec<Instrument> {
        self.instruments
            .iter()
            .filter(|i| tiers.contains(i.tier))
            .cloned()
            .collect()
    }

    pub fn find(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments
            .iter()
            .find(|i| i.symbol.eq_ignore_ascii_case(symbol))
    }
}

impl Default for InstrumentUniverse {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_has_enough_small_and_mid_caps() {
        let universe = InstrumentUniverse::builtin();
        let tiers = TierSet::new([MarketCapTier::Small, MarketCapTier::Mid]);
        assert!(universe.filter_by_tiers(&tiers).len() >= 30);
        assert!(universe
            .filter_by_tiers(&TierSet::new([MarketCapTier::Small]))
            .iter()
            .all(|i| i.tier == MarketCapTier::Small));
    }

    #[test]
    fn test_duplicate_company_names_are_dropped() {
        let make = |symbol: &str, name: &str| Instrument {
            symbol: symbol.to_string(),
            name: name.to_string(),
            tier: MarketCapTier::Small,
            sector: "IT".to_string(),
        };
        let universe = InstrumentUniverse::new(vec![
            make("AAA", "Alpha Ltd"),
            make("AAA-BE", "alpha ltd"),
            make("BBB", "Beta Ltd"),
        ]);
        assert_eq!(universe.len(), 2);
        assert!(universe.find("aaa").is_some());
        assert!(universe.find("AAA-BE").is_none());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"symbol": "xyz", "company_name": "XYZ Corp", "tier": "midcap", "sector": "Metals"}},
                {{"symbol": "abc", "name": "ABC", "tier": "small"}}]"#
        )
        .unwrap();

        let universe = InstrumentUniverse::from_json_file(file.path()).unwrap();
        assert_eq!(universe.len(), 2);
        assert_eq!(universe.find("XYZ").unwrap().tier, MarketCapTier::Mid);
        assert_eq!(universe.find("ABC").unwrap().sector, "Other");
    }

    #[test]
    fn test_from_json_file_rejects_unknown_tier() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"symbol": "X", "name": "X", "tier": "mega"}}]"#).unwrap();
        assert!(matches!(
            InstrumentUniverse::from_json_file(file.path()),
            Err(AdvisorError::Config(_))
        ));
    }
}
