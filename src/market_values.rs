use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

static BUNDLED_DATASET: &str = include_str!("../data/market_values.json");

/// Curated Transfermarkt-style valuation for one player, all amounts in €M.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketValueRecord {
    pub name: String,
    pub value: f64,
    // 0 means free transfer, academy product or unknown.
    #[serde(default)]
    pub paid: f64,
    #[serde(default)]
    pub year: u16,
    #[serde(default)]
    pub rumored: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketValueDataset {
    pub version: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub players: Vec<MarketValueRecord>,
}

/// Lookup table over a dataset. Keeps file order, which decides ties during
/// partial name matching.
#[derive(Debug, Clone)]
pub struct MarketValueTable {
    version: String,
    source: Option<String>,
    records: Vec<MarketValueRecord>,
    by_name: HashMap<String, usize>,
}

impl MarketValueTable {
    pub fn from_dataset(dataset: MarketValueDataset) -> Self {
        let mut records = Vec::with_capacity(dataset.players.len());
        let mut by_name = HashMap::with_capacity(dataset.players.len());
        for mut record in dataset.players {
            record.value = non_negative(record.value);
            record.paid = non_negative(record.paid);
            record.rumored = record.rumored.map(non_negative);
            // First occurrence wins for exact lookups, same as for partial ones.
            by_name.entry(record.name.clone()).or_insert(records.len());
            records.push(record);
        }
        Self {
            version: dataset.version,
            source: dataset.source,
            records,
            by_name,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let dataset: MarketValueDataset =
            serde_json::from_str(raw.trim()).context("invalid market value dataset json")?;
        Ok(Self::from_dataset(dataset))
    }

    /// The dataset compiled into the binary.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_DATASET).context("bundled market value dataset")
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read market value dataset {}", path.display()))?;
        let table = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            version = %table.version,
            players = table.len(),
            "loaded market value dataset"
        );
        Ok(table)
    }

    /// Bundled dataset unless an override path is configured.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::bundled(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MarketValueRecord] {
        &self.records
    }

    /// Find the record for a display name.
    ///
    /// Tiers, first hit wins:
    /// 1. exact key match,
    /// 2. the last name token contained in a key (case-insensitive when the token
    ///    is longer than 4 characters),
    /// 3. the first name token, when longer than 5 characters, contained in a key
    ///    case-insensitively.
    ///
    /// Shared surnames are not disambiguated: "Williams" hits whichever Williams
    /// comes first in the table.
    pub fn resolve(&self, name: &str) -> Option<&MarketValueRecord> {
        if let Some(idx) = self.by_name.get(name) {
            return self.records.get(*idx);
        }

        let mut tokens = name.split_whitespace();
        let first = tokens.next()?;
        let last = tokens.last().unwrap_or(first);

        let last_lower = last.to_lowercase();
        let last_is_long = last.chars().count() > 4;
        let by_last = self.records.iter().find(|r| {
            r.name.contains(last) || (last_is_long && r.name.to_lowercase().contains(&last_lower))
        });
        if by_last.is_some() {
            return by_last;
        }

        if first.chars().count() > 5 {
            let first_lower = first.to_lowercase();
            return self
                .records
                .iter()
                .find(|r| r.name.to_lowercase().contains(&first_lower));
        }

        None
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::MarketValueTable;

    fn table() -> MarketValueTable {
        MarketValueTable::bundled().expect("bundled dataset parses")
    }

    #[test]
    fn bundled_dataset_is_versioned_and_non_empty() {
        let t = table();
        assert_eq!(t.version(), "2024-12");
        assert!(t.len() > 90);
        assert!(t.records().iter().all(|r| r.value >= 0.0 && r.paid >= 0.0));
    }

    #[test]
    fn exact_match_wins() {
        let t = table();
        let rec = t.resolve("Harry Kane").expect("kane");
        assert_eq!(rec.value, 100.0);
        assert_eq!(rec.paid, 95.0);
    }

    #[test]
    fn last_name_match_handles_abbreviated_first_names() {
        let t = table();
        let rec = t.resolve("H. Kane").expect("kane by surname");
        assert_eq!(rec.name, "Harry Kane");

        // Longer surnames match case-insensitively.
        let rec = t.resolve("Kylian MBAPPE").expect("mbappe");
        assert_eq!(rec.name, "Kylian Mbappe");
    }

    #[test]
    fn first_name_match_needs_more_than_five_chars() {
        let t = table();
        // "SAKA" is too short for a case-insensitive surname match; "Bukayo" carries it.
        let rec = t.resolve("Bukayo SAKA").expect("saka via first name");
        assert_eq!(rec.name, "Bukayo Saka");
        assert!(t.resolve("Cole XYZW").is_none());
    }

    #[test]
    fn shared_surname_resolves_to_first_table_entry() {
        let t = table();
        let rec = t.resolve("Inaki Williams").expect("ambiguous williams");
        assert_eq!(rec.name, "Nico Williams");
    }

    #[test]
    fn unknown_and_empty_names_do_not_match() {
        let t = table();
        assert!(t.resolve("Joe Bloggs").is_none());
        assert!(t.resolve("").is_none());
        assert!(t.resolve("   ").is_none());
    }

    #[test]
    fn resolution_is_deterministic() {
        let t = table();
        for name in ["Inaki Williams", "Lois Openda", "Pedro", "Nobody Here"] {
            let a = t.resolve(name).map(|r| r.name.clone());
            let b = t.resolve(name).map(|r| r.name.clone());
            assert_eq!(a, b);
        }
    }

    #[test]
    fn negative_values_are_floored_at_zero() {
        let raw = r#"{"version":"t","players":[{"name":"A B","value":-3,"paid":-1,"rumored":-2}]}"#;
        let t = MarketValueTable::from_json(raw).expect("parses");
        let rec = t.resolve("A B").expect("a b");
        assert_eq!(rec.value, 0.0);
        assert_eq!(rec.paid, 0.0);
        assert_eq!(rec.rumored, Some(0.0));
    }
}
