//! Domain records shared by the pipeline stages.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// One submarket as listed in the report: a short key plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmarketDescriptor {
    pub submarket_key: String,
    pub name: String,
}

impl SubmarketDescriptor {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            submarket_key: key.into(),
            name: name.into(),
        }
    }

    /// Build a descriptor from one element of the submarket-list response.
    ///
    /// Models return the key as a number about as often as a string, so
    /// both are accepted. Anything else yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let key = match value.get("submarket_key")? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let name = value.get("name")?.as_str()?.trim().to_string();
        if key.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(key, name))
    }
}

// ── Quarter labels ───────────────────────────────────────────────────────

static RE_QUARTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\dQ \d{2}$").unwrap());

/// A historical table period label such as `3Q 24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QuarterLabel {
    // Field order gives chronological `Ord`.
    pub year: u16,
    pub quarter: u8,
}

impl QuarterLabel {
    /// True when `s` is exactly a `<N>Q <YY>` label.
    pub fn matches(s: &str) -> bool {
        RE_QUARTER.is_match(s)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if !Self::matches(s) {
            return None;
        }
        let (q, yy) = s.split_once(' ')?;
        let quarter = q.trim_end_matches('Q').parse().ok()?;
        let yy: u16 = yy.parse().ok()?;
        Some(Self {
            year: 2000 + yy,
            quarter,
        })
    }
}

impl fmt::Display for QuarterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q {:02}", self.quarter, self.year % 100)
    }
}

// ── Historical data blocks ───────────────────────────────────────────────

/// Layout of one historical table: where it starts and what its columns are.
#[derive(Debug, Clone, Copy)]
pub struct BlockConfig {
    pub block_id: &'static str,
    pub keyword: &'static str,
    /// Column headers as printed, used for the CSV audit file.
    pub headers: &'static [&'static str],
    /// Record keys, one per column, used when persisting rows.
    pub keys: &'static [&'static str],
    pub row_width: usize,
}

const UNIT_MIX_HEADERS: &[&str] = &[
    "Period", "Total", "Eff", "1 BR", "2 BR", "3 BR", "2000+", "1990s", "1980s", "1970s",
    "Pre-1970", "Low-Rise", "Mid-Rise", "High-Rise",
];

const UNIT_MIX_KEYS: &[&str] = &[
    "period", "total", "eff", "1br", "2br", "3br", "2000", "1990", "1980", "1970", "pre-1970",
    "low-rise", "mid-rise", "high-rise",
];

const fn unit_mix(block_id: &'static str, keyword: &'static str) -> BlockConfig {
    BlockConfig {
        block_id,
        keyword,
        headers: UNIT_MIX_HEADERS,
        keys: UNIT_MIX_KEYS,
        row_width: 14,
    }
}

/// The seven tables on a submarket's HISTORICAL DATA page.
pub const BLOCK_CONFIGS: [BlockConfig; 7] = [
    unit_mix("occupancy", "Occupancy"),
    unit_mix("monthly_rent", "Monthly Rent"),
    unit_mix("rent_per_sqft", "Rent Per Square Foot"),
    unit_mix("annual_rent_change", "Annual Rent Change"),
    unit_mix("annual_revenue_change", "Annual Revenue Change"),
    BlockConfig {
        block_id: "supply_demand",
        keyword: "Supply/Demand",
        headers: &[
            "Period",
            "Supply Quarterly",
            "Supply Annual",
            "Demand Quarterly",
            "Demand Annual",
            "Inventory Change Quarterly",
            "Inventory Change Annual",
        ],
        keys: &[
            "period",
            "supply_quarterly",
            "supply_annual",
            "demand_quarterly",
            "demand_annual",
            "inventory_change_quarterly",
            "inventory_change_annual",
        ],
        row_width: 7,
    },
    BlockConfig {
        block_id: "sample_existing_units",
        keyword: "Sample/Existing Units",
        headers: &["Period", "Existing Units", "Sampled Units", "Percent Sampled"],
        keys: &["period", "existing_units", "sampled_units", "percent_sampled"],
        row_width: 4,
    },
];

/// Look up a block layout by id.
pub fn block_config(block_id: &str) -> Option<&'static BlockConfig> {
    BLOCK_CONFIGS.iter().find(|c| c.block_id == block_id)
}

/// Raw rows of every historical table, keyed by block id.
///
/// Rows keep the order they were read in; every configured block is
/// present, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoricalData {
    pub blocks: BTreeMap<String, Vec<Vec<String>>>,
}

impl HistoricalData {
    /// All configured blocks, every one empty.
    pub fn empty() -> Self {
        Self {
            blocks: BLOCK_CONFIGS
                .iter()
                .map(|c| (c.block_id.to_string(), Vec::new()))
                .collect(),
        }
    }

    pub fn rows(&self, block_id: &str) -> &[Vec<String>] {
        self.blocks.get(block_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.values().all(Vec::is_empty)
    }

    /// The row whose period label is chronologically latest.
    ///
    /// The first maximal row wins ties; rows with an unparseable label
    /// are ignored.
    pub fn latest_row(&self, block_id: &str) -> Option<&[String]> {
        let mut best: Option<(QuarterLabel, &Vec<String>)> = None;
        for row in self.rows(block_id) {
            let Some(label) = row.first().and_then(|p| QuarterLabel::parse(p)) else {
                continue;
            };
            if best.is_none_or(|(b, _)| label > b) {
                best = Some((label, row));
            }
        }
        best.map(|(_, row)| row.as_slice())
    }

    /// Convert one block's rows into flat store records.
    pub fn block_records(
        &self,
        config: &BlockConfig,
        state: &Value,
        market: &Value,
        submarket: &str,
    ) -> Vec<Value> {
        self.rows(config.block_id)
            .iter()
            .map(|row| {
                let mut record = Map::new();
                record.insert("market_parameter".into(), config.block_id.into());
                for (key, cell) in config.keys.iter().zip(row) {
                    record.insert((*key).into(), cell.clone().into());
                }
                if let Some(label) = row.first().and_then(|p| QuarterLabel::parse(p)) {
                    record.insert("quarter".into(), label.quarter.into());
                    record.insert("year".into(), label.year.into());
                }
                record.insert("state".into(), state.clone());
                record.insert("market".into(), market.clone());
                record.insert("submarket".into(), submarket.into());
                Value::Object(record)
            })
            .collect()
    }
}

/// One zip code joined with its submarket and market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipCodeRecord {
    pub zipcode: String,
    pub state: Value,
    pub market: Value,
    pub submarket: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_accepts_numeric_key() {
        let d = SubmarketDescriptor::from_value(&json!({"submarket_key": 4, "name": " East "}))
            .unwrap();
        assert_eq!(d, SubmarketDescriptor::new("4", "East"));
    }

    #[test]
    fn descriptor_rejects_missing_name() {
        assert!(SubmarketDescriptor::from_value(&json!({"submarket_key": "A1"})).is_none());
        assert!(SubmarketDescriptor::from_value(&json!({"submarket_key": [], "name": "x"})).is_none());
    }

    #[test]
    fn quarter_label_parsing() {
        assert!(QuarterLabel::matches("3Q 24"));
        assert!(!QuarterLabel::matches("3Q 2024"));
        assert!(!QuarterLabel::matches("Notes"));
        let q = QuarterLabel::parse("2Q 23").unwrap();
        assert_eq!((q.quarter, q.year), (2, 2023));
        assert_eq!(q.to_string(), "2Q 23");
        assert!(QuarterLabel::parse("4Q 23").unwrap() < QuarterLabel::parse("1Q 24").unwrap());
    }

    #[test]
    fn block_widths_match_headers() {
        for c in &BLOCK_CONFIGS {
            assert_eq!(c.headers.len(), c.row_width, "{}", c.block_id);
            assert_eq!(c.keys.len(), c.row_width, "{}", c.block_id);
        }
    }

    #[test]
    fn latest_row_uses_chronological_order() {
        let mut data = HistoricalData::empty();
        data.blocks.insert(
            "sample_existing_units".into(),
            vec![
                vec!["4Q 23".into(), "100".into()],
                vec!["2Q 24".into(), "120".into()],
                vec!["1Q 24".into(), "110".into()],
                vec!["2Q 24".into(), "999".into()],
            ],
        );
        let row = data.latest_row("sample_existing_units").unwrap();
        assert_eq!(row[1], "120");
        assert!(data.latest_row("monthly_rent").is_none());
    }

    #[test]
    fn block_records_carry_location_and_period() {
        let mut data = HistoricalData::empty();
        data.blocks.insert(
            "sample_existing_units".into(),
            vec![vec!["3Q 24".into(), "5,000".into(), "4,000".into(), "80%".into()]],
        );
        let config = block_config("sample_existing_units").unwrap();
        let records = data.block_records(config, &json!("TX"), &json!("Austin"), "Downtown");
        assert_eq!(
            records,
            vec![json!({
                "market_parameter": "sample_existing_units",
                "period": "3Q 24",
                "existing_units": "5,000",
                "sampled_units": "4,000",
                "percent_sampled": "80%",
                "quarter": 3,
                "year": 2024,
                "state": "TX",
                "market": "Austin",
                "submarket": "Downtown"
            })]
        );
    }
}
