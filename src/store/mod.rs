//! Document store seam and collection routing.
//!
//! Logical record names (the same names the cache uses) are classified
//! once into a [`Collection`], which carries the physical collection name
//! and the natural-key fields used to build the upsert filter:
//!
//! | physical collection | natural key |
//! |---|---|
//! | `snapshots` | quarter, year, state, market, submarket |
//! | `zipcodes` | zipcode |
//! | `properties` | zipcode, name |
//! | `historical-data` | market_parameter, quarter, year, state, market, submarket |
//! | `supply_demands` | quarter, year, state, market, submarket |
//! | `sample_existing_units` | quarter, year, state, market, submarket |
//! | `report` | quarter, year, state, market, submarket |
//!
//! Writes are always upserts, so rerunning a document converges on the
//! same stored state whether or not the local cache survived.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::ExtractError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// The external document store: flat filter, flat `$set` payload.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert(
        &self,
        collection: &str,
        filter: Map<String, Value>,
        values: Map<String, Value>,
    ) -> Result<(), ExtractError>;
}

const LOCATION_KEY: &[&str] = &["quarter", "year", "state", "market", "submarket"];

/// Physical collections the pipeline writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Snapshots,
    Zipcodes,
    Properties,
    HistoricalData,
    SupplyDemands,
    SampleExistingUnits,
    Report,
}

impl Collection {
    /// Classify a logical record name.
    ///
    /// `historical-*` collapses to `historical-data`, both property lists
    /// collapse to `properties`, other names map to the collection of the
    /// same name. Names with no collection (e.g. `submarkets`) yield `None`.
    pub fn classify(logical: &str) -> Option<Self> {
        if logical.starts_with("historical-") {
            return Some(Collection::HistoricalData);
        }
        match logical {
            "completed_properties" | "properties_under_construction" => {
                Some(Collection::Properties)
            }
            "snapshots" => Some(Collection::Snapshots),
            "zipcodes" => Some(Collection::Zipcodes),
            "properties" => Some(Collection::Properties),
            "historical-data" => Some(Collection::HistoricalData),
            "supply_demands" => Some(Collection::SupplyDemands),
            "sample_existing_units" => Some(Collection::SampleExistingUnits),
            "report" => Some(Collection::Report),
            _ => None,
        }
    }

    pub fn physical_name(&self) -> &'static str {
        match self {
            Collection::Snapshots => "snapshots",
            Collection::Zipcodes => "zipcodes",
            Collection::Properties => "properties",
            Collection::HistoricalData => "historical-data",
            Collection::SupplyDemands => "supply_demands",
            Collection::SampleExistingUnits => "sample_existing_units",
            Collection::Report => "report",
        }
    }

    pub fn key_fields(&self) -> &'static [&'static str] {
        match self {
            Collection::Zipcodes => &["zipcode"],
            Collection::Properties => &["zipcode", "name"],
            Collection::HistoricalData => &[
                "market_parameter",
                "quarter",
                "year",
                "state",
                "market",
                "submarket",
            ],
            Collection::Snapshots
            | Collection::SupplyDemands
            | Collection::SampleExistingUnits
            | Collection::Report => LOCATION_KEY,
        }
    }
}

/// Split a record into `(filter, $set payload)`.
///
/// Key fields present on the record move into the filter; absent ones are
/// simply not part of it (a market snapshot has no `submarket`).
pub fn prepare_upsert(
    mut record: Map<String, Value>,
    keys: &[&str],
) -> (Map<String, Value>, Map<String, Value>) {
    let mut filter = Map::new();
    for key in keys {
        if let Some(value) = record.remove(*key) {
            filter.insert((*key).to_string(), value);
        }
    }
    (filter, record)
}

/// Persist an object or every element of a list under `logical` name.
///
/// Returns the number of upserts issued. Unrouted names and non-object
/// list elements are skipped.
pub async fn persist_record(
    store: &dyn DocumentStore,
    logical: &str,
    value: &Value,
) -> Result<usize, ExtractError> {
    let Some(collection) = Collection::classify(logical) else {
        debug!("'{}' has no store collection; cached only", logical);
        return Ok(0);
    };

    let records: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut written = 0;
    for record in records {
        let Some(map) = record.as_object() else {
            warn!(
                "Skipping non-object record for '{}' in '{}'",
                logical,
                collection.physical_name()
            );
            continue;
        };
        let (filter, values) = prepare_upsert(map.clone(), collection.key_fields());
        store
            .upsert(collection.physical_name(), filter, values)
            .await?;
        written += 1;
    }
    debug!(
        "Persisted {} record(s) of '{}' into '{}'",
        written,
        logical,
        collection.physical_name()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_collapses_prefixes_and_aliases() {
        assert_eq!(
            Collection::classify("historical-rent_per_sqft"),
            Some(Collection::HistoricalData)
        );
        assert_eq!(
            Collection::classify("completed_properties"),
            Some(Collection::Properties)
        );
        assert_eq!(
            Collection::classify("properties_under_construction"),
            Some(Collection::Properties)
        );
        assert_eq!(Collection::classify("report"), Some(Collection::Report));
        assert_eq!(Collection::classify("submarkets"), None);
    }

    #[test]
    fn physical_names() {
        assert_eq!(
            Collection::classify("historical-occupancy").unwrap().physical_name(),
            "historical-data"
        );
        assert_eq!(
            Collection::classify("completed_properties").unwrap().physical_name(),
            "properties"
        );
    }

    #[test]
    fn report_filter_is_exactly_the_location_key() {
        let record = json!({
            "quarter": 3, "year": 2024, "state": "TX", "market": "Austin", "submarket": "Downtown",
            "average_rental_rate": "$1,800", "current_vacancy": "7%"
        });
        let (filter, set) = prepare_upsert(
            record.as_object().unwrap().clone(),
            Collection::Report.key_fields(),
        );
        assert_eq!(
            Value::Object(filter),
            json!({"quarter": 3, "year": 2024, "state": "TX", "market": "Austin", "submarket": "Downtown"})
        );
        assert_eq!(
            Value::Object(set),
            json!({"average_rental_rate": "$1,800", "current_vacancy": "7%"})
        );
    }

    #[test]
    fn market_snapshot_filter_omits_submarket() {
        let record = json!({"quarter": 3, "year": 2024, "state": "TX", "market": "Austin", "market_text": "..."});
        let (filter, _) = prepare_upsert(
            record.as_object().unwrap().clone(),
            Collection::Snapshots.key_fields(),
        );
        assert_eq!(filter.len(), 4);
        assert!(!filter.contains_key("submarket"));
    }

    #[tokio::test]
    async fn list_records_upsert_per_element() {
        let store = MemoryStore::new();
        let n = persist_record(
            &store,
            "zipcodes",
            &json!([
                {"zipcode": "90210", "state": "CA", "market": "LA", "submarket": "West"},
                {"zipcode": "90211", "state": "CA", "market": "LA", "submarket": "West"},
                "garbage"
            ]),
        )
        .await
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.records("zipcodes").len(), 2);
    }

    #[tokio::test]
    async fn unrouted_names_are_not_written() {
        let store = MemoryStore::new();
        let n = persist_record(&store, "submarkets", &json!([{"submarket_key": 1, "name": "x"}]))
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(store.upsert_count(), 0);
    }
}
