//! Every natural-language request the orchestrator sends.
//!
//! Each builder embeds the target schema's shape description (see
//! [`RecordSchema::describe`]) and asks for a fenced ```` ```json ````
//! block, which is what [`crate::pipeline::json::JsonRecovery`] looks for.
//! Callers can replace the assistant instructions via
//! [`crate::config::ExtractionConfig::system_prompt`].

use crate::schema::{
    MARKET_SNAPSHOT, PROPERTY_LIST, RecordSchema, SAMPLE_EXISTING_UNITS_LIST, SUBMARKET_LIST,
    SUBMARKET_SNAPSHOT, SUPPLY_DEMAND_LIST,
};

/// Assistant instructions bound into every session.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert in real estate analytical data. \
Answer questions about real estate analytics using only the report provided below. \
When asked for JSON, reply with exactly one fenced ```json code block containing the requested structure, \
fill every requested field, and use null for values the report does not contain.";

/// Header placed before the document text in the session context.
pub const DOCUMENT_HEADER: &str = "The market report follows. Page markers look like '--- Page N ---'.";

const LOCATION_RULES: &str = "Use an integer for the quarter value. \
Use the two-letter notation for the state value. \
Remove the state code that follows a comma from the market name.";

fn shape(schema: &RecordSchema) -> String {
    schema.describe()
}

pub fn market_snapshot() -> String {
    format!(
        "Find the Executive Summary Snapshot in the document and return it as JSON: {}. \
For 'market_text' summarise the text titled 'Overview' in the Executive Summary. {}",
        shape(&MARKET_SNAPSHOT),
        LOCATION_RULES
    )
}

pub fn submarket_list() -> String {
    format!(
        "Find every submarket name in the document together with its submarket key \
and return them as a list in JSON format: {}",
        shape(&SUBMARKET_LIST)
    )
}

pub fn submarket_snapshot(submarket: &str) -> String {
    format!(
        "Find the Submarket Overview Snapshot for '{}' (not the METRO figures) in the document \
and return it as JSON: {}. {}",
        submarket,
        shape(&SUBMARKET_SNAPSHOT),
        LOCATION_RULES
    )
}

pub fn completed_properties(submarket: &str) -> String {
    format!(
        "Find the Properties Completed in the Last Four Quarters for '{}' in the document \
and return them as a list in JSON format: {}",
        submarket,
        shape(&PROPERTY_LIST)
    )
}

pub fn properties_under_construction(submarket: &str) -> String {
    format!(
        "Find the Properties Under Construction for '{}' in the document \
and return them as a list in JSON format: {}",
        submarket,
        shape(&PROPERTY_LIST)
    )
}

pub fn supply_demand(submarket: &str) -> String {
    format!(
        "Find the 'Supply/Demand' table for submarket '{}' in the document, extract its data \
and return it as a list of 9 elements, one per period, in JSON format: {}",
        submarket,
        shape(&SUPPLY_DEMAND_LIST)
    )
}

pub fn sample_existing_units(submarket: &str) -> String {
    format!(
        "Find the 'Sample/Existing Units' data for submarket '{}' in the document for the last 9 periods \
and return it as a list in JSON format: {}",
        submarket,
        shape(&SAMPLE_EXISTING_UNITS_LIST)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_asks_for_fenced_json() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("```json"));
    }

    #[test]
    fn requests_embed_schema_shape() {
        let p = market_snapshot();
        assert!(p.contains("market_text"));
        assert!(p.contains("one_year_forecast {"));
        assert!(p.contains("two-letter"));

        let p = submarket_snapshot("Downtown");
        assert!(p.contains("'Downtown'"));
        assert!(p.contains("METRO"));
        assert!(p.contains("rent {"));
    }

    #[test]
    fn extended_requests_name_their_tables() {
        assert!(supply_demand("East").contains("Supply/Demand"));
        assert!(sample_existing_units("East").contains("percent_sampled"));
        assert!(completed_properties("East").contains("developer"));
        assert!(properties_under_construction("East").contains("Under Construction"));
        assert!(submarket_list().contains("submarket_key"));
    }
}
