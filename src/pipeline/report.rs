//! Derived submarket report: snapshot figures joined with the latest
//! historical table rows. No model call is involved.

use crate::error::TargetFailure;
use crate::model::HistoricalData;
use serde_json::{Value, json};

fn field<'a>(snapshot: &'a Value, pointer: &str) -> Result<&'a Value, TargetFailure> {
    snapshot
        .pointer(pointer)
        .ok_or_else(|| TargetFailure::DerivationFailed {
            detail: format!("submarket snapshot has no '{}'", &pointer[1..].replace('/', ".")),
        })
}

fn latest_cells<'a>(
    data: &'a HistoricalData,
    block_id: &str,
    columns: &[usize],
) -> Result<Vec<&'a str>, TargetFailure> {
    let row = data
        .latest_row(block_id)
        .ok_or_else(|| TargetFailure::DerivationFailed {
            detail: format!("historical block '{block_id}' has no dated rows"),
        })?;
    columns
        .iter()
        .map(|&c| {
            row.get(c)
                .map(String::as_str)
                .ok_or_else(|| TargetFailure::DerivationFailed {
                    detail: format!("latest '{block_id}' row has no column {c}"),
                })
        })
        .collect()
}

/// Build the `report` record for one submarket.
///
/// Inventory comes from the latest `sample_existing_units` row (existing
/// units); bedroom rents from the latest `monthly_rent` row (1, 2 and
/// 3 BR columns).
pub fn derive_report(snapshot: &Value, data: &HistoricalData) -> Result<Value, TargetFailure> {
    let inventory = latest_cells(data, "sample_existing_units", &[1])?;
    let rents = latest_cells(data, "monthly_rent", &[3, 4, 5])?;

    Ok(json!({
        "quarter": field(snapshot, "/quarter")?,
        "year": field(snapshot, "/year")?,
        "state": field(snapshot, "/state")?,
        "market": field(snapshot, "/market")?,
        "submarket": field(snapshot, "/submarket")?,
        "average_rental_rate": field(snapshot, "/rent/monthly_rent")?,
        "annual_rent_growth": field(snapshot, "/rent/annual_change")?,
        "current_vacancy": field(snapshot, "/occupancy/current_rate")?,
        "inventory_of_properties": {
            "total_number_of_properties": inventory[0],
            "breakdown_of_properties": "",
        },
        "average_monthly_rent": {
            "one_bedroom_apartment": rents[0],
            "two_bedroom_apartment": rents[1],
            "three_bedroom_apartment": rents[2],
        },
    }))
}
