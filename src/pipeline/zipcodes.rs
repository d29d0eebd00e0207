//! Zip code scraping from a submarket's "ZIP Code List" page.

use crate::model::{SubmarketDescriptor, ZipCodeRecord};
use crate::pipeline::document::LoadedDocument;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const ZIP_CODE_MARKER: &str = "ZIP Code List";

static RE_ZIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{5,6}\b").unwrap());

/// Every 5 or 6 digit token after the marker, in order, duplicates kept.
///
/// Ranges such as `10001-10003` yield their two endpoints only.
pub fn find_zip_codes(text: &str) -> Vec<String> {
    let Some(pos) = text.find(ZIP_CODE_MARKER) else {
        return Vec::new();
    };
    let after = &text[pos + ZIP_CODE_MARKER.len()..];
    let after = after.strip_prefix(':').unwrap_or(after);
    RE_ZIP
        .find_iter(after)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Zip codes from the first page carrying the marker; empty when none does.
pub fn extract_zip_codes(doc: &LoadedDocument) -> Vec<String> {
    doc.pages
        .iter()
        .find(|p| p.contains(ZIP_CODE_MARKER))
        .map(|p| find_zip_codes(p))
        .unwrap_or_default()
}

/// Join zip codes with their submarket and the market snapshot's location.
pub fn zip_code_records(
    zip_codes: &[String],
    submarket: &SubmarketDescriptor,
    market_snapshot: &Value,
) -> Vec<ZipCodeRecord> {
    let state = market_snapshot.get("state").cloned().unwrap_or(Value::Null);
    let market = market_snapshot.get("market").cloned().unwrap_or(Value::Null);
    zip_codes
        .iter()
        .map(|zip| ZipCodeRecord {
            zipcode: zip.clone(),
            state: state.clone(),
            market: market.clone(),
            submarket: submarket.name.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn marker_list_with_range() {
        assert_eq!(
            find_zip_codes("ZIP Code List: 90210, 10001-10003, 33109"),
            vec!["90210", "10001", "10003", "33109"]
        );
    }

    #[test]
    fn no_marker_no_codes() {
        assert!(find_zip_codes("Zip codes: 90210, 10001").is_empty());
    }

    #[test]
    fn digits_before_the_marker_are_ignored() {
        assert_eq!(
            find_zip_codes("Page 123456\nZIP Code List\n75201 75202 75201 1234 1234567"),
            vec!["75201", "75202", "75201"]
        );
    }

    #[test]
    fn first_marked_page_wins() {
        let doc = LoadedDocument {
            path: PathBuf::from("a.txt"),
            pages: vec![
                "SNAPSHOT 78701".into(),
                "ZIP Code List: 78701, 78702".into(),
                "ZIP Code List: 99999".into(),
            ],
        };
        assert_eq!(extract_zip_codes(&doc), vec!["78701", "78702"]);
    }

    #[test]
    fn records_carry_market_location() {
        let records = zip_code_records(
            &["78701".to_string()],
            &SubmarketDescriptor::new("1", "Downtown"),
            &json!({"state": "TX", "market": "Austin"}),
        );
        assert_eq!(
            serde_json::to_value(&records).unwrap(),
            json!([{"zipcode": "78701", "state": "TX", "market": "Austin", "submarket": "Downtown"}])
        );
    }
}
