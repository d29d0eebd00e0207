//! Declarative record schemas.
//!
//! Every extraction target declares the fields it requires as a static
//! [`RecordSchema`]. The same value drives two things:
//!
//! 1. [`RecordSchema::describe`] renders the shape embedded in the LLM
//!    request (`{ quarter, year, rent { monthly_rent, ... } }`).
//! 2. [`RecordSchema::validate`] checks a candidate JSON value. Leaf
//!    fields only need to be present (any value, including `null`);
//!    nested fields must be objects carrying their own required fields.
//!    A [`Shape::List`] schema applies the field checks to every element.

use serde_json::Value;

/// One required field, optionally with required sub-fields.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl FieldSpec {
    pub const fn leaf(name: &'static str) -> Self {
        Self { name, fields: &[] }
    }

    pub const fn nested(name: &'static str, fields: &'static [FieldSpec]) -> Self {
        Self { name, fields }
    }

    fn is_nested(&self) -> bool {
        !self.fields.is_empty()
    }
}

/// Whether the target yields one object or a list of objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Object,
    List,
}

/// Static description of one record kind.
#[derive(Debug, Clone, Copy)]
pub struct RecordSchema {
    pub name: &'static str,
    pub shape: Shape,
    pub fields: &'static [FieldSpec],
}

impl RecordSchema {
    /// Render the field tree the way the requests present it to the model.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        write_fields(&mut out, self.fields, 0);
        out
    }

    /// Return the dotted paths of every missing required field.
    ///
    /// An empty vector means the value conforms. List elements are
    /// reported as `[index].path`.
    pub fn missing_fields(&self, value: &Value) -> Vec<String> {
        let mut missing = Vec::new();
        match (self.shape, value) {
            (Shape::Object, Value::Object(_)) => {
                check_object(value, self.fields, "", &mut missing);
            }
            (Shape::List, Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    check_object(item, self.fields, &format!("[{i}]."), &mut missing);
                }
            }
            (Shape::Object, _) => missing.push("<object>".to_string()),
            (Shape::List, _) => missing.push("<list>".to_string()),
        }
        missing
    }

    /// `Ok(())` when every declared field is present, else the missing paths.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<String>> {
        let missing = self.missing_fields(value);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

fn check_object(value: &Value, fields: &[FieldSpec], prefix: &str, missing: &mut Vec<String>) {
    let Some(map) = value.as_object() else {
        missing.push(format!("{prefix}<object>"));
        return;
    };
    for field in fields {
        match map.get(field.name) {
            None => missing.push(format!("{prefix}{}", field.name)),
            Some(child) if field.is_nested() => {
                check_object(child, field.fields, &format!("{prefix}{}.", field.name), missing);
            }
            Some(_) => {}
        }
    }
}

fn write_fields(out: &mut String, fields: &[FieldSpec], depth: usize) {
    let pad = "    ".repeat(depth);
    out.push_str("{\n");
    for (i, field) in fields.iter().enumerate() {
        out.push_str(&pad);
        out.push_str("    ");
        out.push_str(field.name);
        if field.is_nested() {
            out.push(' ');
            write_fields(out, field.fields, depth + 1);
        }
        if i + 1 < fields.len() {
            out.push(',');
        }
        out.push('\n');
    }
    out.push_str(&pad);
    out.push('}');
}

// ── Shared field groups ──────────────────────────────────────────────────

const LOCATION: [FieldSpec; 5] = [
    FieldSpec::leaf("quarter"),
    FieldSpec::leaf("year"),
    FieldSpec::leaf("state"),
    FieldSpec::leaf("market"),
    FieldSpec::leaf("submarket"),
];

const RENT: &[FieldSpec] = &[
    FieldSpec::leaf("monthly_rent"),
    FieldSpec::leaf("rent_per_square_foot"),
    FieldSpec::leaf("quarterly_change"),
    FieldSpec::leaf("annual_change"),
    FieldSpec::leaf("five_year_peak_in_annual_change"),
    FieldSpec::leaf("five_year_trough_in_annual_change"),
    FieldSpec::leaf("five_year_average_annual_change"),
];

// ── Market scope ─────────────────────────────────────────────────────────

pub const MARKET_SNAPSHOT: RecordSchema = RecordSchema {
    name: "MarketSnapshot",
    shape: Shape::Object,
    fields: &[
        FieldSpec::leaf("quarter"),
        FieldSpec::leaf("year"),
        FieldSpec::leaf("state"),
        FieldSpec::leaf("market"),
        FieldSpec::leaf("market_text"),
        FieldSpec::nested(
            "occupancy",
            &[
                FieldSpec::leaf("current_rate"),
                FieldSpec::leaf("quarterly_change"),
                FieldSpec::leaf("annual_change"),
                FieldSpec::leaf("five_year_peak"),
                FieldSpec::leaf("five_year_trough"),
                FieldSpec::leaf("five_year_average"),
                FieldSpec::leaf("five_year_average_annual_change"),
            ],
        ),
        FieldSpec::nested("rent", RENT),
        FieldSpec::nested(
            "one_year_forecast",
            &[
                FieldSpec::leaf("annual_supply"),
                FieldSpec::leaf("annual_demand"),
                FieldSpec::leaf("occupancy"),
                FieldSpec::leaf("annual_occupancy_change"),
                FieldSpec::leaf("annual_rent_change"),
                FieldSpec::leaf("annual_revenue_change"),
                FieldSpec::leaf("annual_job_change"),
            ],
        ),
    ],
};

pub const SUBMARKET_LIST: RecordSchema = RecordSchema {
    name: "SubmarketList",
    shape: Shape::List,
    fields: &[FieldSpec::leaf("submarket_key"), FieldSpec::leaf("name")],
};

// ── Submarket scope ──────────────────────────────────────────────────────

pub const ZIPCODE_LIST: RecordSchema = RecordSchema {
    name: "ZipcodeList",
    shape: Shape::List,
    fields: &[
        FieldSpec::leaf("zipcode"),
        FieldSpec::leaf("state"),
        FieldSpec::leaf("market"),
        FieldSpec::leaf("submarket"),
    ],
};

pub const SUBMARKET_SNAPSHOT: RecordSchema = RecordSchema {
    name: "SubmarketSnapshot",
    shape: Shape::Object,
    fields: &[
        LOCATION[0],
        LOCATION[1],
        LOCATION[2],
        LOCATION[3],
        LOCATION[4],
        FieldSpec::nested(
            "occupancy",
            &[
                FieldSpec::leaf("current_rate"),
                FieldSpec::leaf("quarterly_change"),
                FieldSpec::leaf("annual_change"),
                FieldSpec::leaf("five_year_peak"),
                FieldSpec::leaf("five_year_trough"),
                FieldSpec::leaf("five_year_average"),
            ],
        ),
        FieldSpec::nested("rent", RENT),
        FieldSpec::nested(
            "one_year_forecast",
            &[
                FieldSpec::leaf("annual_supply"),
                FieldSpec::leaf("annual_demand"),
                FieldSpec::leaf("occupancy"),
                FieldSpec::leaf("annual_occupancy_change"),
            ],
        ),
    ],
};

pub const SUBMARKET_REPORT: RecordSchema = RecordSchema {
    name: "SubmarketReport",
    shape: Shape::Object,
    fields: &[
        LOCATION[0],
        LOCATION[1],
        LOCATION[2],
        LOCATION[3],
        LOCATION[4],
        FieldSpec::leaf("average_rental_rate"),
        FieldSpec::leaf("annual_rent_growth"),
        FieldSpec::leaf("current_vacancy"),
        FieldSpec::nested(
            "inventory_of_properties",
            &[
                FieldSpec::leaf("total_number_of_properties"),
                FieldSpec::leaf("breakdown_of_properties"),
            ],
        ),
        FieldSpec::nested(
            "average_monthly_rent",
            &[
                FieldSpec::leaf("one_bedroom_apartment"),
                FieldSpec::leaf("two_bedroom_apartment"),
                FieldSpec::leaf("three_bedroom_apartment"),
            ],
        ),
    ],
};

/// Historical table rows, as persisted from the local table scraper.
pub const HISTORICAL_DATA_LIST: RecordSchema = RecordSchema {
    name: "HistoricalDataList",
    shape: Shape::List,
    fields: &[
        FieldSpec::leaf("market_parameter"),
        FieldSpec::leaf("period"),
        LOCATION[0],
        LOCATION[1],
        LOCATION[2],
        LOCATION[3],
        LOCATION[4],
    ],
};

pub const PROPERTY_LIST: RecordSchema = RecordSchema {
    name: "PropertyList",
    shape: Shape::List,
    fields: &[
        LOCATION[0],
        LOCATION[1],
        LOCATION[2],
        LOCATION[3],
        LOCATION[4],
        FieldSpec::leaf("zipcode"),
        FieldSpec::leaf("name"),
        FieldSpec::leaf("address"),
        FieldSpec::leaf("developer"),
        FieldSpec::leaf("units"),
        FieldSpec::leaf("stories"),
        FieldSpec::leaf("start"),
        FieldSpec::leaf("finish"),
    ],
};

pub const SUPPLY_DEMAND_LIST: RecordSchema = RecordSchema {
    name: "SubmarketSupplyDemandList",
    shape: Shape::List,
    fields: &[
        FieldSpec::leaf("period"),
        LOCATION[0],
        LOCATION[1],
        LOCATION[2],
        LOCATION[3],
        LOCATION[4],
        FieldSpec::leaf("supply_quarterly"),
        FieldSpec::leaf("supply_annual"),
        FieldSpec::leaf("demand_quarterly"),
        FieldSpec::leaf("demand_annual"),
        FieldSpec::leaf("inventory_change_quarterly"),
        FieldSpec::leaf("inventory_change_annual"),
    ],
};

pub const SAMPLE_EXISTING_UNITS_LIST: RecordSchema = RecordSchema {
    name: "SampleExistingUnitsList",
    shape: Shape::List,
    fields: &[
        LOCATION[0],
        LOCATION[1],
        LOCATION[2],
        LOCATION[3],
        LOCATION[4],
        FieldSpec::leaf("existing_units"),
        FieldSpec::leaf("sampled_units"),
        FieldSpec::leaf("percent_sampled"),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_submarket_snapshot() -> Value {
        json!({
            "quarter": 3, "year": 2024, "state": "TX", "market": "Austin", "submarket": "Downtown",
            "occupancy": {
                "current_rate": "92.1%", "quarterly_change": "0.2", "annual_change": "-0.4",
                "five_year_peak": "96.0%", "five_year_trough": "89.9%", "five_year_average": "93.0%"
            },
            "rent": {
                "monthly_rent": "$1,823", "rent_per_square_foot": "$2.10", "quarterly_change": "0.1%",
                "annual_change": "-1.2%", "five_year_peak_in_annual_change": "14%",
                "five_year_trough_in_annual_change": "-3%", "five_year_average_annual_change": "2%"
            },
            "one_year_forecast": {
                "annual_supply": 1200, "annual_demand": 1100, "occupancy": "92%",
                "annual_occupancy_change": "-0.3"
            }
        })
    }

    #[test]
    fn complete_object_validates() {
        assert!(SUBMARKET_SNAPSHOT.validate(&full_submarket_snapshot()).is_ok());
    }

    #[test]
    fn null_leaf_counts_as_present() {
        let mut v = full_submarket_snapshot();
        v["rent"]["monthly_rent"] = Value::Null;
        assert!(SUBMARKET_SNAPSHOT.validate(&v).is_ok());
    }

    #[test]
    fn missing_nested_field_is_reported_with_path() {
        let mut v = full_submarket_snapshot();
        v["rent"].as_object_mut().unwrap().remove("annual_change");
        v.as_object_mut().unwrap().remove("year");
        let missing = SUBMARKET_SNAPSHOT.validate(&v).unwrap_err();
        assert_eq!(missing, vec!["year".to_string(), "rent.annual_change".to_string()]);
    }

    #[test]
    fn nested_field_must_be_an_object() {
        let mut v = full_submarket_snapshot();
        v["occupancy"] = json!("92%");
        let missing = SUBMARKET_SNAPSHOT.validate(&v).unwrap_err();
        assert_eq!(missing, vec!["occupancy.<object>".to_string()]);
    }

    #[test]
    fn list_schema_checks_every_element() {
        let v = json!([
            {"submarket_key": 1, "name": "Downtown"},
            {"submarket_key": 2}
        ]);
        let missing = SUBMARKET_LIST.validate(&v).unwrap_err();
        assert_eq!(missing, vec!["[1].name".to_string()]);
    }

    #[test]
    fn shape_mismatch_is_a_violation() {
        assert!(SUBMARKET_LIST.validate(&json!({"submarket_key": 1, "name": "x"})).is_err());
        assert!(MARKET_SNAPSHOT.validate(&json!([])).is_err());
    }

    #[test]
    fn empty_list_conforms() {
        assert!(ZIPCODE_LIST.validate(&json!([])).is_ok());
    }

    #[test]
    fn describe_renders_nested_shape() {
        let text = SUBMARKET_REPORT.describe();
        assert!(text.starts_with("{\n    quarter,"));
        assert!(text.contains("inventory_of_properties {"));
        assert!(text.contains("        three_bedroom_apartment\n    }"));
        assert!(text.ends_with('}'));
    }
}
