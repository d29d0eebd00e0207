//! JSON recovery: pull a JSON value out of free-form model text.
//!
//! Models are asked to answer with a fenced ```` ```json ```` block, and
//! usually do, but the block is not always valid JSON. Recovery runs in
//! four stages:
//!
//! 1. **Extract** the first fenced block. No block means
//!    [`TargetFailure::EmptyResponse`].
//! 2. **Parse** it strictly. Success returns immediately.
//! 3. **Repair** once with [`repair`] and parse again. A second failure is
//!    [`TargetFailure::JsonIrrecoverable`]; there is no further pass.
//! 4. **Sanitize** string leaves with [`sanitize`] before the value is
//!    handed to the store. Callers keep the unsanitized parse for the
//!    local cache.

use crate::error::{ExtractError, TargetFailure};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Default fence: ```` ```json\n ... \n``` ````, non-greedy, across lines.
pub const DEFAULT_FENCE_PATTERN: &str = r"(?s)```json\n(.*?)\n```";

/// Compiled fence matcher plus the recovery stages that use it.
#[derive(Debug, Clone)]
pub struct JsonRecovery {
    fence: Regex,
}

impl Default for JsonRecovery {
    fn default() -> Self {
        Self {
            fence: RE_DEFAULT_FENCE.clone(),
        }
    }
}

static RE_DEFAULT_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(DEFAULT_FENCE_PATTERN).unwrap());

impl JsonRecovery {
    /// Build a recovery pipeline with a custom fence pattern.
    ///
    /// The first capture group is the JSON body; a pattern without groups
    /// uses the whole match.
    pub fn new(fence_pattern: &str) -> Result<Self, ExtractError> {
        let fence = Regex::new(fence_pattern).map_err(|e| {
            ExtractError::InvalidConfig(format!("invalid JSON fence pattern: {e}"))
        })?;
        Ok(Self { fence })
    }

    /// Stage 1: the body of the first fenced block, if any.
    pub fn extract_block<'t>(&self, text: &'t str) -> Option<&'t str> {
        let caps = self.fence.captures(text)?;
        caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
    }

    /// Stages 1 to 3: extract, parse, repair once, parse again.
    pub fn recover(&self, text: &str) -> Result<Value, TargetFailure> {
        let block = self
            .extract_block(text)
            .ok_or(TargetFailure::EmptyResponse)?;

        if let Ok(value) = serde_json::from_str(block) {
            return Ok(value);
        }

        let repaired = repair(block);
        match serde_json::from_str(&repaired) {
            Ok(value) => {
                debug!("JSON block parsed after repair");
                Ok(value)
            }
            Err(e) => Err(TargetFailure::JsonIrrecoverable {
                detail: e.to_string(),
            }),
        }
    }
}

// ── Repair ───────────────────────────────────────────────────────────────

static RE_INLINE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());
static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\n(\n*[}\]])").unwrap());

/// One heuristic repair pass over a JSON-ish block.
///
/// Removes non-newline whitespace, turns `""` into `":"` (a key with its
/// colon dropped), adds the comma missing after a line ending in `"` or
/// `}` when more content follows, and strips a comma ending the line
/// before a closing brace or bracket.
///
/// Whitespace removal also squeezes spaces out of string values. The pass
/// only runs on blocks that already failed a strict parse.
pub fn repair(block: &str) -> String {
    let s = RE_INLINE_WS.replace_all(block, "");
    let s = s.replace("\"\"", "\":\"");
    let s = insert_line_commas(&s);
    RE_TRAILING_COMMA.replace_all(&s, "\n$1").into_owned()
}

fn insert_line_commas(input: &str) -> String {
    let lines: Vec<&str> = input.split('\n').collect();
    let mut out = String::with_capacity(input.len() + lines.len());
    let last_content = lines.iter().rposition(|l| !l.trim().is_empty());
    for (i, line) in lines.iter().enumerate() {
        out.push_str(line);
        let more_follows = last_content.is_some_and(|last| i < last);
        if more_follows && (line.ends_with('"') || line.ends_with('}')) {
            out.push(',');
        }
        if i + 1 < lines.len() {
            out.push('\n');
        }
    }
    out
}

// ── Sanitize ─────────────────────────────────────────────────────────────

static RE_CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x1F\x7F-\u{9F}]").unwrap());
static RE_WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Recursively clean every string leaf; keys and non-string leaves are kept.
///
/// Each string has `\` and `"` escaped, C0/C1 control characters removed,
/// and whitespace runs collapsed to one space.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        Value::String(s) => Value::String(sanitize_str(s)),
        other => other.clone(),
    }
}

fn sanitize_str(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    let stripped = RE_CONTROL.replace_all(&escaped, "");
    RE_WS_RUN.replace_all(&stripped, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fenced(body: &str) -> String {
        format!("Here you go:\n```json\n{body}\n```\nAnything else?")
    }

    #[test]
    fn valid_block_parses_directly() {
        let r = JsonRecovery::default();
        assert_eq!(r.recover(&fenced(r#"{"a":1,"b":2}"#)), Ok(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn missing_colon_is_repaired() {
        let r = JsonRecovery::default();
        assert_eq!(
            r.recover(&fenced(r#"{"a""1","b":2}"#)),
            Ok(json!({"a": "1", "b": 2}))
        );
    }

    #[test]
    fn no_fence_is_a_failure_value() {
        let r = JsonRecovery::default();
        assert_eq!(
            r.recover(r#"The answer is {"a": 1}"#),
            Err(TargetFailure::EmptyResponse)
        );
        assert_eq!(r.recover(""), Err(TargetFailure::EmptyResponse));
    }

    #[test]
    fn missing_line_commas_and_trailing_comma() {
        let body = "{\n  \"quarter\": 3\n  ,\"market\": \"Austin\"\n  \"rent\": {\"monthly\": \"$1\"}\n  \"state\": \"TX\",\n}";
        let r = JsonRecovery::default();
        assert_eq!(
            r.recover(&fenced(body)),
            Ok(json!({"quarter": 3, "market": "Austin", "rent": {"monthly": "$1"}, "state": "TX"}))
        );
    }

    #[test]
    fn list_of_objects_missing_commas() {
        let body = "[\n{\"name\": \"A\"}\n{\"name\": \"B\"}\n]";
        let r = JsonRecovery::default();
        assert_eq!(
            r.recover(&fenced(body)),
            Ok(json!([{"name": "A"}, {"name": "B"}]))
        );
    }

    #[test]
    fn hopeless_block_is_irrecoverable() {
        let r = JsonRecovery::default();
        match r.recover(&fenced("{quarter: three")) {
            Err(TargetFailure::JsonIrrecoverable { .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn repair_strips_trailing_commas() {
        assert_eq!(repair("[1,\n2,\n]"), "[1,\n2\n]");
        assert_eq!(repair("{\"a\":1,\n\n}"), "{\"a\":1\n\n}");
    }

    #[test]
    fn repair_leaves_commas_inside_strings() {
        assert_eq!(repair("[\"a,]\",\n\"b,}\"\n]"), "[\"a,]\",\n\"b,}\"\n]");
        let r = JsonRecovery::default();
        assert_eq!(
            r.recover(&fenced("{\n\"note\": \"x,}\"\n\"state\": \"TX\"\n}")),
            Ok(json!({"note": "x,}", "state": "TX"}))
        );
    }

    #[test]
    fn repair_handles_many_lines() {
        let body: String = (0..5_000).map(|i| format!("{{\"n\": {i}}}\n")).collect();
        let repaired = repair(&format!("[\n{body}]"));
        let parsed: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(5_000));
    }

    #[test]
    fn custom_fence_pattern() {
        let r = JsonRecovery::new(r"(?s)<json>(.*?)</json>").unwrap();
        assert_eq!(r.recover("x <json>[1]</json> y"), Ok(json!([1])));
        assert!(JsonRecovery::new("(unclosed").is_err());
    }

    #[test]
    fn sanitize_cleans_string_leaves_only() {
        let v = json!({
            "text": "Rents   rose\n\tsharply",
            "quote": "say \"hi\"",
            "path": "a\\b",
            "n": 3,
            "nested": [{"s": "x\u{0085}y"}]
        });
        assert_eq!(
            sanitize(&v),
            json!({
                "text": "Rents rosesharply",
                "quote": "say \\\"hi\\\"",
                "path": "a\\\\b",
                "n": 3,
                "nested": [{"s": "xy"}]
            })
        );
    }
}
