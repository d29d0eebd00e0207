//! Result types returned by the orchestrator and the batch runner.

use crate::error::{SkipReason, TargetFailure};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How one target ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    /// Produced in this run and persisted.
    Extracted,
    /// Served from the local cache; nothing was asked or written.
    Cached,
    /// Failed; see the reason.
    Failed { reason: TargetFailure },
}

/// Outcome of one `(name, directory)` target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub name: String,
    pub directory: Option<String>,
    #[serde(flatten)]
    pub status: TargetStatus,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, TargetStatus::Failed { .. })
    }

    pub fn failure(&self) -> Option<&TargetFailure> {
        match &self.status {
            TargetStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Outcome of one submarket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmarketOutcome {
    pub submarket_key: String,
    pub name: String,
    /// Inclusive 0-based page bounds of the slice, when segmented.
    pub pages: Option<(usize, usize)>,
    pub skipped: Option<SkipReason>,
    pub targets: Vec<TargetOutcome>,
    /// Every required target succeeded. Always false when skipped.
    pub success: bool,
}

/// Final disposition of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Processed,
    Incomplete,
}

impl DocumentStatus {
    /// Name of the directory the batch runner moves the file into.
    pub fn directory_name(&self) -> &'static str {
        match self {
            DocumentStatus::Processed => "processed",
            DocumentStatus::Incomplete => "incomplete",
        }
    }
}

/// Outcome of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub document: PathBuf,
    /// Market name from the market snapshot, when it was extracted.
    pub market: Option<String>,
    /// Market-scope targets (`snapshots`, `submarkets`).
    pub targets: Vec<TargetOutcome>,
    pub submarkets: Vec<SubmarketOutcome>,
    pub status: DocumentStatus,
    /// Questions actually sent to the model in this run.
    pub llm_requests: usize,
}

impl DocumentOutcome {
    pub fn is_processed(&self) -> bool {
        self.status == DocumentStatus::Processed
    }

    /// Every failed target of the document, market scope first.
    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.targets
            .iter()
            .chain(self.submarkets.iter().flat_map(|s| s.targets.iter()))
            .filter(|t| !t.is_success())
    }
}

/// Answer to a free-form question about a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub response_message: String,
    /// The fenced JSON block of the answer, when it holds one.
    pub json: Option<serde_json::Value>,
}

/// Where the batch runner put one input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub source: PathBuf,
    pub moved_to: Option<PathBuf>,
    pub status: DocumentStatus,
    pub outcome: Option<DocumentOutcome>,
    /// Set when the document failed with a fatal error.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn target_outcome_serialises_flat() {
        let t = TargetOutcome {
            name: "snapshots".into(),
            directory: Some("Alpha".into()),
            status: TargetStatus::Failed {
                reason: TargetFailure::EmptyResponse,
            },
        };
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["name"], "snapshots");
        assert_eq!(v["reason"], json!("EmptyResponse"));
        assert!(!t.is_success());
    }

    #[test]
    fn failures_span_all_scopes() {
        let ok = |name: &str| TargetOutcome {
            name: name.into(),
            directory: None,
            status: TargetStatus::Cached,
        };
        let bad = TargetOutcome {
            name: "report".into(),
            directory: Some("Beta".into()),
            status: TargetStatus::Failed {
                reason: TargetFailure::DerivationFailed { detail: "x".into() },
            },
        };
        let outcome = DocumentOutcome {
            document: PathBuf::from("r.pdf"),
            market: Some("Austin".into()),
            targets: vec![ok("snapshots"), ok("submarkets")],
            submarkets: vec![SubmarketOutcome {
                submarket_key: "B2".into(),
                name: "Beta".into(),
                pages: Some((4, 7)),
                skipped: None,
                targets: vec![ok("zipcodes"), bad],
                success: false,
            }],
            status: DocumentStatus::Incomplete,
            llm_requests: 0,
        };
        let names: Vec<_> = outcome.failures().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["report"]);
        assert_eq!(outcome.status.directory_name(), "incomplete");
    }
}
