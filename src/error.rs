//! Error types for the market-report-extract library.
//!
//! Three distinct error types reflect three distinct failure scopes:
//!
//! * [`ExtractError`]: **Fatal** for one document: the input cannot be
//!   read, the provider is not configured, or the document store rejected
//!   a write. Returned as `Err(ExtractError)` from
//!   [`crate::extract::MarketReportExtractor::process_document`].
//!
//! * [`TargetFailure`]: **Non-fatal**: one extraction target (a snapshot,
//!   the submarket list, a derived report) failed. Stored inside
//!   [`crate::output::TargetOutcome`]; the pipeline moves on to the next
//!   target and the document ends up `incomplete`.
//!
//! * [`SkipReason`]: a submarket whose page boundaries could not be
//!   found. Its siblings are unaffected.
//!
//! Store failures are deliberately fatal while cache write failures are
//! only logged. Callers that need to survive a flaky store must retry the
//! whole document.

use crate::pipeline::session::SessionError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the market-report-extract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Report file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// A page range was requested beyond the end of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The grounded Q&A session could not be created or released.
    #[error("Grounded session error: {0}")]
    Session(#[from] SessionError),

    // ── Store errors ──────────────────────────────────────────────────────
    /// The document store rejected an upsert. Aborts the document.
    #[error("Failed to persist into collection '{collection}': {detail}")]
    Persistence { collection: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read or write a file the pipeline depends on.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExtractError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal failure of a single extraction target.
///
/// Failure is terminal for the target: nothing re-prompts with a revised
/// question. Rerunning only helps once the `.txt` cache file is removed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TargetFailure {
    /// The response carried no fenced JSON block.
    #[error("response contained no JSON block")]
    EmptyResponse,

    /// The fenced block did not parse, even after the repair pass.
    #[error("JSON could not be repaired: {detail}")]
    JsonIrrecoverable { detail: String },

    /// A required field is absent from the returned record(s).
    #[error("schema validation failed, missing: {}", missing.join(", "))]
    SchemaValidationFailed { missing: Vec<String> },

    /// The response parsed to an empty object or list.
    #[error("response parsed to an empty record")]
    EmptyRecord,

    /// A previous run left a failure artefact (`.txt`) for this target.
    #[error("a previous attempt failed; remove '{path}' to retry")]
    PreviouslyFailed { path: PathBuf },

    /// The grounded session gave up after its internal retries.
    #[error("request failed: {detail}")]
    RequestFailed { detail: String },

    /// A locally derived record could not be computed.
    #[error("derivation failed: {detail}")]
    DerivationFailed { detail: String },
}

/// Why a submarket produced no sub-document.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SkipReason {
    /// No page satisfied the start conditions, alone or joined with its predecessor.
    #[error("start page not found for submarket '{name}'")]
    StartNotFound { name: String },

    /// No page at or after the start page carries the historical data header.
    #[error("end page not found for submarket '{name}' (start page {start})")]
    EndNotFound { name: String, start: usize },

    /// The submarket-list entry lacked a usable key or name.
    #[error("malformed submarket entry: {entry}")]
    MalformedEntry { entry: String },

    /// Both boundaries were found but the sub-document could not be written.
    #[error("failed to write sub-document for '{name}': {detail}")]
    WriteFailed { name: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_failure_lists_missing_fields() {
        let e = TargetFailure::SchemaValidationFailed {
            missing: vec!["quarter".into(), "rent.monthly_rent".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("quarter, rent.monthly_rent"), "got: {msg}");
    }

    #[test]
    fn persistence_display() {
        let e = ExtractError::Persistence {
            collection: "snapshots".into(),
            detail: "connection reset".into(),
        };
        assert!(e.to_string().contains("snapshots"));
        assert!(e.to_string().contains("connection reset"));
    }

    #[test]
    fn end_not_found_mentions_start_page() {
        let e = SkipReason::EndNotFound {
            name: "Downtown".into(),
            start: 7,
        };
        assert!(e.to_string().contains("Downtown"));
        assert!(e.to_string().contains("start page 7"));
    }

    #[test]
    fn target_failure_round_trips_through_serde() {
        let e = TargetFailure::RequestFailed {
            detail: "timeout".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: TargetFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
