//! # market-report-extract
//!
//! Turn multi-submarket real-estate market reports (PDF) into structured,
//! persisted records using grounded LLM question answering.
//!
//! A report covers one market and a list of submarkets. The market-level
//! snapshot and the submarket list are asked of a model bound to the whole
//! document; the document is then cut into one slice per submarket, whose
//! historical tables and zip codes are scraped locally, and whose snapshot
//! is asked of the model. A submarket report record is derived from the
//! snapshot and the tables.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     validate path, PDF magic bytes
//!  ├─ 2. Document  page text via pdfium (spawn_blocking)
//!  ├─ 3. Market    snapshot + submarket list (grounded session)
//!  ├─ 4. Segment   one sub-document per submarket
//!  ├─ 5. Local     historical tables, zip codes, CSV audit files
//!  ├─ 6. Submarket snapshot (session) + derived report
//!  └─ 7. Persist   sanitized upserts into the document store
//! ```
//!
//! Every target is cached under the work directory as `<name>.json` (value)
//! or `<name>.txt` (failed raw answer); a rerun asks the model nothing for
//! cached targets.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use market_report_extract::{ExtractionConfig, MarketReportExtractor, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = ExtractionConfig::builder().work_dir("./results").build()?;
//!     let store = Arc::new(MemoryStore::new());
//!     let extractor = MarketReportExtractor::from_config(config, store.clone())?;
//!     let outcome = extractor.process_document("report.pdf".as_ref()).await?;
//!     println!("{:?}: {} model requests", outcome.status, outcome.llm_requests);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mrextract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! market-report-extract = { version = "0.1", default-features = false }
//! ```
//!
//! pdfium is bound at runtime: `PDFIUM_LIB_PATH` if set, else the system
//! library. Plain-text reports (`.txt`, form-feed separated pages) need no
//! pdfium at all.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchDirs, process_directory};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ExtractError, SkipReason, TargetFailure};
pub use extract::MarketReportExtractor;
pub use output::{
    AskResponse, BatchEntry, DocumentOutcome, DocumentStatus, SubmarketOutcome, TargetOutcome,
    TargetStatus,
};
pub use pipeline::session::{GroundedAssistant, GroundedSession, SessionError};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{DocumentStore, MemoryStore, SqliteStore};
