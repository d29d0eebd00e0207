//! Pipeline stages for report extraction.
//!
//! Each submodule owns one step; the orchestrator in [`crate::extract`]
//! strings them together per document.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ document ──▶ session ──▶ json ──▶ store
//!              │
//!              ├──▶ segment ──▶ tables / zipcodes (per submarket, local)
//!              └──▶ report (snapshot + tables → derived record)
//! ```
//!
//! 1. [`input`]   : validate the path and decide PDF vs. plain text
//! 2. [`document`]: page text via pdfium (`spawn_blocking`), page-range
//!    writes for sub-documents
//! 3. [`session`] : grounded Q&A over the document; the only stage with
//!    network I/O
//! 4. [`json`]    : recover and repair the fenced JSON block of an answer
//! 5. [`segment`] : locate each submarket's pages and write its slice
//! 6. [`tables`]  : scrape the HISTORICAL DATA page into row blocks
//! 7. [`zipcodes`]: scrape the zip code list of a submarket
//! 8. [`report`]  : derive the submarket report record

pub mod document;
pub mod input;
pub mod json;
pub mod report;
pub mod segment;
pub mod session;
pub mod tables;
pub mod zipcodes;
