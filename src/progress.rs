//! Progress-callback trait for per-target extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through a document.
//!
//! # Example
//!
//! ```rust
//! use market_report_extract::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_submarket_complete(&self, index: usize, total: usize, name: &str, success: bool) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} ok={}", index + 1, total, name, success);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it processes a document.
///
/// All methods have default no-op implementations. The batch runner may
/// process several documents at once, so implementations must tolerate
/// interleaved calls for different documents.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the document is loaded.
    fn on_document_start(&self, path: &Path, page_count: usize) {
        let _ = (path, page_count);
    }

    /// Called after segmentation, before a submarket's targets run.
    ///
    /// `index` is 0-based over the submarket list.
    fn on_submarket_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called after every target, including cache hits.
    ///
    /// `error` is `None` on success.
    fn on_target_complete(&self, name: &str, directory: Option<&str>, error: Option<&str>) {
        let _ = (name, directory, error);
    }

    /// Called when all targets of a submarket have run, or it was skipped.
    fn on_submarket_complete(&self, index: usize, total: usize, name: &str, success: bool) {
        let _ = (index, total, name, success);
    }

    /// Called once per document, after the session is released.
    fn on_document_complete(&self, path: &Path, processed: bool) {
        let _ = (path, processed);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
