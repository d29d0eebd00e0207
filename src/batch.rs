//! Directory batch runner.
//!
//! Processes every supported report in a source directory, up to
//! `config.concurrency` documents at once, then moves each file into the
//! `processed` or `incomplete` directory according to its outcome. A
//! document that fails with a fatal [`ExtractError`] is routed to
//! `incomplete` and its error is recorded in the [`BatchEntry`].

use crate::error::ExtractError;
use crate::extract::MarketReportExtractor;
use crate::output::{BatchEntry, DocumentStatus};
use crate::pipeline::input::is_supported;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Routing targets for one batch run.
#[derive(Debug, Clone)]
pub struct BatchDirs {
    pub source: PathBuf,
    pub processed: PathBuf,
    pub incomplete: PathBuf,
}

impl BatchDirs {
    /// `processed/` and `incomplete/` as siblings of `source`.
    pub fn beside(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let parent = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            processed: parent.join(DocumentStatus::Processed.directory_name()),
            incomplete: parent.join(DocumentStatus::Incomplete.directory_name()),
            source,
        }
    }

    pub fn destination(&self, status: DocumentStatus) -> &Path {
        match status {
            DocumentStatus::Processed => &self.processed,
            DocumentStatus::Incomplete => &self.incomplete,
        }
    }
}

/// Supported files directly inside `dir`, sorted by name.
pub fn list_documents(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ExtractError::io(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_supported(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Move `file` into `dir`, keeping its name.
async fn move_into(file: &Path, dir: &Path) -> Result<PathBuf, ExtractError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| ExtractError::io(dir, e))?;
    let name = file
        .file_name()
        .ok_or_else(|| ExtractError::Internal(format!("'{}' has no file name", file.display())))?;
    let dest = dir.join(name);
    if tokio::fs::rename(file, &dest).await.is_err() {
        // Rename fails across filesystems.
        tokio::fs::copy(file, &dest).await.map_err(|e| ExtractError::io(&dest, e))?;
        tokio::fs::remove_file(file).await.map_err(|e| ExtractError::io(file, e))?;
    }
    Ok(dest)
}

async fn process_one(extractor: &MarketReportExtractor, dirs: &BatchDirs, source: PathBuf) -> BatchEntry {
    let (status, outcome, error) = match extractor.process_document(&source).await {
        Ok(outcome) => (outcome.status, Some(outcome), None),
        Err(e) => {
            warn!("{}: {}", source.display(), e);
            (DocumentStatus::Incomplete, None, Some(e.to_string()))
        }
    };

    let moved_to = match move_into(&source, dirs.destination(status)).await {
        Ok(dest) => {
            info!("Moved {} to {}", source.display(), dest.display());
            Some(dest)
        }
        Err(e) => {
            warn!("Cannot move {}: {}", source.display(), e);
            None
        }
    };

    BatchEntry {
        source,
        moved_to,
        status,
        outcome,
        error,
    }
}

/// Process every supported document in `dirs.source`.
///
/// Entries come back in file-name order regardless of completion order.
pub async fn process_directory(
    extractor: &MarketReportExtractor,
    dirs: &BatchDirs,
) -> Result<Vec<BatchEntry>, ExtractError> {
    let files = list_documents(&dirs.source)?;
    info!(
        "Batch: {} documents in {} (concurrency {})",
        files.len(),
        dirs.source.display(),
        extractor.config().concurrency
    );

    let mut entries: Vec<BatchEntry> = stream::iter(
        files
            .into_iter()
            .map(|source| process_one(extractor, dirs, source)),
    )
    .buffer_unordered(extractor.config().concurrency.max(1))
    .collect()
    .await;

    entries.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(entries)
}
