//! Document primitives: page text and page-range extraction.
//!
//! Two backends implement [`PdfBackend`]:
//!
//! * [`PdfiumBackend`] reads real PDFs through pdfium. pdfium is not safe
//!   to drive from async tasks, so every call runs inside
//!   `tokio::task::spawn_blocking` and reopens the file there.
//! * [`PlainTextBackend`] reads `.txt` page dumps where pages are
//!   separated by form feeds (`\x0c`), as `pdftotext` writes them.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::pipeline::input::DocumentKind;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Page separator of plain-text documents.
pub const PAGE_BREAK: char = '\x0c';

/// Text of every page of a document, 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub path: PathBuf,
    pub pages: Vec<String>,
}

impl LoadedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&str> {
        self.pages.get(index).map(String::as_str)
    }

    /// All pages joined with a `--- Page N ---` marker before each one.
    pub fn marked_text(&self) -> String {
        let mut out = String::new();
        for (i, page) in self.pages.iter().enumerate() {
            out.push_str(&format!("--- Page {} ---\n", i + 1));
            out.push_str(page);
            out.push('\n');
        }
        out
    }
}

/// Page-level access to one document format.
#[async_trait]
pub trait PdfBackend: Send + Sync {
    /// File extension of documents this backend writes.
    fn extension(&self) -> &'static str;

    /// Read the text of every page.
    async fn load(&self, path: &Path) -> Result<LoadedDocument, ExtractError>;

    /// Copy pages `[first, last]` (inclusive, 0-based) of `source` into a
    /// new document at `dest`, creating parent directories as needed.
    async fn write_range(
        &self,
        source: &LoadedDocument,
        first: usize,
        last: usize,
        dest: &Path,
    ) -> Result<(), ExtractError>;

    /// Save an unchanged copy of `source` at `dest`.
    async fn save_copy(&self, source: &LoadedDocument, dest: &Path) -> Result<(), ExtractError> {
        ensure_parent(dest).await?;
        tokio::fs::copy(&source.path, dest)
            .await
            .map_err(|e| ExtractError::io(dest, e))?;
        Ok(())
    }
}

/// The backend matching `kind`, set up from `config`.
pub fn backend_for(kind: DocumentKind, config: &ExtractionConfig) -> Arc<dyn PdfBackend> {
    match kind {
        DocumentKind::Pdf => Arc::new(PdfiumBackend::from_config(config)),
        DocumentKind::Text => Arc::new(PlainTextBackend),
    }
}

fn check_range(first: usize, last: usize, total: usize) -> Result<(), ExtractError> {
    if last >= total {
        return Err(ExtractError::PageOutOfRange { page: last, total });
    }
    if first > last {
        return Err(ExtractError::PageOutOfRange { page: first, total });
    }
    Ok(())
}

async fn ensure_parent(dest: &Path) -> Result<(), ExtractError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExtractError::io(parent, e))?;
    }
    Ok(())
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// pdfium-backed PDF access.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    /// User password for encrypted reports.
    pub password: Option<String>,
}

impl PdfiumBackend {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            password: config.password.clone(),
        }
    }
}

fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) => Pdfium::bind_to_library(path),
        Err(_) => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| {
        ExtractError::Internal(format!(
            "pdfium library not available ({e:?}); set PDFIUM_LIB_PATH to libpdfium"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, ExtractError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.to_lowercase().contains("password") {
            if password.is_some() {
                ExtractError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                ExtractError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            ExtractError::CorruptPdf {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

fn load_blocking(path: &Path, password: Option<&str>) -> Result<LoadedDocument, ExtractError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, path, password)?;

    let mut pages = Vec::with_capacity(document.pages().len() as usize);
    for (idx, page) in document.pages().iter().enumerate() {
        let text = page.text().map_err(|e| ExtractError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("page {}: {:?}", idx + 1, e),
        })?;
        pages.push(text.all());
    }
    info!("PDF loaded: {} pages", pages.len());
    Ok(LoadedDocument {
        path: path.to_path_buf(),
        pages,
    })
}

fn write_range_blocking(
    source: &Path,
    password: Option<&str>,
    first: usize,
    last: usize,
    dest: &Path,
) -> Result<(), ExtractError> {
    let pdfium = bind_pdfium()?;
    let src = open_document(&pdfium, source, password)?;
    let total = src.pages().len() as usize;
    check_range(first, last, total)?;

    let to_index = |i: usize| {
        PdfPageIndex::try_from(i).map_err(|_| ExtractError::PageOutOfRange { page: i, total })
    };
    let range = to_index(first)?..=to_index(last)?;

    let mut out = pdfium
        .create_new_pdf()
        .map_err(|e| ExtractError::Internal(format!("cannot create PDF: {e:?}")))?;
    out.pages_mut()
        .copy_page_range_from_document(&src, range, 0)
        .map_err(|e| ExtractError::Internal(format!("page copy failed: {e:?}")))?;
    out.save_to_file(dest)
        .map_err(|e| ExtractError::Internal(format!("cannot save {}: {e:?}", dest.display())))?;
    Ok(())
}

#[async_trait]
impl PdfBackend for PdfiumBackend {
    fn extension(&self) -> &'static str {
        "pdf"
    }

    async fn load(&self, path: &Path) -> Result<LoadedDocument, ExtractError> {
        let path = path.to_path_buf();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || load_blocking(&path, password.as_deref()))
            .await
            .map_err(|e| ExtractError::Internal(format!("Load task panicked: {}", e)))?
    }

    async fn write_range(
        &self,
        source: &LoadedDocument,
        first: usize,
        last: usize,
        dest: &Path,
    ) -> Result<(), ExtractError> {
        ensure_parent(dest).await?;
        let src = source.path.clone();
        let dst = dest.to_path_buf();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || {
            write_range_blocking(&src, password.as_deref(), first, last, &dst)
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("Split task panicked: {}", e)))??;
        debug!("Wrote pages {}..={} to {}", first, last, dest.display());
        Ok(())
    }
}

// ── Plain text ───────────────────────────────────────────────────────────

/// Form-feed separated text pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextBackend;

/// Split a page dump into pages. A trailing form feed does not start a page.
pub fn split_pages(text: &str) -> Vec<String> {
    let text = text.strip_suffix(PAGE_BREAK).unwrap_or(text);
    text.split(PAGE_BREAK).map(str::to_string).collect()
}

#[async_trait]
impl PdfBackend for PlainTextBackend {
    fn extension(&self) -> &'static str {
        "txt"
    }

    async fn load(&self, path: &Path) -> Result<LoadedDocument, ExtractError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ExtractError::io(path, e))?;
        let pages = split_pages(&text);
        debug!("Text document loaded: {} pages", pages.len());
        Ok(LoadedDocument {
            path: path.to_path_buf(),
            pages,
        })
    }

    async fn write_range(
        &self,
        source: &LoadedDocument,
        first: usize,
        last: usize,
        dest: &Path,
    ) -> Result<(), ExtractError> {
        check_range(first, last, source.page_count())?;
        ensure_parent(dest).await?;
        let body = source.pages[first..=last].join(&PAGE_BREAK.to_string());
        tokio::fs::write(dest, body)
            .await
            .map_err(|e| ExtractError::io(dest, e))?;
        debug!("Wrote pages {}..={} to {}", first, last, dest.display());
        Ok(())
    }
}
