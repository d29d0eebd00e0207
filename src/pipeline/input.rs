//! Input resolution: validate a user-supplied report path.
//!
//! PDF inputs are checked for the `%PDF` magic bytes before anything is
//! handed to pdfium, so a mislabelled file gives a readable error instead
//! of a pdfium failure. `.txt` inputs are form-feed separated page dumps
//! and only need to be readable.

use crate::error::ExtractError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How a report file is to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    /// Kind implied by the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" => Some(DocumentKind::Text),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Text => "txt",
        }
    }
}

/// A validated local report file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

/// Whether the batch runner should pick up `path`.
pub fn is_supported(path: &Path) -> bool {
    path.is_file() && DocumentKind::from_path(path).is_some()
}

/// Validate existence, readability and (for PDFs) the magic bytes.
///
/// Files with an unknown extension are probed as PDFs.
pub fn resolve_input(path: &Path) -> Result<ResolvedInput, ExtractError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(ExtractError::FileNotFound { path });
    }

    let kind = DocumentKind::from_path(&path).unwrap_or(DocumentKind::Pdf);

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            if kind == DocumentKind::Pdf {
                let mut magic = [0u8; 4];
                if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                    return Err(ExtractError::NotAPdf { path, magic });
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(ExtractError::FileNotFound { path });
        }
    }

    debug!("Resolved local report: {}", path.display());
    Ok(ResolvedInput { path, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(DocumentKind::from_path(Path::new("a/B.PDF")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("r.txt")), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_path(Path::new("r.docx")), None);
        assert_eq!(DocumentKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn missing_file() {
        let err = resolve_input(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }

    #[test]
    fn pdf_magic_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake.pdf");
        std::fs::write(&fake, b"PK\x03\x04zip").unwrap();
        match resolve_input(&fake).unwrap_err() {
            ExtractError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }

        let real = dir.path().join("real.pdf");
        std::fs::write(&real, b"%PDF-1.7\n").unwrap();
        assert_eq!(resolve_input(&real).unwrap().kind, DocumentKind::Pdf);
    }

    #[test]
    fn text_documents_skip_the_magic_check() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("report.txt");
        std::fs::write(&txt, "page one\x0cpage two").unwrap();
        let resolved = resolve_input(&txt).unwrap();
        assert_eq!(resolved.kind, DocumentKind::Text);
        assert!(is_supported(&txt));
    }
}
