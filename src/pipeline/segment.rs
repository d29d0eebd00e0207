//! Page segmentation: slice one market report into per-submarket documents.
//!
//! A submarket section starts on the first page that carries all four
//! markers at once:
//!
//! * the phrase `Submarket Overview`,
//! * one of the configured quarter labels (`3Q 2024`, ...),
//! * the submarket key followed by whitespace and the submarket name,
//! * the word `SNAPSHOT`.
//!
//! When no single page qualifies, a second pass tests each page joined
//! with its predecessor, which catches headers broken across a page
//! boundary. The section ends on the first page at or after the start
//! that mentions both `HISTORICAL DATA` and the submarket name.
//!
//! A submarket without both boundaries is skipped with a warning; the
//! others are unaffected.

use crate::error::SkipReason;
use crate::model::SubmarketDescriptor;
use crate::pipeline::document::{LoadedDocument, PdfBackend};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const OVERVIEW_MARKER: &str = "Submarket Overview";
const SNAPSHOT_MARKER: &str = "SNAPSHOT";
const HISTORICAL_MARKER: &str = "HISTORICAL DATA";

/// One written submarket slice. Page indices are 0-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDocument {
    pub descriptor: SubmarketDescriptor,
    pub first_page: usize,
    pub last_page: usize,
    pub path: PathBuf,
}

impl SubDocument {
    /// Directory holding the slice and its audit files.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Locates submarket boundaries and writes the slices.
#[derive(Debug, Clone)]
pub struct PdfSegmenter {
    quarter_labels: Vec<String>,
}

impl PdfSegmenter {
    pub fn new(quarter_labels: Vec<String>) -> Self {
        Self { quarter_labels }
    }

    fn is_start(&self, text: &str, heading: &Regex) -> bool {
        text.contains(OVERVIEW_MARKER)
            && self.quarter_labels.iter().any(|q| text.contains(q.as_str()))
            && heading.is_match(text)
            && text.contains(SNAPSHOT_MARKER)
    }

    /// First page opening the submarket's section.
    pub fn find_start(&self, doc: &LoadedDocument, d: &SubmarketDescriptor) -> Option<usize> {
        let pattern = format!(
            r"{}\s+{}",
            regex::escape(&d.submarket_key),
            regex::escape(&d.name)
        );
        let heading = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("Cannot build heading pattern for '{}': {}", d.name, e);
                return None;
            }
        };

        if let Some(page) = doc.pages.iter().position(|t| self.is_start(t, &heading)) {
            return Some(page);
        }

        debug!("No single page opens '{}'; retrying with joined pages", d.name);
        (0..doc.page_count()).find(|&i| {
            if i == 0 {
                self.is_start(&doc.pages[0], &heading)
            } else {
                let joined = format!("{}\n{}", doc.pages[i - 1], doc.pages[i]);
                self.is_start(&joined, &heading)
            }
        })
    }

    /// First page at or after `start` closing the submarket's section.
    pub fn find_end(doc: &LoadedDocument, d: &SubmarketDescriptor, start: usize) -> Option<usize> {
        (start..doc.page_count()).find(|&i| {
            let text = &doc.pages[i];
            text.contains(HISTORICAL_MARKER) && text.contains(d.name.as_str())
        })
    }

    /// Inclusive page bounds of one submarket.
    pub fn locate(
        &self,
        doc: &LoadedDocument,
        d: &SubmarketDescriptor,
    ) -> Result<(usize, usize), SkipReason> {
        let start = self
            .find_start(doc, d)
            .ok_or_else(|| SkipReason::StartNotFound {
                name: d.name.clone(),
            })?;
        let end = Self::find_end(doc, d, start).ok_or_else(|| SkipReason::EndNotFound {
            name: d.name.clone(),
            start,
        })?;
        Ok((start, end))
    }

    /// Segment every descriptor, writing slices under `market_dir`.
    ///
    /// Returns one result per descriptor, in order. A slice lands at
    /// `<market_dir>/<key>/<key>.<ext>`.
    pub async fn segment(
        &self,
        backend: &dyn PdfBackend,
        doc: &LoadedDocument,
        descriptors: &[SubmarketDescriptor],
        market_dir: &Path,
    ) -> Vec<Result<SubDocument, SkipReason>> {
        let mut results = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            let result = self.segment_one(backend, doc, d, market_dir).await;
            match &result {
                Ok(sub) => info!(
                    "Found '{}' on pages {}..={}",
                    d.name, sub.first_page, sub.last_page
                ),
                Err(reason) => warn!("Skipping submarket: {}", reason),
            }
            results.push(result);
        }
        results
    }

    async fn segment_one(
        &self,
        backend: &dyn PdfBackend,
        doc: &LoadedDocument,
        d: &SubmarketDescriptor,
        market_dir: &Path,
    ) -> Result<SubDocument, SkipReason> {
        let (first_page, last_page) = self.locate(doc, d)?;

        let key = &d.submarket_key;
        if key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(SkipReason::WriteFailed {
                name: d.name.clone(),
                detail: format!("submarket key '{key}' is not a valid directory name"),
            });
        }
        let path = market_dir
            .join(key)
            .join(format!("{key}.{}", backend.extension()));

        backend
            .write_range(doc, first_page, last_page, &path)
            .await
            .map_err(|e| SkipReason::WriteFailed {
                name: d.name.clone(),
                detail: e.to_string(),
            })?;

        Ok(SubDocument {
            descriptor: d.clone(),
            first_page,
            last_page,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::document::PlainTextBackend;

    fn labels() -> Vec<String> {
        vec!["3Q 2024".to_string(), "4Q 2024".to_string()]
    }

    fn doc(pages: &[&str]) -> LoadedDocument {
        LoadedDocument {
            path: PathBuf::from("report.txt"),
            pages: pages.iter().map(|p| p.to_string()).collect(),
        }
    }

    const ALPHA_START: &str = "Submarket Overview 3Q 2024\nA1  Alpha\nSNAPSHOT";

    #[test]
    fn start_requires_all_four_markers() {
        let seg = PdfSegmenter::new(labels());
        let alpha = SubmarketDescriptor::new("A1", "Alpha");
        let d = doc(&[
            "Submarket Overview 3Q 2024 A1 Alpha",
            "Submarket Overview 2Q 2020 A1 Alpha SNAPSHOT",
            "Submarket Overview 3Q 2024 A1Alpha SNAPSHOT",
            ALPHA_START,
        ]);
        assert_eq!(seg.find_start(&d, &alpha), Some(3));
    }

    #[test]
    fn start_split_across_pages_uses_joined_text() {
        let seg = PdfSegmenter::new(labels());
        let alpha = SubmarketDescriptor::new("A1", "Alpha");
        let d = doc(&["intro", "Submarket Overview 3Q 2024 A1", "Alpha SNAPSHOT"]);
        assert_eq!(seg.find_start(&d, &alpha), Some(2));
    }

    #[test]
    fn name_is_matched_literally() {
        let seg = PdfSegmenter::new(labels());
        let odd = SubmarketDescriptor::new("7", "Uptown (North)");
        let d = doc(&["Submarket Overview 3Q 2024 7 Uptown (North) SNAPSHOT"]);
        assert_eq!(seg.find_start(&d, &odd), Some(0));
        let d = doc(&["Submarket Overview 3Q 2024 7 Uptown North SNAPSHOT"]);
        assert_eq!(seg.find_start(&d, &odd), None);
    }

    #[test]
    fn end_must_mention_the_submarket() {
        let alpha = SubmarketDescriptor::new("A1", "Alpha");
        let d = doc(&[ALPHA_START, "HISTORICAL DATA Beta", "HISTORICAL DATA Alpha"]);
        assert_eq!(PdfSegmenter::find_end(&d, &alpha, 0), Some(2));
        assert_eq!(
            PdfSegmenter::new(labels()).locate(&doc(&[ALPHA_START]), &alpha),
            Err(SkipReason::EndNotFound {
                name: "Alpha".into(),
                start: 0
            })
        );
    }

    #[tokio::test]
    async fn segment_writes_slices_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let seg = PdfSegmenter::new(labels());
        let d = doc(&[
            "cover",
            ALPHA_START,
            "Alpha detail",
            "HISTORICAL DATA Alpha",
            "trailer",
        ]);
        let descriptors = vec![
            SubmarketDescriptor::new("A1", "Alpha"),
            SubmarketDescriptor::new("B2", "Beta"),
        ];
        let results = seg
            .segment(&PlainTextBackend, &d, &descriptors, dir.path())
            .await;

        let alpha = results[0].as_ref().unwrap();
        assert_eq!((alpha.first_page, alpha.last_page), (1, 3));
        assert_eq!(alpha.path, dir.path().join("A1").join("A1.txt"));
        let written = std::fs::read_to_string(&alpha.path).unwrap();
        assert_eq!(written.split('\x0c').count(), 3);

        assert_eq!(
            results[1],
            Err(SkipReason::StartNotFound {
                name: "Beta".into()
            })
        );
    }
}
