//! Local artifact cache.
//!
//! Every extraction target leaves a file under the document's cache root:
//!
//! ```text
//! <root>/<prep(directory)>/<prep(name)>.json   value accepted
//! <root>/<prep(directory)>/<prep(name)>.txt    attempt failed, raw response
//! ```
//!
//! The presence of either file is the only record that a target was
//! attempted. There is no attempt counter and no expiry.
//!
//! Writes go through a temp file in the destination directory followed by
//! a rename, so a reader never sees a half-written JSON file. The check
//! and the write are still two separate steps: two workers sharing a
//! directory can both miss the cache and both query the model.

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\-_\s]+").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalise a logical name or directory into a safe path component.
///
/// Strips everything outside `[A-Za-z0-9-_\s]`, turns whitespace runs into
/// `_`, lowercases.
pub fn prep_filename(name: &str) -> String {
    let stripped = RE_UNSAFE.replace_all(name, "");
    RE_SPACES.replace_all(&stripped, "_").to_lowercase()
}

/// What a previous run left behind for a target.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedArtifact {
    /// The accepted value (`.json`).
    Value(Value),
    /// The raw response of a failed attempt (`.txt`).
    Failed { path: PathBuf, text: String },
}

/// File-backed cache rooted at one document's working directory.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    /// Open (and create if needed) the cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| ExtractError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the artefacts of `directory` (the root when `None`).
    pub fn dir_path(&self, directory: Option<&str>) -> PathBuf {
        match directory {
            Some(d) => self.root.join(prep_filename(d)),
            None => self.root.clone(),
        }
    }

    /// Path of one artefact with the given extension.
    pub fn artifact_path(&self, name: &str, directory: Option<&str>, ext: &str) -> PathBuf {
        self.dir_path(directory)
            .join(format!("{}.{ext}", prep_filename(name)))
    }

    /// Look up a previous attempt. The `.json` value wins over a `.txt` failure.
    ///
    /// A `.json` file that no longer parses is reported and treated as
    /// absent so the target runs again.
    pub fn lookup(&self, name: &str, directory: Option<&str>) -> Option<CachedArtifact> {
        let json_path = self.artifact_path(name, directory, "json");
        match std::fs::read_to_string(&json_path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(value) => return Some(CachedArtifact::Value(value)),
                Err(e) => warn!("Ignoring unreadable cache file {}: {}", json_path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot read cache file {}: {}", json_path.display(), e),
        }

        let txt_path = self.artifact_path(name, directory, "txt");
        match std::fs::read_to_string(&txt_path) {
            Ok(text) => Some(CachedArtifact::Failed {
                path: txt_path,
                text,
            }),
            Err(_) => None,
        }
    }

    /// Record an accepted value. Failures are logged, never returned.
    pub fn store_value(&self, name: &str, directory: Option<&str>, value: &Value) {
        let path = self.artifact_path(name, directory, "json");
        let result = serde_json::to_vec_pretty(value)
            .map_err(std::io::Error::other)
            .and_then(|bytes| write_atomic(&path, &bytes));
        match result {
            Ok(()) => debug!("Cached {}", path.display()),
            Err(e) => warn!("Error writing cache file {}: {}", path.display(), e),
        }
    }

    /// Record the raw response of a failed attempt. Failures are logged.
    pub fn store_failure(&self, name: &str, directory: Option<&str>, text: &str) {
        let path = self.artifact_path(name, directory, "txt");
        match write_atomic(&path, text.as_bytes()) {
            Ok(()) => debug!("Cached failure {}", path.display()),
            Err(e) => warn!("Error writing cache file {}: {}", path.display(), e),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prep_filename_rules() {
        assert_eq!(prep_filename("Dallas-Fort Worth, TX"), "dallas-fort_worth_tx");
        assert_eq!(prep_filename("historical-rent_per_sqft"), "historical-rent_per_sqft");
        assert_eq!(prep_filename("North  Central/Uptown"), "north_centraluptown");
    }

    #[test]
    fn miss_then_value() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        assert!(cache.lookup("snapshots", Some("Downtown Core")).is_none());

        cache.store_value("snapshots", Some("Downtown Core"), &json!({"quarter": 3}));
        let path = dir.path().join("downtown_core").join("snapshots.json");
        assert!(path.exists());
        assert_eq!(
            cache.lookup("snapshots", Some("Downtown Core")),
            Some(CachedArtifact::Value(json!({"quarter": 3})))
        );
    }

    #[test]
    fn failure_text_counts_as_attempted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        cache.store_failure("submarkets", None, "no json here");
        match cache.lookup("submarkets", None) {
            Some(CachedArtifact::Failed { path, text }) => {
                assert_eq!(text, "no json here");
                assert_eq!(path, dir.path().join("submarkets.txt"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn value_wins_over_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        cache.store_failure("report", Some("x"), "bad");
        cache.store_value("report", Some("x"), &json!([1, 2]));
        assert_eq!(
            cache.lookup("report", Some("x")),
            Some(CachedArtifact::Value(json!([1, 2])))
        );
    }

    #[test]
    fn corrupt_json_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("snapshots.json"), "{ not json").unwrap();
        assert!(cache.lookup("snapshots", None).is_none());
    }
}
