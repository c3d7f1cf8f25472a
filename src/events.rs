use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;
use serde::{Deserialize, Serialize};
use crate::error::SkipReason;

/// A regular file discovered during a folder walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the consolidation root, always `/`-separated
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// Extension without the leading dot, empty when the file has none
    pub extension: String,
    pub size_bytes: u64,
    pub last_modified: SystemTime,
}

impl FileEntry {
    pub fn new(relative_path: String, absolute_path: PathBuf, metadata: &std::fs::Metadata) -> Self {
        let extension = absolute_path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        Self {
            relative_path,
            absolute_path,
            extension,
            size_bytes: metadata.len(),
            last_modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// A file that matched the filter but was left out of the artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub relative_path: String,
    pub reason: SkipReason,
}

/// Outcome of one completed consolidation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationResult {
    /// Where the artifact was written, including any `.gz` marker
    pub output_path: PathBuf,
    pub included_files: Vec<FileEntry>,
    pub skipped_files: Vec<SkippedFile>,
    /// Length of the uncompressed artifact
    pub total_bytes: u64,
    pub compressed: bool,
}

impl ConsolidationResult {
    pub fn included_paths(&self) -> impl Iterator<Item = &str> {
        self.included_files.iter().map(|f| f.relative_path.as_str())
    }
}

/// Relevant filesystem changes coalesced into one window
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub paths: BTreeSet<PathBuf>,
    /// Number of raw notifications folded into this batch
    pub event_count: usize,
    pub first_seen: SystemTime,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self {
            paths: BTreeSet::new(),
            event_count: 0,
            first_seen: SystemTime::now(),
        }
    }

    pub fn record(&mut self, path: PathBuf) {
        self.event_count += 1;
        self.paths.insert(path);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Default for ChangeBatch {
    fn default() -> Self {
        Self::new()
    }
}
