use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result, SkipReason};
use crate::events::{FileEntry, SkippedFile};
use crate::text::FallbackEncoding;

pub const DEFAULT_SEPARATOR: &str = "###";

/// Prefix of the temporary files an artifact is staged in before the rename
pub const TEMP_FILE_PREFIX: &str = ".codetext-";
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Which files go into the artifact and how records are delimited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Empty means every extension is allowed
    pub allowed_extensions: BTreeSet<String>,
    /// Shell globs matched against the `/`-separated relative path
    pub ignore_patterns: Vec<String>,
    pub separator: String,
}

impl FilterConfig {
    pub fn new<E, I>(extensions: E, ignore_patterns: I, separator: impl Into<String>) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            allowed_extensions: extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
            ignore_patterns: ignore_patterns.into_iter().map(Into::into).collect(),
            separator: separator.into(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: BTreeSet::new(),
            ignore_patterns: Vec::new(),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

/// Walk and read behavior shared by every run of a consolidator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub respect_gitignore: bool,
    pub follow_links: bool,
    /// Files above this size are skipped
    pub max_file_size: Option<u64>,
    /// Reader pool size, 0 picks the rayon default
    pub threads: usize,
    /// Emit the location and modification lines under each record header
    pub include_metadata: bool,
    pub fallback_encoding: FallbackEncoding,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            respect_gitignore: false,
            follow_links: false,
            max_file_size: None,
            threads: 0,
            include_metadata: true,
            fallback_encoding: FallbackEncoding::Latin1,
        }
    }
}

/// Strip a leading dot and lowercase, so `.PY` and `py` compare equal
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// What a walk turned up
#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    pub entries: Vec<FileEntry>,
    /// Matching paths whose metadata could not be read
    pub skipped: Vec<SkippedFile>,
}

/// A compiled [`FilterConfig`] bound to a root folder
#[derive(Debug, Clone)]
pub struct FileFilter {
    root_path: PathBuf,
    /// Canonical form of the root, notification backends may report either
    canonical_root: Option<PathBuf>,
    ignore_set: Arc<GlobSet>,
    extensions: BTreeSet<String>,
    excluded: Vec<PathBuf>,
}

impl FileFilter {
    pub fn new<P: AsRef<Path>>(root_path: P, config: &FilterConfig) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        let canonical_root = root_path.canonicalize().ok();

        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignore_patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| Error::Config(format!("Invalid ignore pattern '{}': {}", pattern, e)))?;
            builder.add(glob);
        }
        let ignore_set = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build ignore patterns: {}", e)))?;

        Ok(Self {
            root_path,
            canonical_root,
            ignore_set: Arc::new(ignore_set),
            extensions: config.allowed_extensions.iter().map(|e| normalize_extension(e)).collect(),
            excluded: Vec::new(),
        })
    }

    /// Never include or react to this path, used for the artifact itself
    pub fn exclude_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        self.excluded.push(path.to_path_buf());
        if let Some(canonical) = canonicalize_lenient(path) {
            self.excluded.push(canonical);
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// `/`-separated path relative to the root, `None` when outside it
    pub fn relative_path<P: AsRef<Path>>(&self, path: P) -> Option<String> {
        let path = path.as_ref();
        let rel = path
            .strip_prefix(&self.root_path)
            .ok()
            .or_else(|| {
                self.canonical_root
                    .as_ref()
                    .and_then(|root| path.strip_prefix(root).ok())
            })?;

        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        Some(parts.join("/"))
    }

    /// Whether an ignore pattern matches the relative path
    pub fn is_ignored(&self, relative_path: &str) -> bool {
        self.ignore_set.is_match(relative_path)
    }

    pub fn extension_allowed<P: AsRef<Path>>(&self, path: P) -> bool {
        if self.extensions.is_empty() {
            return true;
        }

        let Some(name) = path.as_ref().file_name().and_then(|s| s.to_str()) else {
            return false;
        };
        let name = name.to_lowercase();
        self.extensions
            .iter()
            .any(|ext| name.len() > ext.len() + 1 && name.ends_with(&format!(".{}", ext)))
    }

    pub fn is_excluded<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();

        if path
            .file_name()
            .and_then(|s| s.to_str())
            .is_some_and(|name| name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(TEMP_FILE_SUFFIX))
        {
            return true;
        }

        self.excluded.iter().any(|p| p == path)
            || canonicalize_lenient(path).is_some_and(|c| self.excluded.contains(&c))
    }

    /// Inclusion test for a regular file found during a walk
    pub fn should_include<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        if self.is_excluded(path) || !self.extension_allowed(path) {
            return false;
        }
        match self.relative_path(path) {
            Some(rel) => !self.is_ignored(&rel),
            None => false,
        }
    }

    /// Whether a change notification for `path` can affect the artifact
    pub fn is_relevant_change<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();

        if path.components().any(|c| c.as_os_str() == ".git") || self.is_excluded(path) {
            return false;
        }

        let Some(rel) = self.relative_path(path) else {
            return false;
        };
        if rel.is_empty() || self.is_ignored(&rel) {
            return false;
        }

        if path.is_dir() {
            return true;
        }
        if self.extension_allowed(path) {
            return true;
        }

        // A removed directory no longer reports is_dir
        !path.exists() && path.extension().is_none()
    }

    /// Every file that passes the filter, sorted by relative path, plus the
    /// ones the walk could not stat
    pub fn collect_entries(&self, options: &ScanOptions) -> Result<WalkOutcome> {
        let mut outcome = WalkOutcome::default();

        for result in self.walker(options).build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("Error walking directory: {}", err);
                    if let Some(skipped) = self.walk_error_skip(&err) {
                        outcome.skipped.push(skipped);
                    }
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|t| t.is_file() || t.is_symlink()) {
                continue;
            }

            let path = entry.path();
            if !self.should_include(path) {
                continue;
            }
            let Some(rel) = self.relative_path(path) else {
                continue;
            };

            match std::fs::metadata(path) {
                Ok(m) if m.is_file() => outcome.entries.push(FileEntry::new(rel, path.to_path_buf(), &m)),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("Cannot stat {}: {}", path.display(), err);
                    outcome.skipped.push(SkippedFile {
                        relative_path: rel,
                        reason: SkipReason::Unreadable(err.to_string()),
                    });
                }
            }
        }

        outcome.entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        outcome.skipped.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        tracing::debug!(
            "Collected {} files ({} unreadable) under {}",
            outcome.entries.len(),
            outcome.skipped.len(),
            self.root_path.display()
        );
        Ok(outcome)
    }

    /// Walk errors that name a path under the root become skipped entries
    fn walk_error_skip(&self, err: &ignore::Error) -> Option<SkippedFile> {
        let path = walk_error_path(err)?;
        if self.is_excluded(path) {
            return None;
        }
        let rel = self.relative_path(path).filter(|rel| !rel.is_empty())?;
        if self.is_ignored(&rel) {
            return None;
        }
        Some(SkippedFile {
            relative_path: rel,
            reason: SkipReason::Unreadable(err.to_string()),
        })
    }

    fn walker(&self, options: &ScanOptions) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root_path);
        builder
            .hidden(false)
            .git_ignore(options.respect_gitignore)
            .git_global(options.respect_gitignore)
            .git_exclude(options.respect_gitignore)
            .ignore(options.respect_gitignore)
            .parents(options.respect_gitignore)
            .require_git(false)
            .follow_links(options.follow_links);

        let root = self.root_path.clone();
        let ignore_set = Arc::clone(&self.ignore_set);
        builder.filter_entry(move |entry| {
            if !entry.file_type().is_some_and(|t| t.is_dir()) || entry.depth() == 0 {
                return true;
            }
            if entry.file_name() == ".git" {
                return false;
            }
            // Prune directories matched by an ignore pattern
            match entry.path().strip_prefix(&root) {
                Ok(rel) => {
                    let rel: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
                    !ignore_set.is_match(rel.join("/"))
                }
                Err(_) => true,
            }
        });

        builder
    }
}

fn walk_error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => walk_error_path(err),
        _ => None,
    }
}

/// Canonicalize a path whose final component may not exist yet
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Some(canonical);
    }
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty())?;
    let name = path.file_name()?;
    parent.canonicalize().ok().map(|p| p.join(name))
}
