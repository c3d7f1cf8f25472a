//! Folder consolidation
//!
//! A [`Consolidator`] walks a root folder, reads every file that passes the
//! filter and writes them as one artifact. The artifact is staged in a
//! temporary sibling file and renamed into place, so readers only ever see
//! a complete run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use crate::error::{Error, Result, SkipReason};
use crate::events::{ConsolidationResult, FileEntry, SkippedFile};
use crate::filter::{FileFilter, FilterConfig, ScanOptions, WalkOutcome, TEMP_FILE_PREFIX, TEMP_FILE_SUFFIX};
use crate::text;

pub const GZIP_EXTENSION: &str = "gz";

/// Runs consolidation passes, at most one at a time
pub struct Consolidator {
    options: ScanOptions,
    pool: Option<rayon::ThreadPool>,
    gate: Mutex<()>,
}

/// Rendered artifact text plus what went into it
struct Rendered {
    text: String,
    included: Vec<FileEntry>,
    skipped: Vec<SkippedFile>,
}

impl Consolidator {
    pub fn new(options: ScanOptions) -> Result<Self> {
        let pool = if options.threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.threads)
                .thread_name(|i| format!("codetext-reader-{}", i))
                .build()
                .map_err(|e| Error::Config(format!("Failed to create reader pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            options,
            pool,
            gate: Mutex::new(()),
        })
    }

    /// Consolidate `root` into `output_path`
    pub fn consolidate(
        &self,
        root: &Path,
        filter: &FilterConfig,
        output_path: &Path,
        compress: bool,
    ) -> Result<ConsolidationResult> {
        self.consolidate_with_text(root, filter, output_path, compress)
            .map(|(result, _)| result)
    }

    /// Like [`Consolidator::consolidate`], also returning the uncompressed artifact text
    pub fn consolidate_with_text(
        &self,
        root: &Path,
        filter: &FilterConfig,
        output_path: &Path,
        compress: bool,
    ) -> Result<(ConsolidationResult, String)> {
        let _guard = self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let start = Instant::now();

        let final_path = artifact_path(output_path, compress);
        let file_filter = self.prepare(root, filter, output_path, &final_path)?;

        let walked = file_filter.collect_entries(&self.options)?;
        let rendered = self.render(walked, &filter.separator);

        write_artifact(&final_path, rendered.text.as_bytes(), compress)?;

        for skipped in &rendered.skipped {
            tracing::warn!("Skipped {}: {}", skipped.relative_path, skipped.reason);
        }
        tracing::info!(
            "Consolidated {} files ({} skipped) from {} into {} in {:?}",
            rendered.included.len(),
            rendered.skipped.len(),
            root.display(),
            final_path.display(),
            start.elapsed()
        );

        let result = ConsolidationResult {
            output_path: final_path,
            included_files: rendered.included,
            skipped_files: rendered.skipped,
            total_bytes: rendered.text.len() as u64,
            compressed: compress,
        };
        Ok((result, rendered.text))
    }

    /// Files a run would include, without reading or writing anything
    pub fn collect(
        &self,
        root: &Path,
        filter: &FilterConfig,
        output_path: &Path,
        compress: bool,
    ) -> Result<WalkOutcome> {
        let final_path = artifact_path(output_path, compress);
        let file_filter = self.prepare(root, filter, output_path, &final_path)?;
        file_filter.collect_entries(&self.options)
    }

    fn prepare(
        &self,
        root: &Path,
        filter: &FilterConfig,
        output_path: &Path,
        final_path: &Path,
    ) -> Result<FileFilter> {
        validate_root(root)?;
        validate_output(output_path)?;
        validate_output(final_path)?;

        Ok(FileFilter::new(root, filter)?
            .exclude_path(output_path)
            .exclude_path(final_path))
    }

    fn render(&self, walked: WalkOutcome, separator: &str) -> Rendered {
        let WalkOutcome { entries, skipped: unreadable } = walked;
        let read = |entry: FileEntry| -> std::result::Result<(FileEntry, String), SkippedFile> {
            match self.read_entry(&entry) {
                Ok(content) => Ok((entry, content)),
                Err(reason) => Err(SkippedFile {
                    relative_path: entry.relative_path,
                    reason,
                }),
            }
        };

        let outcomes: Vec<_> = match &self.pool {
            Some(pool) => pool.install(|| entries.into_par_iter().map(read).collect()),
            None => entries.into_par_iter().map(read).collect(),
        };

        let mut text = String::new();
        let mut included = Vec::new();
        let mut skipped = unreadable;

        for outcome in outcomes {
            match outcome {
                Ok((entry, content)) => {
                    push_record(&mut text, &entry, &content, separator, self.options.include_metadata);
                    included.push(entry);
                }
                Err(skip) => skipped.push(skip),
            }
        }

        skipped.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Rendered { text, included, skipped }
    }

    fn read_entry(&self, entry: &FileEntry) -> std::result::Result<String, SkipReason> {
        if let Some(limit) = self.options.max_file_size {
            if entry.size_bytes > limit {
                return Err(SkipReason::TooLarge {
                    size: entry.size_bytes,
                    limit,
                });
            }
        }

        let bytes = fs::read(&entry.absolute_path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
        let (content, encoding) = text::decode(&bytes, self.options.fallback_encoding)?;
        tracing::debug!("Read {} ({:?}, {} bytes)", entry.relative_path, encoding, bytes.len());
        Ok(content)
    }
}

/// Append one record: header, optional metadata, content, footer
pub fn push_record(out: &mut String, entry: &FileEntry, content: &str, separator: &str, include_metadata: bool) {
    out.push_str(&format!("{} File: {} {}\n", separator, entry.relative_path, separator));
    if include_metadata {
        let modified: DateTime<Local> = entry.last_modified.into();
        out.push_str(&format!("# Location: {}\n", entry.absolute_path.display()));
        out.push_str(&format!(
            "# Last modified: {}, Size: {} bytes\n",
            modified.format("%Y-%m-%d %H:%M:%S"),
            entry.size_bytes
        ));
    }
    out.push('\n');
    out.push_str(content);
    out.push_str(&format!("\n\n{} End of file {}\n\n", separator, separator));
}

/// The path actually written, with `.gz` appended when compressing
pub fn artifact_path(output_path: &Path, compress: bool) -> PathBuf {
    let already_gz = output_path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(GZIP_EXTENSION));

    if compress && !already_gz {
        let mut name = output_path.as_os_str().to_os_string();
        name.push(".");
        name.push(GZIP_EXTENSION);
        PathBuf::from(name)
    } else {
        output_path.to_path_buf()
    }
}

fn validate_root(root: &Path) -> Result<()> {
    if !root.exists() {
        return Err(Error::Config(format!("Root folder does not exist: {}", root.display())));
    }
    if !root.is_dir() {
        return Err(Error::Config(format!("Root folder is not a directory: {}", root.display())));
    }
    fs::read_dir(root)
        .map_err(|e| Error::Config(format!("Root folder is not readable: {}: {}", root.display(), e)))?;
    Ok(())
}

fn validate_output(output_path: &Path) -> Result<()> {
    if output_path.as_os_str().is_empty() {
        return Err(Error::Config("Output path is empty".to_string()));
    }
    if output_path.is_dir() {
        return Err(Error::Config(format!("Output path is a directory: {}", output_path.display())));
    }
    Ok(())
}

/// Stage `content` next to `path` and atomically rename it into place
fn write_artifact(path: &Path, content: &[u8], compress: bool) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut staged = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .suffix(TEMP_FILE_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| Error::io(path, e))?;

    if compress {
        let mut encoder = GzEncoder::new(staged.as_file_mut(), Compression::default());
        encoder.write_all(content).map_err(|e| Error::io(path, e))?;
        encoder.finish().map_err(|e| Error::io(path, e))?;
    } else {
        staged.write_all(content).map_err(|e| Error::io(path, e))?;
    }

    staged.as_file().sync_all().map_err(|e| Error::io(path, e))?;
    staged.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
