//! Consolidation context shared by one-off runs and watch mode
//!
//! A [`Workspace`] is bound to one request for its whole life, so every
//! change batch re-runs the same consolidation the watch session was set up
//! for. It keeps the previous artifact text to report what changed between
//! passes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use crate::consolidate::{artifact_path, Consolidator};
use crate::diff::OutputDiff;
use crate::error::Result;
use crate::events::{ChangeBatch, ConsolidationResult};
use crate::filter::{FileFilter, FilterConfig};
use crate::watcher::{start_watching, RelevanceFn, WatchOptions, WatchSession};

/// Parameters of one consolidation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationRequest {
    pub root: PathBuf,
    pub filter: FilterConfig,
    pub output_path: PathBuf,
    pub compress: bool,
}

/// One completed pass compared with the one before it
#[derive(Debug, Clone)]
pub struct PassReport {
    pub result: ConsolidationResult,
    pub added_files: Vec<String>,
    pub removed_files: Vec<String>,
    /// `None` on the first pass or when the artifact did not change
    pub diff: Option<OutputDiff>,
}

impl PassReport {
    pub fn is_unchanged(&self) -> bool {
        self.diff.is_none() && self.added_files.is_empty() && self.removed_files.is_empty()
    }
}

#[derive(Default)]
struct PreviousPass {
    text: Option<String>,
    files: BTreeSet<String>,
}

#[derive(Clone)]
pub struct Workspace {
    consolidator: Arc<Consolidator>,
    request: Arc<ConsolidationRequest>,
    previous: Arc<Mutex<PreviousPass>>,
}

impl Workspace {
    pub fn new(consolidator: Consolidator, request: ConsolidationRequest) -> Self {
        Self {
            consolidator: Arc::new(consolidator),
            request: Arc::new(request),
            previous: Arc::new(Mutex::new(PreviousPass::default())),
        }
    }

    pub fn request(&self) -> &ConsolidationRequest {
        &self.request
    }

    /// Run one consolidation pass
    pub fn run_once(&self) -> Result<PassReport> {
        let request = self.request();
        let (result, text) = self.consolidator.consolidate_with_text(
            &request.root,
            &request.filter,
            &request.output_path,
            request.compress,
        )?;

        let files: BTreeSet<String> = result.included_paths().map(str::to_string).collect();
        let mut previous = self.previous.lock().unwrap_or_else(|p| p.into_inner());

        let report = match previous.text.as_deref() {
            Some(old) => PassReport {
                added_files: files.difference(&previous.files).cloned().collect(),
                removed_files: previous.files.difference(&files).cloned().collect(),
                diff: OutputDiff::between(old, &text, &result.output_path),
                result,
            },
            None => PassReport {
                result,
                added_files: Vec::new(),
                removed_files: Vec::new(),
                diff: None,
            },
        };

        for added in &report.added_files {
            tracing::info!("Added new file {}", added);
        }
        for removed in &report.removed_files {
            tracing::info!("Removed file {}", removed);
        }

        previous.text = Some(text);
        previous.files = files;
        Ok(report)
    }

    /// Predicate that keeps the watcher from reacting to its own output
    pub fn relevance(&self) -> Result<RelevanceFn> {
        let request = self.request();
        let filter = FileFilter::new(&request.root, &request.filter)?
            .exclude_path(&request.output_path)
            .exclude_path(artifact_path(&request.output_path, request.compress));
        let relevance: RelevanceFn = Arc::new(move |path: &Path| filter.is_relevant_change(path));
        Ok(relevance)
    }

    /// Re-run consolidation after every coalesced change batch
    pub fn watch<F>(&self, options: &WatchOptions, mut on_pass: F) -> Result<WatchSession>
    where
        F: FnMut(&ChangeBatch, Result<PassReport>) + Send + 'static,
    {
        let root = self.request().root.clone();
        let relevance = self.relevance()?;
        let workspace = self.clone();

        start_watching(&root, options, relevance, move |batch| {
            tracing::info!("{} file(s) changed, regenerating", batch.paths.len());
            let outcome = workspace.run_once();
            if let Err(err) = &outcome {
                tracing::error!("Regeneration failed: {}", err);
            }
            on_pass(batch, outcome);
        })
    }
}
