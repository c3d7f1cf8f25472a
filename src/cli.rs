use std::path::PathBuf;
use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use crate::config::CodeTextConfig;
use crate::filter::FilterConfig;
use crate::session::ConsolidationRequest;
use crate::watcher::WatchMode;

#[derive(Parser, Debug)]
#[command(name = "codetext")]
#[command(version)]
#[command(about = "Consolidate a source tree into one text file, optionally keeping it up to date")]
#[command(long_about = "codetext walks a folder, concatenates every matching file into a single text artifact with a header per file, and can watch the folder to regenerate the artifact whenever something changes. Useful for pasting a whole codebase into a tool that only takes text.")]
pub struct Cli {
    /// Folder to consolidate
    #[arg(value_name = "FOLDER", help = "Source folder (defaults to the settings file, then the current directory)")]
    pub path: Option<PathBuf>,

    /// Where to write the artifact
    #[arg(short, long, value_name = "FILE", help = "Output file")]
    pub output: Option<PathBuf>,

    /// Only include these extensions
    #[arg(short, long, value_delimiter = ',', help = "File extensions to include (e.g., py,js,rs)")]
    pub extensions: Option<Vec<String>>,

    /// Glob patterns to leave out
    #[arg(short, long, value_delimiter = ',', help = "Patterns to ignore, relative to the folder (e.g., *.log,temp/*)")]
    pub ignore: Option<Vec<String>>,

    /// Separator token around each record header
    #[arg(short, long, help = "Record separator (default ###)")]
    pub separator: Option<String>,

    /// Gzip the artifact
    #[arg(short = 'z', long, help = "Compress the output (adds .gz)")]
    pub compress: bool,

    /// Leave out location and modification lines
    #[arg(long, help = "Omit per-file metadata lines")]
    pub no_metadata: bool,

    /// Honor .gitignore files while walking
    #[arg(long, help = "Respect .gitignore and .ignore files")]
    pub gitignore: bool,

    /// Reader threads
    #[arg(long, value_name = "N", help = "Number of reader threads (0 = one per core)")]
    pub threads: Option<usize>,

    /// Keep the artifact updated as files change
    #[arg(short, long, help = "Watch the folder and regenerate on changes")]
    pub watch: bool,

    /// Watch backend
    #[arg(short, long, help = "File watching mode")]
    pub mode: Option<WatchMode>,

    /// Coalescing window for change events
    #[arg(long, value_name = "MS", help = "Debounce window in ms")]
    pub debounce: Option<u64>,

    /// Polling interval in milliseconds (for polling mode)
    #[arg(long, value_name = "MS", help = "Polling interval in ms")]
    pub poll_interval: Option<u64>,

    /// Print a diff of the artifact after each regeneration
    #[arg(long, help = "Show what changed after each regeneration")]
    pub show_diff: bool,

    /// List the files that would be included and exit
    #[arg(long, help = "List matching files without writing anything")]
    pub dry_run: bool,

    /// Summary format
    #[arg(long, default_value = "text", help = "Output format for the run summary")]
    pub format: OutputFormat,

    /// Settings file
    #[arg(short, long, value_name = "FILE", help = "Settings file (defaults to ./codetext.toml)")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output", conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, help = "Only show warnings and errors")]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable summary
    Text,
    /// JSON output for scripting
    Json,
}

impl Cli {
    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::WARN
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.path {
            if !path.exists() {
                return Err(format!("Path does not exist: {}", path.display()));
            }

            if !path.is_dir() {
                return Err(format!("Path is not a directory: {}", path.display()));
            }
        }

        if self.separator.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err("Separator must not be empty".to_string());
        }

        if self.debounce == Some(0) {
            return Err("Debounce must be greater than 0".to_string());
        }

        if self.poll_interval == Some(0) {
            return Err("Poll interval must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Settings file, then environment, then these flags
    pub fn settings(&self) -> Result<CodeTextConfig> {
        let mut config = CodeTextConfig::load_or_default(self.config.as_deref())?.apply_env();

        if let Some(path) = &self.path {
            config.defaults.folder = Some(path.clone());
        }
        if let Some(output) = &self.output {
            config.defaults.output = Some(output.clone());
        }
        if let Some(extensions) = &self.extensions {
            config.defaults.extensions = extensions.clone();
        }
        if let Some(ignore) = &self.ignore {
            config.defaults.ignore = ignore.clone();
        }
        if let Some(separator) = &self.separator {
            config.output.separator = separator.clone();
        }
        if self.compress {
            config.output.compress = true;
        }
        if self.no_metadata {
            config.output.include_metadata = false;
        }
        if self.gitignore {
            config.scan.respect_gitignore = true;
        }
        if let Some(threads) = self.threads {
            config.scan.threads = threads;
        }
        if let Some(mode) = self.mode {
            config.watcher.mode = mode;
        }
        if let Some(debounce) = self.debounce {
            config.watcher.debounce_ms = debounce;
        }
        if let Some(interval) = self.poll_interval {
            config.watcher.poll_interval_ms = interval;
        }
        if self.show_diff {
            config.watcher.show_diff = true;
        }

        if let Err(err) = config.validate() {
            bail!("Invalid settings: {}", err);
        }
        Ok(config)
    }

    /// The consolidation request described by merged settings
    pub fn request(&self, config: &CodeTextConfig) -> Result<ConsolidationRequest> {
        let root = config
            .defaults
            .folder
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let Some(output_path) = config.defaults.output.clone() else {
            bail!("No output file given: pass --output or set defaults.output in the settings file");
        };

        let filter: FilterConfig = config.filter_config();
        Ok(ConsolidationRequest {
            root,
            filter,
            output_path,
            compress: config.output.compress,
        })
    }
}
