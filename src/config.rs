//! Settings file support for codetext
//!
//! Settings are read from a TOML file, then overridden by `CODETEXT_*`
//! environment variables, then by command-line flags. Every field has a
//! default so a partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::filter::{FilterConfig, ScanOptions, DEFAULT_SEPARATOR};
use crate::text::FallbackEncoding;
use crate::watcher::{WatchMode, WatchOptions};

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "codetext.toml";

/// Global configuration for codetext
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeTextConfig {
    /// Values used when the command line leaves them out
    pub defaults: DefaultsConfig,
    /// Artifact formatting
    pub output: OutputConfig,
    /// Folder walking and reading
    pub scan: ScanConfig,
    /// Watch mode
    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub folder: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub separator: String,
    pub compress: bool,
    pub include_metadata: bool,
    pub fallback_encoding: FallbackEncoding,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub respect_gitignore: bool,
    pub follow_links: bool,
    /// Skip files larger than this many bytes
    pub max_file_size: Option<u64>,
    /// Reader threads, 0 uses one per core
    pub threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Coalescing window for change events in milliseconds
    pub debounce_ms: u64,
    pub mode: WatchMode,
    /// Scan interval for polling mode in milliseconds
    pub poll_interval_ms: u64,
    /// Log a diff of the artifact after each regeneration
    pub show_diff: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            compress: false,
            include_metadata: true,
            fallback_encoding: FallbackEncoding::Latin1,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            mode: WatchMode::Auto,
            poll_interval_ms: 1000,
            show_diff: false,
        }
    }
}

impl WatcherConfig {
    pub fn debounce_duration(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            debounce: self.debounce_duration(),
            mode: self.mode,
            poll_interval: self.poll_interval_duration(),
        }
    }
}

impl CodeTextConfig {
    /// Parse a settings file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `path` if given, else `./codetext.toml` if present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    tracing::debug!("Using settings from {}", fallback.display());
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Override with environment variables if present
    pub fn apply_env(mut self) -> Self {
        if let Ok(val) = std::env::var("CODETEXT_SEPARATOR") {
            if !val.is_empty() {
                self.output.separator = val;
            }
        }

        if let Ok(val) = std::env::var("CODETEXT_COMPRESS") {
            match val.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.output.compress = true,
                "0" | "false" | "no" => self.output.compress = false,
                _ => tracing::warn!("Ignoring invalid CODETEXT_COMPRESS value: {}", val),
            }
        }

        if let Ok(val) = std::env::var("CODETEXT_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.watcher.debounce_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("CODETEXT_THREADS") {
            if let Ok(threads) = val.parse::<usize>() {
                self.scan.threads = threads;
            }
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.output.separator.trim().is_empty() {
            return Err("separator must not be empty".to_string());
        }

        if self.watcher.debounce_ms == 0 {
            return Err("debounce_ms must be greater than 0".to_string());
        }

        if self.watcher.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }

        if self.scan.max_file_size == Some(0) {
            return Err("max_file_size must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            respect_gitignore: self.scan.respect_gitignore,
            follow_links: self.scan.follow_links,
            max_file_size: self.scan.max_file_size,
            threads: self.scan.threads,
            include_metadata: self.output.include_metadata,
            fallback_encoding: self.output.fallback_encoding,
        }
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig::new(
            &self.defaults.extensions,
            self.defaults.ignore.iter().cloned(),
            self.output.separator.clone(),
        )
    }
}
