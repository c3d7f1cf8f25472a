pub mod cli;
pub mod config;
pub mod consolidate;
pub mod diff;
pub mod error;
pub mod events;
pub mod filter;
pub mod session;
pub mod text;
pub mod watcher;

pub use consolidate::Consolidator;
pub use diff::OutputDiff;
pub use error::{Error, Result, SkipReason};
pub use events::*;
pub use filter::{FileFilter, FilterConfig, ScanOptions};
pub use session::{ConsolidationRequest, PassReport, Workspace};
pub use text::FallbackEncoding;
pub use watcher::{start_watching, stop_watching, WatchMode, WatchOptions, WatchSession, WatchStatus};
