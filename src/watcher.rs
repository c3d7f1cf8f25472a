//! Filesystem watching with coalesced change batches
//!
//! A [`WatchSession`] owns a notify backend and a listener thread. The backend
//! forwards raw notifications over a channel; the listener filters them,
//! folds everything that arrives within the debounce window into one
//! [`ChangeBatch`] and hands it to the change callback. Callbacks run one at
//! a time on the listener thread, so events that arrive while a callback is
//! busy simply queue up for the next window.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use clap::ValueEnum;
use notify::event::{MetadataKind, ModifyKind};
use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::events::ChangeBatch;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// How often an idle listener re-checks that the root still exists
const IDLE_TICK: Duration = Duration::from_millis(250);

/// Notification backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Native notifications, polling when they cannot be set up
    #[default]
    Auto,
    /// Native file system events only
    Native,
    /// Periodic scans of the tree
    Polling,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Coalescing window opened by the first relevant event
    pub debounce: Duration,
    pub mode: WatchMode,
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            mode: WatchMode::Auto,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchStatus {
    Active,
    Stopped,
    /// Terminal; the caller has to start a new session
    Failed(String),
}

/// Decides whether a changed path should trigger a batch
pub type RelevanceFn = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

enum WatchMessage {
    Notify(notify::Result<Event>),
    Shutdown,
}

struct SessionState {
    status: Mutex<WatchStatus>,
    last_trigger: Mutex<Option<SystemTime>>,
    stopping: AtomicBool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: Mutex::new(WatchStatus::Active),
            last_trigger: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }
    }

    fn status(&self) -> WatchStatus {
        self.status.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn set_status(&self, status: WatchStatus) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    fn fail(&self, reason: String) {
        tracing::error!("Watching stopped: {}", reason);
        self.set_status(WatchStatus::Failed(reason));
    }

    fn mark_triggered(&self) {
        *self.last_trigger.lock().unwrap_or_else(|p| p.into_inner()) = Some(SystemTime::now());
    }
}

/// A live subscription to changes under one root folder
pub struct WatchSession {
    root: PathBuf,
    state: Arc<SessionState>,
    control: Sender<WatchMessage>,
    backend: Option<Box<dyn Watcher + Send>>,
    listener: Option<JoinHandle<()>>,
}

/// Subscribe to changes under `root` and call `on_change` once per coalesced batch
pub fn start_watching<F>(
    root: &Path,
    options: &WatchOptions,
    is_relevant: RelevanceFn,
    on_change: F,
) -> Result<WatchSession>
where
    F: FnMut(&ChangeBatch) + Send + 'static,
{
    if !root.is_dir() {
        return Err(Error::WatchSubscription(format!(
            "Cannot watch {}: not a directory",
            root.display()
        )));
    }

    let (tx, rx) = mpsc::channel::<WatchMessage>();
    let backend = create_backend(root, options, tx.clone())?;
    let state = Arc::new(SessionState::new());

    let listener = {
        let root = root.to_path_buf();
        let state = Arc::clone(&state);
        let debounce = options.debounce;
        thread::Builder::new()
            .name("codetext-watch".to_string())
            .spawn(move || run_listener(root, rx, state, is_relevant, debounce, on_change))
            .map_err(|e| Error::WatchSubscription(format!("Failed to spawn watch listener: {}", e)))?
    };

    tracing::info!("Started watching {} ({:?} mode)", root.display(), options.mode);

    Ok(WatchSession {
        root: root.to_path_buf(),
        state,
        control: tx,
        backend: Some(backend),
        listener: Some(listener),
    })
}

/// Unsubscribe and wait until no further callback can run
pub fn stop_watching(session: WatchSession) {
    session.stop();
}

impl WatchSession {
    pub fn root_folder(&self) -> &Path {
        &self.root
    }

    pub fn status(&self) -> WatchStatus {
        self.state.status()
    }

    pub fn is_active(&self) -> bool {
        self.status() == WatchStatus::Active
    }

    pub fn last_trigger_time(&self) -> Option<SystemTime> {
        *self.state.last_trigger.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.listener.is_none() && self.backend.is_none() {
            return;
        }

        self.state.stopping.store(true, Ordering::SeqCst);
        drop(self.backend.take());
        let _ = self.control.send(WatchMessage::Shutdown);

        if let Some(handle) = self.listener.take() {
            // Stopping from inside a callback cannot join the listener itself
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("Watch listener for {} panicked", self.root.display());
            }
        }

        if self.state.status() == WatchStatus::Active {
            self.state.set_status(WatchStatus::Stopped);
        }
        tracing::info!("Stopped watching {}", self.root.display());
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn create_backend(root: &Path, options: &WatchOptions, tx: Sender<WatchMessage>) -> Result<Box<dyn Watcher + Send>> {
    match options.mode {
        WatchMode::Native => native_backend(root, tx),
        WatchMode::Polling => polling_backend(root, options.poll_interval, tx),
        WatchMode::Auto => native_backend(root, tx.clone()).or_else(|err| {
            tracing::warn!("Native file watching unavailable ({}), falling back to polling", err);
            polling_backend(root, options.poll_interval, tx)
        }),
    }
}

fn native_backend(root: &Path, tx: Sender<WatchMessage>) -> Result<Box<dyn Watcher + Send>> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(WatchMessage::Notify(res));
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(Box::new(watcher))
}

fn polling_backend(root: &Path, interval: Duration, tx: Sender<WatchMessage>) -> Result<Box<dyn Watcher + Send>> {
    let config = notify::Config::default().with_poll_interval(interval);
    let mut watcher = PollWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = tx.send(WatchMessage::Notify(res));
        },
        config,
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(Box::new(watcher))
}

/// Marks the session failed if the listener unwinds out of a callback
struct PanicGuard(Arc<SessionState>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.fail("Change callback panicked".to_string());
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        _ => false,
    }
}

fn run_listener<F>(
    root: PathBuf,
    rx: Receiver<WatchMessage>,
    state: Arc<SessionState>,
    is_relevant: RelevanceFn,
    debounce: Duration,
    mut on_change: F,
) where
    F: FnMut(&ChangeBatch),
{
    let _guard = PanicGuard(Arc::clone(&state));
    let mut pending: Option<(Instant, ChangeBatch)> = None;

    loop {
        let timeout = match &pending {
            Some((deadline, _)) => deadline.saturating_duration_since(Instant::now()),
            None => IDLE_TICK,
        };

        match rx.recv_timeout(timeout) {
            Ok(WatchMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(WatchMessage::Notify(Ok(event))) => {
                let paths = if event.need_rescan() {
                    vec![root.clone()]
                } else if is_content_change(&event.kind) {
                    event.paths.into_iter().filter(|p| is_relevant(p.as_path())).collect()
                } else {
                    Vec::new()
                };

                for path in paths {
                    tracing::debug!("Change detected: {}", path.display());
                    let (_, batch) = pending.get_or_insert_with(|| (Instant::now() + debounce, ChangeBatch::new()));
                    batch.record(path);
                }
            }
            Ok(WatchMessage::Notify(Err(err))) => {
                state.fail(format!("File watcher error: {}", err));
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if state.stopping.load(Ordering::SeqCst) {
            break;
        }

        if !root.is_dir() {
            state.fail(format!("Root folder is no longer available: {}", root.display()));
            break;
        }

        let window_closed = pending
            .as_ref()
            .is_some_and(|(deadline, _)| Instant::now() >= *deadline);
        if window_closed {
            if let Some((_, batch)) = pending.take() {
                tracing::debug!(
                    "Coalesced {} events on {} paths",
                    batch.event_count,
                    batch.paths.len()
                );
                state.mark_triggered();
                on_change(&batch);
            }
        }
    }
}
