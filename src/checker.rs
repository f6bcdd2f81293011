//! Checking paths against their imprints
//!
//! [`PathChecker`] replays recorded imprints against a live tree and
//! classifies how each path differs: content, modification timestamp, or
//! filename. A check of one path never consults other paths — directory
//! content is only verified transitively, by the caller presenting the
//! child imprints one by one.
//!
//! Checks can run synchronously on the caller's thread via
//! [`check_path`](PathChecker::check_path), or be scheduled onto the
//! checker's worker pool via [`submit`](PathChecker::submit), with results
//! delivered to a configured consumer. The worker queue is bounded; when it
//! fills, the submitting thread runs the check inline.
//!
//! # Examples
//!
//! ```rust,no_run
//! use datimprint::checker::CheckerBuilder;
//! use datimprint::imprint::PathImprint;
//! # fn imprint_from_somewhere() -> PathImprint { unimplemented!() }
//!
//! # fn main() -> datimprint::Result<()> {
//! let checker = CheckerBuilder::new().build()?;
//! let imprint = imprint_from_somewhere();
//! let result = checker.check_path("/data/foo.bar".as_ref(), &imprint)?;
//! if !result.is_match() {
//!     eprintln!("`{}` does not match its imprint", result.path().display());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{ImprintError, Result};
use crate::hash::{self, Hash};
use crate::imprint::{FileTime, PathImprint};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::trace;

/// Default bound on the worker task queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000_000;

/// Default budget for draining queued checks at shutdown
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Listener for events from the checker
///
/// Callbacks are invoked from arbitrary worker threads and may be entered
/// concurrently; implementations are responsible for their own
/// synchronization. All methods default to no-ops.
pub trait CheckListener: Send + Sync {
    /// A check of a path against an imprint has been scheduled
    fn on_check_path(&self, _path: &Path, _imprint: &PathImprint) {}

    /// Checking work for a path is about to begin
    fn before_check_path(&self, _path: &Path) {}

    /// Checking work for a path has finished
    fn after_check_path(&self, _path: &Path) {}

    /// A completed check did not match its imprint
    fn on_result_mismatch(&self, _result: &CheckResult) {}
}

/// Consumer of completed check results
///
/// May be invoked concurrently from worker threads and from submitting
/// threads running overflow work inline. Returning an error latches the
/// first failure, which is re-raised when the checker is closed.
pub type ResultConsumer = dyn Fn(CheckResult) -> Result<()> + Send + Sync;

/// The ways a live path can differ from its imprint, most severe first
///
/// Iterating a set of mismatches yields them in this order, so reports
/// naturally lead with the most serious problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mismatch {
    /// The live content hash differs from the recorded content fingerprint
    ContentFingerprint,
    /// The live modification timestamp differs from the recorded one
    ///
    /// Compared at full platform precision, exactly; only fingerprint
    /// hashing truncates to milliseconds. Two file systems that round
    /// timestamps differently can therefore agree on fingerprints yet
    /// still report this mismatch.
    ContentModifiedAt,
    /// The live filename differs from the recorded one in its string form
    ///
    /// String comparison detects case-only renames even on file systems
    /// whose native path equality would hide them.
    Filename,
}

/// The classified outcome of checking one path against an imprint
#[derive(Debug, Clone)]
pub enum CheckResult {
    /// The path does not exist; not a match, but with nothing present there
    /// is no field-by-field mismatch to report
    Missing {
        /// The live path that was checked
        path: PathBuf,
        /// The imprint it was checked against
        imprint: PathImprint,
    },
    /// The path exists and is a regular file
    File {
        /// The live path that was checked
        path: PathBuf,
        /// The imprint it was checked against
        imprint: PathImprint,
        /// The file's live modification timestamp
        content_modified_at: FileTime,
        /// The hash of the file's live contents
        content_fingerprint: Hash,
        /// Every way the file differs from the imprint
        mismatches: BTreeSet<Mismatch>,
    },
    /// The path exists and is a directory; content is not hashed, so only
    /// the timestamp and filename are compared
    Directory {
        /// The live path that was checked
        path: PathBuf,
        /// The imprint it was checked against
        imprint: PathImprint,
        /// The directory's live modification timestamp
        content_modified_at: FileTime,
        /// Every way the directory differs from the imprint
        mismatches: BTreeSet<Mismatch>,
    },
}

impl CheckResult {
    /// The live path that was checked
    pub fn path(&self) -> &Path {
        match self {
            CheckResult::Missing { path, .. }
            | CheckResult::File { path, .. }
            | CheckResult::Directory { path, .. } => path,
        }
    }

    /// The imprint the path was checked against
    pub fn imprint(&self) -> &PathImprint {
        match self {
            CheckResult::Missing { imprint, .. }
            | CheckResult::File { imprint, .. }
            | CheckResult::Directory { imprint, .. } => imprint,
        }
    }

    /// Whether the live path fully matches its imprint
    ///
    /// A missing path is never a match.
    pub fn is_match(&self) -> bool {
        match self {
            CheckResult::Missing { .. } => false,
            CheckResult::File { mismatches, .. }
            | CheckResult::Directory { mismatches, .. } => mismatches.is_empty(),
        }
    }

    /// The mismatches found, ordered most severe first; empty for missing
    /// paths
    pub fn mismatches(&self) -> &BTreeSet<Mismatch> {
        static NONE: std::sync::OnceLock<BTreeSet<Mismatch>> = std::sync::OnceLock::new();
        match self {
            CheckResult::Missing { .. } => NONE.get_or_init(BTreeSet::new),
            CheckResult::File { mismatches, .. }
            | CheckResult::Directory { mismatches, .. } => mismatches,
        }
    }
}

/// Builder for a [`PathChecker`]
pub struct CheckerBuilder {
    workers: usize,
    queue_capacity: usize,
    listener: Option<Arc<dyn CheckListener>>,
    result_consumer: Option<Arc<ResultConsumer>>,
    drain_timeout: Duration,
}

impl Default for CheckerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckerBuilder {
    /// Create a builder with default settings: one worker per CPU and a
    /// queue bounded at [`DEFAULT_QUEUE_CAPACITY`]
    pub fn new() -> Self {
        Self {
            workers: num_cpus::get(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            listener: None,
            result_consumer: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Set the number of worker threads
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Bound the task queue; when full, submitting threads run checks inline
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the listener for checker events
    pub fn listener(mut self, listener: Arc<dyn CheckListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set the consumer to which completed results are delivered
    pub fn result_consumer(mut self, consumer: Arc<ResultConsumer>) -> Self {
        self.result_consumer = Some(consumer);
        self
    }

    /// Set the budget for draining queued checks at shutdown
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Build the checker, starting its worker threads
    ///
    /// # Errors
    ///
    /// [`ImprintError::Io`] if a worker thread cannot be spawned.
    pub fn build(self) -> Result<PathChecker> {
        let shared = Arc::new(CheckerShared {
            listener: self.listener,
            result_consumer: self.result_consumer,
            error: Mutex::new(None),
            failed: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::sync_channel::<CheckTask>(self.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let (done_tx, done_rx) = mpsc::channel();
        let mut workers = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let rx = Arc::clone(&rx);
            let shared = Arc::clone(&shared);
            let done_tx = done_tx.clone();
            let worker = std::thread::Builder::new()
                .name(format!("datimprint-check-{index}"))
                .spawn(move || {
                    loop {
                        let task = rx.lock().recv();
                        match task {
                            Ok(task) => run_task(&shared, task),
                            Err(_) => break,
                        }
                    }
                    let _ = done_tx.send(());
                })
                .map_err(ImprintError::Io)?;
            workers.push(worker);
        }
        Ok(PathChecker {
            shared,
            tx: Some(tx),
            done_rx,
            workers,
            drain_timeout: self.drain_timeout,
        })
    }
}

/// A queued check
struct CheckTask {
    path: PathBuf,
    imprint: PathImprint,
}

/// State shared between the caller and worker threads
struct CheckerShared {
    listener: Option<Arc<dyn CheckListener>>,
    result_consumer: Option<Arc<ResultConsumer>>,
    /// First per-path or consumer error; re-raised at close
    error: Mutex<Option<ImprintError>>,
    failed: AtomicBool,
}

impl CheckerShared {
    fn with_listener(&self, notify: impl FnOnce(&dyn CheckListener)) {
        if let Some(listener) = &self.listener {
            notify(listener.as_ref());
        }
    }

    fn latch_error(&self, error: ImprintError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.failed.store(true, Ordering::Release);
    }
}

/// Run one scheduled check, delivering the result or latching the error
fn run_task(shared: &CheckerShared, task: CheckTask) {
    match check_path_inner(shared, &task.path, &task.imprint) {
        Ok(result) => {
            if !result.is_match() {
                shared.with_listener(|listener| listener.on_result_mismatch(&result));
            }
            if let Some(consumer) = &shared.result_consumer {
                if let Err(error) = consumer(result) {
                    shared.latch_error(ImprintError::consumer(error));
                }
            }
        }
        Err(error) => shared.latch_error(error),
    }
}

/// The core check of one live path against one imprint
fn check_path_inner(
    shared: &CheckerShared,
    path: &Path,
    imprint: &PathImprint,
) -> Result<CheckResult> {
    trace!(path = %path.display(), miniprint = %imprint.miniprint(), "checking path");
    shared.with_listener(|listener| listener.on_check_path(path, imprint));
    shared.with_listener(|listener| listener.before_check_path(path));
    let outcome = evaluate(path, imprint);
    shared.with_listener(|listener| listener.after_check_path(path));
    outcome
}

fn evaluate(path: &Path, imprint: &PathImprint) -> Result<CheckResult> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CheckResult::Missing {
                path: path.to_path_buf(),
                imprint: imprint.clone(),
            });
        }
        Err(error) => return Err(ImprintError::io_at(path, error)),
    };
    let content_modified_at = FileTime::from(
        metadata
            .modified()
            .map_err(|source| ImprintError::io_at(path, source))?,
    );
    if metadata.is_file() {
        let content_fingerprint = hash::hash_file(path)?;
        let mut mismatches = BTreeSet::new();
        if content_fingerprint != *imprint.content_fingerprint() {
            mismatches.insert(Mismatch::ContentFingerprint);
        }
        if content_modified_at != imprint.content_modified_at() {
            mismatches.insert(Mismatch::ContentModifiedAt);
        }
        if !filenames_match(path, imprint.path()) {
            mismatches.insert(Mismatch::Filename);
        }
        Ok(CheckResult::File {
            path: path.to_path_buf(),
            imprint: imprint.clone(),
            content_modified_at,
            content_fingerprint,
            mismatches,
        })
    } else if metadata.is_dir() {
        let mut mismatches = BTreeSet::new();
        if content_modified_at != imprint.content_modified_at() {
            mismatches.insert(Mismatch::ContentModifiedAt);
        }
        if !filenames_match(path, imprint.path()) {
            mismatches.insert(Mismatch::Filename);
        }
        Ok(CheckResult::Directory {
            path: path.to_path_buf(),
            imprint: imprint.clone(),
            content_modified_at,
            mismatches,
        })
    } else {
        Err(ImprintError::UnsupportedPath(path.to_path_buf()))
    }
}

/// Compare final path components by their string form
///
/// Comparing strings rather than native paths detects case-only renames on
/// case-insensitive file systems. A side with no filename at all (a file
/// system root) is treated as matching, which supports checking a volume
/// root against a backup subdirectory.
fn filenames_match(live: &Path, recorded: &Path) -> bool {
    match (live.file_name(), recorded.file_name()) {
        (Some(live), Some(recorded)) => live.to_string_lossy() == recorded.to_string_lossy(),
        _ => true,
    }
}

/// Checker of live paths against recorded imprints
///
/// Holds no mutable cross-path state beyond the latched first error, so any
/// number of checks may run concurrently. Call [`close`](Self::close) to
/// drain scheduled work and surface the first error, if any.
pub struct PathChecker {
    shared: Arc<CheckerShared>,
    tx: Option<SyncSender<CheckTask>>,
    done_rx: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl PathChecker {
    /// Check a single path against an imprint on the calling thread
    ///
    /// # Errors
    ///
    /// [`ImprintError::PathIo`] if the path exists but cannot be read (a
    /// path that does not exist is a [`CheckResult::Missing`], not an
    /// error), or [`ImprintError::UnsupportedPath`] if it is neither a
    /// regular file nor a directory.
    pub fn check_path(&self, path: &Path, imprint: &PathImprint) -> Result<CheckResult> {
        check_path_inner(&self.shared, path, imprint)
    }

    /// Schedule a check on the worker pool
    ///
    /// The completed result is handed to the configured result consumer.
    /// If the task queue is full, the check runs inline on the calling
    /// thread. Once any error has been latched, further submissions are
    /// ignored; the error surfaces from [`close`](Self::close).
    pub fn submit(&self, path: PathBuf, imprint: PathImprint) {
        if self.shared.failed.load(Ordering::Acquire) {
            return;
        }
        if let Some(tx) = self.tx.as_ref() {
            match tx.try_send(CheckTask { path, imprint }) {
                Ok(()) => {}
                Err(TrySendError::Full(task)) => run_task(&self.shared, task),
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    /// Whether a per-path or consumer error has been latched
    ///
    /// Callers streaming imprints can poll this to stop early instead of
    /// scheduling checks that will be ignored.
    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Shut the checker down: stop accepting work, drain queued checks,
    /// and re-raise the first latched error
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.tx.take().is_some() {
            for _ in 0..self.workers.len() {
                self.done_rx
                    .recv_timeout(self.drain_timeout)
                    .map_err(|_| {
                        ImprintError::Shutdown(
                            "imprint checking did not drain within the shutdown budget"
                                .to_string(),
                        )
                    })?;
            }
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        }
        if let Some(error) = self.shared.error.lock().take() {
            return Err(error);
        }
        Ok(())
    }
}

impl Drop for PathChecker {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
