//! Parallel generation of path imprints
//!
//! [`PathImprintGenerator`] walks a file or directory tree, hashes every
//! path it visits, and emits one imprint per path to a configured record
//! consumer. Traversal and hashing run on a work-stealing compute pool; a
//! dedicated emit thread serializes consumer calls so records are handed off
//! and released as quickly as possible, bounding in-flight memory.
//!
//! Directory fingerprints are deterministic regardless of how child work is
//! scheduled: once all child imprints of a directory are known, they are
//! sorted lexicographically by filename before being folded into the
//! directory's content and children digests.
//!
//! # Examples
//!
//! ```rust,no_run
//! use datimprint::generator::GeneratorBuilder;
//!
//! # fn main() -> datimprint::Result<()> {
//! let generator = GeneratorBuilder::new()
//!     .exclude_filename_glob("*.tmp")
//!     .record_consumer(Box::new(|imprint| {
//!         println!("{} {}", imprint.miniprint(), imprint.path().display());
//!         Ok(())
//!     }))
//!     .build()?;
//! let root = generator.produce_imprint("/data")?;
//! println!("tree fingerprint: {}", root.fingerprint());
//! generator.close()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ImprintError, Result};
use crate::hash::{self, Digest, Hash};
use crate::imprint::{canonical_identity, FileTime, PathImprint};
use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default budget for draining the emit stream at shutdown
pub const DEFAULT_EMIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Listener for events from the generator
///
/// Callbacks are invoked from arbitrary worker threads and may be entered
/// concurrently; implementations are responsible for their own
/// synchronization and should return quickly. All methods default to no-ops.
pub trait GenerateListener: Send + Sync {
    /// Generation of an imprint has been scheduled for a path
    fn on_generate_imprint(&self, _path: &Path) {}

    /// Traversal entered a directory, before its children are listed
    fn on_enter_directory(&self, _directory: &Path) {}

    /// Content hashing is about to begin for a file
    fn before_hash_file(&self, _file: &Path) {}

    /// Content hashing has completed (or failed) for a file
    fn after_hash_file(&self, _file: &Path) {}

    /// A descendant path could not be read and was skipped
    fn on_skip_unreadable_path(&self, _path: &Path) {}

    /// A descendant path matched a configured exclusion and was skipped
    fn on_skip_excluded_path(&self, _path: &Path) {}
}

/// Consumer of generated imprint records
///
/// Runs on the dedicated emit thread; each imprint is observed exactly once,
/// in an unspecified order. Consumers that need stable numbering assign
/// sequence numbers on receipt. Returning an error stops further emissions;
/// the first error is re-raised when the generator is closed.
pub type RecordConsumer = dyn FnMut(PathImprint) -> Result<()> + Send;

/// Strategy for the compute pool running traversal and hashing
///
/// All strategies build a work-stealing pool; they differ in how many
/// threads it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeStrategy {
    /// A pool with a fixed number of threads; `None` means one per CPU
    FixedThreads(Option<usize>),
    /// An oversubscribed pool, trading context switches for I/O overlap
    CachedThreads,
    /// Work stealing with FIFO task order
    WorkStealingFifo,
    /// Work stealing with LIFO task order
    WorkStealingLifo,
}

impl Default for ComputeStrategy {
    fn default() -> Self {
        ComputeStrategy::FixedThreads(None)
    }
}

impl ComputeStrategy {
    /// Build the compute pool for this strategy
    fn build_pool(self) -> Result<ThreadPool> {
        let threads = match self {
            ComputeStrategy::FixedThreads(Some(count)) => count.max(1),
            ComputeStrategy::FixedThreads(None)
            | ComputeStrategy::WorkStealingFifo
            | ComputeStrategy::WorkStealingLifo => num_cpus::get(),
            ComputeStrategy::CachedThreads => num_cpus::get() * 2,
        };
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("datimprint-compute-{index}"))
            .build()
            .map_err(|error| {
                ImprintError::Io(std::io::Error::new(std::io::ErrorKind::Other, error))
            })
    }
}

/// Configured exclusion sets, immutable after construction
///
/// Exclusions apply only to descendants, never to the root of a walk.
struct Exclusions {
    paths: HashSet<PathBuf>,
    path_globs: Option<GlobSet>,
    filename_globs: Option<GlobSet>,
}

impl Exclusions {
    fn is_excluded(&self, path: &Path) -> bool {
        if self.paths.contains(path) {
            return true;
        }
        if let Some(globs) = &self.path_globs {
            if globs.is_match(path) {
                return true;
            }
        }
        if let Some(globs) = &self.filename_globs {
            if let Some(filename) = path.file_name() {
                if globs.is_match(Path::new(filename)) {
                    return true;
                }
            }
        }
        false
    }

    fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.path_globs.is_none() && self.filename_globs.is_none()
    }
}

/// Builder for a [`PathImprintGenerator`]
///
/// Collects the compute strategy, record consumer, listener, and exclusion
/// sets, then produces an immutable generator.
pub struct GeneratorBuilder {
    compute: ComputeStrategy,
    consumer: Option<Box<RecordConsumer>>,
    listener: Option<Arc<dyn GenerateListener>>,
    exclude_paths: HashSet<PathBuf>,
    exclude_path_globs: Vec<String>,
    exclude_filename_globs: Vec<String>,
    emit_drain_timeout: Duration,
}

impl Default for GeneratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self {
            compute: ComputeStrategy::default(),
            consumer: None,
            listener: None,
            exclude_paths: HashSet::new(),
            exclude_path_globs: Vec::new(),
            exclude_filename_globs: Vec::new(),
            emit_drain_timeout: DEFAULT_EMIT_DRAIN_TIMEOUT,
        }
    }

    /// Select the compute pool strategy
    pub fn compute_strategy(mut self, strategy: ComputeStrategy) -> Self {
        self.compute = strategy;
        self
    }

    /// Set the consumer to which imprints are produced after generation
    pub fn record_consumer(mut self, consumer: Box<RecordConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Set the listener for generator events
    pub fn listener(mut self, listener: Arc<dyn GenerateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Exclude a literal path; matches descendants exactly
    pub fn exclude_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude_paths.insert(path.into());
        self
    }

    /// Exclude descendants whose full path matches a glob
    pub fn exclude_path_glob(mut self, glob: impl Into<String>) -> Self {
        self.exclude_path_globs.push(glob.into());
        self
    }

    /// Exclude descendants whose filename matches a glob
    pub fn exclude_filename_glob(mut self, glob: impl Into<String>) -> Self {
        self.exclude_filename_globs.push(glob.into());
        self
    }

    /// Set the budget for draining the emit stream at shutdown
    pub fn emit_drain_timeout(mut self, timeout: Duration) -> Self {
        self.emit_drain_timeout = timeout;
        self
    }

    /// Build the generator
    ///
    /// # Errors
    ///
    /// [`ImprintError::Pattern`] if an exclusion glob does not compile.
    pub fn build(self) -> Result<PathImprintGenerator> {
        let pool = self.compute.build_pool()?;
        let exclusions = Exclusions {
            paths: self.exclude_paths,
            path_globs: compile_globs(&self.exclude_path_globs)?,
            filename_globs: compile_globs(&self.exclude_filename_globs)?,
        };
        let shared = Arc::new(GeneratorShared {
            listener: self.listener,
            exclusions,
            consumer_error: Mutex::new(None),
            consumer_failed: AtomicBool::new(false),
        });
        let emit = self
            .consumer
            .map(|consumer| EmitStream::start(consumer, Arc::clone(&shared)))
            .transpose()?;
        Ok(PathImprintGenerator {
            pool,
            shared,
            emit: Mutex::new(emit),
            emit_drain_timeout: self.emit_drain_timeout,
        })
    }
}

/// Compile a set of globs, or `None` when there are none
fn compile_globs(globs: &[String]) -> Result<Option<GlobSet>> {
    if globs.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        builder.add(Glob::new(glob).map_err(|error| ImprintError::Pattern(error.to_string()))?);
    }
    builder
        .build()
        .map(Some)
        .map_err(|error| ImprintError::Pattern(error.to_string()))
}

/// State shared between the caller, compute workers, and the emit thread
struct GeneratorShared {
    listener: Option<Arc<dyn GenerateListener>>,
    exclusions: Exclusions,
    /// First error raised by the record consumer; re-raised at close
    consumer_error: Mutex<Option<ImprintError>>,
    consumer_failed: AtomicBool,
}

impl GeneratorShared {
    fn with_listener(&self, notify: impl FnOnce(&dyn GenerateListener)) {
        if let Some(listener) = &self.listener {
            notify(listener.as_ref());
        }
    }

    fn latch_consumer_error(&self, error: ImprintError) {
        let mut slot = self.consumer_error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.consumer_failed.store(true, Ordering::Release);
    }
}

/// Messages handed to the emit thread
enum EmitMessage {
    Record(PathImprint),
    /// Reply once every message queued before this one has been consumed
    Flush(SyncSender<()>),
}

/// The dedicated emit stream: one thread draining records to the consumer
struct EmitStream {
    tx: Sender<EmitMessage>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

impl EmitStream {
    fn start(mut consumer: Box<RecordConsumer>, shared: Arc<GeneratorShared>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<EmitMessage>();
        let (done_tx, done_rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("datimprint-emit".to_string())
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    match message {
                        EmitMessage::Record(imprint) => {
                            if shared.consumer_failed.load(Ordering::Acquire) {
                                continue;
                            }
                            if let Err(error) = consumer(imprint) {
                                warn!("record consumer failed; suspending production");
                                shared.latch_consumer_error(error);
                            }
                        }
                        EmitMessage::Flush(reply) => {
                            let _ = reply.send(());
                        }
                    }
                }
                let _ = done_tx.send(());
            })
            .map_err(ImprintError::Io)?;
        Ok(Self {
            tx,
            done_rx,
            handle,
        })
    }
}

/// Parallel imprint generator for file system trees
///
/// Holds only immutable configuration plus the latched first consumer
/// error, so one generator may serve any number of interleaved
/// [`produce_imprint`](Self::produce_imprint) calls. Call
/// [`close`](Self::close) when finished to drain production and surface any
/// consumer error; dropping the generator drains on a best-effort basis.
pub struct PathImprintGenerator {
    pool: ThreadPool,
    shared: Arc<GeneratorShared>,
    emit: Mutex<Option<EmitStream>>,
    emit_drain_timeout: Duration,
}

impl PathImprintGenerator {
    /// Generate imprints for an entire tree and produce every one of them,
    /// including the root's, to the record consumer
    ///
    /// Returns the composite imprint of the root. May be called repeatedly;
    /// calls are independent and their emissions may interleave on the
    /// consumer.
    ///
    /// # Errors
    ///
    /// [`ImprintError::PathIo`] if the root or a non-skippable descendant
    /// cannot be read, [`ImprintError::UnsupportedPath`] if a visited path
    /// is neither a regular file nor a directory.
    pub fn produce_imprint(&self, path: impl AsRef<Path>) -> Result<PathImprint> {
        let root = canonical_identity(path.as_ref())?;
        self.pool.install(|| self.visit(&root, true))
    }

    /// Generate imprints for an entire tree without producing the root's
    /// own record
    ///
    /// Descendant imprints are still produced; only the root is withheld.
    pub fn generate_imprint(&self, path: impl AsRef<Path>) -> Result<PathImprint> {
        let root = canonical_identity(path.as_ref())?;
        self.pool.install(|| self.visit(&root, false))
    }

    /// Whether the record consumer has failed
    ///
    /// Production is suspended once a consumer error has been latched; the
    /// error itself is surfaced by [`close`](Self::close).
    pub fn is_production_suspended(&self) -> bool {
        self.shared.consumer_failed.load(Ordering::Acquire)
    }

    /// Block until every record queued so far has been handed to the
    /// consumer
    ///
    /// Useful between walks of multiple roots, to keep records ordered
    /// after the base path row that anchors them.
    pub fn drain_production(&self) -> Result<()> {
        let emit = self.emit.lock();
        if let Some(emit) = emit.as_ref() {
            let (reply_tx, reply_rx) = mpsc::sync_channel(1);
            if emit.tx.send(EmitMessage::Flush(reply_tx)).is_ok() {
                reply_rx
                    .recv_timeout(self.emit_drain_timeout)
                    .map_err(|_| drain_timeout_error())?;
            }
        }
        Ok(())
    }

    /// Shut the generator down, draining production and re-raising any
    /// latched consumer error
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if let Some(emit) = self.emit.lock().take() {
            drop(emit.tx);
            emit.done_rx
                .recv_timeout(self.emit_drain_timeout)
                .map_err(|_| drain_timeout_error())?;
            let _ = emit.handle.join();
        }
        if let Some(error) = self.shared.consumer_error.lock().take() {
            return Err(ImprintError::consumer(error));
        }
        Ok(())
    }

    /// Visit one path, generating (and optionally producing) its imprint
    fn visit(&self, path: &Path, produce: bool) -> Result<PathImprint> {
        trace!(path = %path.display(), "generating imprint");
        self.shared
            .with_listener(|listener| listener.on_generate_imprint(path));
        let metadata =
            fs::metadata(path).map_err(|source| ImprintError::io_at(path, source))?;
        let modified_at = FileTime::from(
            metadata
                .modified()
                .map_err(|source| ImprintError::io_at(path, source))?,
        );
        let imprint = if metadata.is_file() {
            let content_fingerprint = self.hash_file(path)?;
            PathImprint::for_file(path, modified_at, content_fingerprint)?
        } else if metadata.is_dir() {
            let (content_fingerprint, children_fingerprint) =
                self.directory_fingerprints(path)?;
            PathImprint::for_directory(
                path,
                modified_at,
                content_fingerprint,
                children_fingerprint,
            )?
        } else {
            return Err(ImprintError::UnsupportedPath(path.to_path_buf()));
        };
        if produce {
            self.produce(&imprint);
        }
        Ok(imprint)
    }

    /// Stream-hash a file's contents, notifying the listener around the work
    fn hash_file(&self, file: &Path) -> Result<Hash> {
        self.shared
            .with_listener(|listener| listener.before_hash_file(file));
        let result = hash::hash_file(file);
        self.shared
            .with_listener(|listener| listener.after_hash_file(file));
        result
    }

    /// Compute the content and children fingerprints of a directory
    ///
    /// Children fan out across the compute pool; a worker blocked on this
    /// join steals and executes child tasks, so saturation cannot deadlock
    /// the pool. Sorting the finished imprints by filename makes the digests
    /// independent of completion order.
    fn directory_fingerprints(&self, directory: &Path) -> Result<(Hash, Hash)> {
        self.shared
            .with_listener(|listener| listener.on_enter_directory(directory));
        let mut children = Vec::new();
        let entries =
            fs::read_dir(directory).map_err(|source| ImprintError::io_at(directory, source))?;
        for entry in entries {
            let child = entry
                .map_err(|source| ImprintError::io_at(directory, source))?
                .path();
            if is_dos_hidden_system(&child) {
                debug!(path = %child.display(), "ignoring DOS hidden+system child");
                continue;
            }
            if !self.shared.exclusions.is_empty() && self.shared.exclusions.is_excluded(&child)
            {
                self.shared
                    .with_listener(|listener| listener.on_skip_excluded_path(&child));
                continue;
            }
            children.push(child);
        }

        let mut imprints: Vec<PathImprint> = children
            .par_iter()
            .map(|child| match self.visit(child, true) {
                Ok(imprint) => Ok(Some(imprint)),
                Err(error) if error.is_permission_denied() => {
                    warn!(path = %child.display(), "skipping unreadable path");
                    self.shared
                        .with_listener(|listener| listener.on_skip_unreadable_path(child));
                    Ok(None)
                }
                Err(error) => Err(error),
            })
            .collect::<Result<Vec<Option<PathImprint>>>>()?
            .into_iter()
            .flatten()
            .collect();
        imprints.sort_by(|a, b| filename_string(a.path()).cmp(&filename_string(b.path())));

        let mut content_digest = Digest::new();
        let mut children_digest = Digest::new();
        for child in &imprints {
            content_digest.update_hash(child.content_fingerprint());
            children_digest.update_hash(child.fingerprint());
        }
        Ok((content_digest.finish(), children_digest.finish()))
    }

    /// Hand an imprint to the emit stream, unless production is suspended
    fn produce(&self, imprint: &PathImprint) {
        if self.shared.consumer_failed.load(Ordering::Acquire) {
            return;
        }
        let emit = self.emit.lock();
        if let Some(emit) = emit.as_ref() {
            let _ = emit.tx.send(EmitMessage::Record(imprint.clone()));
        }
    }
}

impl Drop for PathImprintGenerator {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn drain_timeout_error() -> ImprintError {
    ImprintError::Shutdown(
        "imprint production did not drain within the shutdown budget; output may be incomplete"
            .to_string(),
    )
}

/// The string form of a path's final component, for sibling ordering
fn filename_string(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Whether a child carries both the DOS hidden and system attributes
///
/// Such directories (`System Volume Information`, `$RECYCLE.BIN`) raise
/// access errors on Windows file systems and are silently ignored.
#[cfg(windows)]
fn is_dos_hidden_system(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    fs::metadata(path)
        .map(|metadata| {
            metadata.is_dir()
                && metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
                && metadata.file_attributes() & FILE_ATTRIBUTE_SYSTEM != 0
        })
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn is_dos_hidden_system(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exclusions(
        paths: &[&str],
        path_globs: &[&str],
        filename_globs: &[&str],
    ) -> Exclusions {
        Exclusions {
            paths: paths.iter().map(PathBuf::from).collect(),
            path_globs: compile_globs(
                &path_globs.iter().map(|g| g.to_string()).collect::<Vec<_>>(),
            )
            .unwrap(),
            filename_globs: compile_globs(
                &filename_globs
                    .iter()
                    .map(|g| g.to_string())
                    .collect::<Vec<_>>(),
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_literal_path_exclusion_is_exact() {
        let exclusions = exclusions(&["/data/skip"], &[], &[]);
        assert!(exclusions.is_excluded(Path::new("/data/skip")));
        assert!(!exclusions.is_excluded(Path::new("/data/skip.txt")));
        assert!(!exclusions.is_excluded(Path::new("/data/keep")));
    }

    #[test]
    fn test_path_glob_matches_full_path() {
        let exclusions = exclusions(&[], &["/data/**/*.log"], &[]);
        assert!(exclusions.is_excluded(Path::new("/data/a/b/c.log")));
        assert!(!exclusions.is_excluded(Path::new("/elsewhere/c.log")));
    }

    #[test]
    fn test_filename_glob_matches_final_component_only() {
        let exclusions = exclusions(&[], &[], &["*.tmp"]);
        assert!(exclusions.is_excluded(Path::new("/anywhere/at/all/scratch.tmp")));
        assert!(!exclusions.is_excluded(Path::new("/anywhere/scratch.tmp/file.txt")));
    }

    #[test]
    fn test_bad_glob_fails_build() {
        let result = GeneratorBuilder::new().exclude_path_glob("[").build();
        assert!(matches!(result, Err(ImprintError::Pattern(_))));
    }

    #[test]
    fn test_filename_ordering_is_codepoint_lexicographic() {
        let mut names = vec![
            filename_string(Path::new("/d/foo.txt")),
            filename_string(Path::new("/d/bar.txt")),
            filename_string(Path::new("/d/Zebra.txt")),
        ];
        names.sort();
        // Uppercase sorts before lowercase in codepoint order
        assert_eq!(names, vec!["Zebra.txt", "bar.txt", "foo.txt"]);
    }
}
