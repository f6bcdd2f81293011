//! # Datimprint CLI - Data imprints of file system trees
//!
//! Command-line interface for generating and checking imprints.
//!
//! ## Usage
//! ```bash
//! # Imprint one or more trees into a .datim file
//! datimprint generate /data --output data.datim
//!
//! # Check a (possibly relocated) tree against recorded imprints
//! datimprint check /backup/data --imprint data.datim
//! ```
//!
//! Exit code is 0 on success and non-zero on any failure or on any check
//! mismatch.

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use datimprint::checker::{CheckListener, CheckerBuilder, ResultConsumer};
use datimprint::generator::{ComputeStrategy, GenerateListener, GeneratorBuilder};
use datimprint::{datim, rebase, CheckResult, ImprintError, Mismatch, PathImprint};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Datimprint - generate and verify data imprints of file system trees
#[derive(Parser)]
#[command(name = "datimprint")]
#[command(version)]
#[command(about = "Generate and verify cryptographic imprints of file system trees")]
struct Cli {
    /// Print more detail while working (directories as they are visited)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all status output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a data imprint of the indicated file or directory trees
    ///
    /// Output goes to stdout unless --output is given. Output files are
    /// UTF-8 with LF line endings; stdout uses the platform separator.
    Generate {
        /// The files or base directories of the data to imprint
        #[arg(required = true)]
        data: Vec<PathBuf>,

        /// Write the imprints to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The executor to use for traversal and hashing
        #[arg(long, value_enum)]
        executor: Option<ExecutorKind>,

        /// A literal path to exclude; may be repeated
        #[arg(long = "exclude-path")]
        exclude_paths: Vec<PathBuf>,

        /// A glob of full paths to exclude, e.g. `**/*.bak`; may be repeated
        #[arg(long = "exclude-path-glob")]
        exclude_path_globs: Vec<String>,

        /// A glob of filenames to exclude, e.g. `*.tmp`; may be repeated
        #[arg(long = "exclude-filename-glob")]
        exclude_filename_globs: Vec<String>,
    },
    /// Check files in a directory tree against recorded imprints
    ///
    /// Imprinted paths are re-anchored from their recorded base paths onto
    /// the data path, so a tree may be checked even after relocation. Paths
    /// not present in the imprint file are not examined.
    Check {
        /// The file or base directory of the data to check
        data: PathBuf,

        /// The file containing imprints to check against
        #[arg(short, long)]
        imprint: PathBuf,

        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Executor selection for the generate subcommand
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExecutorKind {
    /// Fixed pool with one thread per CPU
    Fixedthread,
    /// Oversubscribed pool for I/O-heavy trees
    Cachedthread,
    /// Work-stealing pool, FIFO order
    Forkjoinfifo,
    /// Work-stealing pool, LIFO order
    Forkjoinlifo,
}

impl From<ExecutorKind> for ComputeStrategy {
    fn from(kind: ExecutorKind) -> Self {
        match kind {
            ExecutorKind::Fixedthread => ComputeStrategy::FixedThreads(None),
            ExecutorKind::Cachedthread => ComputeStrategy::CachedThreads,
            ExecutorKind::Forkjoinfifo => ComputeStrategy::WorkStealingFifo,
            ExecutorKind::Forkjoinlifo => ComputeStrategy::WorkStealingLifo,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("{}: {}", "Error".red().bold(), error);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> datimprint::Result<i32> {
    match cli.command {
        Commands::Generate {
            data,
            output,
            executor,
            exclude_paths,
            exclude_path_globs,
            exclude_filename_globs,
        } => cmd_generate(
            &data,
            output.as_deref(),
            executor,
            exclude_paths,
            exclude_path_globs,
            exclude_filename_globs,
            cli.verbose,
            cli.quiet,
        ),
        Commands::Check {
            data,
            imprint,
            output,
        } => cmd_check(&data, &imprint, output.as_deref(), cli.verbose, cli.quiet),
    }
}

/// Open the record/report writer: a file (LF endings) or stdout (platform
/// separator)
fn open_output(output: Option<&Path>) -> datimprint::Result<(Box<dyn Write + Send>, datim::Serializer)> {
    match output {
        Some(path) => {
            let file =
                File::create(path).map_err(|source| ImprintError::io_at(path, source))?;
            Ok((
                Box::new(BufWriter::new(file)),
                datim::Serializer::with_line_terminator("\n"),
            ))
        }
        None => Ok((Box::new(std::io::stdout()), datim::Serializer::new())),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_generate(
    data: &[PathBuf],
    output: Option<&Path>,
    executor: Option<ExecutorKind>,
    exclude_paths: Vec<PathBuf>,
    exclude_path_globs: Vec<String>,
    exclude_filename_globs: Vec<String>,
    verbose: bool,
    quiet: bool,
) -> datimprint::Result<i32> {
    let data_paths = data
        .iter()
        .map(|path| {
            std::path::absolute(path).map_err(|source| ImprintError::io_at(path, source))
        })
        .collect::<datimprint::Result<Vec<_>>>()?;
    let labels: Vec<String> = data_paths
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect();
    if !quiet {
        eprintln!(
            "{}",
            format!("Generating imprint for {} ...", labels.join(", "))
                .blue()
                .bold()
        );
    }

    let started = Instant::now();
    let (writer, serializer) = open_output(output)?;
    let writer = Arc::new(Mutex::new(writer));
    serializer.write_header(&mut *writer.lock())?;

    let counter = AtomicU64::new(0);
    let consumer_writer = Arc::clone(&writer);
    let consumer_serializer = serializer.clone();
    let mut builder = GeneratorBuilder::new().record_consumer(Box::new(move |imprint| {
        let number = counter.fetch_add(1, Ordering::Relaxed) + 1;
        consumer_serializer.write_imprint(&mut *consumer_writer.lock(), &imprint, number)
    }));
    if let Some(kind) = executor {
        builder = builder.compute_strategy(kind.into());
    }
    for path in exclude_paths {
        builder = builder.exclude_path(path);
    }
    for glob in exclude_path_globs {
        builder = builder.exclude_path_glob(glob);
    }
    for glob in exclude_filename_globs {
        builder = builder.exclude_filename_glob(glob);
    }
    let status = (!quiet).then(|| Arc::new(GenerateStatus::new(verbose)));
    if let Some(status) = &status {
        let listener: Arc<dyn GenerateListener> = status.clone();
        builder = builder.listener(listener);
    }

    let generator = builder.build()?;
    for data_path in &data_paths {
        serializer.write_base_path(&mut *writer.lock(), data_path)?;
        generator.produce_imprint(data_path)?;
        // Keep every imprint after the base path row that anchors it
        generator.drain_production()?;
    }
    generator.close()?;
    writer.lock().flush()?;

    if let Some(status) = &status {
        status.finish();
    }
    if !quiet {
        eprintln!("{}", done_message(started.elapsed()).blue().bold());
    }
    Ok(0)
}

fn cmd_check(
    data: &Path,
    imprint_file: &Path,
    output: Option<&Path>,
    verbose: bool,
    quiet: bool,
) -> datimprint::Result<i32> {
    let data_path =
        std::path::absolute(data).map_err(|source| ImprintError::io_at(data, source))?;
    if !quiet {
        eprintln!(
            "{}",
            format!(
                "Checking `{}` against imprint `{}` ...",
                data_path.display(),
                imprint_file.display()
            )
            .blue()
            .bold()
        );
    }

    let started = Instant::now();
    let imprint_input = File::open(imprint_file)
        .map_err(|source| ImprintError::io_at(imprint_file, source))?;
    let mut parser = datim::Parser::new(BufReader::new(imprint_input));
    let (writer, _) = open_output(output)?;
    let writer = Arc::new(Mutex::new(writer));

    let mismatch_count = Arc::new(AtomicU64::new(0));
    let report_writer = Arc::clone(&writer);
    let report_mismatches = Arc::clone(&mismatch_count);
    let consumer: Arc<ResultConsumer> = Arc::new(move |result: CheckResult| {
        if result.is_match() {
            return Ok(());
        }
        report_mismatches.fetch_add(1, Ordering::Relaxed);
        let mut writer = report_writer.lock();
        write_report_entry(&mut **writer, &result)?;
        // Surface problems promptly; the report is tiny next to the data
        writer.flush()?;
        Ok(())
    });

    let mut builder = CheckerBuilder::new().result_consumer(consumer);
    let status = (!quiet).then(|| Arc::new(CheckStatus::new(verbose)));
    if let Some(status) = &status {
        let listener: Arc<dyn CheckListener> = status.clone();
        builder = builder.listener(listener);
    }
    let checker = builder.build()?;

    let mut read = 0u64;
    while let Some(imprint) = parser.read_imprint()? {
        read += 1;
        if let Some(status) = &status {
            status.set_total(read);
        }
        let base_path = parser.require_base_path()?;
        let live_path = rebase::rebase(imprint.path(), base_path, &data_path)?;
        checker.submit(live_path, imprint);
        if checker.has_failed() {
            break;
        }
    }
    checker.close()?;
    writer.lock().flush()?;

    if let Some(status) = &status {
        status.finish();
    }
    let mismatches = mismatch_count.load(Ordering::Relaxed);
    if !quiet {
        eprintln!("{}", done_message(started.elapsed()).blue().bold());
        if mismatches > 0 {
            eprintln!(
                "{}",
                format!("{mismatches} of {read} paths did not match.").red().bold()
            );
        } else {
            eprintln!("{}", format!("All {read} paths match.").green().bold());
        }
    }
    Ok(if mismatches > 0 { 1 } else { 0 })
}

/// Write the report lines for one non-matching result
fn write_report_entry(writer: &mut dyn Write, result: &CheckResult) -> datimprint::Result<()> {
    let imprint = result.imprint();
    match result {
        CheckResult::Missing { path, .. } => {
            writeln!(
                writer,
                "- Missing path `{}` to match imprint for path `{}`.",
                path.display(),
                imprint.path().display()
            )?;
        }
        CheckResult::File {
            path,
            content_modified_at,
            content_fingerprint,
            mismatches,
            ..
        } => {
            writeln!(
                writer,
                "- Path `{}` does not match imprint for path `{}`.",
                path.display(),
                imprint.path().display()
            )?;
            for mismatch in mismatches {
                match mismatch {
                    Mismatch::ContentFingerprint => writeln!(
                        writer,
                        "  * Path content fingerprint `{}` did not match `{}` of the imprint.",
                        content_fingerprint,
                        imprint.content_fingerprint()
                    )?,
                    Mismatch::ContentModifiedAt => writeln!(
                        writer,
                        "  * Path modification timestamp {} did not match {} of the imprint.",
                        content_modified_at,
                        imprint.content_modified_at()
                    )?,
                    Mismatch::Filename => write_filename_mismatch(writer, path, imprint)?,
                }
            }
        }
        CheckResult::Directory {
            path,
            content_modified_at,
            mismatches,
            ..
        } => {
            writeln!(
                writer,
                "- Path `{}` does not match imprint for path `{}`.",
                path.display(),
                imprint.path().display()
            )?;
            for mismatch in mismatches {
                match mismatch {
                    Mismatch::ContentFingerprint => {}
                    Mismatch::ContentModifiedAt => writeln!(
                        writer,
                        "  * Path modification timestamp {} did not match {} of the imprint.",
                        content_modified_at,
                        imprint.content_modified_at()
                    )?,
                    Mismatch::Filename => write_filename_mismatch(writer, path, imprint)?,
                }
            }
        }
    }
    Ok(())
}

fn write_filename_mismatch(
    writer: &mut dyn Write,
    path: &Path,
    imprint: &PathImprint,
) -> datimprint::Result<()> {
    writeln!(
        writer,
        "  * Path filename `{}` did not match `{}` of the imprint.",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        imprint
            .path()
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default()
    )?;
    Ok(())
}

fn done_message(elapsed: Duration) -> String {
    format!(
        "Done. Elapsed time: {}.",
        humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
    )
}

fn new_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Status line for the generate subcommand
///
/// Counts scheduled imprints and shows the file currently being hashed;
/// in verbose mode directories are printed as traversal enters them.
struct GenerateStatus {
    bar: ProgressBar,
    verbose: bool,
    scheduled: AtomicU64,
}

impl GenerateStatus {
    fn new(verbose: bool) -> Self {
        Self {
            bar: new_spinner(),
            verbose,
            scheduled: AtomicU64::new(0),
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl GenerateListener for GenerateStatus {
    fn on_generate_imprint(&self, _path: &Path) {
        let count = self.scheduled.fetch_add(1, Ordering::Relaxed) + 1;
        self.bar.set_message(format!("{count} imprints"));
    }

    fn on_enter_directory(&self, directory: &Path) {
        if self.verbose {
            self.bar.println(directory.display().to_string());
        }
    }

    fn before_hash_file(&self, file: &Path) {
        let count = self.scheduled.load(Ordering::Relaxed);
        self.bar
            .set_message(format!("{count} imprints · hashing {}", file.display()));
    }

    fn on_skip_unreadable_path(&self, path: &Path) {
        self.bar.println(
            format!("Skipping unreadable path `{}`.", path.display())
                .yellow()
                .to_string(),
        );
    }
}

/// Status line for the check subcommand
struct CheckStatus {
    bar: ProgressBar,
    verbose: bool,
    total: AtomicU64,
    checked: AtomicU64,
}

impl CheckStatus {
    fn new(verbose: bool) -> Self {
        Self {
            bar: new_spinner(),
            verbose,
            total: AtomicU64::new(0),
            checked: AtomicU64::new(0),
        }
    }

    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl CheckListener for CheckStatus {
    fn on_check_path(&self, path: &Path, _imprint: &PathImprint) {
        if self.verbose {
            self.bar.println(path.display().to_string());
        }
    }

    fn after_check_path(&self, _path: &Path) {
        // Completed checks indicate progress better than imprints read,
        // which can race far ahead of actual checking
        let checked = self.checked.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed);
        self.bar.set_message(format!("{checked}/{total} checked"));
    }

    fn on_result_mismatch(&self, result: &CheckResult) {
        let message = match result {
            CheckResult::Missing { path, .. } => {
                format!("Missing path `{}` for imprint.", path.display())
            }
            _ => format!("Path `{}` does not match imprint.", result.path().display()),
        };
        self.bar.println(message.red().to_string());
    }
}
