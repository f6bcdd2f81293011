//! # Datimprint - Data imprints of file system trees
//!
//! A library for producing and verifying cryptographic *imprints* of file
//! system trees. An imprint is a compact, deterministic fingerprint of a
//! path — its filename, last-modification time, and content — composed
//! recursively for directories, so that a single hash witnesses the
//! fidelity of an entire tree.
//!
//! ## Overview
//!
//! Two primary operations are supported:
//!
//! - **Generate**: walk a tree in parallel and emit one imprint record per
//!   path, serialized into the tab-delimited `.datim` interchange format.
//! - **Check**: read an imprint file back, re-anchor its paths onto a live
//!   tree, and classify every difference (content, timestamp, filename).
//!
//! Fingerprints are deterministic by construction: sibling hashes are
//! folded in lexicographic filename order regardless of how concurrent
//! traversal happened to schedule them, so two independent runs over
//! identical trees produce identical fingerprints.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use datimprint::{GeneratorBuilder, Serializer};
//! use parking_lot::Mutex;
//! use std::io::Write;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! # fn main() -> datimprint::Result<()> {
//! let serializer = Serializer::with_line_terminator("\n");
//! let output = std::sync::Arc::new(Mutex::new(Vec::new()));
//!
//! let mut header = output.lock();
//! serializer.write_header(&mut *header)?;
//! serializer.write_base_path(&mut *header, "/data".as_ref())?;
//! drop(header);
//!
//! let sink = std::sync::Arc::clone(&output);
//! let row_serializer = serializer.clone();
//! let counter = AtomicU64::new(0);
//! let generator = GeneratorBuilder::new()
//!     .record_consumer(Box::new(move |imprint| {
//!         let number = counter.fetch_add(1, Ordering::Relaxed) + 1;
//!         row_serializer.write_imprint(&mut *sink.lock(), &imprint, number)
//!     }))
//!     .build()?;
//!
//! let root = generator.produce_imprint("/data")?;
//! println!("tree fingerprint: {}", root.fingerprint());
//! generator.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`hash`]: the SHA-256 fingerprint primitive
//! - [`imprint`]: the immutable imprint record and its timestamps
//! - [`datim`]: the `.datim` file format serializer and parser
//! - [`generator`]: the parallel imprint generator
//! - [`checker`]: checking live paths against recorded imprints
//! - [`rebase`]: re-anchoring recorded paths onto a live tree
//! - [`error`]: error types and handling
//!
//! ## Concurrency
//!
//! The generator runs traversal and hashing on a work-stealing compute
//! pool and serializes record emission on a dedicated thread; the checker
//! schedules path checks onto a bounded worker queue that falls back to
//! running work on the submitting thread when full. Listener callbacks may
//! be entered concurrently from any worker thread and must synchronize
//! themselves.

// Public API modules
pub mod checker;
pub mod datim;
pub mod error;
pub mod generator;
pub mod hash;
pub mod imprint;
pub mod rebase;

// Re-export main types for convenience
pub use checker::{
    CheckListener, CheckResult, CheckerBuilder, Mismatch, PathChecker, ResultConsumer,
};
pub use datim::{Parser, Serializer};
pub use error::{ImprintError, Result};
pub use generator::{
    ComputeStrategy, GenerateListener, GeneratorBuilder, PathImprintGenerator, RecordConsumer,
};
pub use hash::{Digest, Hash};
pub use imprint::{FileTime, PathImprint};
