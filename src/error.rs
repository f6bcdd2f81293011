//! Error types for the datimprint library
//!
//! All fallible operations return [`Result`]. Errors distinguish the
//! environment failing (I/O), the caller handing us something unusable
//! (invalid paths, bad patterns), and malformed `.datim` input (header and
//! record errors carry the one-based line number where parsing stopped).

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for results in the datimprint library
pub type Result<T> = std::result::Result<T, ImprintError>;

/// Main error type for all imprint operations
#[derive(Debug, Error)]
pub enum ImprintError {
    /// I/O errors during stream reading/writing, with no single path at
    /// fault
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure reading, listing, or stat-ing a specific path
    #[error("IO error at `{path}`: {source}")]
    PathIo {
        /// The path that could not be accessed
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Path exists but is neither a regular file nor a directory
    #[error("unsupported path `{0}` is neither a regular file nor a directory")]
    UnsupportedPath(PathBuf),

    /// Path is empty, cannot be anchored, or contains the field delimiter
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// An exclusion glob could not be compiled
    #[error("invalid exclusion pattern: {0}")]
    Pattern(String),

    /// Datim header is missing, missing a required field, or names an
    /// unknown field
    #[error("bad header: {0}")]
    BadHeader(String),

    /// Datim record is structurally invalid
    #[error("bad record at line {line}: {reason}")]
    BadRecord {
        /// One-based line number of the offending record
        line: u64,
        /// What was malformed
        reason: String,
    },

    /// An imprint row was encountered before any base path row while the
    /// caller requested rebasing
    #[error("imprint at line {line} has no preceding base path to rebase against")]
    MissingBasePath {
        /// One-based line number of the imprint row
        line: u64,
    },

    /// A record or result consumer failed; the first occurrence is retained
    /// and re-raised when the engine is closed
    #[error("consumer failed: {0}")]
    Consumer(#[source] Box<ImprintError>),

    /// Engine shutdown exceeded its drain budget
    #[error("shutdown incomplete: {0}")]
    Shutdown(String),
}

impl ImprintError {
    /// Create an I/O error carrying the path that failed
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImprintError::PathIo {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid-path error with a custom message
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        ImprintError::InvalidPath(msg.into())
    }

    /// Create a bad-header error with a custom message
    pub fn bad_header(msg: impl Into<String>) -> Self {
        ImprintError::BadHeader(msg.into())
    }

    /// Create a bad-record error for the given line
    pub fn bad_record(line: u64, reason: impl Into<String>) -> Self {
        ImprintError::BadRecord {
            line,
            reason: reason.into(),
        }
    }

    /// Wrap the first error raised by a consumer
    pub fn consumer(error: ImprintError) -> Self {
        ImprintError::Consumer(Box::new(error))
    }

    /// Check whether this error is a permission-denied I/O failure
    ///
    /// The generator uses this to convert unreadable *descendant* paths into
    /// listener notifications instead of failing the enclosing directory.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            ImprintError::Io(source) | ImprintError::PathIo { source, .. } => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ImprintError::bad_record(7, "malformed checksum");
        assert_eq!(err.to_string(), "bad record at line 7: malformed checksum");
    }

    #[test]
    fn test_io_at_names_the_failing_path() {
        let err = ImprintError::io_at(
            "/data/locked",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
        );
        assert_eq!(
            err.to_string(),
            "IO error at `/data/locked`: permission denied"
        );
    }

    #[test]
    fn test_permission_denied_classification() {
        let denied = ImprintError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "test",
        ));
        assert!(denied.is_permission_denied());
        let denied_at = ImprintError::io_at(
            "/data/locked",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test"),
        );
        assert!(denied_at.is_permission_denied());
        let missing = ImprintError::io_at(
            "/data/gone",
            std::io::Error::new(std::io::ErrorKind::NotFound, "test"),
        );
        assert!(!missing.is_permission_denied());
        assert!(!ImprintError::invalid_path("empty").is_permission_denied());
    }
}
