//! Imprint records and file timestamps
//!
//! A [`PathImprint`] is the immutable fingerprint record of one path. It has
//! three major parts: the name (string form of the final path component),
//! the attributes (the last-modified timestamp), and the content. Of these
//! the content matters most; names may differ in case across operating
//! systems and directory timestamps are easily disturbed by the copy process
//! itself, so each part is hashed separately and then folded into one
//! composite fingerprint.
//!
//! The content fingerprint of a file is the SHA-256 of its bytes. The
//! content fingerprint of a directory is the SHA-256 over its children's
//! content fingerprints, ordered lexicographically by filename, and so
//! reflects the fidelity of only the *content* of the subtree. A directory
//! additionally has a children fingerprint over the children's composite
//! fingerprints, covering the entire level below it. The composite
//! fingerprint of the path folds in all of the above.

use crate::error::{ImprintError, Result};
use crate::hash::{self, Digest, Hash};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

/// Length of the miniprint checksum, in hex characters
pub const MINIPRINT_LENGTH: usize = 8;

/// A file modification timestamp at the platform's native precision
///
/// Wraps a UTC instant. Two precisions are in play: the *serialized* form
/// (and equality comparisons during checking) use the full precision the
/// platform reports, while the contribution to the composite fingerprint is
/// truncated to milliseconds via [`FileTime::to_millis`].
///
/// The display form is an ISO-8601 UTC instant with trailing zeros trimmed
/// from the fractional seconds, e.g. `2022-05-22T20:48:16.7512146Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileTime(DateTime<Utc>);

impl FileTime {
    /// The timestamp as epoch milliseconds, truncated
    ///
    /// This is the only precision that feeds the composite fingerprint.
    pub fn to_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The underlying UTC instant
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for FileTime {
    fn from(instant: DateTime<Utc>) -> Self {
        FileTime(instant)
    }
}

impl From<SystemTime> for FileTime {
    fn from(time: SystemTime) -> Self {
        FileTime(DateTime::<Utc>::from(time))
    }
}

impl fmt::Display for FileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.timestamp_subsec_nanos();
        if nanos == 0 {
            return f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        let fraction = format!("{nanos:09}");
        write!(
            f,
            "{}.{}Z",
            self.0.format("%Y-%m-%dT%H:%M:%S"),
            fraction.trim_end_matches('0')
        )
    }
}

impl FromStr for FileTime {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(FileTime(
            DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc),
        ))
    }
}

/// The imprint of a single path, which may be a file or a directory
///
/// Imprints are created by the generator, emitted exactly once per path, and
/// never mutated; the `.datim` parser reconstructs them verbatim.
///
/// # Examples
///
/// ```rust
/// use datimprint::hash;
/// use datimprint::imprint::{FileTime, PathImprint};
/// use chrono::DateTime;
///
/// let modified: FileTime = DateTime::from_timestamp(1653252496, 751_214_600)
///     .unwrap()
///     .into();
/// let imprint =
///     PathImprint::for_file("/foo.bar", modified, hash::hash_str("foobar")).unwrap();
/// assert_eq!(imprint.miniprint(), "c56f2ad0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathImprint {
    path: PathBuf,
    content_modified_at: FileTime,
    content_fingerprint: Hash,
    fingerprint: Hash,
}

impl PathImprint {
    /// Build the imprint of a regular file from its modification timestamp
    /// and the pre-computed hash of its contents
    ///
    /// The path is absolutized to give the imprint a stable identity;
    /// symbolic links are not resolved.
    ///
    /// # Errors
    ///
    /// [`ImprintError::InvalidPath`] if the path is empty, or
    /// [`ImprintError::PathIo`] if it cannot be absolutized.
    pub fn for_file(
        path: impl AsRef<Path>,
        content_modified_at: FileTime,
        content_fingerprint: Hash,
    ) -> Result<Self> {
        let path = canonical_identity(path.as_ref())?;
        let fingerprint =
            compose_fingerprint(&path, content_modified_at, &content_fingerprint, None);
        Ok(Self {
            path,
            content_modified_at,
            content_fingerprint,
            fingerprint,
        })
    }

    /// Build the imprint of a directory from its modification timestamp and
    /// its two child aggregates
    ///
    /// Both aggregates are required; an empty directory still has both, each
    /// equal to [`Hash::empty`]. The children fingerprint participates in
    /// the composite fingerprint but is not retained as its own field.
    ///
    /// # Errors
    ///
    /// [`ImprintError::InvalidPath`] if the path is empty, or
    /// [`ImprintError::PathIo`] if it cannot be absolutized.
    pub fn for_directory(
        path: impl AsRef<Path>,
        content_modified_at: FileTime,
        content_fingerprint: Hash,
        children_fingerprint: Hash,
    ) -> Result<Self> {
        let path = canonical_identity(path.as_ref())?;
        let fingerprint = compose_fingerprint(
            &path,
            content_modified_at,
            &content_fingerprint,
            Some(&children_fingerprint),
        );
        Ok(Self {
            path,
            content_modified_at,
            content_fingerprint,
            fingerprint,
        })
    }

    /// Reassemble an imprint from already-recorded parts
    ///
    /// Used by the `.datim` parser; performs no canonicalization and no
    /// fingerprint recomputation, so the record round-trips verbatim even
    /// when it was taken on another file system.
    pub fn from_parts(
        path: PathBuf,
        content_modified_at: FileTime,
        content_fingerprint: Hash,
        fingerprint: Hash,
    ) -> Self {
        Self {
            path,
            content_modified_at,
            content_fingerprint,
            fingerprint,
        }
    }

    /// The absolute path this imprint describes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded modification timestamp
    pub fn content_modified_at(&self) -> FileTime {
        self.content_modified_at
    }

    /// The content fingerprint: hash of the bytes for a file, hash over the
    /// ordered child content fingerprints for a directory
    pub fn content_fingerprint(&self) -> &Hash {
        &self.content_fingerprint
    }

    /// The composite fingerprint over name, timestamp, and content
    pub fn fingerprint(&self) -> &Hash {
        &self.fingerprint
    }

    /// The first [`MINIPRINT_LENGTH`] hex characters of the composite
    /// fingerprint
    pub fn miniprint(&self) -> String {
        let mut checksum = self.fingerprint.to_checksum();
        checksum.truncate(MINIPRINT_LENGTH);
        checksum
    }
}

/// Fold the components of an imprint into the composite fingerprint
///
/// The digest receives, in order: the hash of the filename (omitted entirely
/// when the path has no final component, such as a file system root), the
/// modification timestamp as epoch milliseconds in big-endian form, the
/// content fingerprint, and for directories the children fingerprint.
fn compose_fingerprint(
    path: &Path,
    content_modified_at: FileTime,
    content_fingerprint: &Hash,
    children_fingerprint: Option<&Hash>,
) -> Hash {
    let mut digest = Digest::new();
    if let Some(filename) = path.file_name() {
        digest.update_hash(&hash::hash_str(&filename.to_string_lossy()));
    }
    digest.update(&content_modified_at.to_millis().to_be_bytes());
    digest.update_hash(content_fingerprint);
    if let Some(children_fingerprint) = children_fingerprint {
        digest.update_hash(children_fingerprint);
    }
    digest.finish()
}

/// Absolutize a path without resolving symbolic links
///
/// The identity of an imprint is the absolute, case-preserved form of the
/// path; link targets are followed only when reading content, never for the
/// identity itself.
pub(crate) fn canonical_identity(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ImprintError::invalid_path("path is empty"));
    }
    std::path::absolute(path).map_err(|source| ImprintError::io_at(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn test_modified_at() -> FileTime {
        // 2022-05-22T20:48:16.7512146Z
        DateTime::from_timestamp(1_653_252_496, 751_214_600)
            .unwrap()
            .into()
    }

    #[test]
    fn test_file_time_display_trims_trailing_zeros() {
        assert_eq!(
            test_modified_at().to_string(),
            "2022-05-22T20:48:16.7512146Z"
        );
        let millis: FileTime = DateTime::from_timestamp(1_653_252_496, 751_000_000)
            .unwrap()
            .into();
        assert_eq!(millis.to_string(), "2022-05-22T20:48:16.751Z");
        let whole: FileTime = DateTime::from_timestamp(1_653_252_496, 0).unwrap().into();
        assert_eq!(whole.to_string(), "2022-05-22T20:48:16Z");
    }

    #[test]
    fn test_file_time_parse_round_trip() {
        let parsed: FileTime = "2022-05-22T20:48:16.7512146Z".parse().unwrap();
        assert_eq!(parsed, test_modified_at());
        assert_eq!(parsed.to_string(), "2022-05-22T20:48:16.7512146Z");
    }

    #[test]
    fn test_file_time_millis_truncation() {
        assert_eq!(test_modified_at().to_millis(), 1_653_252_496_751);
    }

    #[test]
    fn test_file_imprint_known_vectors() {
        let imprint =
            PathImprint::for_file("/foo.bar", test_modified_at(), hash::hash_str("foobar"))
                .unwrap();
        assert_eq!(
            imprint.content_fingerprint().to_checksum(),
            "c3ab8ff13720e8ad9047dd39466b3c8974e592c2fa383d4a3960714caef0c4f2"
        );
        assert_eq!(
            imprint.fingerprint().to_checksum(),
            "c56f2ad0a6e082790805ffabf1f68f13f77954ae6936ab1793edde7e101864c9"
        );
        assert_eq!(imprint.miniprint(), "c56f2ad0");
    }

    #[test]
    fn test_fingerprint_matches_manual_composition() {
        let content = hash::hash_str("foobar");
        let imprint = PathImprint::for_file("/foo.bar", test_modified_at(), content).unwrap();

        let mut digest = Digest::new();
        digest.update_hash(&hash::hash_str("foo.bar"));
        digest.update(&1_653_252_496_751_i64.to_be_bytes());
        digest.update_hash(&content);
        assert_eq!(*imprint.fingerprint(), digest.finish());
    }

    #[test]
    fn test_directory_fingerprint_includes_children() {
        let content = hash::hash_str("foobar");
        let children = hash::hash_str("children");
        let directory =
            PathImprint::for_directory("/foo", test_modified_at(), content, children).unwrap();
        let file = PathImprint::for_file("/foo", test_modified_at(), content).unwrap();
        // Same name, timestamp, and content fingerprint, but the children
        // fingerprint distinguishes the composite
        assert_ne!(directory.fingerprint(), file.fingerprint());
        assert_eq!(directory.content_fingerprint(), file.content_fingerprint());
    }

    #[test]
    fn test_fingerprint_sensitive_to_each_component() {
        let content = hash::hash_str("foobar");
        let base = PathImprint::for_file("/foo.bar", test_modified_at(), content).unwrap();

        let renamed = PathImprint::for_file("/FOO.BAR", test_modified_at(), content).unwrap();
        assert_ne!(base.fingerprint(), renamed.fingerprint());

        let touched: FileTime = DateTime::from_timestamp(1_653_252_497, 0).unwrap().into();
        let retimed = PathImprint::for_file("/foo.bar", touched, content).unwrap();
        assert_ne!(base.fingerprint(), retimed.fingerprint());

        let rewritten =
            PathImprint::for_file("/foo.bar", test_modified_at(), hash::hash_str("foobaz"))
                .unwrap();
        assert_ne!(base.fingerprint(), rewritten.fingerprint());
    }

    #[test]
    fn test_sub_millisecond_difference_does_not_change_fingerprint() {
        let content = hash::hash_str("foobar");
        let a = PathImprint::for_file("/foo.bar", test_modified_at(), content).unwrap();
        let nudged: FileTime = DateTime::from_timestamp(1_653_252_496, 751_999_999)
            .unwrap()
            .into();
        let b = PathImprint::for_file("/foo.bar", nudged, content).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_root_path_omits_filename_contribution() {
        let content = hash::hash_str("foobar");
        let root = PathImprint::for_directory(
            "/",
            test_modified_at(),
            content,
            Hash::empty(),
        )
        .unwrap();

        let mut digest = Digest::new();
        digest.update(&test_modified_at().to_millis().to_be_bytes());
        digest.update_hash(&content);
        digest.update_hash(&Hash::empty());
        assert_eq!(*root.fingerprint(), digest.finish());
    }

    #[test]
    fn test_empty_path_rejected() {
        let result = PathImprint::for_file("", test_modified_at(), Hash::empty());
        assert!(matches!(result, Err(ImprintError::InvalidPath(_))));
    }
}
