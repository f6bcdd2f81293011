//! Definition and implementation of the `.datim` imprints file format
//!
//! A `.datim` file is UTF-8 text (an optional byte-order mark is accepted on
//! input) with one record per line and fields separated by a horizontal tab.
//! The first line is a header naming all six fields; the header order is
//! authoritative per file, and readers map columns by name rather than by
//! position. Two record kinds follow the header:
//!
//! - a *base path* row, whose `#` column is the literal `/`, carrying an
//!   absolute directory path that anchors the imprint paths after it;
//! - an *imprint* row, whose `#` column is a decimal record number, carrying
//!   the miniprint, path, modification timestamp, content fingerprint, and
//!   composite fingerprint of one path.
//!
//! Trailing delimiters are significant: empty fields at the end of a line
//! are preserved, and a base path row always carries all six columns.
//!
//! # Examples
//!
//! ```rust
//! use datimprint::datim::{Parser, Serializer};
//! use std::io::Cursor;
//!
//! let data = "#\tminiprint\tpath\tcontent-modifiedAt\tcontent-fingerprint\tfingerprint\n";
//! let mut parser = Parser::new(Cursor::new(data));
//! assert!(parser.read_imprint().unwrap().is_none());
//!
//! let mut out = Vec::new();
//! Serializer::with_line_terminator("\n").write_header(&mut out).unwrap();
//! assert_eq!(String::from_utf8(out).unwrap(), data);
//! ```

use crate::error::{ImprintError, Result};
use crate::hash::Hash;
use crate::imprint::{FileTime, PathImprint};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Extension for imprints file filenames
pub const FILENAME_EXTENSION: &str = "datim";

/// The delimiter separating fields within a record
pub const FIELD_DELIMITER: char = '\t';

/// The `#` column value identifying a base path record
pub const BASE_PATH_RECORD: &str = "/";

/// The fields of a `.datim` record, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// The record number column, named `#`
    Number,
    /// The mini-fingerprint column
    Miniprint,
    /// The path column
    Path,
    /// The content modification timestamp column
    ContentModifiedAt,
    /// The content fingerprint column
    ContentFingerprint,
    /// The composite fingerprint column
    Fingerprint,
}

impl Field {
    /// All fields in canonical serialization order
    pub const ALL: [Field; 6] = [
        Field::Number,
        Field::Miniprint,
        Field::Path,
        Field::ContentModifiedAt,
        Field::ContentFingerprint,
        Field::Fingerprint,
    ];

    /// The name of the field as it appears in the header row
    pub fn header_name(self) -> &'static str {
        match self {
            Field::Number => "#",
            Field::Miniprint => "miniprint",
            Field::Path => "path",
            Field::ContentModifiedAt => "content-modifiedAt",
            Field::ContentFingerprint => "content-fingerprint",
            Field::Fingerprint => "fingerprint",
        }
    }

    /// Find the field matching a header name
    pub fn from_header_name(name: &str) -> Option<Field> {
        Field::ALL
            .into_iter()
            .find(|field| field.header_name() == name)
    }
}

/// Serializer for `.datim` output
///
/// The line terminator is configurable and applied uniformly: LF when
/// writing to a file, the platform separator when writing to an interactive
/// stream (the default).
#[derive(Debug, Clone)]
pub struct Serializer {
    line_terminator: String,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer {
    /// Create a serializer using the platform line separator
    pub fn new() -> Self {
        let separator = if cfg!(windows) { "\r\n" } else { "\n" };
        Self::with_line_terminator(separator)
    }

    /// Create a serializer with an explicit line terminator
    pub fn with_line_terminator(line_terminator: impl Into<String>) -> Self {
        Self {
            line_terminator: line_terminator.into(),
        }
    }

    /// The line terminator in use
    pub fn line_terminator(&self) -> &str {
        &self.line_terminator
    }

    /// Write the header row naming all fields in canonical order
    ///
    /// Must be written before any other record.
    pub fn write_header<W: Write>(&self, writer: &mut W) -> Result<()> {
        let header: Vec<&str> = Field::ALL.iter().map(|field| field.header_name()).collect();
        write!(
            writer,
            "{}{}",
            header.join("\t"),
            self.line_terminator
        )?;
        Ok(())
    }

    /// Write a base path row anchoring the imprints that follow it
    ///
    /// The path is absolutized. Fails with [`ImprintError::InvalidPath`] if
    /// the path contains the field delimiter.
    pub fn write_base_path<W: Write>(&self, writer: &mut W, base_path: &Path) -> Result<()> {
        let base_path = std::path::absolute(base_path)
            .map_err(|source| ImprintError::io_at(base_path, source))?;
        let path = delimiter_free(&base_path)?;
        write!(
            writer,
            "{}\t\t{}\t\t\t{}",
            BASE_PATH_RECORD, path, self.line_terminator
        )?;
        Ok(())
    }

    /// Write a single imprint row with the given record number
    ///
    /// Fails with [`ImprintError::InvalidPath`] if the imprint path contains
    /// the field delimiter.
    pub fn write_imprint<W: Write>(
        &self,
        writer: &mut W,
        imprint: &PathImprint,
        number: u64,
    ) -> Result<()> {
        let path = delimiter_free(imprint.path())?;
        write!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}{}",
            number,
            imprint.miniprint(),
            path,
            imprint.content_modified_at(),
            imprint.content_fingerprint().to_checksum(),
            imprint.fingerprint().to_checksum(),
            self.line_terminator
        )?;
        Ok(())
    }
}

/// Render a path for serialization, rejecting embedded field delimiters
fn delimiter_free(path: &Path) -> Result<String> {
    let rendered = path.to_string_lossy().into_owned();
    if rendered.contains(FIELD_DELIMITER) {
        return Err(ImprintError::invalid_path(format!(
            "path `{rendered}` contains the field delimiter"
        )));
    }
    Ok(rendered)
}

/// Column positions of each field, as declared by a file's header
type FieldIndexes = [usize; Field::ALL.len()];

/// Lazy, single-pass parser of `.datim` input
///
/// The header is read implicitly on the first record access and validated to
/// name every required field. Base path rows are consumed internally: each
/// updates the parser's current base path, queryable via
/// [`Parser::current_base_path`], and is never surfaced as an imprint.
pub struct Parser<R> {
    reader: R,
    next_line_index: u64,
    columns: Option<(FieldIndexes, usize)>,
    current_base_path: Option<PathBuf>,
}

impl<R: BufRead> Parser<R> {
    /// Create a parser over buffered UTF-8 input
    ///
    /// A leading byte-order mark, if present, is skipped.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            next_line_index: 0,
            columns: None,
            current_base_path: None,
        }
    }

    /// The base path currently in effect, if any base path row has been read
    pub fn current_base_path(&self) -> Option<&Path> {
        self.current_base_path.as_deref()
    }

    /// The base path currently in effect, or [`ImprintError::MissingBasePath`]
    ///
    /// For callers that rebase imprint paths and therefore cannot proceed
    /// without an anchor.
    pub fn require_base_path(&self) -> Result<&Path> {
        self.current_base_path
            .as_deref()
            .ok_or(ImprintError::MissingBasePath {
                line: self.next_line_index,
            })
    }

    /// The one-based number of the most recently read line
    pub fn line_number(&self) -> u64 {
        self.next_line_index
    }

    /// Read the next imprint, skipping over base path rows
    ///
    /// Returns `None` at end of input. The header is read and validated
    /// first if it has not been already.
    pub fn read_imprint(&mut self) -> Result<Option<PathImprint>> {
        let (indexes, column_count) = self.field_indexes()?;
        while let Some(fields) = self.read_record()? {
            let line = self.next_line_index;
            if fields.len() != column_count {
                return Err(ImprintError::bad_record(
                    line,
                    format!(
                        "expected {column_count} fields but found {}",
                        fields.len()
                    ),
                ));
            }
            let number = &fields[indexes[Field::Number as usize]];
            let path = PathBuf::from(&fields[indexes[Field::Path as usize]]);
            if number == BASE_PATH_RECORD {
                self.current_base_path = Some(path);
                continue;
            }
            number.parse::<u64>().map_err(|_| {
                ImprintError::bad_record(
                    line,
                    format!("`{number}` is not a record number or base path designation"),
                )
            })?;
            let modified_at = fields[indexes[Field::ContentModifiedAt as usize]]
                .parse::<FileTime>()
                .map_err(|error| {
                    ImprintError::bad_record(line, format!("malformed timestamp: {error}"))
                })?;
            let content_fingerprint =
                parse_checksum(&fields[indexes[Field::ContentFingerprint as usize]], line)?;
            let fingerprint =
                parse_checksum(&fields[indexes[Field::Fingerprint as usize]], line)?;
            return Ok(Some(PathImprint::from_parts(
                path,
                modified_at,
                content_fingerprint,
                fingerprint,
            )));
        }
        Ok(None)
    }

    /// Iterate over the remaining imprints in the input
    pub fn imprints(&mut self) -> Imprints<'_, R> {
        Imprints { parser: self }
    }

    /// Return the column positions declared by the header, reading the
    /// header first if necessary
    fn field_indexes(&mut self) -> Result<(FieldIndexes, usize)> {
        if let Some(columns) = self.columns {
            return Ok(columns);
        }
        let names = self.read_record()?.ok_or_else(|| {
            ImprintError::bad_header("end of data reached before any header row")
        })?;
        let mut indexes = [usize::MAX; Field::ALL.len()];
        for (position, name) in names.iter().enumerate() {
            let field = Field::from_header_name(name).ok_or_else(|| {
                ImprintError::bad_header(format!("unrecognized field header name `{name}`"))
            })?;
            if indexes[field as usize] != usize::MAX {
                return Err(ImprintError::bad_header(format!(
                    "duplicate field header name `{name}`"
                )));
            }
            indexes[field as usize] = position;
        }
        for field in Field::ALL {
            if indexes[field as usize] == usize::MAX {
                return Err(ImprintError::bad_header(format!(
                    "header missing required field `{}`",
                    field.header_name()
                )));
            }
        }
        let columns = (indexes, names.len());
        self.columns = Some(columns);
        Ok(columns)
    }

    /// Read one line and split its fields, preserving trailing empties
    fn read_record(&mut self) -> Result<Option<Vec<String>>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if self.next_line_index == 0 && line.starts_with('\u{FEFF}') {
            line.drain(..'\u{FEFF}'.len_utf8());
        }
        self.next_line_index += 1;
        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        Ok(Some(
            line.split(FIELD_DELIMITER).map(String::from).collect(),
        ))
    }
}

/// Parse a 64-character hex checksum column
fn parse_checksum(checksum: &str, line: u64) -> Result<Hash> {
    Hash::from_checksum(checksum).ok_or_else(|| {
        ImprintError::bad_record(line, format!("malformed checksum `{checksum}`"))
    })
}

/// Iterator over the imprints of a [`Parser`]
pub struct Imprints<'a, R> {
    parser: &'a mut Parser<R>,
}

impl<R: BufRead> Iterator for Imprints<'_, R> {
    type Item = Result<PathImprint>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.read_imprint().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash;
    use chrono::DateTime;
    use std::io::Cursor;

    const CANONICAL_HEADER: &str =
        "#\tminiprint\tpath\tcontent-modifiedAt\tcontent-fingerprint\tfingerprint";
    const FOO_BAR_ROW: &str = "81985529216486895\tc56f2ad0\t/foo.bar\t2022-05-22T20:48:16.7512146Z\tc3ab8ff13720e8ad9047dd39466b3c8974e592c2fa383d4a3960714caef0c4f2\tc56f2ad0a6e082790805ffabf1f68f13f77954ae6936ab1793edde7e101864c9";

    fn parser(input: &str) -> Parser<Cursor<Vec<u8>>> {
        Parser::new(Cursor::new(input.as_bytes().to_vec()))
    }

    fn foo_bar_imprint() -> PathImprint {
        PathImprint::for_file(
            "/foo.bar",
            FileTime::from(DateTime::from_timestamp(1_653_252_496, 751_214_600).unwrap()),
            hash::hash_str("foobar"),
        )
        .unwrap()
    }

    #[test]
    fn test_field_from_header_name() {
        assert_eq!(Field::from_header_name("#"), Some(Field::Number));
        assert_eq!(Field::from_header_name("path"), Some(Field::Path));
        assert_eq!(
            Field::from_header_name("fingerprint"),
            Some(Field::Fingerprint)
        );
        assert_eq!(Field::from_header_name("foo"), None);
    }

    #[test]
    fn test_read_imprint_canonical_header() {
        let input = format!("{CANONICAL_HEADER}\n{FOO_BAR_ROW}\n");
        let imprint = parser(&input).read_imprint().unwrap().unwrap();
        assert_eq!(imprint, foo_bar_imprint());
    }

    #[test]
    fn test_read_imprint_permuted_header() {
        let input =
            "fingerprint\tminiprint\t#\tpath\tcontent-modifiedAt\tcontent-fingerprint\n\
             c56f2ad0a6e082790805ffabf1f68f13f77954ae6936ab1793edde7e101864c9\tc56f2ad0\t81985529216486895\t/foo.bar\t2022-05-22T20:48:16.7512146Z\tc3ab8ff13720e8ad9047dd39466b3c8974e592c2fa383d4a3960714caef0c4f2\n";
        let imprint = parser(input).read_imprint().unwrap().unwrap();
        assert_eq!(imprint, foo_bar_imprint());
    }

    #[test]
    fn test_read_imprint_without_final_newline() {
        let input = format!("{CANONICAL_HEADER}\n{FOO_BAR_ROW}");
        let imprint = parser(&input).read_imprint().unwrap().unwrap();
        assert_eq!(imprint, foo_bar_imprint());
    }

    #[test]
    fn test_read_imprint_accepts_bom_and_crlf() {
        let input = format!("\u{FEFF}{CANONICAL_HEADER}\r\n{FOO_BAR_ROW}\r\n");
        let imprint = parser(&input).read_imprint().unwrap().unwrap();
        assert_eq!(imprint, foo_bar_imprint());
    }

    #[test]
    fn test_header_unknown_field() {
        let result = parser("miniprint\tpath\tfoo-bar\tcontent-modifiedAt\n").read_imprint();
        assert!(matches!(result, Err(ImprintError::BadHeader(_))));
    }

    #[test]
    fn test_header_trailing_delimiter_is_empty_field() {
        let input = format!("{CANONICAL_HEADER}\t\n");
        let result = parser(&input).read_imprint();
        assert!(matches!(result, Err(ImprintError::BadHeader(_))));
    }

    #[test]
    fn test_header_missing_required_field() {
        let result =
            parser("miniprint\tpath\tcontent-fingerprint\tcontent-modifiedAt\n").read_imprint();
        assert!(matches!(result, Err(ImprintError::BadHeader(_))));
    }

    #[test]
    fn test_header_missing_entirely() {
        let result = parser("").read_imprint();
        assert!(matches!(result, Err(ImprintError::BadHeader(_))));
    }

    #[test]
    fn test_no_imprint_rows() {
        let input = format!("{CANONICAL_HEADER}\n");
        assert!(parser(&input).read_imprint().unwrap().is_none());
    }

    #[test]
    fn test_base_path_rows_tracked_and_skipped() {
        let input = format!(
            "{CANONICAL_HEADER}\n/\t\t/test/foo\t\t\t\n/\t\t/test/bar\t\t\t\n{FOO_BAR_ROW}\n"
        );
        let mut parser = parser(&input);
        assert!(parser.current_base_path().is_none());
        let imprint = parser.read_imprint().unwrap().unwrap();
        assert_eq!(imprint, foo_bar_imprint());
        assert_eq!(parser.current_base_path(), Some(Path::new("/test/bar")));
    }

    #[test]
    fn test_base_path_only_yields_no_imprint() {
        let input = format!("{CANONICAL_HEADER}\n/\t\t/test/foo\t\t\t\n");
        let mut parser = parser(&input);
        assert!(parser.read_imprint().unwrap().is_none());
        assert_eq!(parser.current_base_path(), Some(Path::new("/test/foo")));
    }

    #[test]
    fn test_require_base_path_before_any_row() {
        let input = format!("{CANONICAL_HEADER}\n");
        let parser = parser(&input);
        assert!(matches!(
            parser.require_base_path(),
            Err(ImprintError::MissingBasePath { .. })
        ));
    }

    #[test]
    fn test_bad_record_wrong_field_count() {
        let input = format!("{CANONICAL_HEADER}\n1\tc56f2ad0\t/foo.bar\n");
        let result = parser(&input).read_imprint();
        assert!(matches!(
            result,
            Err(ImprintError::BadRecord { line: 2, .. })
        ));
    }

    #[test]
    fn test_bad_record_malformed_number() {
        let row = FOO_BAR_ROW.replace("81985529216486895", "-1");
        let input = format!("{CANONICAL_HEADER}\n{row}\n");
        let result = parser(&input).read_imprint();
        assert!(matches!(result, Err(ImprintError::BadRecord { .. })));
    }

    #[test]
    fn test_bad_record_malformed_timestamp() {
        let row = FOO_BAR_ROW.replace("2022-05-22T20:48:16.7512146Z", "yesterday");
        let input = format!("{CANONICAL_HEADER}\n{row}\n");
        let result = parser(&input).read_imprint();
        assert!(matches!(result, Err(ImprintError::BadRecord { .. })));
    }

    #[test]
    fn test_bad_record_malformed_checksum() {
        let row = FOO_BAR_ROW.replace(
            "c3ab8ff13720e8ad9047dd39466b3c8974e592c2fa383d4a3960714caef0c4f2",
            "c3ab8ff1",
        );
        let input = format!("{CANONICAL_HEADER}\n{row}\n");
        let result = parser(&input).read_imprint();
        assert!(matches!(result, Err(ImprintError::BadRecord { .. })));
    }

    #[test]
    fn test_imprints_iterator() {
        let input = format!("{CANONICAL_HEADER}\n{FOO_BAR_ROW}\n{FOO_BAR_ROW}\n");
        let mut parser = parser(&input);
        let imprints: Vec<_> = parser.imprints().collect::<Result<_>>().unwrap();
        assert_eq!(imprints, vec![foo_bar_imprint(), foo_bar_imprint()]);
    }

    #[test]
    fn test_serializer_header() {
        let mut out = Vec::new();
        Serializer::with_line_terminator("\r\n")
            .write_header(&mut out)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{CANONICAL_HEADER}\r\n")
        );
    }

    #[test]
    fn test_serializer_base_path() {
        let mut out = Vec::new();
        Serializer::with_line_terminator("\n")
            .write_base_path(&mut out, Path::new("/foo.bar"))
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "/\t\t/foo.bar\t\t\t\n");
    }

    #[test]
    fn test_serializer_imprint_known_row() {
        let mut out = Vec::new();
        Serializer::with_line_terminator("\n")
            .write_imprint(&mut out, &foo_bar_imprint(), 0x0123_4567_89AB_CDEF)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{FOO_BAR_ROW}\n")
        );
    }

    #[test]
    fn test_serializer_rejects_tab_in_path() {
        let imprint = PathImprint::from_parts(
            PathBuf::from("/foo\tbar"),
            FileTime::from(DateTime::from_timestamp(0, 0).unwrap()),
            Hash::empty(),
            Hash::empty(),
        );
        let mut out = Vec::new();
        let result =
            Serializer::with_line_terminator("\n").write_imprint(&mut out, &imprint, 1);
        assert!(matches!(result, Err(ImprintError::InvalidPath(_))));
    }

    #[test]
    fn test_round_trip_preserves_record() {
        let imprint = foo_bar_imprint();
        let mut out = Vec::new();
        let serializer = Serializer::with_line_terminator("\n");
        serializer.write_header(&mut out).unwrap();
        serializer
            .write_base_path(&mut out, Path::new("/"))
            .unwrap();
        serializer.write_imprint(&mut out, &imprint, 1).unwrap();

        let text = String::from_utf8(out.clone()).unwrap();
        let mut parser = Parser::new(Cursor::new(out));
        let parsed = parser.read_imprint().unwrap().unwrap();
        assert_eq!(parsed, imprint);
        assert_eq!(parser.current_base_path(), Some(Path::new("/")));

        // Re-serializing the parsed stream reproduces the original bytes
        let mut again = Vec::new();
        serializer.write_header(&mut again).unwrap();
        serializer
            .write_base_path(&mut again, Path::new("/"))
            .unwrap();
        serializer.write_imprint(&mut again, &parsed, 1).unwrap();
        assert_eq!(String::from_utf8(again).unwrap(), text);
    }
}
