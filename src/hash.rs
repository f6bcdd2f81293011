//! SHA-256 fingerprint primitive
//!
//! All fingerprints in the system are SHA-256 digests; the algorithm is
//! fixed and not negotiated at runtime. This module provides the opaque
//! [`Hash`] value, one-shot hashing of bytes and strings, bounded-memory
//! stream hashing for file contents, and an incremental [`Digest`] used to
//! compose hashes out of other hashes (directory fingerprints are hashes
//! over ordered sequences of child hashes).
//!
//! # Examples
//!
//! ```rust
//! use datimprint::hash::{self, Digest};
//!
//! let foo = hash::hash_str("foo");
//! let bar = hash::hash_str("bar");
//!
//! // Compose a hash over other hashes, in order
//! let mut digest = Digest::new();
//! digest.update_hash(&bar);
//! digest.update_hash(&foo);
//! let combined = digest.finish();
//! assert_eq!(combined.to_checksum().len(), 64);
//! ```

use crate::error::{ImprintError, Result};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Buffer size for stream hashing; keeps memory O(1) regardless of file size
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Length in bytes of a SHA-256 digest
pub const HASH_LENGTH: usize = 32;

/// Length in characters of a hex checksum of a SHA-256 digest
pub const CHECKSUM_LENGTH: usize = HASH_LENGTH * 2;

/// An opaque 32-byte SHA-256 digest
///
/// Convertible to and from the lowercase 64-character hex checksum form used
/// in `.datim` files. Hashes compare by value and are cheap to copy.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    /// The hash of the empty byte sequence
    ///
    /// An empty file, and both aggregate fingerprints of an empty directory,
    /// hash to this value.
    pub fn empty() -> Hash {
        hash_bytes(&[])
    }

    /// Parse a hash from its 64-character lowercase hex checksum
    ///
    /// Returns `None` if the checksum has the wrong length or contains
    /// non-hex characters. Uppercase hex digits are accepted on input.
    pub fn from_checksum(checksum: &str) -> Option<Hash> {
        if checksum.len() != CHECKSUM_LENGTH {
            return None;
        }
        let mut bytes = [0u8; HASH_LENGTH];
        hex::decode_to_slice(checksum, &mut bytes).ok()?;
        Some(Hash(bytes))
    }

    /// Render the hash as a lowercase hex checksum string
    pub fn to_checksum(&self) -> String {
        hex::encode(self.0)
    }

    /// The raw digest bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_checksum())
    }
}

/// Hash a byte slice
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Hash(hasher.finalize().into())
}

/// Hash the UTF-8 bytes of a string
pub fn hash_str(s: &str) -> Hash {
    hash_bytes(s.as_bytes())
}

/// Hash everything a reader yields, in bounded-size chunks
///
/// Reads and digests 64 KiB at a time so arbitrarily large inputs are hashed
/// with constant memory.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<Hash> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(Hash(hasher.finalize().into()))
}

/// Stream-hash the contents of a file
///
/// I/O failures name the file, both on open and mid-read.
pub fn hash_file(path: &Path) -> Result<Hash> {
    let file = File::open(path).map_err(|source| ImprintError::io_at(path, source))?;
    match hash_reader(file) {
        Err(ImprintError::Io(source)) => Err(ImprintError::io_at(path, source)),
        outcome => outcome,
    }
}

/// Incremental SHA-256 digest
///
/// Supports updating with raw bytes and with other hashes, which is how
/// composite and directory fingerprints are folded together.
#[derive(Default)]
pub struct Digest {
    hasher: Sha256,
}

impl Digest {
    /// Create a fresh digest
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes into the digest
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Feed the raw bytes of another hash into the digest
    pub fn update_hash(&mut self, hash: &Hash) {
        self.hasher.update(hash.as_bytes());
    }

    /// Consume the digest and produce the final hash
    pub fn finish(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// SHA-256 of the UTF-8 string "foobar"
    const FOOBAR_CHECKSUM: &str =
        "c3ab8ff13720e8ad9047dd39466b3c8974e592c2fa383d4a3960714caef0c4f2";

    /// SHA-256 of the empty byte sequence
    const EMPTY_CHECKSUM: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_hash_str_known_vector() {
        assert_eq!(hash_str("foobar").to_checksum(), FOOBAR_CHECKSUM);
    }

    #[test]
    fn test_empty_hash() {
        assert_eq!(Hash::empty().to_checksum(), EMPTY_CHECKSUM);
        assert_eq!(hash_bytes(&[]), Hash::empty());
    }

    #[test]
    fn test_checksum_round_trip() {
        let hash = hash_str("foobar");
        assert_eq!(Hash::from_checksum(&hash.to_checksum()), Some(hash));
    }

    #[test]
    fn test_from_checksum_rejects_malformed() {
        assert_eq!(Hash::from_checksum(""), None);
        assert_eq!(Hash::from_checksum("c3ab8ff1"), None);
        let bad_chars = format!("{}zz", &FOOBAR_CHECKSUM[..62]);
        assert_eq!(Hash::from_checksum(&bad_chars), None);
    }

    #[test]
    fn test_stream_hash_equals_one_shot() {
        // Spans several read buffers to exercise the chunk loop
        let data = vec![0xA5u8; STREAM_BUFFER_SIZE * 3 + 17];
        let streamed = hash_reader(Cursor::new(&data)).unwrap();
        assert_eq!(streamed, hash_bytes(&data));
    }

    #[test]
    fn test_digest_composition_matches_concatenation() {
        let foo = hash_str("foo");
        let bar = hash_str("bar");

        let mut digest = Digest::new();
        digest.update_hash(&bar);
        digest.update_hash(&foo);

        let mut concatenated = Vec::new();
        concatenated.extend_from_slice(bar.as_bytes());
        concatenated.extend_from_slice(foo.as_bytes());

        assert_eq!(digest.finish(), hash_bytes(&concatenated));
    }
}
