//! Content digests ("stamps") for cache keys and file fingerprints.
//!
//! A stamp is a 256-bit BLAKE3 digest. Two byte sequences with the same
//! stamp are assumed identical; the cache relies on this to reuse tool
//! outputs without re-running the tool.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Width of a stamp in bytes.
const STAMP_LEN: usize = 32;

/// A 256-bit content digest identifying a byte sequence or file.
///
/// Stamps are totally ordered so that collections of stamped entries can be
/// iterated deterministically. The hex rendering is fixed-width
/// ([`Stamp::HEX_LEN`] characters) and doubles as the on-disk name of a
/// cache entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp([u8; STAMP_LEN]);

impl Stamp {
    /// Length of the hex rendering of a stamp.
    pub const HEX_LEN: usize = STAMP_LEN * 2;

    /// Computes the stamp of a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Computes the stamp of a string's UTF-8 bytes.
    pub fn of_str(s: &str) -> Self {
        Self::of_bytes(s.as_bytes())
    }

    /// Computes the stamp of an already-open handle by streaming its
    /// contents.
    ///
    /// The handle is read to EOF through a fixed-size buffer; the contents
    /// are never held in memory at once. Interrupted reads are retried.
    pub fn of_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        io::copy(reader, &mut hasher)?;
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    /// Computes the stamp of a file's contents by streaming it.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        Self::of_reader(&mut file)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; STAMP_LEN] {
        &self.0
    }

    /// Renders the stamp as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Parses a stamp from its hex rendering.
    ///
    /// Fails if the input is not exactly [`Stamp::HEX_LEN`] hexadecimal
    /// characters.
    pub fn from_hex(hex: &str) -> Result<Self, InvalidStampError> {
        let bytes = hex.as_bytes();
        if bytes.len() != Self::HEX_LEN {
            return Err(InvalidStampError {
                input: hex.to_string(),
            });
        }
        let mut out = [0u8; STAMP_LEN];
        for (i, chunk) in bytes.chunks_exact(2).enumerate() {
            let hi = hex_digit(chunk[0]);
            let lo = hex_digit(chunk[1]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => out[i] = (hi << 4) | lo,
                _ => {
                    return Err(InvalidStampError {
                        input: hex.to_string(),
                    })
                }
            }
        }
        Ok(Self(out))
    }
}

/// Decodes a single ASCII hex digit.
fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stamp({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// An incremental stamp computation over multiple parts.
///
/// Used where a digest covers several components (an operation fingerprint,
/// a write key) rather than one contiguous buffer.
pub struct StampHasher(blake3::Hasher);

impl StampHasher {
    /// Creates a fresh hasher.
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    /// Absorbs the given bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finishes the computation and returns the stamp.
    pub fn finish(self) -> Stamp {
        Stamp(*self.0.finalize().as_bytes())
    }
}

impl Default for StampHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned when parsing a stamp from malformed hex.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stamp `{input}`: expected {} hexadecimal characters", Stamp::HEX_LEN)]
pub struct InvalidStampError {
    /// The rejected input.
    pub input: String,
}
