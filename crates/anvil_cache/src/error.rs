//! Error types for cache operations.

use std::path::PathBuf;

use anvil_common::Stamp;

/// Errors that can occur during cache operations.
///
/// Plain misses never appear here: a missing store entry during a hit
/// attempt and a missing file during stamping are boolean/optional results.
/// These variants are the fatal cases the build driver decides how to
/// handle; the cache itself never aborts the process.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading, stamping, or deleting a file.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Linking or copying between the store and the workspace failed for a
    /// reason other than a missing source.
    #[error("failed to link {src} to {dst}: {source}")]
    Link {
        /// The file being placed.
        src: PathBuf,
        /// Where it was being placed.
        dst: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An operation declared a write it did not produce.
    ///
    /// Raised when recording outputs finds a declared write missing from
    /// the workspace; the operation's declaration is wrong.
    #[error("operation {op_id} declared write {path} but did not produce it (entry {key})")]
    MissingWrite {
        /// The operation that lied about its writes.
        op_id: u64,
        /// The declared write that is missing.
        path: PathBuf,
        /// The store key the write would have been recorded under.
        key: Stamp,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: PathBuf::from("/w/cache/entry"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("/w/cache/entry"));
    }

    #[test]
    fn link_error_display() {
        let err = CacheError::Link {
            src: PathBuf::from("/cache/aa"),
            dst: PathBuf::from("/w/out"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no space"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/cache/aa"));
        assert!(msg.contains("/w/out"));
        assert!(msg.contains("no space"));
    }

    #[test]
    fn missing_write_display() {
        let key = Stamp::of_bytes(b"key");
        let err = CacheError::MissingWrite {
            op_id: 7,
            path: PathBuf::from("/w/out.o"),
            key,
        };
        let msg = err.to_string();
        assert!(msg.contains("operation 7"));
        assert!(msg.contains("/w/out.o"));
        assert!(msg.contains(&key.to_hex()));
    }
}
