//! Memoized file stamping for one build.
//!
//! Computing a file's stamp costs a full read, so each file is stamped at
//! most once per cache instance. The caller guarantees that a stamped file
//! is not mutated externally for the table's lifetime; entries are never
//! invalidated.

use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anvil_common::Stamp;

use crate::error::CacheError;

/// A memo of `path → stamp` scoped to one cache instance.
///
/// Also accounts the cumulative wall-clock time spent stamping, for build
/// summaries.
#[derive(Debug, Default)]
pub struct FileStampTable {
    entries: HashMap<PathBuf, Stamp>,
    stamp_time: Duration,
}

impl FileStampTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the file's stamp, computing and memoizing it on first use.
    ///
    /// An absent file is a result, not an error: `Ok(None)` signals to
    /// upper layers that the path does not exist. Any other failure to
    /// open or read the file is returned with the path attached.
    /// Interrupted opens are retried.
    pub fn stamp(&mut self, path: &Path) -> Result<Option<Stamp>, CacheError> {
        if let Some(stamp) = self.entries.get(path) {
            return Ok(Some(*stamp));
        }

        let started = Instant::now();
        let result = self.stamp_uncached(path);
        self.stamp_time += started.elapsed();
        result
    }

    fn stamp_uncached(&mut self, path: &Path) -> Result<Option<Stamp>, CacheError> {
        let mut file = loop {
            match File::open(path) {
                Ok(file) => break file,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(CacheError::Io {
                        path: path.to_path_buf(),
                        source: e,
                    })
                }
            }
        };

        let stamp = Stamp::of_reader(&mut file).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.entries.insert(path.to_path_buf(), stamp);
        Ok(Some(stamp))
    }

    /// Total wall-clock time spent computing stamps so far.
    pub fn stamp_time(&self) -> Duration {
        self.stamp_time
    }

    /// Number of memoized entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been stamped yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
