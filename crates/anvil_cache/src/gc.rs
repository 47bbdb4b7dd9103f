//! Garbage collection and statistics over the store directory.
//!
//! The store keeps no manifest: the directory itself is the index. A file
//! whose basename hex-decodes to a stamp is a valid entry; its link count
//! tells whether any workspace file still shares its inode. Everything
//! here runs out-of-band from hit/record traffic.

use std::cmp::Reverse;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use anvil_common::Stamp;
use serde::Serialize;

use crate::error::CacheError;
use crate::store::{retry_eintr, CacheStore};

/// Aggregate statistics over the valid entries of a store directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of valid entries.
    pub files: u64,
    /// Total bytes across valid entries.
    pub total_bytes: u64,
    /// Entries no workspace file links to (`nlink == 1`).
    pub unused_files: u64,
    /// Total bytes across unused entries.
    pub unused_bytes: u64,
}

/// One valid entry as seen by the eviction scan.
struct EvictCandidate {
    /// Last access time in seconds; `None` for unused entries, which are
    /// treated as infinitely old and evicted first.
    atime: Option<i64>,
    size: u64,
    path: PathBuf,
}

impl CacheStore {
    /// Lists every regular file in the store directory, dotfiles included.
    ///
    /// Non-recursive; subdirectories are never created by the store and are
    /// not descended into. Sorted for deterministic iteration.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let read_dir = retry_eintr(|| fs::read_dir(&self.dir)).map_err(|e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut files = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| CacheError::Io {
                path: self.dir.clone(),
                source: e,
            })?;
            let file_type = entry.file_type().map_err(|e| CacheError::Io {
                path: entry.path(),
                source: e,
            })?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Files in the store directory that are not valid entries.
    ///
    /// Anything whose basename does not hex-decode to a stamp — editor
    /// droppings, entries written with a different digest width — is
    /// ignored by hit logic and surfaced here for diagnostics.
    pub fn suspicious_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut suspicious = self.list_files()?;
        suspicious.retain(|path| entry_key(path).is_none());
        Ok(suspicious)
    }

    /// Deletes every valid entry with no remaining workspace link.
    ///
    /// An entry with `st_nlink == 1` has no live consumer, so evicting it
    /// cannot break a future hit's workspace state. Returns the number of
    /// entries deleted.
    ///
    /// Correctness of the link-count signal requires a hardlink-capable
    /// filesystem. Where hardlinks are unsupported the store copies
    /// instead, every entry reports a link count of one, and this call
    /// would evict live entries — do not run it there.
    pub fn delete_unused(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.list_files()? {
            if entry_key(&path).is_none() {
                continue;
            }
            let meta = self.entry_metadata(&path)?;
            if meta.nlink() == 1 {
                retry_eintr(|| fs::remove_file(&path)).map_err(|e| CacheError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Computes aggregate statistics over the valid entries.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for path in self.list_files()? {
            if entry_key(&path).is_none() {
                continue;
            }
            let meta = self.entry_metadata(&path)?;
            stats.files += 1;
            stats.total_bytes += meta.len();
            if meta.nlink() == 1 {
                stats.unused_files += 1;
                stats.unused_bytes += meta.len();
            }
        }
        Ok(stats)
    }

    /// Evicts least-recently-used entries until at most `percent` percent
    /// of the current total bytes remain, further capped by `max_bytes`.
    ///
    /// Unused entries (`nlink == 1`) are treated as infinitely old and go
    /// first; the rest go in ascending access-time order, ties broken by
    /// evicting larger entries first. `evict(0, Some(0))` empties the
    /// directory of valid entries.
    pub fn evict(&self, percent: u64, max_bytes: Option<u64>) -> Result<(), CacheError> {
        let mut candidates = Vec::new();
        let mut total_bytes: u64 = 0;
        for path in self.list_files()? {
            if entry_key(&path).is_none() {
                continue;
            }
            let meta = self.entry_metadata(&path)?;
            let atime = if meta.nlink() == 1 {
                None
            } else {
                Some(meta.atime())
            };
            total_bytes += meta.len();
            candidates.push(EvictCandidate {
                atime,
                size: meta.len(),
                path,
            });
        }

        // `None` orders before every `Some`, putting unused entries first.
        candidates.sort_by(|a, b| {
            (a.atime, Reverse(a.size), &a.path).cmp(&(b.atime, Reverse(b.size), &b.path))
        });

        let mut budget = (u128::from(total_bytes) * u128::from(percent) / 100) as u64;
        if let Some(max) = max_bytes {
            budget = budget.min(max);
        }

        let mut remaining = total_bytes;
        for candidate in candidates {
            if remaining <= budget {
                break;
            }
            retry_eintr(|| fs::remove_file(&candidate.path)).map_err(|e| CacheError::Io {
                path: candidate.path.clone(),
                source: e,
            })?;
            remaining -= candidate.size;
        }
        Ok(())
    }

    fn entry_metadata(&self, path: &std::path::Path) -> Result<fs::Metadata, CacheError> {
        retry_eintr(|| fs::metadata(path)).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Decodes a store file's basename back into its key, if valid.
fn entry_key(path: &std::path::Path) -> Option<Stamp> {
    let name = path.file_name()?.to_str()?;
    Stamp::from_hex(name).ok()
}
