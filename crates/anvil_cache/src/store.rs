//! The content-addressed on-disk store.
//!
//! Every cache entry is a regular file in one flat directory, named by the
//! hex rendering of its key. Entries move between the store and the
//! workspace by hardlink, so a materialized output costs no extra disk and
//! no data copy. The first cross-device link failure latches the handle
//! into copy mode for the rest of its lifetime.

use std::cell::Cell;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anvil_common::Stamp;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::notify::Notify;

/// Handle to a cache directory.
///
/// The handle owns the directory: opening two handles to the same directory
/// in one process is not supported. All placement goes through
/// [`materialize`](Self::materialize) and [`absorb`](Self::absorb), which
/// share one hardlink-with-copy-fallback routine.
pub struct CacheStore {
    /// Root of the store.
    pub(crate) dir: PathBuf,

    /// If set, every hit misses and recording is a no-op.
    disabled: bool,

    /// Latched after the first cross-device link failure; once set, every
    /// subsequent placement copies instead of linking.
    copying: Cell<bool>,

    /// Receiver for warnings such as the copy-fallback one-shot.
    notify: Arc<dyn Notify>,
}

impl CacheStore {
    /// Opens the store described by `config`, creating its directory
    /// recursively if absent.
    pub fn open(config: &CacheConfig, notify: Arc<dyn Notify>) -> Result<Self, CacheError> {
        retry_eintr(|| fs::create_dir_all(&config.directory)).map_err(|e| CacheError::Io {
            path: config.directory.clone(),
            source: e,
        })?;
        Ok(Self {
            dir: config.directory.clone(),
            disabled: config.disabled,
            copying: Cell::new(false),
            notify,
        })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the store was opened disabled.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Whether the cross-device fallback has latched this handle into
    /// copy mode.
    pub fn copying_mode(&self) -> bool {
        self.copying.get()
    }

    /// On-disk path of the entry for `key`.
    pub fn entry_path(&self, key: &Stamp) -> PathBuf {
        self.dir.join(key.to_hex())
    }

    /// Places the entry for `key` at the workspace path `dst`.
    ///
    /// Returns `Ok(false)` when the store has no entry for `key` — a miss,
    /// not an error.
    pub fn materialize(&self, key: &Stamp, dst: &Path) -> Result<bool, CacheError> {
        self.place(&self.entry_path(key), dst)
    }

    /// Places the workspace file `src` into the store under `key`.
    ///
    /// Returns `Ok(false)` when `src` does not exist — the caller decides
    /// whether that is fatal.
    pub fn absorb(&self, src: &Path, key: &Stamp) -> Result<bool, CacheError> {
        self.place(src, &self.entry_path(key))
    }

    /// Hardlink-with-copy-fallback placement.
    ///
    /// A pre-existing file at `dst` is unlinked and the link retried, so
    /// re-recording an operation or overwriting a stale partial
    /// materialization needs no special handling by callers. A missing
    /// `src` is a miss (`Ok(false)`), never an error.
    fn place(&self, src: &Path, dst: &Path) -> Result<bool, CacheError> {
        if let Some(parent) = dst.parent() {
            retry_eintr(|| fs::create_dir_all(parent)).map_err(|e| CacheError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        while !self.copying.get() {
            match retry_eintr(|| fs::hard_link(src, dst)) {
                Ok(()) => return Ok(true),
                Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(ref e) if e.kind() == ErrorKind::AlreadyExists => {
                    match retry_eintr(|| fs::remove_file(dst)) {
                        Ok(()) => {}
                        Err(ref e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(CacheError::Io {
                                path: dst.to_path_buf(),
                                source: e,
                            })
                        }
                    }
                }
                Err(ref e) if e.raw_os_error() == Some(libc::EXDEV) => {
                    self.enter_copying_mode();
                }
                Err(e) => {
                    return Err(CacheError::Link {
                        src: src.to_path_buf(),
                        dst: dst.to_path_buf(),
                        source: e,
                    })
                }
            }
        }

        self.copy_into_place(src, dst)
    }

    /// Copy-mode placement: streams `src` to `dst` and applies the source's
    /// permission bits.
    ///
    /// Any pre-existing `dst` is unlinked rather than truncated: it may be
    /// a hardlink into the store, and writing through it would corrupt the
    /// entry it shares an inode with.
    fn copy_into_place(&self, src: &Path, dst: &Path) -> Result<bool, CacheError> {
        let link_err = |e: io::Error| CacheError::Link {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            source: e,
        };

        let mut input = match retry_eintr(|| fs::File::open(src)) {
            Ok(file) => file,
            Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(link_err(e)),
        };
        let permissions = input.metadata().map_err(link_err)?.permissions();

        match retry_eintr(|| fs::remove_file(dst)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::Io {
                    path: dst.to_path_buf(),
                    source: e,
                })
            }
        }
        let mut output = retry_eintr(|| fs::File::create(dst)).map_err(link_err)?;
        io::copy(&mut input, &mut output).map_err(link_err)?;
        retry_eintr(|| fs::set_permissions(dst, permissions.clone())).map_err(link_err)?;
        Ok(true)
    }

    /// Latches the handle into copy mode, warning exactly once.
    fn enter_copying_mode(&self) {
        if !self.copying.replace(true) {
            self.notify.warn(&format!(
                "cache directory {} is on a different filesystem than the workspace; \
                 falling back to copying",
                self.dir.display()
            ));
        }
    }
}

/// Retries an I/O closure while it fails with `EINTR`.
pub(crate) fn retry_eintr<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotify;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    fn make_store() -> (tempfile::TempDir, Arc<MemoryNotify>, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let notify = Arc::new(MemoryNotify::new());
        let config = CacheConfig::new(dir.path().join("store"));
        let store = CacheStore::open(&config, notify.clone()).unwrap();
        (dir, notify, store)
    }

    fn seed_entry(store: &CacheStore, key: &Stamp, data: &[u8]) {
        fs::write(store.entry_path(key), data).unwrap();
    }

    #[test]
    fn open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deeply").join("nested").join("store");
        let config = CacheConfig::new(&nested);
        let store = CacheStore::open(&config, Arc::new(MemoryNotify::new())).unwrap();
        assert!(nested.is_dir());
        assert!(!store.is_disabled());
        assert!(!store.copying_mode());
    }

    #[test]
    fn entry_path_is_hex_basename() {
        let (_dir, _notify, store) = make_store();
        let key = Stamp::of_bytes(b"key");
        let path = store.entry_path(&key);
        assert_eq!(path.parent().unwrap(), store.dir());
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), key.to_hex());
    }

    #[test]
    fn materialize_links_entry_into_workspace() {
        let (dir, _notify, store) = make_store();
        let key = Stamp::of_bytes(b"key");
        seed_entry(&store, &key, b"payload");

        let dst = dir.path().join("ws").join("out");
        assert!(store.materialize(&key, &dst).unwrap());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");

        // Hardlinked, not copied: both names share the inode.
        let store_meta = fs::metadata(store.entry_path(&key)).unwrap();
        let ws_meta = fs::metadata(&dst).unwrap();
        assert_eq!(store_meta.ino(), ws_meta.ino());
        assert_eq!(store_meta.nlink(), 2);
    }

    #[test]
    fn materialize_missing_entry_is_miss() {
        let (dir, _notify, store) = make_store();
        let key = Stamp::of_bytes(b"never stored");
        let dst = dir.path().join("out");
        assert!(!store.materialize(&key, &dst).unwrap());
        assert!(!dst.exists());
    }

    #[test]
    fn absorb_links_workspace_file_into_store() {
        let (dir, _notify, store) = make_store();
        let src = dir.path().join("produced");
        fs::write(&src, b"tool output").unwrap();

        let key = Stamp::of_bytes(b"key");
        assert!(store.absorb(&src, &key).unwrap());
        assert_eq!(fs::read(store.entry_path(&key)).unwrap(), b"tool output");
    }

    #[test]
    fn absorb_missing_source_is_false() {
        let (dir, _notify, store) = make_store();
        let key = Stamp::of_bytes(b"key");
        assert!(!store.absorb(&dir.path().join("never-produced"), &key).unwrap());
    }

    #[test]
    fn place_overwrites_existing_destination() {
        let (dir, _notify, store) = make_store();
        let key = Stamp::of_bytes(b"key");
        seed_entry(&store, &key, b"fresh");

        let dst = dir.path().join("out");
        fs::write(&dst, b"stale partial materialization").unwrap();
        assert!(store.materialize(&key, &dst).unwrap());
        assert_eq!(fs::read(&dst).unwrap(), b"fresh");
    }

    #[test]
    fn reabsorb_same_key_creates_no_duplicate() {
        let (dir, _notify, store) = make_store();
        let src = dir.path().join("produced");
        fs::write(&src, b"output").unwrap();
        let key = Stamp::of_bytes(b"key");

        assert!(store.absorb(&src, &key).unwrap());
        assert!(store.absorb(&src, &key).unwrap());

        let entries = fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(entries, 1);
        assert_eq!(fs::metadata(&src).unwrap().nlink(), 2);
    }

    #[test]
    fn copying_mode_latch_warns_once() {
        let (dir, notify, store) = make_store();
        assert!(!store.copying_mode());

        store.enter_copying_mode();
        assert!(store.copying_mode());
        assert_eq!(notify.warn_count(), 1);

        // Re-entering and further placements stay silent.
        store.enter_copying_mode();
        let key = Stamp::of_bytes(b"key");
        seed_entry(&store, &key, b"payload");
        for i in 0..3 {
            let dst = dir.path().join(format!("out{i}"));
            assert!(store.materialize(&key, &dst).unwrap());
        }
        assert_eq!(notify.warn_count(), 1);
    }

    #[test]
    fn copy_mode_copies_instead_of_linking() {
        let (dir, _notify, store) = make_store();
        store.enter_copying_mode();

        let key = Stamp::of_bytes(b"key");
        seed_entry(&store, &key, b"payload");
        let dst = dir.path().join("out");
        assert!(store.materialize(&key, &dst).unwrap());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");

        let store_meta = fs::metadata(store.entry_path(&key)).unwrap();
        let ws_meta = fs::metadata(&dst).unwrap();
        assert_ne!(store_meta.ino(), ws_meta.ino());
        assert_eq!(store_meta.nlink(), 1);
    }

    #[test]
    fn copy_mode_preserves_permission_bits() {
        let (dir, _notify, store) = make_store();
        store.enter_copying_mode();

        let key = Stamp::of_bytes(b"key");
        let entry = store.entry_path(&key);
        fs::write(&entry, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&entry, fs::Permissions::from_mode(0o755)).unwrap();

        let dst = dir.path().join("out.sh");
        assert!(store.materialize(&key, &dst).unwrap());
        let mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn copy_mode_missing_entry_is_miss() {
        let (dir, _notify, store) = make_store();
        store.enter_copying_mode();
        let key = Stamp::of_bytes(b"never stored");
        assert!(!store.materialize(&key, &dir.path().join("out")).unwrap());
    }

    #[test]
    fn disabled_flag_comes_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            directory: dir.path().join("store"),
            disabled: true,
        };
        let store = CacheStore::open(&config, Arc::new(MemoryNotify::new())).unwrap();
        assert!(store.is_disabled());
    }

    #[test]
    fn retry_eintr_passes_through_success() {
        let mut calls = 0;
        let result: io::Result<u32> = retry_eintr(|| {
            calls += 1;
            if calls < 3 {
                Err(io::Error::new(ErrorKind::Interrupted, "signal"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
    }
}
