//! Binding of operations to the store: hit attempts and output recording.
//!
//! The executor computes an operation's input fingerprint, asks the store
//! for each declared write on a hit attempt, and absorbs produced writes
//! after an external run. Only spawn operations are memoized; every other
//! kind passes through as a miss.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anvil_common::{Stamp, StampHasher};
use anvil_op::{OpKind, OpStatus, Operation};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::notify::Notify;
use crate::stamper::FileStampTable;
use crate::store::{retry_eintr, CacheStore};

/// Section tags framing the components of a spawn fingerprint.
///
/// Each component is absorbed as `tag ‖ bytes ‖ 0`, so reordering or
/// re-splitting components can never produce the same digest.
const TAG_EXE: u8 = 0;
const TAG_ARG: u8 = 1;
const TAG_ENV: u8 = 2;
const TAG_STDIN: u8 = 3;
const TAG_READ: u8 = 4;

/// The execution cache facade the scheduler drives.
///
/// One executor serves one build: it owns the store handle and the
/// file-stamp memo, and is called one operation at a time.
pub struct CacheExecutor {
    store: CacheStore,
    stamps: FileStampTable,
    notify: Arc<dyn Notify>,
}

impl CacheExecutor {
    /// Creates an executor around an already-open store.
    pub fn new(store: CacheStore, notify: Arc<dyn Notify>) -> Self {
        Self {
            store,
            stamps: FileStampTable::new(),
            notify,
        }
    }

    /// Opens the store described by `config` and wraps it in an executor.
    pub fn open(config: &CacheConfig, notify: Arc<dyn Notify>) -> Result<Self, CacheError> {
        let store = CacheStore::open(config, notify.clone())?;
        Ok(Self::new(store, notify))
    }

    /// The underlying store, for GC and statistics.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// The file-stamp memo, for build summaries.
    pub fn stamps(&self) -> &FileStampTable {
        &self.stamps
    }

    /// Attempts to satisfy `op` entirely from the cache.
    ///
    /// Computes and records the operation's fingerprint, then materializes
    /// each declared write in ascending path order. The operation is cached
    /// only if every write is present: on the first missing entry, all
    /// writes already materialized by this call are unlinked again and the
    /// attempt is reported as a miss.
    ///
    /// Non-spawn operations, operations with no declared writes, and a
    /// disabled store always miss. Fatal store errors are caught here,
    /// reported through the notifier with the operation id, and converted
    /// to a miss — the scheduler then executes the operation normally.
    pub fn try_hit(&mut self, op: &mut Operation) -> bool {
        match self.try_hit_inner(op) {
            Ok(hit) => hit,
            Err(err) => {
                self.notify.error(op.id(), &err.to_string());
                false
            }
        }
    }

    fn try_hit_inner(&mut self, op: &mut Operation) -> Result<bool, CacheError> {
        if self.store.is_disabled() || op.writes().is_empty() {
            return Ok(false);
        }
        let stamp = match op.kind() {
            OpKind::Spawn { argv, env, stdin } => {
                self.spawn_stamp(argv, env, stdin.as_deref(), op.reads())?
            }
            _ => return Ok(false),
        };
        let Some(stamp) = stamp else {
            return Ok(false);
        };
        op.set_stamp(stamp);
        op.set_exec_start(SystemTime::now());

        let writes: Vec<PathBuf> = op.writes().iter().cloned().collect();
        for (done, write) in writes.iter().enumerate() {
            let key = write_key(&stamp, write);
            let present = match self.store.materialize(&key, write) {
                Ok(present) => present,
                Err(err) => {
                    rollback(&writes[..done]);
                    op.clear_exec_start();
                    return Err(err);
                }
            };
            if !present {
                rollback(&writes[..done]);
                op.clear_exec_start();
                return Ok(false);
            }
            self.notify
                .debug(op.id(), &format!("materialized {}", write.display()));
        }

        op.set_status(OpStatus::Cached);
        op.set_exec_end(SystemTime::now());
        self.notify.debug(op.id(), "cache hit");
        Ok(true)
    }

    /// Records `op`'s produced writes into the store.
    ///
    /// Called after the operation has executed externally. Each declared
    /// write is absorbed in ascending path order under its write key. A
    /// declared write missing from the workspace is fatal: the operation's
    /// declaration is wrong, and the error names the operation, the path,
    /// and the intended entry. Recording twice is harmless — the store
    /// re-links under the same keys without duplicating storage.
    ///
    /// No-ops when the store is disabled, the operation is not a spawn, it
    /// declares no writes, or no fingerprint was computed for it (the
    /// operation was not cacheable this run).
    pub fn record(&mut self, op: &mut Operation) -> Result<(), CacheError> {
        if self.store.is_disabled() || !op.kind().is_spawn() || op.writes().is_empty() {
            return Ok(());
        }
        let Some(stamp) = op.stamp() else {
            self.notify
                .debug(op.id(), "no fingerprint; outputs not recorded");
            return Ok(());
        };

        let writes: Vec<PathBuf> = op.writes().iter().cloned().collect();
        for write in &writes {
            let key = write_key(&stamp, write);
            let absorbed = match self.store.absorb(write, &key) {
                Ok(absorbed) => absorbed,
                Err(err) => {
                    op.mark_failed();
                    return Err(err);
                }
            };
            if !absorbed {
                op.mark_failed();
                return Err(CacheError::MissingWrite {
                    op_id: op.id(),
                    path: write.clone(),
                    key,
                });
            }
        }
        op.set_cached(true);
        Ok(())
    }

    /// Computes the fingerprint of a spawn's tool-visible inputs.
    ///
    /// The digest covers, in fixed order: the executable file's contents
    /// (`argv[0]`, stamped through the memo), every argv token, every
    /// environment entry in the order the caller presents it (caller order
    /// is deliberate — the cache hashes the environment the tool will
    /// see, verbatim), the stdin redirection path if any, and the stamp of
    /// every declared read in ascending path order.
    ///
    /// Returns `Ok(None)` when the executable or any read does not exist:
    /// the operation cannot be fingerprinted and is uncacheable this run.
    fn spawn_stamp(
        &mut self,
        argv: &[String],
        env: &[(String, String)],
        stdin: Option<&Path>,
        reads: &BTreeSet<PathBuf>,
    ) -> Result<Option<Stamp>, CacheError> {
        let Some(exe) = argv.first() else {
            return Ok(None);
        };
        let Some(exe_stamp) = self.stamps.stamp(Path::new(exe))? else {
            return Ok(None);
        };

        let mut hasher = StampHasher::new();
        section(&mut hasher, TAG_EXE, exe_stamp.as_bytes());
        for arg in argv {
            section(&mut hasher, TAG_ARG, arg.as_bytes());
        }
        for (key, value) in env {
            section(&mut hasher, TAG_ENV, format!("{key}={value}").as_bytes());
        }
        if let Some(stdin) = stdin {
            section(&mut hasher, TAG_STDIN, path_bytes(stdin));
        }
        for read in reads {
            let Some(read_stamp) = self.stamps.stamp(read)? else {
                return Ok(None);
            };
            section(&mut hasher, TAG_READ, read_stamp.as_bytes());
        }
        Ok(Some(hasher.finish()))
    }
}

/// Derives the store key for one declared write of a stamped operation.
///
/// Keying on `(operation stamp, write path)` keeps two operations that
/// produce identical bytes to different destinations — and two writes of
/// one operation — in distinct entries.
pub fn write_key(op_stamp: &Stamp, write: &Path) -> Stamp {
    let mut hasher = StampHasher::new();
    hasher.update(op_stamp.as_bytes());
    hasher.update(path_bytes(write));
    hasher.finish()
}

/// Absorbs one tag-framed component into a fingerprint.
fn section(hasher: &mut StampHasher, tag: u8, bytes: &[u8]) {
    hasher.update(&[tag]);
    hasher.update(bytes);
    hasher.update(&[0]);
}

/// A path's raw byte representation, as hashed into keys.
fn path_bytes(path: &Path) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes()
}

/// Unlinks writes materialized by an abandoned hit attempt, best effort.
fn rollback(placed: &[PathBuf]) {
    for path in placed {
        let _ = retry_eintr(|| fs::remove_file(path));
    }
}
