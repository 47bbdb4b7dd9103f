//! The operation record handed from the scheduler to the execution cache.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anvil_common::Stamp;

use crate::kind::OpKind;
use crate::status::OpStatus;

/// One unit of externally observable work.
///
/// The scheduler populates `id`, `kind`, and the declared `reads` and
/// `writes`; the execution cache fills in the fingerprint, status, and
/// timings as the operation moves through its lifecycle.
///
/// Invariants the scheduler upholds: `reads` and `writes` are disjoint,
/// every cacheable operation declares at least one write, and each declared
/// write is produced exactly once when the operation executes.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Monotonic identifier, unique within one build.
    id: u64,
    /// What this operation does.
    kind: OpKind,
    /// Input files that affect the result.
    reads: BTreeSet<PathBuf>,
    /// Output files the operation produces.
    writes: BTreeSet<PathBuf>,
    /// Fingerprint of the operation's inputs, once computed.
    stamp: Option<Stamp>,
    /// Lifecycle state.
    status: OpStatus,
    /// When execution (or a hit attempt) began.
    exec_start: Option<SystemTime>,
    /// When execution finished.
    exec_end: Option<SystemTime>,
    /// Whether the outputs have been recorded to the store.
    cached: bool,
}

impl Operation {
    /// Creates an operation of the given kind with empty read/write sets.
    pub fn new(id: u64, kind: OpKind) -> Self {
        Self {
            id,
            kind,
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            stamp: None,
            status: OpStatus::Pending,
            exec_start: None,
            exec_end: None,
            cached: false,
        }
    }

    /// Creates a process-spawn operation. `argv[0]` is the executable.
    pub fn spawn(id: u64, argv: Vec<String>, env: Vec<(String, String)>) -> Self {
        Self::new(id, OpKind::Spawn {
            argv,
            env,
            stdin: None,
        })
    }

    /// Creates a process-spawn operation with a stdin redirection.
    pub fn spawn_with_stdin(
        id: u64,
        argv: Vec<String>,
        env: Vec<(String, String)>,
        stdin: PathBuf,
    ) -> Self {
        Self::new(id, OpKind::Spawn {
            argv,
            env,
            stdin: Some(stdin),
        })
    }

    /// Creates a file-copy operation.
    pub fn copy_file(id: u64, src: PathBuf, dst: PathBuf) -> Self {
        Self::new(id, OpKind::CopyFile { src, dst })
    }

    /// Creates a file-read operation.
    pub fn read(id: u64, file: PathBuf) -> Self {
        Self::new(id, OpKind::Read { file })
    }

    /// Creates a file-write operation.
    pub fn write(id: u64, file: PathBuf, data: Vec<u8>) -> Self {
        Self::new(id, OpKind::Write { file, data })
    }

    /// Creates a file-delete operation.
    pub fn delete(id: u64, file: PathBuf) -> Self {
        Self::new(id, OpKind::Delete { file })
    }

    /// Creates a directory-creation operation.
    pub fn mkdir(id: u64, dir: PathBuf) -> Self {
        Self::new(id, OpKind::Mkdir { dir })
    }

    /// Creates a filesystem-sync operation.
    pub fn sync(id: u64) -> Self {
        Self::new(id, OpKind::Sync)
    }

    /// Declares an input file. Returns `self` for chaining.
    pub fn with_read(mut self, path: impl Into<PathBuf>) -> Self {
        self.add_read(path.into());
        self
    }

    /// Declares an output file. Returns `self` for chaining.
    pub fn with_write(mut self, path: impl Into<PathBuf>) -> Self {
        self.add_write(path.into());
        self
    }

    /// Declares an input file.
    pub fn add_read(&mut self, path: PathBuf) {
        debug_assert!(!self.writes.contains(&path), "read/write sets overlap");
        self.reads.insert(path);
    }

    /// Declares an output file.
    pub fn add_write(&mut self, path: PathBuf) {
        debug_assert!(!self.reads.contains(&path), "read/write sets overlap");
        self.writes.insert(path);
    }

    /// The operation's identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// What this operation does.
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// Declared input files, in ascending path order.
    pub fn reads(&self) -> &BTreeSet<PathBuf> {
        &self.reads
    }

    /// Declared output files, in ascending path order.
    pub fn writes(&self) -> &BTreeSet<PathBuf> {
        &self.writes
    }

    /// The input fingerprint, once the executor has computed it.
    pub fn stamp(&self) -> Option<Stamp> {
        self.stamp
    }

    /// Records the input fingerprint.
    pub fn set_stamp(&mut self, stamp: Stamp) {
        self.stamp = Some(stamp);
    }

    /// Lifecycle state.
    pub fn status(&self) -> OpStatus {
        self.status
    }

    /// Sets the lifecycle state.
    pub fn set_status(&mut self, status: OpStatus) {
        self.status = status;
    }

    /// Marks the operation as having run externally.
    pub fn mark_executed(&mut self) {
        self.status = OpStatus::Executed;
    }

    /// Marks the operation as failed. Failed operations are never cached.
    pub fn mark_failed(&mut self) {
        self.status = OpStatus::Failed;
    }

    /// When execution (or a hit attempt) began, if started.
    pub fn exec_start(&self) -> Option<SystemTime> {
        self.exec_start
    }

    /// Records the execution start time.
    pub fn set_exec_start(&mut self, at: SystemTime) {
        self.exec_start = Some(at);
    }

    /// Clears the start time, marking the attempt as not executed.
    pub fn clear_exec_start(&mut self) {
        self.exec_start = None;
    }

    /// When execution finished, if finished.
    pub fn exec_end(&self) -> Option<SystemTime> {
        self.exec_end
    }

    /// Records the execution end time.
    pub fn set_exec_end(&mut self, at: SystemTime) {
        self.exec_end = Some(at);
    }

    /// Whether the outputs have been recorded to the store.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Marks the outputs as recorded to the store.
    pub fn set_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    /// Elapsed wall-clock time between start and end, for build summaries.
    ///
    /// Returns `None` until both timestamps are set.
    pub fn runtime(&self) -> Option<Duration> {
        let start = self.exec_start?;
        let end = self.exec_end?;
        end.duration_since(start).ok()
    }

    /// Returns `true` if `path` is one of the declared writes.
    pub fn writes_path(&self, path: &Path) -> bool {
        self.writes.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_spawn() -> Operation {
        Operation::spawn(1, vec!["echo".to_string(), "hi".to_string()], vec![])
            .with_write("/w/out")
    }

    #[test]
    fn new_operation_is_pending() {
        let op = make_spawn();
        assert_eq!(op.id(), 1);
        assert_eq!(op.status(), OpStatus::Pending);
        assert!(op.stamp().is_none());
        assert!(op.exec_start().is_none());
        assert!(op.exec_end().is_none());
        assert!(!op.is_cached());
    }

    #[test]
    fn writes_iterate_in_ascending_order() {
        let op = Operation::spawn(2, vec!["tool".to_string()], vec![])
            .with_write("/w/c")
            .with_write("/w/a")
            .with_write("/w/b");
        let order: Vec<_> = op.writes().iter().cloned().collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/w/a"),
                PathBuf::from("/w/b"),
                PathBuf::from("/w/c")
            ]
        );
    }

    #[test]
    fn reads_iterate_in_ascending_order() {
        let op = Operation::spawn(3, vec!["tool".to_string()], vec![])
            .with_read("/in/z")
            .with_read("/in/a");
        let order: Vec<_> = op.reads().iter().cloned().collect();
        assert_eq!(order, vec![PathBuf::from("/in/a"), PathBuf::from("/in/z")]);
    }

    #[test]
    fn duplicate_writes_collapse() {
        let op = make_spawn().with_write("/w/out");
        assert_eq!(op.writes().len(), 1);
    }

    #[test]
    fn status_transitions() {
        let mut op = make_spawn();
        op.mark_executed();
        assert_eq!(op.status(), OpStatus::Executed);
        op.mark_failed();
        assert_eq!(op.status(), OpStatus::Failed);
        assert!(op.status().is_terminal());
    }

    #[test]
    fn stamp_round_trip() {
        let mut op = make_spawn();
        let stamp = anvil_common::Stamp::of_bytes(b"fingerprint");
        op.set_stamp(stamp);
        assert_eq!(op.stamp(), Some(stamp));
    }

    #[test]
    fn runtime_requires_both_timestamps() {
        let mut op = make_spawn();
        assert!(op.runtime().is_none());
        let start = SystemTime::UNIX_EPOCH;
        op.set_exec_start(start);
        assert!(op.runtime().is_none());
        op.set_exec_end(start + Duration::from_secs(2));
        assert_eq!(op.runtime(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn clear_exec_start_marks_not_executed() {
        let mut op = make_spawn();
        op.set_exec_start(SystemTime::now());
        op.clear_exec_start();
        assert!(op.exec_start().is_none());
    }

    #[test]
    fn writes_path_checks_membership() {
        let op = make_spawn();
        assert!(op.writes_path(Path::new("/w/out")));
        assert!(!op.writes_path(Path::new("/w/other")));
    }

    #[test]
    fn spawn_with_stdin_records_redirection() {
        let op = Operation::spawn_with_stdin(
            4,
            vec!["sort".to_string()],
            vec![],
            PathBuf::from("/in/list"),
        );
        match op.kind() {
            OpKind::Spawn { stdin, .. } => {
                assert_eq!(stdin.as_deref(), Some(Path::new("/in/list")));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
