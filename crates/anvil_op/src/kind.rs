//! The tagged variants of work an operation can describe.

use std::path::PathBuf;

/// What an operation does when executed.
///
/// The execution cache only memoizes [`OpKind::Spawn`]; the remaining kinds
/// are cheap local file operations that pass through the cache unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Spawn an external process.
    Spawn {
        /// Full argument vector; `argv[0]` is the executable.
        argv: Vec<String>,
        /// Environment entries in the order they are passed to the tool.
        ///
        /// The caller restricts this to the variables the tool is allowed
        /// to observe; the cache hashes the entries verbatim.
        env: Vec<(String, String)>,
        /// File redirected to the process's standard input, if any.
        stdin: Option<PathBuf>,
    },

    /// Copy one file to another path.
    CopyFile {
        /// Source path.
        src: PathBuf,
        /// Destination path.
        dst: PathBuf,
    },

    /// Read a file's contents.
    Read {
        /// The file to read.
        file: PathBuf,
    },

    /// Write bytes to a file.
    Write {
        /// The file to write.
        file: PathBuf,
        /// The bytes to write.
        data: Vec<u8>,
    },

    /// Delete a file.
    Delete {
        /// The file to delete.
        file: PathBuf,
    },

    /// Create a directory.
    Mkdir {
        /// The directory to create.
        dir: PathBuf,
    },

    /// Flush pending filesystem state.
    Sync,
}

impl OpKind {
    /// Returns `true` for [`OpKind::Spawn`].
    pub fn is_spawn(&self) -> bool {
        matches!(self, OpKind::Spawn { .. })
    }

    /// Short kind name for notifications and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            OpKind::Spawn { .. } => "spawn",
            OpKind::CopyFile { .. } => "copy-file",
            OpKind::Read { .. } => "read",
            OpKind::Write { .. } => "write",
            OpKind::Delete { .. } => "delete",
            OpKind::Mkdir { .. } => "mkdir",
            OpKind::Sync => "sync",
        }
    }
}
