//! Error types for tree operations and snapshot persistence.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Outcome codes surfaced to the mount adapter.
///
/// Every failure is detected before the tree is touched, so an `Err` always
/// means the call had no effect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    /// No node at the resolved path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory still has entries.
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// Name already taken in the parent directory.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Node count or per-directory entry ceiling reached.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Write or truncate would push a file past the per-file ceiling.
    #[error("file too large: {path} ({requested} > {limit} bytes)")]
    TooLarge {
        path: String,
        requested: u64,
        limit: u64,
    },

    /// Buffer growth failed.
    #[error("out of memory growing {0}")]
    OutOfMemory(String),

    /// Malformed path or entry name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a NotEmpty error.
    pub fn not_empty(path: impl Into<String>) -> Self {
        Self::NotEmpty(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a ResourceExhausted error.
    pub fn exhausted(what: impl Into<String>) -> Self {
        Self::ResourceExhausted(what.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }

    /// Replace the entry name or inode label with the full request path.
    pub fn with_path(self, path: &str) -> Self {
        let path = path.to_string();
        match self {
            FsError::NotFound(_) => FsError::NotFound(path),
            FsError::NotADirectory(_) => FsError::NotADirectory(path),
            FsError::IsADirectory(_) => FsError::IsADirectory(path),
            FsError::NotEmpty(_) => FsError::NotEmpty(path),
            FsError::AlreadyExists(_) => FsError::AlreadyExists(path),
            FsError::TooLarge {
                requested, limit, ..
            } => FsError::TooLarge {
                path,
                requested,
                limit,
            },
            FsError::OutOfMemory(_) => FsError::OutOfMemory(path),
            other => other,
        }
    }

    /// POSIX errno for this outcome, as FUSE expects it (positive).
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::ResourceExhausted(_) => libc::ENOSPC,
            FsError::TooLarge { .. } => libc::EFBIG,
            FsError::OutOfMemory(_) => libc::ENOMEM,
            FsError::InvalidArgument(_) => libc::EINVAL,
        }
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let kind = match &e {
            FsError::NotFound(_) => io::ErrorKind::NotFound,
            FsError::NotADirectory(_) => io::ErrorKind::NotADirectory,
            FsError::IsADirectory(_) => io::ErrorKind::IsADirectory,
            FsError::NotEmpty(_) => io::ErrorKind::DirectoryNotEmpty,
            FsError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            FsError::ResourceExhausted(_) => io::ErrorKind::StorageFull,
            FsError::TooLarge { .. } => io::ErrorKind::FileTooLarge,
            FsError::OutOfMemory(_) => io::ErrorKind::OutOfMemory,
            FsError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, e.to_string())
    }
}

/// Result type for tree operations.
pub type FsResult<T> = Result<T, FsError>;

/// Failures while loading or storing a snapshot.
///
/// Load failures are fatal to startup. Store failures are reported to the
/// caller of the teardown hook and logged; they never panic.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Reading or writing the snapshot file failed.
    #[error("snapshot I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The snapshot is not valid JSON or does not match the record layout.
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),

    /// A record's `type` is neither `"dir"` nor `"reg"`.
    #[error("node {id}: unknown type {kind:?}")]
    UnknownType { id: u64, kind: String },

    /// Two records share an id.
    #[error("duplicate node id {0}")]
    DuplicateId(u64),

    /// No record with id 0.
    #[error("snapshot has no root node (id 0)")]
    MissingRoot,

    /// Record 0 exists but is not a directory.
    #[error("root node is not a directory")]
    RootNotDirectory,

    /// A directory entry names an id with no record.
    #[error("directory {dir} entry {name:?} points at missing node {target}")]
    DanglingEntry { dir: u64, name: String, target: u64 },

    /// A node is listed in more than one directory entry, or the root is listed at all.
    #[error("node {0} is referenced more than once")]
    MultiplyLinked(u64),

    /// A non-root node is not reachable from the root.
    #[error("node {0} is not reachable from the root")]
    Orphan(u64),

    /// A file record carries entries, or a directory record carries data.
    #[error("node {id}: {reason}")]
    FieldMismatch { id: u64, reason: &'static str },

    /// An entry name is empty, `.`, `..`, too long, or contains `/` or NUL.
    #[error("directory {dir}: invalid entry name {name:?}")]
    InvalidName { dir: u64, name: String },

    /// Two entries in one directory share a name.
    #[error("directory {dir}: duplicate entry name {name:?}")]
    DuplicateName { dir: u64, name: String },

    /// A configured ceiling is exceeded.
    #[error("snapshot exceeds limit: {0}")]
    LimitExceeded(String),

    /// `data` is flagged as base64 but does not decode.
    #[error("node {id}: undecodable data: {reason}")]
    BadData { id: u64, reason: String },

    /// `data` names an encoding this build does not understand.
    #[error("node {id}: unknown data encoding {encoding:?}")]
    UnknownEncoding { id: u64, encoding: String },
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::not_found("/x").errno(), libc::ENOENT);
        assert_eq!(FsError::not_empty("/d").errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::already_exists("/d").errno(), libc::EEXIST);
        assert_eq!(FsError::exhausted("nodes").errno(), libc::ENOSPC);
        let big = FsError::TooLarge {
            path: "/f".into(),
            requested: 10,
            limit: 5,
        };
        assert_eq!(big.errno(), libc::EFBIG);
    }

    #[test]
    fn test_io_error_kind() {
        let err: io::Error = FsError::is_a_directory("/d").into();
        assert_eq!(err.kind(), io::ErrorKind::IsADirectory);
        let err: io::Error = FsError::invalid("a\0b").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
