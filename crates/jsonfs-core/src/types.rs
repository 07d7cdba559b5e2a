//! Core node types.
//!
//! Directories hold plain identifiers for their children, never references,
//! so the whole tree is an arena keyed by [`NodeId`].

use serde::{Deserialize, Serialize};

/// Node identifier (the inode number).
pub type NodeId = u64;

/// The root directory always has id 0.
pub const ROOT_ID: NodeId = 0;

/// Highest usable identifier. Mount adapters expose `id + 1` as the inode
/// number, so one value is kept in reserve.
pub const MAX_NODE_ID: NodeId = u64::MAX - 1;

/// Permission bits reported for directories.
pub const DIR_PERM: u32 = 0o755;

/// Permission bits reported for files.
pub const FILE_PERM: u32 = 0o777;

/// Size reported for every directory.
pub const DIR_SIZE: u64 = 0;

/// Node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl NodeKind {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }

    /// The `type` tag used in snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "reg",
            NodeKind::Directory => "dir",
        }
    }

    pub fn from_tag(s: &str) -> Option<Self> {
        match s {
            "reg" => Some(NodeKind::File),
            "dir" => Some(NodeKind::Directory),
            _ => None,
        }
    }
}

/// A `(name, child)` pair inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub id: NodeId,
}

impl Entry {
    pub fn new(name: impl Into<String>, id: NodeId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Kind-specific payload. A file never has entries and a directory never has
/// content because the two cannot coexist in this enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    File { content: Vec<u8> },
    Directory { entries: Vec<Entry> },
}

/// The unit of storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Entry name as seen by the parent. Empty for the root.
    pub name: String,
    pub body: NodeBody,
}

impl Node {
    /// Create an empty file node.
    pub fn file(id: NodeId, name: impl Into<String>) -> Self {
        Self::file_with(id, name, Vec::new())
    }

    /// Create a file node with initial content.
    pub fn file_with(id: NodeId, name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id,
            name: name.into(),
            body: NodeBody::File { content },
        }
    }

    /// Create an empty directory node.
    pub fn directory(id: NodeId, name: impl Into<String>) -> Self {
        Self::directory_with(id, name, Vec::new())
    }

    /// Create a directory node with initial entries.
    pub fn directory_with(id: NodeId, name: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            id,
            name: name.into(),
            body: NodeBody::Directory { entries },
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::File { .. } => NodeKind::File,
            NodeBody::Directory { .. } => NodeKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    /// Directory entries, or `None` for a file.
    pub fn entries(&self) -> Option<&[Entry]> {
        match &self.body {
            NodeBody::Directory { entries } => Some(entries),
            NodeBody::File { .. } => None,
        }
    }

    /// File content, or `None` for a directory.
    pub fn content(&self) -> Option<&[u8]> {
        match &self.body {
            NodeBody::File { content } => Some(content),
            NodeBody::Directory { .. } => None,
        }
    }

    /// Find a child by exact name. First match wins.
    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.entries()?
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
    }

    /// Reported size: content length for files, [`DIR_SIZE`] for directories.
    pub fn size(&self) -> u64 {
        match &self.body {
            NodeBody::File { content } => content.len() as u64,
            NodeBody::Directory { .. } => DIR_SIZE,
        }
    }

    pub fn attr(&self) -> FileAttr {
        match self.kind() {
            NodeKind::File => FileAttr {
                id: self.id,
                kind: NodeKind::File,
                size: self.size(),
                perm: FILE_PERM,
                nlink: 1,
            },
            NodeKind::Directory => FileAttr {
                id: self.id,
                kind: NodeKind::Directory,
                size: DIR_SIZE,
                perm: DIR_PERM,
                nlink: 2, // . and ..
            },
        }
    }
}

/// Attributes returned by `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Size in bytes.
    pub size: u64,
    /// Fixed permission bits.
    pub perm: u32,
    pub nlink: u32,
}

impl FileAttr {
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    pub id: NodeId,
    pub kind: NodeKind,
}

/// Tree-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub nodes: usize,
    pub directories: usize,
    pub files: usize,
    /// Sum of all file content lengths.
    pub bytes: u64,
    /// Identifiers waiting to be reused.
    pub free_ids: usize,
    /// Removed nodes whose ids are still referenced by a mount adapter.
    pub retired_ids: usize,
}
