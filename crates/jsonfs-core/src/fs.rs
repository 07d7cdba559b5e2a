//! The filesystem handle handed to mount adapters.
//!
//! [`JsonFs`] owns the tree behind one reader-writer lock. Reads share it,
//! mutations and snapshot saves take it exclusively, so no call ever observes
//! another call half-applied.

use parking_lot::RwLock;
use std::io;

use crate::config::{FsConfig, Limits};
use crate::error::{FsError, FsResult, SnapshotError};
use crate::ops::FsOps;
use crate::snapshot;
use crate::tree::Tree;
use crate::types::{DirEntry, FileAttr, NodeId, NodeKind, ROOT_ID, TreeStats};

/// In-memory filesystem backed by a JSON snapshot.
#[derive(Debug)]
pub struct JsonFs {
    tree: RwLock<Tree>,
    config: FsConfig,
}

impl JsonFs {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialization hook: load the configured snapshot.
    ///
    /// A missing snapshot starts an empty tree only when
    /// `create_if_missing` is set; any other failure is fatal.
    pub fn init(config: FsConfig) -> Result<Self, SnapshotError> {
        let tree = match snapshot::load_file(&config.snapshot, config.limits) {
            Ok(tree) => tree,
            Err(SnapshotError::Io { source, .. })
                if source.kind() == io::ErrorKind::NotFound && config.create_if_missing =>
            {
                tracing::info!(path = %config.snapshot.display(), "no snapshot, starting empty");
                Tree::new(config.limits)
            }
            Err(e) => return Err(e),
        };
        Ok(Self::from_tree(tree, config))
    }

    /// Empty filesystem that will save to `config.snapshot`.
    pub fn new(config: FsConfig) -> Self {
        let tree = Tree::new(config.limits);
        Self::from_tree(tree, config)
    }

    /// Empty filesystem with default config and custom limits.
    pub fn with_limits(limits: Limits) -> Self {
        Self::new(FsConfig {
            limits,
            ..FsConfig::default()
        })
    }

    pub fn from_tree(tree: Tree, config: FsConfig) -> Self {
        Self {
            tree: RwLock::new(tree),
            config,
        }
    }

    /// Write the snapshot without tearing down.
    ///
    /// Holds the exclusive lock so the saved tree is consistent.
    pub fn flush(&self) -> Result<(), SnapshotError> {
        let tree = self.tree.write();
        snapshot::save_file(&tree, &self.config.snapshot, self.config.pretty)
    }

    /// Teardown hook: persist the tree.
    ///
    /// Failure is logged and returned; it never panics.
    pub fn destroy(&self) -> Result<(), SnapshotError> {
        self.flush().inspect_err(|e| {
            tracing::error!(
                path = %self.config.snapshot.display(),
                error = %e,
                "failed to save snapshot; changes since the last save are lost"
            );
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn stats(&self) -> TreeStats {
        self.tree.read().stats()
    }

    /// Serialize the current tree to JSON bytes.
    pub fn to_json(&self, pretty: bool) -> Result<Vec<u8>, SnapshotError> {
        snapshot::encode(&self.tree.read(), pretty)
    }

    // ========================================================================
    // Identifier-level operations (for adapters that cache node ids)
    //
    // `lookup`, `create_in` and `mkdir_in` each take one lookup reference on
    // the returned node. A removed node's id is not handed out again until
    // every reference is dropped with `forget`.
    // ========================================================================

    /// Attributes of `name` inside directory `parent`.
    pub fn lookup(&self, parent: NodeId, name: &str) -> FsResult<FileAttr> {
        let mut tree = self.tree.write();
        let id = tree.lookup(parent, name)?;
        tree.pin(id)?;
        tree.attr(id)
    }

    /// Drop `count` lookup references on `id`.
    pub fn forget(&self, id: NodeId, count: u64) {
        self.tree.write().release(id, count);
    }

    pub fn attr(&self, id: NodeId) -> FsResult<FileAttr> {
        self.tree.read().attr(id)
    }

    /// Directory entries without `.` and `..`.
    pub fn list(&self, id: NodeId) -> FsResult<Vec<DirEntry>> {
        self.tree.read().list(id)
    }

    pub fn read_at(&self, id: NodeId, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        self.tree.read().read(id, offset, size)
    }

    pub fn write_at(&self, id: NodeId, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.tree.write().write(id, offset, data)
    }

    /// Truncate or zero-extend, returning the new attributes.
    pub fn resize(&self, id: NodeId, size: u64) -> FsResult<FileAttr> {
        let mut tree = self.tree.write();
        tree.truncate(id, size)?;
        tree.attr(id)
    }

    pub fn create_in(&self, parent: NodeId, name: &str) -> FsResult<FileAttr> {
        let mut tree = self.tree.write();
        let id = tree.create_file(parent, name)?;
        tree.pin(id)?;
        tree.attr(id)
    }

    pub fn mkdir_in(&self, parent: NodeId, name: &str) -> FsResult<FileAttr> {
        let mut tree = self.tree.write();
        let id = tree.create_dir(parent, name)?;
        tree.pin(id)?;
        tree.attr(id)
    }

    /// Remove a file entry, returning the removed node's id.
    pub fn unlink_in(&self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        self.tree.write().remove_entry(parent, name, NodeKind::File)
    }

    /// Remove an empty directory entry, returning the removed node's id.
    pub fn rmdir_in(&self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        self.tree.write().remove_entry(parent, name, NodeKind::Directory)
    }

    /// Resolve a path to its node id.
    pub fn resolve(&self, path: &str) -> FsResult<NodeId> {
        self.tree.read().resolve(path).map_err(|e| e.with_path(path))
    }

    fn create_node(&self, path: &str, kind: NodeKind) -> FsResult<FileAttr> {
        let mut tree = self.tree.write();
        let (parent, name) = tree.resolve_parent(path)?;
        let id = match kind {
            NodeKind::File => tree.create_file(parent, name)?,
            NodeKind::Directory => tree.create_dir(parent, name)?,
        };
        tracing::debug!(path, id, "created");
        tree.attr(id)
    }

    fn remove_node(&self, path: &str, kind: NodeKind) -> FsResult<()> {
        let mut tree = self.tree.write();
        let (parent, name) = tree.resolve_parent(path)?;
        tree.remove_entry(parent, name, kind)?;
        tracing::debug!(path, "removed");
        Ok(())
    }

    /// Resolve `path` and require a file.
    fn file_id(tree: &Tree, path: &str) -> FsResult<NodeId> {
        let id = tree.resolve(path)?;
        if tree.attr(id)?.is_dir() {
            return Err(FsError::is_a_directory(path));
        }
        Ok(id)
    }
}

impl FsOps for JsonFs {
    fn getattr(&self, path: &str) -> FsResult<FileAttr> {
        let tree = self.tree.read();
        tree.resolve(path)
            .and_then(|id| tree.attr(id))
            .map_err(|e| e.with_path(path))
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let tree = self.tree.read();
        let listing = || -> FsResult<Vec<DirEntry>> {
            let id = tree.resolve(path)?;
            let parent = match tree.resolve_parent(path) {
                Ok((parent, _)) => parent,
                Err(_) => ROOT_ID,
            };
            let entries = tree.list(id)?;
            let mut out = Vec::with_capacity(entries.len() + 2);
            out.push(DirEntry {
                name: ".".to_string(),
                id,
                kind: NodeKind::Directory,
            });
            out.push(DirEntry {
                name: "..".to_string(),
                id: parent,
                kind: NodeKind::Directory,
            });
            out.extend(entries);
            Ok(out)
        };
        listing().map_err(|e| e.with_path(path))
    }

    fn open(&self, path: &str) -> FsResult<()> {
        let tree = self.tree.read();
        Self::file_id(&tree, path)
            .map(|_| ())
            .map_err(|e| e.with_path(path))
    }

    fn read(&self, path: &str, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let tree = self.tree.read();
        Self::file_id(&tree, path)
            .and_then(|id| tree.read(id, offset, size))
            .map_err(|e| e.with_path(path))
    }

    fn write(&self, path: &str, offset: u64, data: &[u8]) -> FsResult<usize> {
        let mut tree = self.tree.write();
        Self::file_id(&tree, path)
            .and_then(|id| tree.write(id, offset, data))
            .map_err(|e| e.with_path(path))
    }

    fn create(&self, path: &str) -> FsResult<FileAttr> {
        self.create_node(path, NodeKind::File)
            .map_err(|e| e.with_path(path))
    }

    fn mkdir(&self, path: &str) -> FsResult<FileAttr> {
        self.create_node(path, NodeKind::Directory)
            .map_err(|e| e.with_path(path))
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        self.remove_node(path, NodeKind::File)
            .map_err(|e| e.with_path(path))
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        self.remove_node(path, NodeKind::Directory)
            .map_err(|e| e.with_path(path))
    }

    fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let mut tree = self.tree.write();
        Self::file_id(&tree, path)
            .and_then(|id| tree.truncate(id, size))
            .map_err(|e| e.with_path(path))
    }

    /// Create-or-replace under a single lock; a rejected write leaves the
    /// old contents in place and creates nothing.
    fn write_all(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let mut tree = self.tree.write();
        let replace = |tree: &mut Tree| -> FsResult<()> {
            let limit = tree.limits().max_file_size;
            if (data.len() as u64) > limit {
                return Err(FsError::TooLarge {
                    path: path.to_string(),
                    requested: data.len() as u64,
                    limit,
                });
            }
            let id = match tree.resolve(path) {
                Ok(id) => id,
                Err(FsError::NotFound(_)) => {
                    let (parent, name) = tree.resolve_parent(path)?;
                    let id = tree.create_file(parent, name)?;
                    if let Err(e) = tree.replace(id, data) {
                        // undo the create so the failed call has no effect
                        tree.remove_entry(parent, name, NodeKind::File)?;
                        return Err(e);
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            tree.replace(id, data)
        };
        replace(&mut tree).map_err(|e| e.with_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs() -> JsonFs {
        JsonFs::with_limits(Limits::default())
    }

    #[test]
    fn test_getattr_root() {
        let fs = fs();
        let attr = fs.getattr("/").unwrap();
        assert!(attr.is_dir());
        assert_eq!(attr.id, ROOT_ID);
    }

    #[test]
    fn test_errors_carry_full_path() {
        let fs = fs();
        fs.mkdir("/a").unwrap();
        assert_eq!(fs.getattr("/a/missing"), Err(FsError::not_found("/a/missing")));
        assert_eq!(fs.open("/a"), Err(FsError::is_a_directory("/a")));
    }

    #[test]
    fn test_readdir_dots_and_order() {
        let fs = fs();
        fs.mkdir("/d").unwrap();
        fs.create("/d/f1").unwrap();
        fs.create("/d/f2").unwrap();
        let names: Vec<_> = fs
            .readdir("/d")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".", "..", "f1", "f2"]);

        let root = fs.readdir("/").unwrap();
        assert_eq!(root[1].id, ROOT_ID);
    }

    #[test]
    fn test_readdir_on_file() {
        let fs = fs();
        fs.create("/f").unwrap();
        assert_eq!(fs.readdir("/f"), Err(FsError::not_a_directory("/f")));
    }

    #[test]
    fn test_create_under_missing_parent() {
        let fs = fs();
        assert_eq!(fs.create("/nope/f"), Err(FsError::not_found("/nope/f")));
        assert!(matches!(fs.mkdir("/"), Err(FsError::InvalidArgument(_))));
    }

    #[test]
    fn test_unlink_directory_and_rmdir_file() {
        let fs = fs();
        fs.mkdir("/d").unwrap();
        fs.create("/f").unwrap();
        assert_eq!(fs.unlink("/d"), Err(FsError::is_a_directory("/d")));
        assert_eq!(fs.rmdir("/f"), Err(FsError::not_a_directory("/f")));
    }

    #[test]
    fn test_write_all_replaces_atomically() {
        let fs = JsonFs::with_limits(Limits {
            max_file_size: 4,
            ..Limits::default()
        });
        fs.write_all("/f", b"abcd").unwrap();
        assert!(matches!(
            fs.write_all("/f", b"too long"),
            Err(FsError::TooLarge { .. })
        ));
        assert_eq!(fs.read_all("/f").unwrap(), b"abcd");
        fs.write_all("/f", b"xy").unwrap();
        assert_eq!(fs.read_all("/f").unwrap(), b"xy");
    }

    #[test]
    fn test_id_level_calls() {
        let fs = fs();
        let dir = fs.mkdir_in(ROOT_ID, "d").unwrap();
        let file = fs.create_in(dir.id, "f").unwrap();
        assert_eq!(fs.lookup(dir.id, "f").unwrap().id, file.id);
        fs.write_at(file.id, 0, b"abc").unwrap();
        assert_eq!(fs.resize(file.id, 1).unwrap().size, 1);
        assert_eq!(fs.read_at(file.id, 0, 10).unwrap(), b"a");
        fs.unlink_in(dir.id, "f").unwrap();
        fs.rmdir_in(ROOT_ID, "d").unwrap();
        assert!(fs.list(ROOT_ID).unwrap().is_empty());
    }

    #[test]
    fn test_write_all_too_large_creates_nothing() {
        let fs = JsonFs::with_limits(Limits {
            max_file_size: 2,
            ..Limits::default()
        });
        assert!(matches!(
            fs.write_all("/new", b"abc"),
            Err(FsError::TooLarge { .. })
        ));
        assert!(!fs.exists("/new"));
        fs.write_all("/d", b"x").unwrap();
        fs.mkdir("/e").unwrap();
        assert_eq!(fs.write_all("/e", b"x"), Err(FsError::is_a_directory("/e")));
        assert_eq!(fs.stats().nodes, 3);
    }

    #[test]
    fn test_referenced_id_not_reused_until_forgotten() {
        let fs = fs();
        let held = fs.create_in(ROOT_ID, "x").unwrap();
        assert_eq!(fs.unlink_in(ROOT_ID, "x"), Ok(held.id));

        // the adapter still references the old inode
        let other = fs.create_in(ROOT_ID, "y").unwrap();
        assert_ne!(other.id, held.id);
        assert_eq!(fs.stats().retired_ids, 1);
        assert!(matches!(fs.attr(held.id), Err(FsError::NotFound(_))));

        fs.forget(held.id, 1);
        assert_eq!(fs.stats().retired_ids, 0);
        assert_eq!(fs.create_in(ROOT_ID, "z").unwrap().id, held.id);
    }

    #[test]
    fn test_lookup_takes_a_reference() {
        let fs = fs();
        fs.create("/f").unwrap();
        let attr = fs.lookup(ROOT_ID, "f").unwrap();
        fs.unlink("/f").unwrap();
        assert_ne!(fs.create("/g").unwrap().id, attr.id);
        fs.forget(attr.id, 1);
        assert_eq!(fs.create("/h").unwrap().id, attr.id);
    }
}
