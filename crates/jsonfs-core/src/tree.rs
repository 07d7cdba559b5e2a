//! Tree mutations over the node store.
//!
//! Every operation checks all of its failure conditions before touching the
//! store, so a returned error means nothing changed: no entry ever points at
//! a missing node and no node is left without an owning entry.

use crate::config::Limits;
use crate::error::{FsError, FsResult};
use crate::path::{self, validate_name};
use crate::store::NodeStore;
use crate::types::{DirEntry, Entry, FileAttr, Node, NodeBody, NodeId, NodeKind, TreeStats};

/// The node store plus the ceilings that govern it.
#[derive(Debug, Clone)]
pub struct Tree {
    store: NodeStore,
    limits: Limits,
}

impl Tree {
    /// An empty tree: just the root directory.
    pub fn new(limits: Limits) -> Self {
        Self {
            store: NodeStore::new(limits.max_nodes),
            limits,
        }
    }

    pub(crate) fn from_store(store: NodeStore, limits: Limits) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn stats(&self) -> TreeStats {
        self.store.stats()
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn resolve(&self, path: &str) -> FsResult<NodeId> {
        path::resolve(&self.store, path)
    }

    /// Resolve everything but the final component of `path`.
    pub fn resolve_parent<'p>(&self, path: &'p str) -> FsResult<(NodeId, &'p str)> {
        let (parent, name) = path::split_parent(path)?;
        Ok((self.resolve(parent)?, name))
    }

    /// Find `name` inside directory `parent`.
    pub fn lookup(&self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        let dir = self.dir(parent)?;
        dir.child(name).ok_or_else(|| FsError::not_found(name))
    }

    pub fn attr(&self, id: NodeId) -> FsResult<FileAttr> {
        Ok(self.store.get(id)?.attr())
    }

    /// Entries of a directory in insertion order.
    pub fn list(&self, id: NodeId) -> FsResult<Vec<DirEntry>> {
        let dir = self.dir(id)?;
        let entries = dir.entries().unwrap_or_default();
        entries
            .iter()
            .map(|e| {
                Ok(DirEntry {
                    name: e.name.clone(),
                    id: e.id,
                    kind: self.store.get(e.id)?.kind(),
                })
            })
            .collect()
    }

    /// Copy up to `size` bytes starting at `offset`. Empty past the end.
    pub fn read(&self, id: NodeId, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let content = self.content(id)?;
        let len = content.len() as u64;
        if offset >= len {
            return Ok(Vec::new());
        }
        let start = offset as usize;
        let end = start + size.min(content.len() - start);
        Ok(content[start..end].to_vec())
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn create_file(&mut self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        self.create(parent, name, NodeKind::File)
    }

    pub fn create_dir(&mut self, parent: NodeId, name: &str) -> FsResult<NodeId> {
        self.create(parent, name, NodeKind::Directory)
    }

    fn create(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> FsResult<NodeId> {
        validate_name(name, self.limits.max_name_len)?;
        let dir = self.dir(parent)?;
        if dir.child(name).is_some() {
            return Err(FsError::already_exists(name));
        }
        let count = dir.entries().map_or(0, |e| e.len());
        if count >= self.limits.max_dir_entries {
            tracing::warn!(
                parent,
                limit = self.limits.max_dir_entries,
                "directory entry ceiling reached"
            );
            return Err(FsError::exhausted(format!(
                "directory entry limit of {} reached",
                self.limits.max_dir_entries
            )));
        }

        let id = self.store.allocate()?;
        let node = match kind {
            NodeKind::File => Node::file(id, name),
            NodeKind::Directory => Node::directory(id, name),
        };
        self.store.insert(node)?;
        if let NodeBody::Directory { entries } = &mut self.store.get_mut(parent)?.body {
            entries.push(Entry::new(name, id));
        }
        tracing::debug!(parent, name, id, kind = kind.as_str(), "created node");
        Ok(id)
    }

    /// Remove `name` from `parent` and destroy the node it points at.
    ///
    /// `expect` is the kind the caller is removing: `File` for unlink,
    /// `Directory` for rmdir. Directories must be empty. Returns the id of
    /// the removed node.
    pub fn remove_entry(
        &mut self,
        parent: NodeId,
        name: &str,
        expect: NodeKind,
    ) -> FsResult<NodeId> {
        let dir = self.dir(parent)?;
        let entries = dir.entries().unwrap_or_default();
        let pos = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| FsError::not_found(name))?;
        let target = entries[pos].id;

        let node = self.store.get(target)?;
        match (expect, node.kind()) {
            (NodeKind::File, NodeKind::Directory) => return Err(FsError::is_a_directory(name)),
            (NodeKind::Directory, NodeKind::File) => return Err(FsError::not_a_directory(name)),
            _ => {}
        }
        if node.entries().is_some_and(|e| !e.is_empty()) {
            return Err(FsError::not_empty(name));
        }

        self.store.remove(target)?;
        if let NodeBody::Directory { entries } = &mut self.store.get_mut(parent)?.body {
            entries.remove(pos);
        }
        tracing::debug!(parent, name, id = target, "removed node");
        Ok(target)
    }

    /// Write `data` at `offset`, zero-filling any gap past the old end.
    pub fn write(&mut self, id: NodeId, offset: u64, data: &[u8]) -> FsResult<usize> {
        if data.is_empty() {
            self.content(id)?;
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| FsError::invalid("write offset overflows"))?;
        self.check_size(id, end)?;
        let content = self.content_mut(id)?;
        let end = end as usize;
        let start = offset as usize;
        if end > content.len() {
            grow(content, end, id)?;
        }
        content[start..end].copy_from_slice(data);
        tracing::debug!(id, offset, len = data.len(), "wrote");
        Ok(data.len())
    }

    /// Shrink or zero-extend a file to exactly `size` bytes.
    pub fn truncate(&mut self, id: NodeId, size: u64) -> FsResult<()> {
        self.check_size(id, size)?;
        let content = self.content_mut(id)?;
        let size = size as usize;
        if size > content.len() {
            grow(content, size, id)?;
        } else {
            content.truncate(size);
        }
        tracing::debug!(id, size, "truncated");
        Ok(())
    }

    /// Replace a file's whole contents.
    ///
    /// The new buffer is allocated before the old one is dropped, so a
    /// failure leaves the file as it was.
    pub fn replace(&mut self, id: NodeId, data: &[u8]) -> FsResult<()> {
        self.check_size(id, data.len() as u64)?;
        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(data.len())
            .map_err(|_| FsError::OutOfMemory(format!("inode {id}")))?;
        fresh.extend_from_slice(data);
        *self.content_mut(id)? = fresh;
        tracing::debug!(id, len = data.len(), "replaced");
        Ok(())
    }

    // ========================================================================
    // Lookup references
    // ========================================================================

    /// Hold `id` against reuse until a matching [`Tree::release`].
    pub fn pin(&mut self, id: NodeId) -> FsResult<()> {
        self.store.pin(id)
    }

    pub fn release(&mut self, id: NodeId, count: u64) {
        self.store.unpin(id, count);
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn dir(&self, id: NodeId) -> FsResult<&Node> {
        let node = self.store.get(id)?;
        if !node.is_dir() {
            return Err(FsError::not_a_directory(node_label(node)));
        }
        Ok(node)
    }

    fn content(&self, id: NodeId) -> FsResult<&[u8]> {
        let node = self.store.get(id)?;
        node.content()
            .ok_or_else(|| FsError::is_a_directory(node_label(node)))
    }

    fn content_mut(&mut self, id: NodeId) -> FsResult<&mut Vec<u8>> {
        let node = self.store.get_mut(id)?;
        let label = node_label(node);
        match &mut node.body {
            NodeBody::File { content } => Ok(content),
            NodeBody::Directory { .. } => Err(FsError::is_a_directory(label)),
        }
    }

    /// Reject sizes past the per-file ceiling or the address space.
    fn check_size(&self, id: NodeId, size: u64) -> FsResult<()> {
        let node = self.store.get(id)?;
        if !node.kind().is_file() {
            return Err(FsError::is_a_directory(node_label(node)));
        }
        let limit = self.limits.max_file_size;
        if size > limit || usize::try_from(size).is_err() {
            tracing::warn!(id, size, limit, "file size ceiling reached");
            return Err(FsError::TooLarge {
                path: node_label(node),
                requested: size,
                limit,
            });
        }
        Ok(())
    }
}

/// Zero-extend `content` to `len`, reporting allocation failure instead of aborting.
fn grow(content: &mut Vec<u8>, len: usize, id: NodeId) -> FsResult<()> {
    content
        .try_reserve_exact(len - content.len())
        .map_err(|_| FsError::OutOfMemory(format!("inode {id}")))?;
    content.resize(len, 0);
    Ok(())
}

fn node_label(node: &Node) -> String {
    if node.name.is_empty() {
        format!("inode {}", node.id)
    } else {
        node.name.clone()
    }
}
