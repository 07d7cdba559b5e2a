//! Node arena with identifier allocation and reuse.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{FsError, FsResult};
use crate::types::{MAX_NODE_ID, Node, NodeBody, NodeId, ROOT_ID, TreeStats};

/// Owns every [`Node`] in the tree.
///
/// Identifiers freed by [`NodeStore::remove`] are handed out again, smallest
/// first, before the store grows past its highest identifier. An id that an
/// adapter still holds a lookup reference on is not reused until the last
/// reference is released with [`NodeStore::unpin`].
#[derive(Debug, Clone)]
pub struct NodeStore {
    nodes: BTreeMap<NodeId, Node>,
    free: BTreeSet<NodeId>,
    /// Lookup references held by a mount adapter.
    pins: BTreeMap<NodeId, u64>,
    /// Removed ids waiting for their pins to drop.
    retired: BTreeSet<NodeId>,
    /// Highest identifier ever allocated or loaded.
    max_allocated: NodeId,
    max_nodes: usize,
}

impl NodeStore {
    /// Create a store holding only an empty root directory.
    pub fn new(max_nodes: usize) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_ID, Node::directory(ROOT_ID, ""));
        Self::from_nodes(nodes, max_nodes)
    }

    /// Build a store from already-validated nodes.
    ///
    /// Gaps below the highest loaded id are not reclaimed while fresh ids
    /// remain above it; only ids freed during this session are reused.
    pub(crate) fn from_nodes(nodes: BTreeMap<NodeId, Node>, max_nodes: usize) -> Self {
        let max_allocated = nodes.keys().next_back().copied().unwrap_or(ROOT_ID);
        Self {
            nodes,
            free: BTreeSet::new(),
            pins: BTreeMap::new(),
            retired: BTreeSet::new(),
            max_allocated,
            max_nodes,
        }
    }

    /// Reserve a fresh identifier.
    ///
    /// Fails with `ResourceExhausted` when the node ceiling is reached. The
    /// reserved id must be passed to [`NodeStore::insert`] right away.
    pub fn allocate(&mut self) -> FsResult<NodeId> {
        self.ensure_capacity()?;
        if let Some(id) = self.free.pop_first() {
            return Ok(id);
        }
        if self.max_allocated < MAX_NODE_ID {
            self.max_allocated += 1;
            return Ok(self.max_allocated);
        }
        // top of the id space is taken; fall back to the lowest hole
        self.lowest_unused()
            .ok_or_else(|| FsError::exhausted("node identifiers"))
    }

    fn lowest_unused(&self) -> Option<NodeId> {
        (ROOT_ID..=MAX_NODE_ID)
            .find(|id| !self.nodes.contains_key(id) && !self.retired.contains(id))
    }

    /// Fails with `ResourceExhausted` if one more node would pass the ceiling.
    pub fn ensure_capacity(&self) -> FsResult<()> {
        if self.nodes.len() >= self.max_nodes {
            tracing::warn!(limit = self.max_nodes, "node ceiling reached");
            return Err(FsError::exhausted(format!(
                "node limit of {} reached",
                self.max_nodes
            )));
        }
        Ok(())
    }

    /// Store a node under its id.
    pub fn insert(&mut self, node: Node) -> FsResult<()> {
        if node.id > MAX_NODE_ID {
            return Err(FsError::invalid(format!("inode {} out of range", node.id)));
        }
        if self.nodes.contains_key(&node.id) || self.retired.contains(&node.id) {
            return Err(FsError::already_exists(format!("inode {}", node.id)));
        }
        self.ensure_capacity()?;
        self.free.remove(&node.id);
        self.max_allocated = self.max_allocated.max(node.id);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Destroy a node and make its id available for reuse once unpinned.
    pub fn remove(&mut self, id: NodeId) -> FsResult<Node> {
        if id == ROOT_ID {
            return Err(FsError::invalid("cannot remove the root directory"));
        }
        let node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| FsError::not_found(format!("inode {id}")))?;
        if self.pins.contains_key(&id) {
            self.retired.insert(id);
        } else {
            self.free.insert(id);
        }
        Ok(node)
    }

    /// Record a lookup reference on a live node.
    pub fn pin(&mut self, id: NodeId) -> FsResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(FsError::not_found(format!("inode {id}")));
        }
        *self.pins.entry(id).or_default() += 1;
        Ok(())
    }

    /// Drop `count` lookup references. A removed node's id becomes reusable
    /// when its last reference goes.
    pub fn unpin(&mut self, id: NodeId, count: u64) {
        let Some(held) = self.pins.get_mut(&id) else {
            return;
        };
        *held = held.saturating_sub(count);
        if *held == 0 {
            self.pins.remove(&id);
            if self.retired.remove(&id) {
                self.free.insert(id);
            }
        }
    }

    pub fn get(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| FsError::not_found(format!("inode {id}")))
    }

    pub fn get_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| FsError::not_found(format!("inode {id}")))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn root(&self) -> FsResult<&Node> {
        self.get(ROOT_ID)
    }

    /// Number of allocated nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root is never removed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocated nodes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            nodes: self.nodes.len(),
            free_ids: self.free.len(),
            retired_ids: self.retired.len(),
            ..Default::default()
        };
        for node in self.nodes.values() {
            match &node.body {
                NodeBody::File { content } => {
                    stats.files += 1;
                    stats.bytes += content.len() as u64;
                }
                NodeBody::Directory { .. } => stats.directories += 1,
            }
        }
        stats
    }
}
