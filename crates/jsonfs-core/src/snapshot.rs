//! JSON snapshot codec.
//!
//! A snapshot is an array of node records:
//!
//! ```json
//! [
//!   { "inode": 0, "type": "dir", "entries": [ { "name": "hello.txt", "inode": 1 } ] },
//!   { "inode": 1, "type": "reg", "name": "hello.txt", "data": "hi\n" }
//! ]
//! ```
//!
//! `id` is accepted in place of `inode` on load. File content that is not
//! valid UTF-8 is stored base64-encoded with `"encoding": "base64"`.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::config::Limits;
use crate::error::SnapshotError;
use crate::path::validate_name;
use crate::store::NodeStore;
use crate::tree::Tree;
use crate::types::{Entry, MAX_NODE_ID, Node, NodeBody, NodeId, NodeKind, ROOT_ID};

const ENCODING_BASE64: &str = "base64";
const ENCODING_UTF8: &str = "utf-8";

/// One persisted node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(alias = "id")]
    pub inode: NodeId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<EntryRecord>>,
}

/// A `{name, inode}` pair inside a directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub name: String,
    #[serde(alias = "id")]
    pub inode: NodeId,
}

// ============================================================================
// Decoding
// ============================================================================

/// Parse and validate a snapshot.
pub fn decode(bytes: &[u8], limits: Limits) -> Result<Tree, SnapshotError> {
    let records: Vec<NodeRecord> = serde_json::from_slice(bytes)?;
    from_records(records, limits)
}

/// Build a tree from records, checking every structural invariant.
pub fn from_records(records: Vec<NodeRecord>, limits: Limits) -> Result<Tree, SnapshotError> {
    if records.len() > limits.max_nodes {
        return Err(SnapshotError::LimitExceeded(format!(
            "{} nodes, limit {}",
            records.len(),
            limits.max_nodes
        )));
    }

    let mut nodes: BTreeMap<NodeId, Node> = BTreeMap::new();
    let mut record_names: HashMap<NodeId, String> = HashMap::new();
    for record in records {
        let id = record.inode;
        if id > MAX_NODE_ID {
            return Err(SnapshotError::LimitExceeded(format!(
                "node id {id} above {MAX_NODE_ID}"
            )));
        }
        if nodes.contains_key(&id) {
            return Err(SnapshotError::DuplicateId(id));
        }
        if let Some(name) = &record.name {
            record_names.insert(id, name.clone());
        }
        nodes.insert(id, decode_record(record, &limits)?);
    }

    match nodes.get(&ROOT_ID) {
        None => return Err(SnapshotError::MissingRoot),
        Some(root) if !root.is_dir() => return Err(SnapshotError::RootNotDirectory),
        Some(_) => {}
    }

    // Every entry must point at an existing non-root node, and no node may
    // be linked twice.
    let mut parent_names: HashMap<NodeId, String> = HashMap::new();
    for node in nodes.values() {
        for entry in node.entries().unwrap_or_default() {
            if !nodes.contains_key(&entry.id) {
                return Err(SnapshotError::DanglingEntry {
                    dir: node.id,
                    name: entry.name.clone(),
                    target: entry.id,
                });
            }
            if entry.id == ROOT_ID || parent_names.contains_key(&entry.id) {
                return Err(SnapshotError::MultiplyLinked(entry.id));
            }
            parent_names.insert(entry.id, entry.name.clone());
        }
    }

    // Single-parent links plus reachability from the root rule out cycles.
    let mut seen: HashSet<NodeId> = HashSet::from([ROOT_ID]);
    let mut queue: VecDeque<NodeId> = VecDeque::from([ROOT_ID]);
    while let Some(id) = queue.pop_front() {
        if let Some(entries) = nodes.get(&id).and_then(|n| n.entries()) {
            for entry in entries {
                if seen.insert(entry.id) {
                    queue.push_back(entry.id);
                }
            }
        }
    }
    if let Some(orphan) = nodes.keys().find(|id| !seen.contains(id)) {
        return Err(SnapshotError::Orphan(*orphan));
    }

    // The name under which the parent lists a node is the one that counts.
    for (id, name) in parent_names {
        if let Some(recorded) = record_names.get(&id) {
            if *recorded != name {
                tracing::warn!(id, recorded = %recorded, entry = %name, "record name differs from directory entry");
            }
        }
        if let Some(node) = nodes.get_mut(&id) {
            node.name = name;
        }
    }

    let store = NodeStore::from_nodes(nodes, limits.max_nodes);
    Ok(Tree::from_store(store, limits))
}

fn decode_record(record: NodeRecord, limits: &Limits) -> Result<Node, SnapshotError> {
    let id = record.inode;
    let kind = NodeKind::from_tag(&record.kind).ok_or_else(|| SnapshotError::UnknownType {
        id,
        kind: record.kind.clone(),
    })?;
    let name = record.name.unwrap_or_default();

    match kind {
        NodeKind::File => {
            if record.entries.is_some() {
                return Err(SnapshotError::FieldMismatch {
                    id,
                    reason: "file record has entries",
                });
            }
            let content = decode_data(id, record.data, record.encoding.as_deref())?;
            if content.len() as u64 > limits.max_file_size {
                return Err(SnapshotError::LimitExceeded(format!(
                    "node {id} holds {} bytes, limit {}",
                    content.len(),
                    limits.max_file_size
                )));
            }
            Ok(Node::file_with(id, name, content))
        }
        NodeKind::Directory => {
            if record.data.is_some() {
                return Err(SnapshotError::FieldMismatch {
                    id,
                    reason: "directory record has data",
                });
            }
            let records = record.entries.unwrap_or_default();
            if records.len() > limits.max_dir_entries {
                return Err(SnapshotError::LimitExceeded(format!(
                    "directory {id} has {} entries, limit {}",
                    records.len(),
                    limits.max_dir_entries
                )));
            }
            let mut names = HashSet::with_capacity(records.len());
            let mut entries = Vec::with_capacity(records.len());
            for entry in records {
                if validate_name(&entry.name, limits.max_name_len).is_err() {
                    return Err(SnapshotError::InvalidName {
                        dir: id,
                        name: entry.name,
                    });
                }
                if !names.insert(entry.name.clone()) {
                    return Err(SnapshotError::DuplicateName {
                        dir: id,
                        name: entry.name,
                    });
                }
                entries.push(Entry::new(entry.name, entry.inode));
            }
            Ok(Node::directory_with(id, name, entries))
        }
    }
}

fn decode_data(
    id: NodeId,
    data: Option<String>,
    encoding: Option<&str>,
) -> Result<Vec<u8>, SnapshotError> {
    let Some(data) = data else {
        return Ok(Vec::new());
    };
    match encoding {
        None | Some(ENCODING_UTF8) => Ok(data.into_bytes()),
        Some(ENCODING_BASE64) => BASE64
            .decode(data.as_bytes())
            .map_err(|e| SnapshotError::BadData {
                id,
                reason: e.to_string(),
            }),
        Some(other) => Err(SnapshotError::UnknownEncoding {
            id,
            encoding: other.to_string(),
        }),
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// One record per allocated node, in ascending id order.
pub fn to_records(tree: &Tree) -> Vec<NodeRecord> {
    tree.store().iter().map(encode_node).collect()
}

fn encode_node(node: &Node) -> NodeRecord {
    let name = (node.id != ROOT_ID).then(|| node.name.clone());
    match &node.body {
        NodeBody::File { content } => {
            let (data, encoding) = match std::str::from_utf8(content) {
                Ok(text) => (text.to_string(), None),
                Err(_) => (BASE64.encode(content), Some(ENCODING_BASE64.to_string())),
            };
            NodeRecord {
                inode: node.id,
                kind: NodeKind::File.as_str().to_string(),
                name,
                data: Some(data),
                encoding,
                entries: None,
            }
        }
        NodeBody::Directory { entries } => NodeRecord {
            inode: node.id,
            kind: NodeKind::Directory.as_str().to_string(),
            name,
            data: None,
            encoding: None,
            entries: Some(
                entries
                    .iter()
                    .map(|e| EntryRecord {
                        name: e.name.clone(),
                        inode: e.id,
                    })
                    .collect(),
            ),
        },
    }
}

/// Serialize a tree to JSON bytes.
pub fn encode(tree: &Tree, pretty: bool) -> Result<Vec<u8>, SnapshotError> {
    let records = to_records(tree);
    let bytes = if pretty {
        serde_json::to_vec_pretty(&records)?
    } else {
        serde_json::to_vec(&records)?
    };
    Ok(bytes)
}

// ============================================================================
// Files
// ============================================================================

/// Read and decode a snapshot file.
pub fn load_file(path: &Path, limits: Limits) -> Result<Tree, SnapshotError> {
    let bytes = std::fs::read(path).map_err(|e| SnapshotError::io(path, e))?;
    let tree = decode(&bytes, limits)?;
    tracing::info!(path = %path.display(), nodes = tree.store().len(), "loaded snapshot");
    Ok(tree)
}

/// Encode and atomically replace a snapshot file.
///
/// The JSON goes to a temporary file in the same directory which is then
/// renamed over `path`, so readers see either the old or the new snapshot.
pub fn save_file(tree: &Tree, path: &Path, pretty: bool) -> Result<(), SnapshotError> {
    let bytes = encode(tree, pretty)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| SnapshotError::io(dir, e))?;
    tmp.write_all(&bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| SnapshotError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| SnapshotError::io(path, e.error))?;
    tracing::info!(path = %path.display(), nodes = tree.store().len(), bytes = bytes.len(), "saved snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits::default()
    }

    fn load(json: &str) -> Result<Tree, SnapshotError> {
        decode(json.as_bytes(), limits())
    }

    const SAMPLE: &str = r#"[
        {"inode": 0, "type": "dir", "entries": [
            {"name": "docs", "inode": 1},
            {"name": "hello.txt", "inode": 2}
        ]},
        {"inode": 1, "type": "dir", "name": "docs", "entries": [
            {"name": "a.md", "inode": 3}
        ]},
        {"inode": 2, "type": "reg", "name": "hello.txt", "data": "hello\n"},
        {"inode": 3, "type": "reg", "name": "a.md", "data": ""}
    ]"#;

    #[test]
    fn test_load_sample() {
        let tree = load(SAMPLE).unwrap();
        assert_eq!(tree.stats().nodes, 4);
        let hello = tree.resolve("/hello.txt").unwrap();
        assert_eq!(hello, 2);
        assert_eq!(tree.read(hello, 0, 100).unwrap(), b"hello\n");
        assert_eq!(tree.resolve("/docs/a.md").unwrap(), 3);
    }

    #[test]
    fn test_id_alias_and_extra_fields() {
        let tree = load(r#"[{"id": 0, "type": "dir", "size": 0}]"#).unwrap();
        assert_eq!(tree.stats().nodes, 1);
    }

    #[test]
    fn test_rejects_unknown_type() {
        let err = load(r#"[{"inode": 0, "type": "lnk"}]"#).unwrap_err();
        assert!(matches!(err, SnapshotError::UnknownType { id: 0, .. }));
    }

    #[test]
    fn test_rejects_duplicate_id() {
        let err = load(
            r#"[{"inode": 0, "type": "dir"}, {"inode": 0, "type": "reg", "data": ""}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, SnapshotError::DuplicateId(0)));
    }

    #[test]
    fn test_rejects_bad_root() {
        assert!(matches!(
            load(r#"[{"inode": 1, "type": "dir"}]"#).unwrap_err(),
            SnapshotError::MissingRoot
        ));
        assert!(matches!(
            load(r#"[{"inode": 0, "type": "reg", "data": ""}]"#).unwrap_err(),
            SnapshotError::RootNotDirectory
        ));
    }

    #[test]
    fn test_rejects_dangling_and_orphans() {
        let dangling = r#"[{"inode": 0, "type": "dir", "entries": [{"name": "x", "inode": 9}]}]"#;
        assert!(matches!(
            load(dangling).unwrap_err(),
            SnapshotError::DanglingEntry { target: 9, .. }
        ));

        let orphan = r#"[{"inode": 0, "type": "dir"}, {"inode": 4, "type": "reg", "data": ""}]"#;
        assert!(matches!(load(orphan).unwrap_err(), SnapshotError::Orphan(4)));

        // 1 and 2 point at each other but nothing reaches them
        let cycle = r#"[
            {"inode": 0, "type": "dir"},
            {"inode": 1, "type": "dir", "entries": [{"name": "b", "inode": 2}]},
            {"inode": 2, "type": "dir", "entries": [{"name": "a", "inode": 1}]}
        ]"#;
        assert!(matches!(load(cycle).unwrap_err(), SnapshotError::Orphan(_)));
    }

    #[test]
    fn test_rejects_hard_links() {
        let linked = r#"[
            {"inode": 0, "type": "dir", "entries": [
                {"name": "a", "inode": 1}, {"name": "b", "inode": 1}
            ]},
            {"inode": 1, "type": "reg", "data": ""}
        ]"#;
        assert!(matches!(
            load(linked).unwrap_err(),
            SnapshotError::MultiplyLinked(1)
        ));
    }

    #[test]
    fn test_rejects_field_mismatch_and_names() {
        let file_with_entries = r#"[
            {"inode": 0, "type": "dir", "entries": [{"name": "f", "inode": 1}]},
            {"inode": 1, "type": "reg", "entries": []}
        ]"#;
        assert!(matches!(
            load(file_with_entries).unwrap_err(),
            SnapshotError::FieldMismatch { id: 1, .. }
        ));

        let dup = r#"[
            {"inode": 0, "type": "dir", "entries": [
                {"name": "f", "inode": 1}, {"name": "f", "inode": 2}
            ]},
            {"inode": 1, "type": "reg"},
            {"inode": 2, "type": "reg"}
        ]"#;
        assert!(matches!(
            load(dup).unwrap_err(),
            SnapshotError::DuplicateName { dir: 0, .. }
        ));

        let slash = r#"[
            {"inode": 0, "type": "dir", "entries": [{"name": "a/b", "inode": 1}]},
            {"inode": 1, "type": "reg"}
        ]"#;
        assert!(matches!(
            load(slash).unwrap_err(),
            SnapshotError::InvalidName { dir: 0, .. }
        ));
    }

    #[test]
    fn test_limits_enforced_on_load() {
        let small = Limits {
            max_file_size: 3,
            ..Limits::default()
        };
        let json = r#"[
            {"inode": 0, "type": "dir", "entries": [{"name": "f", "inode": 1}]},
            {"inode": 1, "type": "reg", "data": "four"}
        ]"#;
        assert!(matches!(
            decode(json.as_bytes(), small).unwrap_err(),
            SnapshotError::LimitExceeded(_)
        ));

        let tiny = Limits {
            max_nodes: 1,
            ..Limits::default()
        };
        assert!(matches!(
            decode(json.as_bytes(), tiny).unwrap_err(),
            SnapshotError::LimitExceeded(_)
        ));
    }

    #[test]
    fn test_entry_and_name_ceilings_on_load() {
        let two_entries = r#"[
            {"inode": 0, "type": "dir", "entries": [
                {"name": "a", "inode": 1}, {"name": "b", "inode": 2}
            ]},
            {"inode": 1, "type": "reg"},
            {"inode": 2, "type": "reg"}
        ]"#;
        let one_entry = Limits {
            max_dir_entries: 1,
            ..Limits::default()
        };
        assert!(matches!(
            decode(two_entries.as_bytes(), one_entry).unwrap_err(),
            SnapshotError::LimitExceeded(_)
        ));

        let long_name = r#"[
            {"inode": 0, "type": "dir", "entries": [{"name": "abcdef", "inode": 1}]},
            {"inode": 1, "type": "reg"}
        ]"#;
        let short_names = Limits {
            max_name_len: 5,
            ..Limits::default()
        };
        assert!(matches!(
            decode(long_name.as_bytes(), short_names).unwrap_err(),
            SnapshotError::InvalidName { dir: 0, .. }
        ));
        assert!(load(long_name).is_ok());
    }

    #[test]
    fn test_rejects_id_past_ceiling() {
        let json = r#"[
            {"inode": 0, "type": "dir", "entries": [{"name": "big", "inode": 18446744073709551615}]},
            {"inode": 18446744073709551615, "type": "reg", "name": "big", "data": "x"}
        ]"#;
        assert!(matches!(
            load(json).unwrap_err(),
            SnapshotError::LimitExceeded(_)
        ));
    }

    #[test]
    fn test_create_after_loading_top_id() {
        let json = r#"[
            {"inode": 0, "type": "dir", "entries": [{"name": "top", "inode": 18446744073709551614}]},
            {"inode": 18446744073709551614, "type": "reg", "name": "top", "data": "x"}
        ]"#;
        let mut tree = load(json).unwrap();
        assert_eq!(tree.resolve("/top").unwrap(), MAX_NODE_ID);
        assert_eq!(tree.create_file(ROOT_ID, "next").unwrap(), 1);
        assert_eq!(tree.stats().nodes, 3);
    }

    #[test]
    fn test_entry_name_is_authoritative() {
        let json = r#"[
            {"inode": 0, "type": "dir", "entries": [{"name": "real", "inode": 1}]},
            {"inode": 1, "type": "reg", "name": "stale", "data": "x"}
        ]"#;
        let tree = load(json).unwrap();
        assert_eq!(tree.store().get(1).unwrap().name, "real");
    }

    #[test]
    fn test_binary_content_uses_base64() {
        let mut tree = Tree::new(limits());
        let f = tree.create_file(ROOT_ID, "bin").unwrap();
        tree.write(f, 0, &[0xff, 0x00, 0xfe]).unwrap();

        let records = to_records(&tree);
        let rec = records.iter().find(|r| r.inode == f).unwrap();
        assert_eq!(rec.encoding.as_deref(), Some("base64"));

        let back = from_records(records, limits()).unwrap();
        assert_eq!(back.read(f, 0, 10).unwrap(), vec![0xff, 0x00, 0xfe]);
    }

    #[test]
    fn test_encode_skips_freed_ids() {
        let mut tree = load(SAMPLE).unwrap();
        tree.remove_entry(ROOT_ID, "hello.txt", NodeKind::File).unwrap();
        let records = to_records(&tree);
        let ids: Vec<_> = records.iter().map(|r| r.inode).collect();
        assert_eq!(ids, vec![0, 1, 3]);
        assert!(records[0].name.is_none());
        assert_eq!(records[1].name.as_deref(), Some("docs"));
    }

    #[test]
    fn test_rejects_bad_base64() {
        let json = r#"[
            {"inode": 0, "type": "dir", "entries": [{"name": "f", "inode": 1}]},
            {"inode": 1, "type": "reg", "data": "!!!", "encoding": "base64"}
        ]"#;
        assert!(matches!(
            load(json).unwrap_err(),
            SnapshotError::BadData { id: 1, .. }
        ));
    }
}
