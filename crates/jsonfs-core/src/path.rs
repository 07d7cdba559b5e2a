//! Slash-separated path handling and resolution.

use crate::error::{FsError, FsResult};
use crate::store::NodeStore;
use crate::types::{NodeId, ROOT_ID};

/// Lazy iterator over the non-empty components of a path.
///
/// Leading, trailing and repeated slashes produce no components, so `"/"`,
/// `""` and `"//"` all yield nothing.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    rest: &'a str,
}

impl<'a> Segments<'a> {
    pub fn new(path: &'a str) -> Self {
        Self { rest: path }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            if self.rest.is_empty() {
                return None;
            }
            let (head, tail) = match self.rest.find('/') {
                Some(i) => (&self.rest[..i], &self.rest[i + 1..]),
                None => (self.rest, ""),
            };
            self.rest = tail;
            if !head.is_empty() {
                return Some(head);
            }
        }
    }
}

/// Components of `path`.
pub fn segments(path: &str) -> Segments<'_> {
    Segments::new(path)
}

/// Check a path component against the entry-name contract.
///
/// Names are non-empty, at most `max_len` bytes, contain neither `/` nor NUL,
/// and are not `.` or `..` (there are no parent back-references to follow).
pub fn validate_name(name: &str, max_len: usize) -> FsResult<()> {
    if name.is_empty() {
        return Err(FsError::invalid("empty name"));
    }
    if name == "." || name == ".." {
        return Err(FsError::invalid(format!("reserved name {name:?}")));
    }
    if name.contains(['/', '\0']) {
        return Err(FsError::invalid(format!("name {name:?} contains '/' or NUL")));
    }
    if name.len() > max_len {
        return Err(FsError::invalid(format!(
            "name longer than {max_len} bytes"
        )));
    }
    Ok(())
}

/// Split `path` into its parent path and final component.
///
/// `"/a/b/"` splits into `("/a", "b")`. The root has no final component and
/// is rejected with `InvalidArgument`.
pub fn split_parent(path: &str) -> FsResult<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(FsError::invalid(format!("path {path:?} has no final component")));
    }
    Ok(match trimmed.rfind('/') {
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("", trimmed),
    })
}

/// Walk `path` from the root, one component at a time.
///
/// Fails with `NotFound` when a component is missing or when a file is
/// reached with components left over.
pub fn resolve(store: &NodeStore, path: &str) -> FsResult<NodeId> {
    let mut current = ROOT_ID;
    for segment in segments(path) {
        if segment == "." || segment == ".." || segment.contains('\0') {
            return Err(FsError::invalid(format!("malformed path {path:?}")));
        }
        let node = store.get(current)?;
        // A file reached mid-walk has no entries, so the lookup misses.
        current = node
            .child(segment)
            .ok_or_else(|| FsError::not_found(path))?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entry, Node, NodeBody};

    fn sample_store() -> NodeStore {
        // /a/ (dir 1) containing file b (2), /c (file 3)
        let mut store = NodeStore::new(16);
        store
            .insert(Node::directory_with(1, "a", vec![Entry::new("b", 2)]))
            .unwrap();
        store.insert(Node::file(2, "b")).unwrap();
        store.insert(Node::file(3, "c")).unwrap();
        let root = store.get_mut(ROOT_ID).unwrap();
        root.body = NodeBody::Directory {
            entries: vec![Entry::new("a", 1), Entry::new("c", 3)],
        };
        store
    }

    #[test]
    fn test_segments_skip_empty() {
        let parts: Vec<_> = segments("//a///b/").collect();
        assert_eq!(parts, vec!["a", "b"]);
        assert_eq!(segments("/").count(), 0);
        assert_eq!(segments("").count(), 0);
    }

    #[test]
    fn test_resolve() {
        let store = sample_store();
        assert_eq!(resolve(&store, "/").unwrap(), ROOT_ID);
        assert_eq!(resolve(&store, "/a").unwrap(), 1);
        assert_eq!(resolve(&store, "/a/").unwrap(), 1);
        assert_eq!(resolve(&store, "a/b").unwrap(), 2);
        assert_eq!(resolve(&store, "/c").unwrap(), 3);
    }

    #[test]
    fn test_resolve_misses() {
        let store = sample_store();
        assert!(matches!(resolve(&store, "/x"), Err(FsError::NotFound(_))));
        assert!(matches!(resolve(&store, "/A"), Err(FsError::NotFound(_))));
        // cannot descend into a file
        assert!(matches!(resolve(&store, "/c/d"), Err(FsError::NotFound(_))));
        assert!(matches!(
            resolve(&store, "/a/../c"),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/a/b").unwrap(), ("/a", "b"));
        assert_eq!(split_parent("/a/b/").unwrap(), ("/a", "b"));
        assert_eq!(split_parent("/a").unwrap(), ("", "a"));
        assert_eq!(split_parent("a").unwrap(), ("", "a"));
        assert!(split_parent("/").is_err());
        assert!(split_parent("").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("notes.txt", 255).is_ok());
        assert!(validate_name("", 255).is_err());
        assert!(validate_name("..", 255).is_err());
        assert!(validate_name("a\0b", 255).is_err());
        assert!(validate_name("abcd", 3).is_err());
    }
}
