//! Tree snapshots committed as revisions
//!
//! A manifest is a directory tree whose leaves reference blobs. Directory
//! nodes are shared behind `Arc`, so replacing one subtree (what a scoped
//! checkin does) only copies the directories on the path from the root to
//! that subtree; every sibling is shared with the previous manifest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::object::ObjectId;

/// A committed file: blob reference plus the metadata restored on checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub blob: ObjectId,
    pub size: u64,
    /// Unix permission bits
    pub mode: u32,
    /// Modification time, nanoseconds since the Unix epoch
    pub mtime: i64,
}

/// A node in the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    File(FileEntry),
    Dir(Arc<Tree>),
}

/// Directory node, entries sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    entries: BTreeMap<String, Node>,
}

impl Tree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(relative path, entry)` pairs
    pub fn from_files<I, P>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, FileEntry)>,
        P: AsRef<str>,
    {
        let mut tree = Tree::new();
        for (path, entry) in files {
            tree.insert_file(path.as_ref(), entry)?;
        }
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a node by relative path. The empty path is not a node.
    pub fn get(&self, path: &str) -> Option<&Node> {
        let parts = split_path(path).ok()?;
        let (last, dirs) = parts.split_last()?;
        let mut current = self;
        for part in dirs {
            match current.entries.get(*part)? {
                Node::Dir(tree) => current = tree,
                Node::File(_) => return None,
            }
        }
        current.entries.get(*last)
    }

    /// Look up a file by relative path
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        match self.get(path)? {
            Node::File(entry) => Some(entry),
            Node::Dir(_) => None,
        }
    }

    /// Subtree at `path`; the empty path is the whole tree
    pub fn subtree(&self, path: &str) -> Option<Arc<Tree>> {
        if split_path(path).ok()?.is_empty() {
            return Some(Arc::new(self.clone()));
        }
        match self.get(path)? {
            Node::Dir(tree) => Some(Arc::clone(tree)),
            Node::File(_) => None,
        }
    }

    /// Insert a file, creating intermediate directories
    pub fn insert_file(&mut self, path: &str, entry: FileEntry) -> Result<()> {
        let parts = split_path(path)?;
        let Some((last, dirs)) = parts.split_last() else {
            return Err(Error::invalid_path(path));
        };
        let parent = self.dir_mut(dirs, path)?;
        if let Some(Node::Dir(_)) = parent.entries.get(*last) {
            return Err(Error::invalid_path(format!("{} is a directory", path)));
        }
        parent.entries.insert(last.to_string(), Node::File(entry));
        Ok(())
    }

    /// Return a copy of this tree with the subtree at `path` replaced.
    ///
    /// The empty path replaces the whole tree. Untouched directories are
    /// shared with `self`.
    pub fn with_subtree(&self, path: &str, subtree: Arc<Tree>) -> Result<Tree> {
        let parts = split_path(path)?;
        let Some((last, dirs)) = parts.split_last() else {
            return Ok(Arc::unwrap_or_clone(subtree));
        };
        let mut root = self.clone();
        let parent = root.dir_mut(dirs, path)?;
        parent.entries.insert(last.to_string(), Node::Dir(subtree));
        Ok(root)
    }

    /// All files as `(relative path, entry)`, in path order
    pub fn files(&self) -> Vec<(String, FileEntry)> {
        let mut out = Vec::new();
        self.collect_files("", &mut out);
        out
    }

    /// All directories as relative paths, parents before children
    pub fn dirs(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_dirs("", &mut out);
        out
    }

    pub fn file_count(&self) -> usize {
        self.entries
            .values()
            .map(|node| match node {
                Node::File(_) => 1,
                Node::Dir(tree) => tree.file_count(),
            })
            .sum()
    }

    fn collect_files(&self, prefix: &str, out: &mut Vec<(String, FileEntry)>) {
        for (name, node) in &self.entries {
            let path = join_path(prefix, name);
            match node {
                Node::File(entry) => out.push((path, *entry)),
                Node::Dir(tree) => tree.collect_files(&path, out),
            }
        }
    }

    fn collect_dirs(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, node) in &self.entries {
            if let Node::Dir(tree) = node {
                let path = join_path(prefix, name);
                out.push(path.clone());
                tree.collect_dirs(&path, out);
            }
        }
    }

    /// Walk down `dirs`, copying shared directories on the way (path copying)
    fn dir_mut(&mut self, dirs: &[&str], full_path: &str) -> Result<&mut Tree> {
        let mut current = self;
        for part in dirs {
            let node = current
                .entries
                .entry(part.to_string())
                .or_insert_with(|| Node::Dir(Arc::new(Tree::new())));
            current = match node {
                Node::Dir(tree) => Arc::make_mut(tree),
                Node::File(_) => {
                    return Err(Error::invalid_path(format!(
                        "{}: {} is a file",
                        full_path, part
                    )));
                }
            };
        }
        Ok(current)
    }
}

/// Normalize a relative path: forward slashes, no empty, `.` or `..` parts.
///
/// Returns the empty string for the root.
pub fn normalize_path(path: &str) -> Result<String> {
    Ok(split_path(path)?.join("/"))
}

/// Join two normalized relative paths
pub fn join_path(prefix: &str, name: &str) -> String {
    match (prefix.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{}/{}", prefix, name),
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(Error::PathOutsideScope(path.to_string())),
            _ => parts.push(part),
        }
    }
    Ok(parts)
}
