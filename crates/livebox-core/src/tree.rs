//! In-memory project tree used to seed a sandbox.
//!
//! The tree is a one-time seed: once mounted, the sandbox filesystem is the
//! authoritative copy and the tree is dropped.

use crate::error::{CoreError, Result};
use bytes::Bytes;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Contents of a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContents {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
}

impl FileContents {
    /// Raw bytes of the file regardless of variant.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    /// Text view of the file, lossy for binary content.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s),
            Self::Binary(b) => String::from_utf8_lossy(b),
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classify raw bytes read from disk: valid UTF-8 becomes `Text`.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        match String::from_utf8(raw) {
            Ok(text) => Self::Text(text),
            Err(e) => Self::Binary(Bytes::from(e.into_bytes())),
        }
    }
}

impl From<&str> for FileContents {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FileContents {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for FileContents {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(b))
    }
}

impl From<Bytes> for FileContents {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

/// A node of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File(FileContents),
    Directory(BTreeMap<String, Node>),
}

/// One step of a mount plan, see [`VirtualFileTree::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry<'a> {
    Directory(String),
    File(String, &'a FileContents),
}

impl Entry<'_> {
    /// Normalized path of the entry (no leading slash).
    pub fn path(&self) -> &str {
        match self {
            Self::Directory(p) | Self::File(p, _) => p,
        }
    }
}

/// Split a slash-separated path into validated segments.
///
/// A leading `/` is optional. Empty, `.` and `..` segments are rejected so a
/// path can never leave the tree root.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Err(CoreError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty",
        });
    }
    trimmed
        .split('/')
        .map(|seg| match seg {
            "" => Err(CoreError::InvalidPath {
                path: path.to_string(),
                reason: "empty segment",
            }),
            "." | ".." => Err(CoreError::InvalidPath {
                path: path.to_string(),
                reason: "relative segment",
            }),
            _ => Ok(seg),
        })
        .collect()
}

/// Canonical form of a path: validated segments joined without a leading slash.
pub fn normalize_path(path: &str) -> Result<String> {
    Ok(split_path(path)?.join("/"))
}

/// Hierarchical path → content mapping materialized into a sandbox on mount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualFileTree {
    root: BTreeMap<String, Node>,
}

impl VirtualFileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, contents)` pairs.
    pub fn from_files<I, P, C>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<FileContents>,
    {
        let mut tree = Self::new();
        for (path, contents) in files {
            tree.insert(path.as_ref(), contents)?;
        }
        Ok(tree)
    }

    /// Insert a file, creating intermediate directories.
    ///
    /// Inserting at an existing file path replaces its contents. A path that
    /// crosses an existing file, or names an existing directory, is rejected.
    pub fn insert(&mut self, path: &str, contents: impl Into<FileContents>) -> Result<()> {
        let segments = split_path(path)?;
        let (name, parents) = segments
            .split_last()
            .ok_or_else(|| CoreError::InvalidPath {
                path: path.to_string(),
                reason: "path is empty",
            })?;
        let dir = self.directory_mut(path, parents)?;
        if let Some(Node::Directory(_)) = dir.get(*name) {
            return Err(CoreError::InvalidPath {
                path: path.to_string(),
                reason: "a directory already exists at this path",
            });
        }
        dir.insert(name.to_string(), Node::File(contents.into()));
        Ok(())
    }

    /// Insert an (initially empty) directory and its parents.
    pub fn insert_dir(&mut self, path: &str) -> Result<()> {
        let segments = split_path(path)?;
        self.directory_mut(path, &segments)?;
        Ok(())
    }

    fn directory_mut(
        &mut self,
        path: &str,
        segments: &[&str],
    ) -> Result<&mut BTreeMap<String, Node>> {
        let mut dir = &mut self.root;
        for seg in segments {
            let node = dir
                .entry(seg.to_string())
                .or_insert_with(|| Node::Directory(BTreeMap::new()));
            dir = match node {
                Node::Directory(children) => children,
                Node::File(_) => {
                    return Err(CoreError::InvalidPath {
                        path: path.to_string(),
                        reason: "a parent segment is a file",
                    })
                }
            };
        }
        Ok(dir)
    }

    /// Look up a node by path.
    pub fn get(&self, path: &str) -> Option<&Node> {
        let segments = split_path(path).ok()?;
        let (last, parents) = segments.split_last()?;
        let mut dir = &self.root;
        for seg in parents {
            match dir.get(*seg)? {
                Node::Directory(children) => dir = children,
                Node::File(_) => return None,
            }
        }
        dir.get(*last)
    }

    /// Look up file contents by path.
    pub fn file(&self, path: &str) -> Option<&FileContents> {
        match self.get(path)? {
            Node::File(contents) => Some(contents),
            Node::Directory(_) => None,
        }
    }

    /// Number of files in the tree.
    pub fn len(&self) -> usize {
        fn count(dir: &BTreeMap<String, Node>) -> usize {
            dir.values()
                .map(|n| match n {
                    Node::File(_) => 1,
                    Node::Directory(children) => count(children),
                })
                .sum()
        }
        count(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mount plan: every directory precedes its contents, siblings in name order.
    pub fn entries(&self) -> Vec<Entry<'_>> {
        fn walk<'a>(prefix: &str, dir: &'a BTreeMap<String, Node>, out: &mut Vec<Entry<'a>>) {
            for (name, node) in dir {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                match node {
                    Node::File(contents) => out.push(Entry::File(path, contents)),
                    Node::Directory(children) => {
                        out.push(Entry::Directory(path.clone()));
                        walk(&path, children, out);
                    }
                }
            }
        }

        let mut out = Vec::new();
        walk("", &self.root, &mut out);
        out
    }
}
